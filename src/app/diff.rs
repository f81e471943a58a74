use std::collections::BTreeSet;

use crate::app::error::AppError;
use crate::app::models::InventorySnapshot;

/// `all − visible`, ascending and duplicate-free.
pub fn compute_diff(all: &[String], visible: &[String]) -> Vec<String> {
    let visible: BTreeSet<&str> = visible.iter().map(String::as_str).collect();
    all.iter()
        .map(String::as_str)
        .filter(|pkg| !visible.contains(pkg))
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Per-session memo of the last successful inventories and the diff derived from them.
#[derive(Debug, Default)]
pub struct DiffCache {
    visible: Option<Vec<String>>,
    all: Option<Vec<String>>,
    cached: Option<Vec<String>>,
}

impl DiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes in a fresh fetch. A side that failed is forgotten rather than kept from an earlier
    /// fetch, so the diff stays unavailable until one fetch succeeds on both sides.
    pub fn record(&mut self, snapshot: &InventorySnapshot) {
        self.visible = snapshot
            .visible_ok
            .then(|| snapshot.visible.packages.clone());
        self.all = snapshot.all_ok.then(|| snapshot.all.packages.clone());
        self.cached = None;
    }

    pub fn is_available(&self) -> bool {
        self.visible.is_some() && self.all.is_some()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn diff(&mut self, trace_id: &str) -> Result<Vec<String>, AppError> {
        if let Some(cached) = self.cached.as_ref() {
            return Ok(cached.clone());
        }
        let (Some(all), Some(visible)) = (self.all.as_ref(), self.visible.as_ref()) else {
            return Err(AppError::diff_unavailable(
                "Fetch both package lists before computing the difference",
                trace_id,
            ));
        };
        let diff = compute_diff(all, visible);
        self.cached = Some(diff.clone());
        Ok(diff)
    }
}

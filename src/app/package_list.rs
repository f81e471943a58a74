use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use tracing::info;

use crate::app::error::AppError;

/// One package per line; blank lines and `#` comments are skipped.
pub fn parse_package_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_package_list(path: &Path, trace_id: &str) -> Result<Vec<String>, AppError> {
    let content = fs::read_to_string(path).map_err(|err| {
        AppError::file_io(
            format!("Failed to read package list {}: {err}", path.display()),
            trace_id,
        )
    })?;
    let packages = parse_package_list(&content);
    info!(trace_id = %trace_id, path = %path.display(), count = packages.len(), "package list loaded");
    Ok(packages)
}

pub fn save_selection(path: &Path, packages: &[String], trace_id: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::file_io(
                format!("Failed to create {}: {err}", parent.display()),
                trace_id,
            )
        })?;
    }
    let mut body = packages.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(path, body).map_err(|err| {
        AppError::file_io(
            format!("Failed to save selection to {}: {err}", path.display()),
            trace_id,
        )
    })
}

/// A selection that was never saved is empty, not an error.
pub fn load_selection(path: &Path, trace_id: &str) -> Result<Vec<String>, AppError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_package_list(&content)),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(AppError::file_io(
            format!("Failed to read selection {}: {err}", path.display()),
            trace_id,
        )),
    }
}

pub fn filter_packages<'a>(packages: &'a [String], needle: &str) -> Vec<&'a String> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return packages.iter().collect();
    }
    packages
        .iter()
        .filter(|pkg| pkg.to_lowercase().contains(&needle))
        .collect()
}

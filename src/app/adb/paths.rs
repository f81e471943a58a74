use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

pub const UNKNOWN_DEVICE_ID: &str = "Unknown_Device";

pub const OPERATION_LOG_FILE: &str = "operation_log.txt";
pub const UNINSTALL_LOG_FILE: &str = "uninstall_log.txt";
pub const INSTALL_EXISTING_LOG_FILE: &str = "install_existing_log.txt";
pub const VISIBLE_PACKAGES_FILE: &str = "installed_packages.txt";
pub const ALL_PACKAGES_FILE: &str = "all_installed_packages.txt";
pub const SAVED_SELECTION_FILE: &str = "saved_selection.txt";

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W").expect("static regex"))
}

/// Turns a raw `ro.product.model` value into a path-safe directory name.
pub fn sanitize_device_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return UNKNOWN_DEVICE_ID.to_string();
    }
    let sanitized = non_word().replace_all(trimmed, "_").into_owned();
    if sanitized == UNKNOWN_DEVICE_ID {
        // A model literally named like the sentinel must not share its directory.
        return format!("{sanitized}_model");
    }
    sanitized
}

pub fn device_state_dir(state_root: &Path, device_id: &str) -> PathBuf {
    state_root.join(device_id)
}

pub fn default_state_root() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("droid_batch")
        .join("devices")
}

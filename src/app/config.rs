use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::adb::paths::default_state_root;
use crate::app::error::AppError;

/// Upper bound for the short, per-call device timeouts (probe and per-package operation).
pub const MAX_SHORT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AdbSettings {
    /// Explicit tool path; bypasses resolution when set.
    pub command_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutSettings {
    pub probe_secs: u64,
    pub inventory_secs: u64,
    pub operation_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            probe_secs: 15,
            inventory_secs: 30,
            operation_secs: 15,
        }
    }
}

impl TimeoutSettings {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn inventory(&self) -> Duration {
        Duration::from_secs(self.inventory_secs)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_secs(self.operation_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// Parent of the per-device state directories. Empty means the platform default.
    pub state_root: String,
}

impl StorageSettings {
    pub fn resolved_state_root(&self) -> PathBuf {
        let trimmed = self.state_root.trim();
        if trimmed.is_empty() {
            default_state_root()
        } else {
            PathBuf::from(trimmed)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MirroringSettings {
    pub command_path: String,
    pub extra_args: String,
}

impl Default for MirroringSettings {
    fn default() -> Self {
        Self {
            command_path: "scrcpy".to_string(),
            extra_args: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub worker_limit: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { worker_limit: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub mirroring: MirroringSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adb: AdbSettings::default(),
            timeouts: TimeoutSettings::default(),
            storage: StorageSettings::default(),
            mirroring: MirroringSettings::default(),
            scheduler: SchedulerSettings::default(),
            logging: LoggingSettings::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DROID_BATCH_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".droid_batch_config.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &AppConfig, trace_id: &str) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::file_io(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config).map_err(|err| {
        AppError::validation(format!("Failed to serialize config: {err}"), trace_id)
    })?;
    fs::write(path, payload)
        .map_err(|err| AppError::file_io(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = TimeoutSettings::default();
    if !(1..=MAX_SHORT_TIMEOUT_SECS).contains(&config.timeouts.probe_secs) {
        config.timeouts.probe_secs = defaults.probe_secs;
    }
    if !(1..=MAX_SHORT_TIMEOUT_SECS).contains(&config.timeouts.operation_secs) {
        config.timeouts.operation_secs = defaults.operation_secs;
    }
    if !(1..=600).contains(&config.timeouts.inventory_secs) {
        config.timeouts.inventory_secs = defaults.inventory_secs;
    }
    if !(1..=8).contains(&config.scheduler.worker_limit) {
        config.scheduler.worker_limit = SchedulerSettings::default().worker_limit;
    }
    if config.mirroring.command_path.trim().is_empty() {
        config.mirroring.command_path = MirroringSettings::default().command_path;
    }
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = LoggingSettings::default().log_level;
    }
    config
}

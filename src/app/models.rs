use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::app::adb::locator::CandidateSource;
use crate::app::adb::paths::{INSTALL_EXISTING_LOG_FILE, UNINSTALL_LOG_FILE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolInfo {
    pub command_path: PathBuf,
    pub source: Option<CandidateSource>,
}

/// Live association between a tool binary and the one device answering it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub tool_path: String,
    pub serial: String,
    pub device_id: String,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InventoryKind {
    Visible,
    All,
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryKind::Visible => write!(f, "visible"),
            InventoryKind::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    pub kind: InventoryKind,
    pub packages: Vec<String>,
}

impl Inventory {
    pub fn empty(kind: InventoryKind) -> Self {
        Self {
            kind,
            packages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub visible: Inventory,
    pub all: Inventory,
    pub visible_ok: bool,
    pub all_ok: bool,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    Install,
    Uninstall,
}

impl BatchOperation {
    pub fn log_file_name(self) -> &'static str {
        match self {
            BatchOperation::Install => INSTALL_EXISTING_LOG_FILE,
            BatchOperation::Uninstall => UNINSTALL_LOG_FILE,
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            BatchOperation::Install => "install-existing",
            BatchOperation::Uninstall => "uninstall",
        }
    }

    pub fn command_template(self) -> &'static str {
        match self {
            BatchOperation::Install => "adb shell pm install-existing <package>",
            BatchOperation::Uninstall => "adb shell pm uninstall --user 0 <package>",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationRecord {
    pub package: String,
    pub outcome: Outcome,
}

impl OperationRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub operation: BatchOperation,
    pub records: Vec<OperationRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub log_path: Option<PathBuf>,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.timestamp, self.level.label(), self.message)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MirroringLaunch {
    pub pid: u32,
    pub command_path: String,
    pub args: Vec<String>,
}

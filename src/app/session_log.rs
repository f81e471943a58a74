//! Append-only operation log shared by every component.
//!
//! Each line is mirrored to `tracing`, appended to `operation_log.txt` in the current session's
//! state directory (when one is attached), and published to every subscriber channel. All three
//! happen under one mutex, so subscribers observe lines in a single total order.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::Local;
use tracing::{error, info, warn};

use crate::app::adb::paths::OPERATION_LOG_FILE;
use crate::app::models::{LogLevel, LogLine};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keyword table for levelling text we did not write ourselves (raw tool stderr and the like).
/// First match wins.
const EXTERNAL_LEVEL_RULES: &[(&str, LogLevel)] = &[
    ("exception", LogLevel::Error),
    ("failure", LogLevel::Error),
    ("failed", LogLevel::Error),
    ("error", LogLevel::Error),
    ("warning", LogLevel::Warning),
    ("warn", LogLevel::Warning),
    ("success", LogLevel::Success),
];

pub fn infer_level(text: &str) -> LogLevel {
    let lower = text.to_lowercase();
    EXTERNAL_LEVEL_RULES
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, level)| *level)
        .unwrap_or(LogLevel::Info)
}

#[derive(Default)]
struct Sink {
    log_path: Option<PathBuf>,
    subscribers: Vec<Sender<LogLine>>,
    write_failed: bool,
}

#[derive(Default)]
pub struct SessionLogger {
    sink: Mutex<Sink>,
}

impl SessionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts persisting to `state_dir/operation_log.txt`.
    pub fn attach(&self, state_dir: &Path) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.log_path = Some(state_dir.join(OPERATION_LOG_FILE));
            sink.write_failed = false;
        }
    }

    pub fn detach(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.log_path = None;
        }
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.sink.lock().ok().and_then(|sink| sink.log_path.clone())
    }

    pub fn subscribe(&self) -> Receiver<LogLine> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut sink) = self.sink.lock() {
            sink.subscribers.push(tx);
        }
        rx
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Logs unclassified third-party text line by line, levelled by the rule table.
    pub fn log_external(&self, text: &str) {
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            self.log(infer_level(line), line.to_string());
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let line = LogLine {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Info | LogLevel::Success => info!(tag = level.label(), "{}", line.message),
            LogLevel::Warning => warn!("{}", line.message),
            LogLevel::Error => error!("{}", line.message),
        }

        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        if let Some(path) = sink.log_path.clone() {
            match append_line(&path, &line.to_string()) {
                Ok(()) => sink.write_failed = false,
                Err(err) => {
                    if !sink.write_failed {
                        warn!(path = %path.display(), error = %err, "operation log write failed; continuing");
                    }
                    sink.write_failed = true;
                }
            }
        }
        sink.subscribers.retain(|tx| tx.send(line.clone()).is_ok());
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

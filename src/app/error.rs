use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolNotFound,
    BinaryUnresponsive,
    DaemonStartTimeout,
    NoDeviceFound,
    LaunchFailure,
    TimeoutExceeded,
    OperationFailure,
    DiffUnavailable,
    FileIoFailure,
    Validation,
    NoSession,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ToolNotFound => "ERR_TOOL_NOT_FOUND",
            ErrorKind::BinaryUnresponsive => "ERR_BINARY_UNRESPONSIVE",
            ErrorKind::DaemonStartTimeout => "ERR_DAEMON_START_TIMEOUT",
            ErrorKind::NoDeviceFound => "ERR_NO_DEVICE",
            ErrorKind::LaunchFailure => "ERR_LAUNCH",
            ErrorKind::TimeoutExceeded => "ERR_TIMEOUT",
            ErrorKind::OperationFailure => "ERR_OPERATION",
            ErrorKind::DiffUnavailable => "ERR_DIFF_UNAVAILABLE",
            ErrorKind::FileIoFailure => "ERR_FILE_IO",
            ErrorKind::Validation => "ERR_VALIDATION",
            ErrorKind::NoSession => "ERR_NO_SESSION",
        }
    }

    /// Kinds raised while resolving the tool or bringing up a device session.
    pub fn is_session_failure(self) -> bool {
        matches!(
            self,
            ErrorKind::ToolNotFound
                | ErrorKind::BinaryUnresponsive
                | ErrorKind::DaemonStartTimeout
                | ErrorKind::NoDeviceFound
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub kind: ErrorKind,
    pub code: &'static str,
    pub trace_id: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            kind,
            code: kind.code(),
            trace_id: trace_id.into(),
        }
    }

    pub fn tool_not_found(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolNotFound, message, trace_id)
    }

    pub fn unresponsive(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::BinaryUnresponsive, message, trace_id)
    }

    pub fn daemon_timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::DaemonStartTimeout, message, trace_id)
    }

    pub fn no_device(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoDeviceFound, message, trace_id)
    }

    pub fn launch(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::LaunchFailure, message, trace_id)
    }

    pub fn timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutExceeded, message, trace_id)
    }

    pub fn operation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailure, message, trace_id)
    }

    pub fn diff_unavailable(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::DiffUnavailable, message, trace_id)
    }

    pub fn file_io(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileIoFailure, message, trace_id)
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, trace_id)
    }

    pub fn no_session(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoSession, message, trace_id)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::TimeoutExceeded
    }

    /// Message meant for a person: the classified reason, plus a connection hint for
    /// session-level failures.
    pub fn user_message(&self) -> String {
        if self.kind.is_session_failure() {
            format!(
                "{}. Check the USB cable and that USB debugging is authorized on the device.",
                self.error.trim_end_matches('.')
            )
        } else {
            self.error.clone()
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

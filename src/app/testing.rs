use std::sync::Mutex;
use std::time::Duration;

use crate::app::adb::runner::{CommandOutput, CommandRunner};
use crate::app::error::AppError;

type Handler = dyn Fn(&str, &[String]) -> Result<CommandOutput, AppError> + Send + Sync;

/// Scripted stand-in for adb; the handler sees the program and argv of every call.
pub struct FakeRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> Result<CommandOutput, AppError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn joined_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(program, args)| format!("{program} {}", args.join(" ")))
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
        _trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        self.calls
            .lock()
            .expect("calls")
            .push((program.to_string(), args.to_vec()));
        (self.handler)(program, args)
    }
}

pub fn ok(stdout: &str) -> Result<CommandOutput, AppError> {
    Ok(CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    })
}

pub fn exit(code: i32, stderr: &str) -> Result<CommandOutput, AppError> {
    Ok(CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
    })
}

pub fn timed_out() -> Result<CommandOutput, AppError> {
    Err(AppError::timeout("Command timed out after 15s", "fake"))
}

pub fn has(args: &[String], needle: &str) -> bool {
    args.iter().any(|arg| arg == needle)
}

pub const DEVICES_ONE: &str = "List of devices attached\nSER123\tdevice product:p model:Pixel_7_Pro device:d transport_id:1\n\n";

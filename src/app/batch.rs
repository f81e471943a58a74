use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tracing::{info, warn};

use crate::app::adb::apps::{install_existing_args, uninstall_for_user_args};
use crate::app::adb::runner::CommandRunner;
use crate::app::models::{BatchOperation, BatchReport, OperationRecord, Outcome, Session};
use crate::app::session_log::{SessionLogger, TIMESTAMP_FORMAT};

/// Per-batch log file, truncated when the batch starts. Writes are best effort; once the file
/// misbehaves it is abandoned for the rest of the batch.
struct BatchLog {
    path: PathBuf,
    file: Option<File>,
}

impl BatchLog {
    fn start(state_dir: &Path, operation: BatchOperation, total: usize) -> Self {
        let path = state_dir.join(operation.log_file_name());
        let file = fs::create_dir_all(state_dir)
            .and_then(|_| File::create(&path))
            .map_err(|err| warn!(path = %path.display(), error = %err, "cannot open batch log"))
            .ok();
        let mut log = Self { path, file };
        log.write(&format!("Batch started at {}", now()));
        log.write(&format!(
            "Running {} for {total} packages using {}...",
            operation.verb(),
            operation.command_template()
        ));
        log.write("");
        log
    }

    fn write(&mut self, line: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(file, "{line}") {
            warn!(path = %self.path.display(), error = %err, "batch log write failed");
            self.file = None;
        }
    }

    fn finish(mut self, succeeded: usize, failed: usize) -> Option<PathBuf> {
        self.write("");
        self.write(&format!(
            "Batch complete: {succeeded} succeeded, {failed} failed."
        ));
        self.write(&format!("Batch ended at {}", now()));
        self.file.map(|_| self.path)
    }
}

fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn command_args(operation: BatchOperation, serial: &str, package: &str) -> Vec<String> {
    match operation {
        BatchOperation::Install => install_existing_args(serial, package),
        BatchOperation::Uninstall => uninstall_for_user_args(serial, package),
    }
}

/// Trims, drops blanks and collapses repeats while keeping first-seen order.
pub fn normalize_selection(packages: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    packages
        .iter()
        .map(|pkg| pkg.trim())
        .filter(|pkg| !pkg.is_empty())
        .filter(|pkg| seen.insert(pkg.to_string()))
        .map(str::to_string)
        .collect()
}

/// Applies `operation` to each package in turn. Never aborts early: every package gets a record.
pub fn run_batch(
    runner: &dyn CommandRunner,
    session: &Session,
    logger: &SessionLogger,
    operation: BatchOperation,
    packages: &[String],
    timeout: Duration,
    trace_id: &str,
) -> BatchReport {
    let packages = normalize_selection(packages);
    let started_at = now();
    let mut log = BatchLog::start(&session.state_dir, operation, packages.len());

    logger.info(format!(
        "Starting {} of {} packages on {}",
        operation.verb(),
        packages.len(),
        session.device_id
    ));

    let mut records = Vec::with_capacity(packages.len());
    for package in &packages {
        log.write(&format!("{}: {package}", operation.verb()));
        let args = command_args(operation, &session.serial, package);
        let outcome = match runner.run(&session.tool_path, &args, timeout, trace_id) {
            Ok(output) if output.success() => {
                // Tool chatter on an otherwise clean exit, e.g. linker warnings.
                logger.log_external(&output.stderr);
                Outcome::Success
            }
            Ok(output) => Outcome::Failure {
                reason: failure_reason(output.exit_code, &output.stderr, &output.stdout),
            },
            Err(err) => Outcome::Failure { reason: err.error },
        };

        match &outcome {
            Outcome::Success => {
                log.write(&format!("Package '{package}' {} succeeded.", operation.verb()));
                logger.success(format!("{} {package}: success", operation.verb()));
            }
            Outcome::Failure { reason } => {
                log.write(&format!("Failed to {} package: {package}", operation.verb()));
                log.write(&format!("Error: {reason}"));
                logger.error(format!("{} {package}: {reason}", operation.verb()));
            }
        }
        records.push(OperationRecord {
            package: package.clone(),
            outcome,
        });
    }

    let succeeded = records.iter().filter(|r| r.is_success()).count();
    let failed = records.len() - succeeded;
    let log_path = log.finish(succeeded, failed);
    logger.info(format!(
        "{} finished: {succeeded} succeeded, {failed} failed",
        operation.verb()
    ));
    info!(trace_id = %trace_id, operation = operation.verb(), succeeded, failed, "batch finished");

    BatchReport {
        operation,
        records,
        succeeded,
        failed,
        log_path,
        started_at,
        finished_at: now(),
    }
}

fn failure_reason(exit_code: Option<i32>, stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

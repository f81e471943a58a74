use std::collections::HashSet;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::error::AppError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
// How long to wait for pipe drains once the child itself is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Seam between device logic and real subprocesses.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    active: Arc<Mutex<HashSet<u32>>>,
    closed: Arc<AtomicBool>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Force-kills every child tree still in flight and refuses new commands from then on.
    /// Used on shutdown.
    pub fn terminate_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let pids: Vec<u32> = match self.active.lock() {
            Ok(mut guard) => guard.drain().collect(),
            Err(_) => return,
        };
        for pid in pids {
            warn!(pid, "terminating outstanding command on shutdown");
            kill_tree_by_pid(pid);
        }
    }

    fn track(&self, pid: u32) {
        if let Ok(mut guard) = self.active.lock() {
            guard.insert(pid);
        }
    }

    fn untrack(&self, pid: u32) {
        if let Ok(mut guard) = self.active.lock() {
            guard.remove(&pid);
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::launch(
                format!("Shutting down; {program} not started"),
                trace_id,
            ));
        }
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut command);

        debug!(trace_id = %trace_id, program = %program, args = ?args, "spawning command");
        let mut child = command.spawn().map_err(|err| {
            AppError::launch(format!("Failed to start {program}: {err}"), trace_id)
        })?;
        let pid = child.id();
        self.track(pid);
        // terminate_all may have drained the registry between the spawn and the insert.
        if self.closed.load(Ordering::SeqCst) {
            self.untrack(pid);
            kill_tree(&mut child);
            let _ = child.wait();
            return Err(AppError::launch("Shutting down; command not run", trace_id));
        }

        let result = wait_with_timeout(&mut child, timeout, trace_id);
        self.untrack(pid);
        result
    }
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    // Drain stdout/stderr in parallel; otherwise, a chatty child process can block once the pipe
    // buffer fills, and we will incorrectly hit the timeout.
    let stdout_rx = child.stdout.take().map(spawn_drain);
    let stderr_rx = child.stderr.take().map(spawn_drain);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    kill_tree(child);
                    let _ = child.wait();
                    warn!(
                        trace_id = %trace_id,
                        timeout_secs = timeout.as_secs_f64(),
                        "command timed out; process tree killed"
                    );
                    return Err(AppError::timeout(
                        format!("Command timed out after {}s", timeout.as_secs_f64()),
                        trace_id,
                    ));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                kill_tree(child);
                let _ = child.wait();
                return Err(AppError::launch(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout = collect_drain(stdout_rx);
    let stderr = collect_drain(stderr_rx);

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        exit_code,
    })
}

fn spawn_drain<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        let _ = tx.send(buffer);
    });
    rx
}

// A grandchild that inherited the pipe can keep it open after the child exits, so the drain is
// only awaited for a short grace period.
fn collect_drain(rx: Option<mpsc::Receiver<Vec<u8>>>) -> Vec<u8> {
    rx.and_then(|rx| rx.recv_timeout(DRAIN_GRACE).ok())
        .unwrap_or_default()
}

#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

fn kill_tree(child: &mut Child) {
    kill_tree_by_pid(child.id());
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_tree_by_pid(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: signalling a process group we created; a stale group only yields ESRCH.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(windows)]
fn kill_tree_by_pid(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(any(unix, windows)))]
fn kill_tree_by_pid(_pid: u32) {}

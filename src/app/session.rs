//! Bringing up a session against the one attached device.
//!
//! `establish` runs three bounded probes (tool version, device enumeration, model identity).
//! `bootstrap` wraps it with the recovery policy: on failure, stray adb servers are killed and the
//! whole sequence is retried exactly once, preferring the bundled tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::parse::{online_devices, parse_adb_devices};
use crate::app::adb::paths::{device_state_dir, sanitize_device_id, UNKNOWN_DEVICE_ID};
use crate::app::adb::runner::CommandRunner;
use crate::app::error::{AppError, ErrorKind};
use crate::app::models::{DeviceSummary, Session};
use crate::app::session_log::SessionLogger;

const KILL_SERVERS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SessionRequest<'a> {
    pub tool_path: &'a str,
    pub bundled_tool: Option<PathBuf>,
    pub state_root: &'a Path,
    pub probe_timeout: Duration,
}

pub fn establish(
    runner: &dyn CommandRunner,
    tool_path: &str,
    state_root: &Path,
    probe_timeout: Duration,
    logger: &SessionLogger,
    trace_id: &str,
) -> Result<Session, AppError> {
    probe_version(runner, tool_path, probe_timeout, trace_id)?;
    let device = pick_online_device(runner, tool_path, probe_timeout, logger, trace_id)?;
    let device_id = read_device_identity(runner, tool_path, &device, probe_timeout, logger, trace_id);
    let serial = device.serial;

    let state_dir = device_state_dir(state_root, &device_id);
    if let Err(err) = fs::create_dir_all(&state_dir) {
        warn!(
            trace_id = %trace_id,
            path = %state_dir.display(),
            error = %err,
            "failed to create device state dir; persistence will be skipped"
        );
    }

    info!(trace_id = %trace_id, serial = %serial, device_id = %device_id, "session established");
    Ok(Session {
        tool_path: tool_path.to_string(),
        serial,
        device_id,
        state_dir,
    })
}

pub fn bootstrap(
    runner: &dyn CommandRunner,
    request: &SessionRequest<'_>,
    logger: &SessionLogger,
    trace_id: &str,
) -> Result<Session, AppError> {
    let first = match establish(
        runner,
        request.tool_path,
        request.state_root,
        request.probe_timeout,
        logger,
        trace_id,
    ) {
        Ok(session) => return Ok(session),
        Err(err) => err,
    };

    logger.warning(format!(
        "Session with {} failed: {}",
        request.tool_path,
        first.user_message()
    ));

    let Some(retry_tool) = retry_tool_for(request, first.kind) else {
        return Err(first);
    };

    kill_stray_servers(runner, trace_id);
    logger.info(format!("Retrying session once with {retry_tool}"));

    establish(
        runner,
        &retry_tool,
        request.state_root,
        request.probe_timeout,
        logger,
        trace_id,
    )
    .map_err(|second| {
        logger.error(format!("Session retry failed: {}", second.user_message()));
        second
    })
}

/// The single retry goes to the bundled tool when it is a different, existing binary; otherwise
/// the same tool gets another go only if its server was still starting up.
fn retry_tool_for(request: &SessionRequest<'_>, first_failure: ErrorKind) -> Option<String> {
    if let Some(bundled) = request.bundled_tool.as_ref() {
        if bundled.is_file() && bundled.as_path() != Path::new(request.tool_path) {
            return Some(bundled.to_string_lossy().to_string());
        }
    }
    if first_failure == ErrorKind::DaemonStartTimeout {
        return Some(request.tool_path.to_string());
    }
    None
}

fn probe_version(
    runner: &dyn CommandRunner,
    tool_path: &str,
    timeout: Duration,
    trace_id: &str,
) -> Result<(), AppError> {
    let output = runner
        .run(tool_path, &["version".to_string()], timeout, trace_id)
        .map_err(|err| {
            AppError::unresponsive(
                format!("{tool_path} did not answer a version query: {}", err.error),
                trace_id,
            )
        })?;
    if !output.success() {
        return Err(AppError::unresponsive(
            format!(
                "{tool_path} version query exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
            trace_id,
        ));
    }
    Ok(())
}

fn pick_online_device(
    runner: &dyn CommandRunner,
    tool_path: &str,
    timeout: Duration,
    logger: &SessionLogger,
    trace_id: &str,
) -> Result<DeviceSummary, AppError> {
    let args = vec!["devices".to_string(), "-l".to_string()];
    let output = runner
        .run(tool_path, &args, timeout, trace_id)
        .map_err(|err| {
            if err.is_timeout() {
                AppError::daemon_timeout(
                    "Device enumeration timed out while the adb server was starting",
                    trace_id,
                )
            } else {
                AppError::unresponsive(
                    format!("Device enumeration failed: {}", err.error),
                    trace_id,
                )
            }
        })?;
    if !output.success() {
        return Err(AppError::no_device(
            format!("adb devices failed: {}", output.stderr.trim()),
            trace_id,
        ));
    }

    let devices = parse_adb_devices(&output.stdout);
    let online = online_devices(&devices);
    let Some(first) = online.first() else {
        let others = devices
            .iter()
            .map(|d| format!("{} ({})", d.serial, d.state))
            .collect::<Vec<_>>();
        let message = if others.is_empty() {
            "No device found".to_string()
        } else {
            format!("No device in 'device' state; seen: {}", others.join(", "))
        };
        return Err(AppError::no_device(message, trace_id));
    };
    if online.len() > 1 {
        logger.warning(format!(
            "{} devices online; using {} only",
            online.len(),
            first.serial
        ));
    }
    Ok((*first).clone())
}

/// `getprop ro.product.model`, falling back to the `model:` field of the device listing and
/// then to the sentinel.
fn read_device_identity(
    runner: &dyn CommandRunner,
    tool_path: &str,
    device: &DeviceSummary,
    timeout: Duration,
    logger: &SessionLogger,
    trace_id: &str,
) -> String {
    let args = vec![
        "-s".to_string(),
        device.serial.clone(),
        "shell".to_string(),
        "getprop".to_string(),
        "ro.product.model".to_string(),
    ];
    let problem = match runner.run(tool_path, &args, timeout, trace_id) {
        Ok(output) if output.success() => return sanitize_device_id(&output.stdout),
        Ok(output) => format!("exit {:?}", output.exit_code),
        Err(err) => err.error,
    };
    let device_id = device
        .model
        .as_deref()
        .map(sanitize_device_id)
        .unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string());
    logger.warning(format!(
        "Could not read device model ({problem}); using {device_id}"
    ));
    device_id
}

/// Best-effort kill of every adb server on the host, so a wedged daemon cannot block the retry.
pub fn kill_stray_servers(runner: &dyn CommandRunner, trace_id: &str) {
    let (program, args): (&str, Vec<String>) = if cfg!(windows) {
        (
            "taskkill",
            ["/F", "/T", "/IM", "adb.exe"].iter().map(|s| s.to_string()).collect(),
        )
    } else {
        (
            "pkill",
            ["-9", "-x", "adb"].iter().map(|s| s.to_string()).collect(),
        )
    };
    match runner.run(program, &args, KILL_SERVERS_TIMEOUT, trace_id) {
        Ok(output) => info!(trace_id = %trace_id, exit_code = ?output.exit_code, "killed stray adb servers"),
        Err(err) => warn!(trace_id = %trace_id, error = %err, "could not kill stray adb servers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::runner::CommandOutput;
    use crate::app::testing::{exit, has, ok, timed_out, FakeRunner, DEVICES_ONE};

    const PROBE: Duration = Duration::from_secs(15);

    fn healthy(_program: &str, args: &[String]) -> Result<CommandOutput, AppError> {
        if has(args, "version") {
            ok("Android Debug Bridge version 1.0.41\n")
        } else if has(args, "devices") {
            ok(DEVICES_ONE)
        } else if has(args, "getprop") {
            ok("Pixel 7 Pro\n")
        } else {
            ok("")
        }
    }

    #[test]
    fn establishes_session_with_sanitized_identity() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let runner = FakeRunner::new(healthy);
        let logger = SessionLogger::new();

        let session = establish(&runner, "/opt/adb", tmp.path(), PROBE, &logger, "t").expect("session");
        assert_eq!(session.serial, "SER123");
        assert_eq!(session.device_id, "Pixel_7_Pro");
        assert_eq!(session.state_dir, tmp.path().join("Pixel_7_Pro"));
        assert!(session.state_dir.is_dir());
        assert!(runner
            .joined_calls()
            .contains(&"/opt/adb -s SER123 shell getprop ro.product.model".to_string()));
    }

    #[test]
    fn identity_timeout_uses_listing_model() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let runner = FakeRunner::new(|program, args| {
            if has(args, "getprop") {
                timed_out()
            } else {
                healthy(program, args)
            }
        });
        let logger = SessionLogger::new();

        let session = establish(&runner, "adb", tmp.path(), PROBE, &logger, "t").expect("session");
        assert_eq!(session.device_id, "Pixel_7_Pro");
        assert_eq!(session.serial, "SER123");
    }

    #[test]
    fn identity_without_any_model_falls_back_to_sentinel() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let runner = FakeRunner::new(|program, args| {
            if has(args, "getprop") {
                exit(1, "error: closed")
            } else if has(args, "devices") {
                ok("List of devices attached\nSER123\tdevice\n")
            } else {
                healthy(program, args)
            }
        });
        let logger = SessionLogger::new();

        let session = establish(&runner, "adb", tmp.path(), PROBE, &logger, "t").expect("session");
        assert_eq!(session.device_id, UNKNOWN_DEVICE_ID);
        assert_eq!(session.state_dir, tmp.path().join(UNKNOWN_DEVICE_ID));
    }

    #[test]
    fn classifies_each_probe_failure() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let logger = SessionLogger::new();

        let runner = FakeRunner::new(|_, _| exit(1, "broken shim"));
        let err = establish(&runner, "adb", tmp.path(), PROBE, &logger, "t").expect_err("err");
        assert_eq!(err.kind, ErrorKind::BinaryUnresponsive);

        let runner = FakeRunner::new(|program, args| {
            if has(args, "devices") {
                timed_out()
            } else {
                healthy(program, args)
            }
        });
        let err = establish(&runner, "adb", tmp.path(), PROBE, &logger, "t").expect_err("err");
        assert_eq!(err.kind, ErrorKind::DaemonStartTimeout);

        let runner = FakeRunner::new(|program, args| {
            if has(args, "devices") {
                ok("List of devices attached\nABC\tunauthorized\n")
            } else {
                healthy(program, args)
            }
        });
        let err = establish(&runner, "adb", tmp.path(), PROBE, &logger, "t").expect_err("err");
        assert_eq!(err.kind, ErrorKind::NoDeviceFound);
        assert!(err.error.contains("ABC (unauthorized)"));
    }

    #[test]
    fn bootstrap_retries_exactly_once_with_bundled_tool() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let bundled = tmp.path().join("bundled-adb");
        fs::write(&bundled, b"bin").expect("write");
        let bundled_str = bundled.to_string_lossy().to_string();

        let good = bundled_str.clone();
        let runner = FakeRunner::new(move |program, args| {
            if program == "pkill" || program == "taskkill" {
                ok("")
            } else if program == good {
                healthy(program, args)
            } else {
                exit(1, "")
            }
        });
        let logger = SessionLogger::new();
        let request = SessionRequest {
            tool_path: "/shim/adb",
            bundled_tool: Some(bundled.clone()),
            state_root: tmp.path(),
            probe_timeout: PROBE,
        };

        let session = bootstrap(&runner, &request, &logger, "t").expect("session");
        assert_eq!(session.tool_path, bundled_str);
        let calls = runner.calls();
        assert_eq!(calls.iter().filter(|(p, _)| p == "/shim/adb").count(), 1);
        assert!(calls.iter().any(|(p, _)| p == "pkill" || p == "taskkill"));
    }

    #[test]
    fn bootstrap_second_failure_is_terminal() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let bundled = tmp.path().join("bundled-adb");
        fs::write(&bundled, b"bin").expect("write");

        let runner = FakeRunner::new(|program, args| {
            if program == "pkill" || program == "taskkill" {
                ok("")
            } else if has(args, "devices") {
                ok("List of devices attached\n\n")
            } else {
                healthy(program, args)
            }
        });
        let logger = SessionLogger::new();
        let request = SessionRequest {
            tool_path: "/usr/bin/adb",
            bundled_tool: Some(bundled),
            state_root: tmp.path(),
            probe_timeout: PROBE,
        };

        let err = bootstrap(&runner, &request, &logger, "t").expect_err("terminal");
        assert_eq!(err.kind, ErrorKind::NoDeviceFound);
        let version_probes = runner
            .calls()
            .iter()
            .filter(|(_, args)| has(args, "version"))
            .count();
        assert_eq!(version_probes, 2);
    }

    #[test]
    fn bootstrap_without_distinct_bundled_only_retries_daemon_timeouts() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let logger = SessionLogger::new();

        let runner = FakeRunner::new(|_, _| exit(1, "not adb"));
        let request = SessionRequest {
            tool_path: "adb",
            bundled_tool: None,
            state_root: tmp.path(),
            probe_timeout: PROBE,
        };
        let err = bootstrap(&runner, &request, &logger, "t").expect_err("err");
        assert_eq!(err.kind, ErrorKind::BinaryUnresponsive);
        assert_eq!(runner.calls().len(), 1);

        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let runner = FakeRunner::new(move |program, args| {
            if program == "pkill" || program == "taskkill" {
                return ok("");
            }
            if has(args, "devices")
                && attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0
            {
                return timed_out();
            }
            healthy(program, args)
        });
        let session = bootstrap(&runner, &request, &logger, "t").expect("second try");
        assert_eq!(session.tool_path, "adb");
    }
}

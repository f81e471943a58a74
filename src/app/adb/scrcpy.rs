use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::models::{MirroringLaunch, Session};

/// Window during which an immediate exit counts as a failed launch.
const EARLY_EXIT_GRACE: Duration = Duration::from_millis(150);

/// Config extras first, then the caller's flags untouched.
pub fn build_mirroring_args(extra_args: &str, flags: &[String]) -> Vec<String> {
    extra_args
        .split_whitespace()
        .map(str::to_string)
        .chain(flags.iter().cloned())
        .collect()
}

/// Starts the mirroring tool against the session's device and returns without waiting for it.
/// The child finds the same tool binary and device through `ADB` and `ANDROID_SERIAL`.
pub fn launch_mirroring(
    program: &str,
    extra_args: &str,
    session: &Session,
    flags: &[String],
    trace_id: &str,
) -> Result<MirroringLaunch, AppError> {
    let program = program.trim();
    if program.is_empty() {
        return Err(AppError::validation("mirroring command path is empty", trace_id));
    }
    let args = build_mirroring_args(extra_args, flags);

    let mut child = Command::new(program)
        .args(&args)
        .env("ADB", &session.tool_path)
        .env("ANDROID_SERIAL", &session.serial)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| AppError::launch(format!("Failed to launch {program}: {err}"), trace_id))?;
    let pid = child.id();

    std::thread::sleep(EARLY_EXIT_GRACE);
    match child.try_wait() {
        Ok(Some(status)) if !status.success() => {
            return Err(AppError::launch(
                format!("{program} exited immediately with {status}"),
                trace_id,
            ));
        }
        Ok(_) => {}
        Err(err) => warn!(trace_id = %trace_id, pid, error = %err, "mirroring status check failed"),
    }

    // Reap in the background so the child never lingers as a zombie.
    let reaper_label = format!("mirroring-reaper-{pid}");
    let spawned = std::thread::Builder::new()
        .name(reaper_label)
        .spawn(move || {
            let _ = child.wait();
        });
    if let Err(err) = spawned {
        warn!(trace_id = %trace_id, pid, error = %err, "failed to start mirroring reaper");
    }

    info!(trace_id = %trace_id, pid, program = %program, serial = %session.serial, "mirroring launched");
    Ok(MirroringLaunch {
        pid,
        command_path: program.to_string(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::error::ErrorKind;
    use std::path::PathBuf;

    fn session() -> Session {
        Session {
            tool_path: "/opt/sdk/platform-tools/adb".to_string(),
            serial: "SER123".to_string(),
            device_id: "Pixel_7".to_string(),
            state_dir: PathBuf::from("/tmp/droid_batch/Pixel_7"),
        }
    }

    fn flags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extras_are_prepended_and_flags_kept_verbatim() {
        let args = build_mirroring_args("  --stay-awake   --no-audio ", &flags(&["--max-size", "1024", "--window-title=My Phone"]));
        assert_eq!(
            args,
            flags(&["--stay-awake", "--no-audio", "--max-size", "1024", "--window-title=My Phone"])
        );
        assert!(build_mirroring_args("", &[]).is_empty());
    }

    #[test]
    fn missing_program_is_launch_failure() {
        let err = launch_mirroring("droid-batch-missing-mirror-tool", "", &session(), &[], "trace-mirror")
            .expect_err("missing program");
        assert_eq!(err.kind, ErrorKind::LaunchFailure);
        assert_eq!(err.code, "ERR_LAUNCH");
        assert_eq!(err.trace_id, "trace-mirror");
    }

    #[test]
    fn empty_program_is_rejected() {
        let err = launch_mirroring("  ", "", &session(), &[], "t").expect_err("empty");
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[cfg(unix)]
    #[test]
    fn long_running_tool_is_detached() {
        let launch = launch_mirroring("sleep", "", &session(), &flags(&["5"]), "t").expect("launch");
        assert!(launch.pid > 0);
        assert_eq!(launch.args, flags(&["5"]));
        unsafe {
            libc::kill(launch.pid as i32, libc::SIGKILL);
        }
    }

    #[cfg(unix)]
    #[test]
    fn immediate_failure_is_reported() {
        let err = launch_mirroring("false", "", &session(), &[], "t").expect_err("exits at once");
        assert_eq!(err.kind, ErrorKind::LaunchFailure);
    }
}

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Local;
use tracing::{info, warn};

use crate::app::adb::apps::{list_packages_args, parse_pm_list_packages_output};
use crate::app::adb::paths::{ALL_PACKAGES_FILE, VISIBLE_PACKAGES_FILE};
use crate::app::adb::runner::CommandRunner;
use crate::app::error::AppError;
use crate::app::models::{Inventory, InventoryKind, InventorySnapshot, Session};
use crate::app::session_log::{SessionLogger, TIMESTAMP_FORMAT};

pub fn inventory_file_name(kind: InventoryKind) -> &'static str {
    match kind {
        InventoryKind::Visible => VISIBLE_PACKAGES_FILE,
        InventoryKind::All => ALL_PACKAGES_FILE,
    }
}

/// Fetches both inventories in parallel. Never fails as a whole: a side that fails comes back
/// empty with its `*_ok` flag cleared.
pub fn fetch_both(
    runner: &dyn CommandRunner,
    session: &Session,
    logger: &SessionLogger,
    timeout: Duration,
    trace_id: &str,
) -> InventorySnapshot {
    let (visible, all) = std::thread::scope(|scope| {
        let visible = scope.spawn(|| fetch_one(runner, session, InventoryKind::Visible, timeout, trace_id));
        let all = scope.spawn(|| fetch_one(runner, session, InventoryKind::All, timeout, trace_id));
        (join_fetch(visible, trace_id), join_fetch(all, trace_id))
    });

    let visible_ok = visible.is_ok();
    let all_ok = all.is_ok();
    let visible = settle(visible, InventoryKind::Visible, session, logger);
    let all = settle(all, InventoryKind::All, session, logger);

    if visible_ok && all_ok {
        report_containment(&visible, &all, logger);
    }

    info!(
        trace_id = %trace_id,
        visible = visible.packages.len(),
        all = all.packages.len(),
        "inventories fetched"
    );
    InventorySnapshot {
        visible,
        all,
        visible_ok,
        all_ok,
        fetched_at: Local::now().format(TIMESTAMP_FORMAT).to_string(),
    }
}

fn join_fetch(
    handle: std::thread::ScopedJoinHandle<'_, Result<Inventory, AppError>>,
    trace_id: &str,
) -> Result<Inventory, AppError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(AppError::operation("Inventory worker panicked", trace_id)))
}

fn fetch_one(
    runner: &dyn CommandRunner,
    session: &Session,
    kind: InventoryKind,
    timeout: Duration,
    trace_id: &str,
) -> Result<Inventory, AppError> {
    let args = list_packages_args(&session.serial, kind == InventoryKind::All);
    let output = runner.run(&session.tool_path, &args, timeout, trace_id)?;
    if !output.success() {
        return Err(AppError::operation(
            format!(
                "pm list packages ({kind}) exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
            trace_id,
        ));
    }
    Ok(Inventory {
        kind,
        packages: parse_pm_list_packages_output(&output.stdout),
    })
}

fn settle(
    result: Result<Inventory, AppError>,
    kind: InventoryKind,
    session: &Session,
    logger: &SessionLogger,
) -> Inventory {
    match result {
        Ok(inventory) => {
            persist(&session.state_dir, &inventory, logger);
            logger.info(format!(
                "Fetched {} {kind} packages",
                inventory.packages.len()
            ));
            inventory
        }
        Err(err) => {
            logger.warning(format!(
                "Could not fetch {kind} packages: {}; showing none",
                err.error
            ));
            Inventory::empty(kind)
        }
    }
}

/// Full overwrite, newline-joined, no trailing newline. Failures are logged and swallowed.
fn persist(state_dir: &Path, inventory: &Inventory, logger: &SessionLogger) {
    let path = state_dir.join(inventory_file_name(inventory.kind));
    let write = fs::create_dir_all(state_dir).and_then(|_| fs::write(&path, inventory.packages.join("\n")));
    if let Err(err) = write {
        warn!(path = %path.display(), error = %err, "failed to persist inventory");
        logger.warning(format!("Could not save {}: {err}", path.display()));
    }
}

fn report_containment(visible: &Inventory, all: &Inventory, logger: &SessionLogger) {
    let all_set: HashSet<&str> = all.packages.iter().map(String::as_str).collect();
    let stray = visible
        .packages
        .iter()
        .filter(|pkg| !all_set.contains(pkg.as_str()))
        .count();
    if stray > 0 {
        logger.warning(format!(
            "{stray} visible packages are missing from the full list; the device listing looks inconsistent"
        ));
    }
}

/// Reads back the persisted inventories. A missing or unreadable file yields `None` for that side.
pub fn load_cached(state_dir: &Path) -> (Option<Inventory>, Option<Inventory>) {
    let read = |kind: InventoryKind| {
        fs::read_to_string(state_dir.join(inventory_file_name(kind)))
            .ok()
            .map(|content| Inventory {
                kind,
                packages: parse_pm_list_packages_output(&content),
            })
    };
    (read(InventoryKind::Visible), read(InventoryKind::All))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::runner::CommandOutput;
    use crate::app::testing::{exit, has, ok, timed_out, FakeRunner};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session_in(dir: &Path) -> Session {
        Session {
            tool_path: "adb".to_string(),
            serial: "SER123".to_string(),
            device_id: "Pixel_7".to_string(),
            state_dir: dir.join("Pixel_7"),
        }
    }

    fn listing(args: &[String]) -> Result<CommandOutput, AppError> {
        if has(args, "-u") {
            ok("package:com.a\npackage:com.b\n\npackage:com.c\n")
        } else {
            ok("package:com.a\npackage:com.c\n")
        }
    }

    #[test]
    fn fetches_and_persists_both_inventories() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let session = session_in(tmp.path());
        let runner = FakeRunner::new(|_, args| listing(args));
        let logger = SessionLogger::new();

        let snapshot = fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");
        assert!(snapshot.visible_ok && snapshot.all_ok);
        assert_eq!(snapshot.visible.packages, vec!["com.a", "com.c"]);
        assert_eq!(snapshot.all.packages, vec!["com.a", "com.b", "com.c"]);

        let written = fs::read_to_string(session.state_dir.join(ALL_PACKAGES_FILE)).expect("file");
        assert_eq!(written, "com.a\ncom.b\ncom.c");
        assert!(runner
            .joined_calls()
            .contains(&"adb -s SER123 shell pm list packages -u".to_string()));
    }

    #[test]
    fn repeated_fetch_writes_byte_identical_files() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let session = session_in(tmp.path());
        let runner = FakeRunner::new(|_, args| listing(args));
        let logger = SessionLogger::new();

        let read_all = |dir: &PathBuf| {
            (
                fs::read(dir.join(VISIBLE_PACKAGES_FILE)).expect("visible"),
                fs::read(dir.join(ALL_PACKAGES_FILE)).expect("all"),
            )
        };
        fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");
        let first = read_all(&session.state_dir);
        fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");
        assert_eq!(read_all(&session.state_dir), first);
    }

    #[test]
    fn one_failed_side_yields_empty_inventory_and_keeps_old_file() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let session = session_in(tmp.path());
        fs::create_dir_all(&session.state_dir).expect("mkdir");
        fs::write(session.state_dir.join(ALL_PACKAGES_FILE), "com.old").expect("seed");

        let runner = FakeRunner::new(|_, args| {
            if has(args, "-u") {
                timed_out()
            } else {
                listing(args)
            }
        });
        let logger = SessionLogger::new();
        let rx = logger.subscribe();

        let snapshot = fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");
        assert!(snapshot.visible_ok);
        assert!(!snapshot.all_ok);
        assert!(snapshot.all.packages.is_empty());
        assert_eq!(snapshot.visible.packages.len(), 2);
        assert_eq!(
            fs::read_to_string(session.state_dir.join(ALL_PACKAGES_FILE)).expect("kept"),
            "com.old"
        );
        assert!(rx
            .try_iter()
            .any(|line| line.message.contains("Could not fetch all packages")));
    }

    #[test]
    fn non_zero_exit_is_a_failed_side() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let session = session_in(tmp.path());
        let runner = FakeRunner::new(|_, _| exit(255, "error: device offline"));
        let logger = SessionLogger::new();

        let snapshot = fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");
        assert!(!snapshot.visible_ok && !snapshot.all_ok);
    }

    #[test]
    fn sub_fetches_run_concurrently() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let session = session_in(tmp.path());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let runner = FakeRunner::new(move |_, args| {
            let now = in_flight_c.fetch_add(1, Ordering::SeqCst) + 1;
            peak_c.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
            in_flight_c.fetch_sub(1, Ordering::SeqCst);
            listing(args)
        });
        let logger = SessionLogger::new();

        fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tolerates_visible_outside_all_with_a_warning() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let session = session_in(tmp.path());
        let runner = FakeRunner::new(|_, args| {
            if has(args, "-u") {
                ok("package:com.a\n")
            } else {
                ok("package:com.a\npackage:com.ghost\n")
            }
        });
        let logger = SessionLogger::new();
        let rx = logger.subscribe();

        let snapshot = fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");
        assert_eq!(snapshot.visible.packages.len(), 2);
        assert!(rx.try_iter().any(|line| line.message.contains("1 visible packages")));
    }

    #[test]
    fn load_cached_reads_back_persisted_files() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let session = session_in(tmp.path());
        assert_eq!(load_cached(&session.state_dir), (None, None));

        let runner = FakeRunner::new(|_, args| listing(args));
        let logger = SessionLogger::new();
        let snapshot = fetch_both(&runner, &session, &logger, Duration::from_secs(30), "t");

        let (visible, all) = load_cached(&session.state_dir);
        assert_eq!(visible, Some(snapshot.visible));
        assert_eq!(all, Some(snapshot.all));
    }
}

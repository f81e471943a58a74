use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use droid_batch_lib::app::adb::paths::SAVED_SELECTION_FILE;
use droid_batch_lib::app::commands::{
    compute_diff, establish_session, fetch_inventories, in_background, launch_mirroring,
    resolve_tool, run_batch, subscribe_logs,
};
use droid_batch_lib::app::config::{config_path, load_config, save_config, AppConfig};
use droid_batch_lib::app::error::AppError;
use droid_batch_lib::app::logging::init_logging;
use droid_batch_lib::app::models::{
    BatchOperation, BatchReport, InventorySnapshot, LogLine, MirroringLaunch, Outcome, Session,
    ToolInfo,
};
use droid_batch_lib::app::package_list::{
    filter_packages, load_package_list, load_selection, save_selection,
};
use droid_batch_lib::app::signals::{install_stop_handlers, stop_requested};
use droid_batch_lib::app::state::AppState;
use serde::Serialize;
use uuid::Uuid;

const LOG_POLL: Duration = Duration::from_millis(100);
const EXIT_INTERRUPTED: i32 = 130;

const USAGE: &str = "usage: droid_batch [--adb PATH] [--state-dir DIR] [--json] <command>

commands:
  resolve                               locate the adb binary
  session                               connect to the attached device
  fetch                                 fetch and persist both package inventories
  diff [--filter TEXT]                  list packages present but hidden for the user
  uninstall [PKG..] [--file F] [--saved]
  install [PKG..] [--file F] [--saved]  run pm install-existing
  mirror [FLAG..]                       start screen mirroring, flags passed through
  save-selection [--file F] PKG..
  load-selection [--file F] [--filter TEXT]
  config [--write]                      show the effective config, --write saves it";

#[derive(Debug, Clone)]
struct Args {
    adb: Option<String>,
    state_dir: Option<PathBuf>,
    json: bool,
    command: Cmd,
}

#[derive(Debug, Clone)]
enum Cmd {
    Resolve,
    Session,
    Fetch,
    Diff {
        filter: Option<String>,
    },
    Batch {
        operation: BatchOperation,
        packages: Vec<String>,
        file: Option<PathBuf>,
        saved: bool,
    },
    Mirror {
        flags: Vec<String>,
    },
    SaveSelection {
        file: Option<PathBuf>,
        packages: Vec<String>,
    },
    LoadSelection {
        file: Option<PathBuf>,
        filter: Option<String>,
    },
    Config {
        write: bool,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum Output {
    Tool(ToolInfo),
    Session(Session),
    Snapshot(InventorySnapshot),
    Packages(Vec<String>),
    Batch(BatchReport),
    Mirror(MirroringLaunch),
    Saved { path: PathBuf, count: usize },
    Config { path: PathBuf, config: AppConfig },
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    tool: &'static str,
    status: &'static str,
    trace_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Output>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a AppError>,
}

fn parse_args() -> Result<Args, String> {
    parse_arg_list(std::env::args().skip(1))
}

fn parse_arg_list(raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut adb: Option<String> = None;
    let mut state_dir: Option<PathBuf> = None;
    let mut json = false;

    let mut it = raw;
    let command = loop {
        let Some(arg) = it.next() else {
            return Err("missing command".to_string());
        };
        match arg.as_str() {
            "--adb" => {
                adb = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if adb.is_none() {
                    return Err("--adb requires a value".to_string());
                }
            }
            "--state-dir" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--state-dir requires a value".to_string())?;
                state_dir = Some(PathBuf::from(value));
            }
            "--json" => {
                json = true;
            }
            "-h" | "--help" => return Err(String::new()),
            other if other.starts_with("--") => {
                return Err(format!("unknown option: {other}"));
            }
            other => break other.to_string(),
        }
    };

    let rest: Vec<String> = it.collect();
    let command = match command.as_str() {
        "resolve" => no_extra(Cmd::Resolve, &rest)?,
        "session" => no_extra(Cmd::Session, &rest)?,
        "fetch" => no_extra(Cmd::Fetch, &rest)?,
        "diff" => {
            let mut rest = rest;
            let filter = take_value(&mut rest, "--filter")?;
            no_extra(Cmd::Diff { filter }, &rest)?
        }
        "uninstall" => parse_batch(BatchOperation::Uninstall, rest)?,
        "install" => parse_batch(BatchOperation::Install, rest)?,
        "mirror" => Cmd::Mirror { flags: rest },
        "save-selection" => {
            let (file, packages) = split_file_flag(rest)?;
            if packages.is_empty() {
                return Err("save-selection needs at least one package".to_string());
            }
            Cmd::SaveSelection { file, packages }
        }
        "load-selection" => {
            let mut rest = rest;
            let filter = take_value(&mut rest, "--filter")?;
            let (file, extra) = split_file_flag(rest)?;
            no_extra(Cmd::LoadSelection { file, filter }, &extra)?
        }
        "config" => match rest.as_slice() {
            [] => Cmd::Config { write: false },
            [flag] if flag == "--write" => Cmd::Config { write: true },
            [arg, ..] => return Err(format!("unexpected argument: {arg}")),
        },
        other => return Err(format!("unknown command: {other}")),
    };

    Ok(Args {
        adb,
        state_dir,
        json,
        command,
    })
}

fn no_extra(cmd: Cmd, rest: &[String]) -> Result<Cmd, String> {
    match rest.first() {
        Some(arg) => Err(format!("unexpected argument: {arg}")),
        None => Ok(cmd),
    }
}

/// Removes `flag VALUE` from `rest`, wherever it appears.
fn take_value(rest: &mut Vec<String>, flag: &str) -> Result<Option<String>, String> {
    let Some(index) = rest.iter().position(|arg| arg == flag) else {
        return Ok(None);
    };
    if index + 1 >= rest.len() {
        return Err(format!("{flag} requires a value"));
    }
    let value = rest.remove(index + 1);
    rest.remove(index);
    Ok(Some(value))
}

fn split_file_flag(rest: Vec<String>) -> Result<(Option<PathBuf>, Vec<String>), String> {
    let mut file = None;
    let mut others = Vec::new();
    let mut it = rest.into_iter();
    while let Some(arg) = it.next() {
        if arg == "--file" {
            let value = it
                .next()
                .ok_or_else(|| "--file requires a value".to_string())?;
            file = Some(PathBuf::from(value));
        } else {
            others.push(arg);
        }
    }
    Ok((file, others))
}

fn parse_batch(operation: BatchOperation, rest: Vec<String>) -> Result<Cmd, String> {
    let (file, mut packages) = split_file_flag(rest)?;
    let before = packages.len();
    packages.retain(|arg| arg != "--saved");
    let saved = packages.len() != before;
    if let Some(flag) = packages.iter().find(|arg| arg.starts_with("--")) {
        return Err(format!("unknown option: {flag}"));
    }
    if packages.is_empty() && file.is_none() && !saved {
        return Err(format!("{} needs packages, --file or --saved", operation.verb()));
    }
    Ok(Cmd::Batch {
        operation,
        packages,
        file,
        saved,
    })
}

/// The loaded config with command-line overrides on top. Only the loaded one is ever saved.
fn runtime_config(loaded: &AppConfig, args: &Args) -> AppConfig {
    let mut config = loaded.clone();
    if let Some(adb) = args.adb.as_ref() {
        config.adb.command_path = adb.clone();
    }
    if let Some(dir) = args.state_dir.as_ref() {
        config.storage.state_root = dir.to_string_lossy().to_string();
    }
    config
}

fn filtered(packages: Vec<String>, filter: Option<&str>) -> Vec<String> {
    match filter {
        Some(needle) => filter_packages(&packages, needle).into_iter().cloned().collect(),
        None => packages,
    }
}

fn selection_path(state: &AppState, file: Option<PathBuf>) -> PathBuf {
    file.unwrap_or_else(|| {
        state
            .config
            .storage
            .resolved_state_root()
            .join(SAVED_SELECTION_FILE)
    })
}

fn connect(state: &AppState, adb: Option<String>, trace_id: &str) -> Result<Session, AppError> {
    establish_session(state, adb, Some(trace_id.to_string())).map(|resp| resp.data)
}

fn execute(
    state: &AppState,
    adb: Option<String>,
    command: Cmd,
    persisted: &AppConfig,
    trace_id: &str,
) -> Result<Output, AppError> {
    let trace = || Some(trace_id.to_string());
    match command {
        Cmd::Resolve => resolve_tool(state, trace()).map(|resp| Output::Tool(resp.data)),
        Cmd::Session => connect(state, adb, trace_id).map(Output::Session),
        Cmd::Fetch => {
            connect(state, adb, trace_id)?;
            fetch_inventories(state, trace()).map(|resp| Output::Snapshot(resp.data))
        }
        Cmd::Diff { filter } => {
            connect(state, adb, trace_id)?;
            fetch_inventories(state, trace())?;
            compute_diff(state, trace())
                .map(|resp| Output::Packages(filtered(resp.data, filter.as_deref())))
        }
        Cmd::Batch {
            operation,
            mut packages,
            file,
            saved,
        } => {
            if let Some(path) = file {
                packages.extend(load_package_list(&path, trace_id)?);
            }
            if saved {
                packages.extend(load_selection(&selection_path(state, None), trace_id)?);
            }
            connect(state, adb, trace_id)?;
            run_batch(state, operation, packages, trace()).map(|resp| Output::Batch(resp.data))
        }
        Cmd::Mirror { flags } => {
            connect(state, adb, trace_id)?;
            launch_mirroring(state, flags, trace()).map(|resp| Output::Mirror(resp.data))
        }
        Cmd::SaveSelection { file, packages } => {
            let path = selection_path(state, file);
            save_selection(&path, &packages, trace_id)?;
            state
                .logger
                .info(format!("Saved {} packages to {}", packages.len(), path.display()));
            Ok(Output::Saved {
                path,
                count: packages.len(),
            })
        }
        Cmd::LoadSelection { file, filter } => load_selection(&selection_path(state, file), trace_id)
            .map(|packages| Output::Packages(filtered(packages, filter.as_deref()))),
        Cmd::Config { write } => {
            if write {
                save_config(persisted, trace_id)?;
                state
                    .logger
                    .info(format!("Config written to {}", config_path().display()));
            }
            Ok(Output::Config {
                path: config_path(),
                config: state.config.clone(),
            })
        }
    }
}

fn print_log_lines(logs: &Receiver<LogLine>, wait: Duration) -> bool {
    match logs.recv_timeout(wait) {
        Ok(line) => {
            eprintln!("{line}");
            for line in logs.try_iter() {
                eprintln!("{line}");
            }
            true
        }
        Err(RecvTimeoutError::Timeout) => true,
        Err(RecvTimeoutError::Disconnected) => false,
    }
}

fn print_text(output: &Output) {
    match output {
        Output::Tool(tool) => println!("{}", tool.command_path.display()),
        Output::Session(session) => println!(
            "{} ({}) -> {}",
            session.device_id,
            session.serial,
            session.state_dir.display()
        ),
        Output::Snapshot(snapshot) => {
            println!(
                "visible: {}{}",
                snapshot.visible.packages.len(),
                if snapshot.visible_ok { "" } else { " (fetch failed)" }
            );
            println!(
                "all: {}{}",
                snapshot.all.packages.len(),
                if snapshot.all_ok { "" } else { " (fetch failed)" }
            );
        }
        Output::Packages(packages) => {
            for pkg in packages {
                println!("{pkg}");
            }
        }
        Output::Batch(report) => {
            for record in &report.records {
                match &record.outcome {
                    Outcome::Success => println!("ok    {}", record.package),
                    Outcome::Failure { reason } => println!("FAIL  {}: {reason}", record.package),
                }
            }
            println!("{} succeeded, {} failed", report.succeeded, report.failed);
        }
        Output::Mirror(launch) => println!("{} started (pid {})", launch.command_path, launch.pid),
        Output::Saved { path, count } => println!("saved {count} packages to {}", path.display()),
        Output::Config { path, config } => {
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(config).unwrap_or_default());
        }
    }
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("{msg}");
            }
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let loaded = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{}", err.user_message());
            std::process::exit(1);
        }
    };
    let config = runtime_config(&loaded, &args);
    init_logging(&config.logging.log_level);
    install_stop_handlers();

    let state = Arc::new(AppState::new(config));
    let logs = match subscribe_logs(&state, Some(trace_id.clone())) {
        Ok(resp) => resp.data,
        Err(err) => {
            eprintln!("{}", err.user_message());
            std::process::exit(1);
        }
    };

    let job_trace = trace_id.clone();
    let Args {
        adb,
        json,
        command,
        ..
    } = args;
    let job = in_background(&state, "cli", move |state| {
        execute(state, adb, command, &loaded, &job_trace)
    });

    let result = loop {
        if stop_requested() {
            state
                .logger
                .warning("Interrupted; stopping running tool processes");
            state.shutdown();
            for line in logs.try_iter() {
                eprintln!("{line}");
            }
            std::process::exit(EXIT_INTERRUPTED);
        }
        match job.try_result() {
            Ok(Some(result)) => break result,
            Ok(None) => {
                print_log_lines(&logs, LOG_POLL);
            }
            Err(err) => break Err(err),
        }
    };
    for line in logs.try_iter() {
        eprintln!("{line}");
    }
    state.shutdown();

    let exit_code = if result.is_ok() { 0 } else { 1 };
    if json {
        let summary = JsonSummary {
            tool: "droid_batch",
            status: if result.is_ok() { "pass" } else { "fail" },
            trace_id: &trace_id,
            data: result.as_ref().ok(),
            error: result.as_ref().err(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else {
        match &result {
            Ok(output) => print_text(output),
            Err(err) => eprintln!("error: {}", err.user_message()),
        }
    }
    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(items: &[&str]) -> Result<Args, String> {
        parse_arg_list(items.iter().map(|s| s.to_string()))
    }

    #[test]
    fn global_flags_precede_command() {
        let args = parse(&["--adb", "/sdk/adb", "--json", "--state-dir", "/tmp/x", "diff"]).expect("args");
        assert_eq!(args.adb.as_deref(), Some("/sdk/adb"));
        assert_eq!(args.state_dir, Some(PathBuf::from("/tmp/x")));
        assert!(args.json);
        assert!(matches!(args.command, Cmd::Diff { filter: None }));
    }

    #[test]
    fn batch_collects_packages_and_file() {
        let args = parse(&["uninstall", "com.a", "--file", "list.txt", "com.b"]).expect("args");
        match args.command {
            Cmd::Batch {
                operation,
                packages,
                file,
                saved,
            } => {
                assert_eq!(operation, BatchOperation::Uninstall);
                assert_eq!(packages, vec!["com.a", "com.b"]);
                assert_eq!(file, Some(PathBuf::from("list.txt")));
                assert!(!saved);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(parse(&["install"]).is_err());
        assert!(matches!(
            parse(&["install", "--saved"]).expect("saved").command,
            Cmd::Batch { saved: true, .. }
        ));
    }

    #[test]
    fn mirror_flags_pass_through_untouched() {
        let args = parse(&["mirror", "--max-size", "1024", "--no-audio"]).expect("args");
        match args.command {
            Cmd::Mirror { flags } => assert_eq!(flags, vec!["--max-size", "1024", "--no-audio"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_write_flag() {
        assert!(matches!(parse(&["config"]).expect("args").command, Cmd::Config { write: false }));
        assert!(matches!(
            parse(&["config", "--write"]).expect("args").command,
            Cmd::Config { write: true }
        ));
    }

    #[test]
    fn filter_applies_to_diff_and_saved_selection() {
        match parse(&["diff", "--filter", "google"]).expect("args").command {
            Cmd::Diff { filter } => assert_eq!(filter.as_deref(), Some("google")),
            other => panic!("unexpected command: {other:?}"),
        }
        match parse(&["load-selection", "--filter", "cam", "--file", "s.txt"])
            .expect("args")
            .command
        {
            Cmd::LoadSelection { file, filter } => {
                assert_eq!(file, Some(PathBuf::from("s.txt")));
                assert_eq!(filter.as_deref(), Some("cam"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let packages = vec![
            "com.google.camera".to_string(),
            "com.Google.Maps".to_string(),
            "org.fdroid".to_string(),
        ];
        assert_eq!(
            filtered(packages.clone(), Some("GOOGLE")),
            vec!["com.google.camera", "com.Google.Maps"]
        );
        assert_eq!(filtered(packages.clone(), None), packages);
    }

    #[test]
    fn overrides_stay_out_of_the_loaded_config() {
        let loaded = AppConfig::default();
        let args = parse(&["--adb", "/sdk/adb", "--state-dir", "/tmp/x", "config", "--write"])
            .expect("args");

        let runtime = runtime_config(&loaded, &args);
        assert_eq!(runtime.adb.command_path, "/sdk/adb");
        assert_eq!(runtime.storage.state_root, "/tmp/x");
        assert_eq!(loaded, AppConfig::default());
        assert_ne!(runtime, loaded);
    }

    #[test]
    fn usage_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--adb"]).is_err());
        assert!(parse(&["bogus"]).is_err());
        assert!(parse(&["session", "extra"]).is_err());
        assert!(parse(&["save-selection"]).is_err());
        assert!(parse(&["load-selection", "--file"]).is_err());
        assert!(parse(&["config", "--force"]).is_err());
        assert!(parse(&["diff", "--filter"]).is_err());
        assert!(parse(&["load-selection", "extra"]).is_err());
        assert_eq!(parse(&["--help"]).err(), Some(String::new()));
    }
}

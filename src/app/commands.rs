use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::locator::{normalize_command_path, resolve, resolve_bundled, validate_adb_program};
use crate::app::adb::scrcpy;
use crate::app::batch;
use crate::app::error::AppError;
use crate::app::inventory;
use crate::app::models::{
    BatchOperation, BatchReport, CommandResponse, Inventory, InventorySnapshot, LogLine,
    MirroringLaunch, Session, ToolInfo,
};
use crate::app::scheduler::JobHandle;
use crate::app::session::{bootstrap, SessionRequest};
use crate::app::state::AppState;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CachedInventories {
    pub visible: Option<Inventory>,
    pub all: Option<Inventory>,
}

pub fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn current_or_fail(state: &AppState, trace_id: &str) -> Result<Session, AppError> {
    state
        .session()
        .clone()
        .ok_or_else(|| AppError::no_session("Connect to a device first", trace_id))
}

/// Runs `job` on the worker pool with its own handle on the shared state.
pub fn in_background<T, F>(state: &Arc<AppState>, label: &str, job: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> T + Send + 'static,
{
    let shared = Arc::clone(state);
    state.scheduler.submit(label, move || job(&shared))
}

fn locate_tool(state: &AppState, trace_id: &str) -> Result<ToolInfo, AppError> {
    let configured = normalize_command_path(&state.config.adb.command_path);
    if !configured.is_empty() {
        return explicit_tool(&configured, trace_id);
    }
    let candidate = resolve(&state.resolver_env).ok_or_else(|| {
        AppError::tool_not_found(
            "adb was not found on PATH, in the usual SDK locations or next to this program",
            trace_id,
        )
    })?;
    Ok(ToolInfo {
        command_path: candidate.path,
        source: Some(candidate.source),
    })
}

fn explicit_tool(path: &str, trace_id: &str) -> Result<ToolInfo, AppError> {
    validate_adb_program(path).map_err(|message| {
        AppError::tool_not_found(format!("{message}: {path}"), trace_id)
    })?;
    Ok(ToolInfo {
        command_path: PathBuf::from(path),
        source: None,
    })
}

pub fn resolve_tool(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<ToolInfo>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = locate_tool(state, &trace_id)?;
    info!(trace_id = %trace_id, path = %data.command_path.display(), "tool resolved");
    Ok(CommandResponse { trace_id, data })
}

/// Resolves the tool (unless `tool_override` is given) and bootstraps a session on it. The new
/// session replaces any previous one; a failed attempt leaves no session behind.
pub fn establish_session(
    state: &AppState,
    tool_override: Option<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Session>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let tool = match tool_override
        .map(|value| normalize_command_path(&value))
        .filter(|value| !value.is_empty())
    {
        Some(path) => explicit_tool(&path, &trace_id)?,
        None => locate_tool(state, &trace_id)?,
    };
    let tool_path = tool.command_path.to_string_lossy().to_string();
    let state_root = state.config.storage.resolved_state_root();
    let request = SessionRequest {
        tool_path: &tool_path,
        bundled_tool: resolve_bundled(&state.resolver_env).map(|candidate| candidate.path),
        state_root: &state_root,
        probe_timeout: state.config.timeouts.probe(),
    };

    let _device = state.scheduler.lock_device();
    state.logger.info(format!("Connecting with {tool_path}"));
    let result = bootstrap(state.runner.as_ref(), &request, &state.logger, &trace_id);

    let mut current = state.session();
    state.diff_cache().reset();
    match result {
        Ok(session) => {
            state.logger.attach(&session.state_dir);
            state.logger.success(format!(
                "Connected to {} ({})",
                session.device_id, session.serial
            ));
            *current = Some(session.clone());
            Ok(CommandResponse {
                trace_id,
                data: session,
            })
        }
        Err(err) => {
            *current = None;
            state.logger.detach();
            state.logger.error(err.user_message());
            warn!(trace_id = %trace_id, code = err.code, "session not established");
            Err(err)
        }
    }
}

pub fn current_session(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Option<Session>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = state.session().clone();
    Ok(CommandResponse { trace_id, data })
}

pub fn fetch_inventories(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<InventorySnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let _device = state.scheduler.lock_device();
    let session = current_or_fail(state, &trace_id)?;
    let snapshot = inventory::fetch_both(
        state.runner.as_ref(),
        &session,
        &state.logger,
        state.config.timeouts.inventory(),
        &trace_id,
    );
    state.diff_cache().record(&snapshot);
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

pub fn load_cached_inventories(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<CachedInventories>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = current_or_fail(state, &trace_id)?;
    let (visible, all) = inventory::load_cached(&session.state_dir);
    Ok(CommandResponse {
        trace_id,
        data: CachedInventories { visible, all },
    })
}

pub fn compute_diff(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = state.diff_cache().diff(&trace_id)?;
    Ok(CommandResponse { trace_id, data })
}

pub fn run_batch(
    state: &AppState,
    operation: BatchOperation,
    packages: Vec<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<BatchReport>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    if packages.iter().all(|pkg| pkg.trim().is_empty()) {
        return Err(AppError::validation("packages is required", &trace_id));
    }
    // Read under the lock so a reconnect in flight finishes first.
    let _device = state.scheduler.lock_device();
    let session = current_or_fail(state, &trace_id)?;
    let report = batch::run_batch(
        state.runner.as_ref(),
        &session,
        &state.logger,
        operation,
        &packages,
        state.config.timeouts.operation(),
        &trace_id,
    );
    Ok(CommandResponse {
        trace_id,
        data: report,
    })
}

pub fn launch_mirroring(
    state: &AppState,
    flags: Vec<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<MirroringLaunch>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let settings = &state.config.mirroring;

    let _device = state.scheduler.lock_device();
    let session = current_or_fail(state, &trace_id)?;
    let launch = scrcpy::launch_mirroring(
        &settings.command_path,
        &settings.extra_args,
        &session,
        &flags,
        &trace_id,
    )
    .inspect_err(|err| state.logger.error(err.error.clone()))?;
    state.logger.info(format!(
        "Screen mirroring started for {} (pid {})",
        session.device_id, launch.pid
    ));
    Ok(CommandResponse {
        trace_id,
        data: launch,
    })
}

pub fn subscribe_logs(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Receiver<LogLine>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.logger.subscribe(),
    })
}

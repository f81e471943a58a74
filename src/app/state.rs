use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::app::adb::locator::ResolverEnv;
use crate::app::adb::runner::{CommandRunner, ProcessRunner};
use crate::app::config::AppConfig;
use crate::app::diff::DiffCache;
use crate::app::models::Session;
use crate::app::scheduler::TaskScheduler;
use crate::app::session_log::SessionLogger;

/// Everything the front-end operations share. One instance per process.
pub struct AppState {
    pub config: AppConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub logger: Arc<SessionLogger>,
    pub scheduler: TaskScheduler,
    pub resolver_env: ResolverEnv,
    processes: ProcessRunner,
    session: Mutex<Option<Session>>,
    diff: Mutex<DiffCache>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let processes = ProcessRunner::new();
        let runner: Arc<dyn CommandRunner> = Arc::new(processes.clone());
        Self::build(config, runner, processes, ResolverEnv::capture())
    }

    /// Same wiring with a caller-supplied runner and host view.
    pub fn with_runner(
        config: AppConfig,
        runner: Arc<dyn CommandRunner>,
        resolver_env: ResolverEnv,
    ) -> Self {
        Self::build(config, runner, ProcessRunner::new(), resolver_env)
    }

    fn build(
        config: AppConfig,
        runner: Arc<dyn CommandRunner>,
        processes: ProcessRunner,
        resolver_env: ResolverEnv,
    ) -> Self {
        let scheduler = TaskScheduler::new(config.scheduler.worker_limit);
        Self {
            config,
            runner,
            logger: Arc::new(SessionLogger::new()),
            scheduler,
            resolver_env,
            processes,
            session: Mutex::new(None),
            diff: Mutex::new(DiffCache::new()),
        }
    }

    pub fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn diff_cache(&self) -> MutexGuard<'_, DiffCache> {
        self.diff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Kills every tool process still running. Safe to call more than once.
    pub fn shutdown(&self) {
        let active = self.processes.active_count();
        if active > 0 {
            info!(active, "terminating running tool processes");
        }
        self.processes.terminate_all();
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.shutdown();
    }
}

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, error};

use crate::app::error::AppError;

/// Caps how many background jobs run at once.
struct GlobalSemaphore {
    limit: usize,
    used: Mutex<usize>,
    cv: Condvar,
}

impl GlobalSemaphore {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            used: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn acquire(self: &Arc<Self>) -> GlobalPermit {
        let mut used = self.used.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while *used >= self.limit {
            used = self
                .cv
                .wait(used)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *used += 1;
        GlobalPermit {
            semaphore: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut used = self.used.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *used = used.saturating_sub(1);
        self.cv.notify_one();
    }
}

struct GlobalPermit {
    semaphore: Arc<GlobalSemaphore>,
}

impl Drop for GlobalPermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Result of a background job, delivered over a channel to whoever holds the handle.
pub struct JobHandle<T> {
    label: String,
    rx: Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Blocks until the job finishes. A worker that panicked surfaces as an error.
    pub fn wait(self) -> Result<T, AppError> {
        self.rx.recv().map_err(|_| {
            AppError::operation(format!("Background job '{}' panicked", self.label), "")
        })
    }

    /// Non-blocking poll for UI loops. `Ok(None)` means still running.
    pub fn try_result(&self) -> Result<Option<T>, AppError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(AppError::operation(
                format!("Background job '{}' panicked", self.label),
                "",
            )),
        }
    }
}

/// Small worker pool plus the single-writer lock over the one device connection.
pub struct TaskScheduler {
    global: Arc<GlobalSemaphore>,
    device: Mutex<()>,
}

impl TaskScheduler {
    pub fn new(worker_limit: usize) -> Self {
        Self {
            global: Arc::new(GlobalSemaphore::new(worker_limit)),
            device: Mutex::new(()),
        }
    }

    /// Held for the whole duration of any device-facing operation.
    pub fn lock_device(&self) -> MutexGuard<'_, ()> {
        self.device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn submit<T, F>(&self, label: &str, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let global = Arc::clone(&self.global);
        let job_label = label.to_string();
        let spawned = std::thread::Builder::new()
            .name(format!("job-{label}"))
            .spawn(move || {
                let _permit = global.acquire();
                debug!(job = %job_label, "job started");
                let _ = tx.send(job());
                debug!(job = %job_label, "job finished");
            });
        if let Err(err) = spawned {
            // The sender was moved into the failed closure and dropped, so `wait` reports it.
            error!(job = %label, error = %err, "failed to spawn worker thread");
        }
        JobHandle {
            label: label.to_string(),
            rx,
        }
    }
}

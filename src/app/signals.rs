//! Interrupt handling for the CLI. The handler only flips a flag; the main loop polls it and runs
//! the real shutdown outside signal context.

use std::sync::atomic::{AtomicBool, Ordering};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

#[cfg_attr(not(unix), allow(dead_code))]
fn request_stop() {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM to the stop flag.
#[cfg(unix)]
pub fn install_stop_handlers() {
    extern "C" fn handler(signal: libc::c_int) {
        if signal == libc::SIGINT || signal == libc::SIGTERM {
            request_stop();
        }
    }

    // SAFETY: the handler touches a single atomic, which is async-signal safe.
    unsafe {
        let handler_ptr = handler as *const () as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler_ptr);
        libc::signal(libc::SIGTERM, handler_ptr);
    }
}

// Console children share the Ctrl-C event on Windows, so they stop alongside us.
#[cfg(not(unix))]
pub fn install_stop_handlers() {}

pub mod adb;
pub mod batch;
pub mod commands;
pub mod config;
pub mod diff;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod models;
pub mod package_list;
pub mod scheduler;
pub mod session;
pub mod session_log;
pub mod signals;
pub mod state;

#[cfg(test)]
pub mod testing;

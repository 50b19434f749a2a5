#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod instance;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod runtime;
pub mod session_log;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

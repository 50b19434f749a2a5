//! Domain model module declarations.

pub mod agent;
pub mod runtime_process;
pub mod session;

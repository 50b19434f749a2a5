//! Local IPC between `agent-conductor-ctl` and wrapper instances.
//!
//! A Unix domain socket (named pipe on Windows) per instance carries
//! newline-delimited JSON requests and responses.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::send_request;
pub use protocol::{IpcRequest, IpcResponse};

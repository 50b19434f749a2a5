//! Agent orchestration.
//!
//! Covers in-memory agent supervision, backend execution, multi-session
//! waits, and the clock their polling loops run on.

pub mod agent_manager;
pub mod clock;
pub mod executor;
pub mod waiter;

pub use agent_manager::{AgentManager, AgentSnapshot, ManagerSettings, SpawnRequest};
pub use clock::{Clock, ManualClock, TokioClock};
pub use executor::Executor;
pub use waiter::{wait_for_sessions, WaitMode, WaitReport};

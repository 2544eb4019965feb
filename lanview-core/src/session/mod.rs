//! Per-connection session state and the actor that drives it.

pub mod manager;
pub mod state;

pub use manager::{SessionContext, SessionManager, run_session};
pub use state::{Session, SessionId, StreamState, unix_millis};

//! Session server for the monitoring GUI.
//!
//! Browser sessions are kept in memory, serialized per session by a lock,
//! and written to disk in the background:
//! - `store`: in-memory sessions and their per-session locks
//! - `persister`: background writer draining the dirty queue
//! - `lifecycle`: session creation and reload
//! - `dispatch`: routing of session calls to workspace or built-in handlers
//! - `handlers`: the axum HTTP binding

pub mod builtins;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod persister;
pub mod plugins;
pub mod storage;
pub mod store;
pub mod workspace;

pub use context::{ServerContext, ServerSettings};
pub use dispatch::{Dispatcher, Outcome, SessionRequest};
pub use error::{ContextError, DispatchError};
pub use plugins::Plugins;

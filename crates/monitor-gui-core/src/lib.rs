//! Core traits and types for the monitoring GUI session server.
//!
//! This crate defines the abstractions shared between the server and its plugins:
//! - `SessionId` / `SessionState`: the persisted per-browser session payload
//! - `IdentityResolver` / `Requester`: client identity derived from proxy headers
//! - `Workspace` / `Source`: the capability interfaces plugins implement
//! - `SessionHandler`: a session-scoped call a workspace exposes
//! - `SessionStorage`: durable snapshot storage used by the persister

mod error;
mod identity;
mod plugin;
mod session;
mod storage;

pub use error::{CoreError, HandlerError, StorageError};
pub use identity::{
    ClientIdentity, IdentityKind, IdentityResolver, Requester, DEFAULT_CERT_HEADER,
    DEFAULT_HOST_HEADER,
};
pub use plugin::{
    HandlerTable, Params, PlotImage, Reply, SessionCall, SessionHandler, Source, Workspace,
};
pub use session::{SessionId, SessionState};
pub use storage::SessionStorage;

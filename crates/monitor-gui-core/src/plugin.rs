//! Capability interfaces implemented by workspace and source plugins.
//!
//! Plugins are registered with the server at startup. The dispatcher asks a
//! workspace for a handler by lookup key (`sessionFoo` for method `foo`)
//! instead of probing attributes at runtime.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::error::HandlerError;
use crate::session::SessionState;

/// Call parameters, as decoded from the query string or form body.
pub type Params = BTreeMap<String, String>;

/// Result of a session call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// A JSON result object; the usual reply to asynchronous calls.
    Json { body: Value },
    /// Plain text.
    Text { body: String },
    /// A page to be rendered by the external template engine.
    Page { template: String, variables: Value },
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Reply::Json { body }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Reply::Text { body: body.into() }
    }
}

/// Image produced by a source plot hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotImage {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Exclusive access to one session for the duration of a handler call.
pub struct SessionCall<'a> {
    pub session: &'a mut SessionState,
    pub params: &'a Params,
    dirty: bool,
}

impl<'a> SessionCall<'a> {
    pub fn new(session: &'a mut SessionState, params: &'a Params) -> Self {
        Self {
            session,
            params,
            dirty: false,
        }
    }

    /// Request that the session be saved once the call returns.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A session-scoped call. Always invoked with the session lock held.
pub trait SessionHandler: Send + Sync {
    fn call(&self, call: &mut SessionCall<'_>) -> Result<Reply, HandlerError>;
}

impl<F> SessionHandler for F
where
    F: Fn(&mut SessionCall<'_>) -> Result<Reply, HandlerError> + Send + Sync,
{
    fn call(&self, call: &mut SessionCall<'_>) -> Result<Reply, HandlerError> {
        self(call)
    }
}

/// Handlers keyed by lookup key, for workspaces that expose a fixed set.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Box<dyn SessionHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, handler: impl SessionHandler + 'static) -> Self {
        self.handlers.insert(key.into(), Box::new(handler));
        self
    }

    pub fn get(&self, key: &str) -> Option<&dyn SessionHandler> {
        self.handlers.get(key).map(|h| h.as_ref())
    }
}

/// A pluggable behavior set selected per session.
pub trait Workspace: Send + Sync {
    fn name(&self) -> &str;

    /// Populate the workspace's defaults in a new or switched session.
    fn initialise_session(&self, session: &mut SessionState);

    /// JSON description of the session as seen by this workspace.
    fn session_state(&self, session: &SessionState) -> Value;

    /// Apply start-up parameters to a freshly created session.
    fn start(&self, session: &mut SessionState, params: &Params);

    /// One-time server start-up customisation.
    fn customise(&self) {}

    /// Session-scoped handler for `key`, if this workspace provides one.
    fn handler(&self, _key: &str) -> Option<&dyn SessionHandler> {
        None
    }

    /// Drop a profiler snapshot, when running under a profiler.
    fn profile_snapshot(&self) {}
}

/// A data source attached to the server.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Populate the source's defaults in a new session.
    fn prepare_session(&self, _session: &mut SessionState) {}

    /// Name under which this source serves JSON, if any.
    fn json_hook(&self) -> Option<&str> {
        None
    }

    fn get_json(&self, _path: &[String], _params: &Params) -> Result<Value, HandlerError> {
        Err(HandlerError::Unsupported)
    }

    /// Name under which this source serves plots, if any.
    fn plot_hook(&self) -> Option<&str> {
        None
    }

    fn plot(&self, _path: &[String], _params: &Params) -> Result<Option<PlotImage>, HandlerError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ClientIdentity;
    use crate::session::SessionId;

    fn session() -> SessionState {
        SessionState::new(
            SessionId::parse("s1").unwrap(),
            ClientIdentity::new("10.0.0.1"),
            "Host 10.0.0.1".to_string(),
            "Summary".to_string(),
        )
    }

    #[test]
    fn test_handler_table_lookup() {
        let table = HandlerTable::new().with(
            "sessionPing",
            |call: &mut SessionCall<'_>| -> Result<Reply, HandlerError> {
                call.mark_dirty();
                Ok(Reply::text(format!("pong {}", call.session.id())))
            },
        );

        assert!(table.get("sessionPong").is_none());

        let mut state = session();
        let params = Params::new();
        let mut call = SessionCall::new(&mut state, &params);
        let reply = table.get("sessionPing").unwrap().call(&mut call).unwrap();
        assert_eq!(reply, Reply::text("pong s1"));
        assert!(call.is_dirty());
    }

    #[test]
    fn test_call_params() {
        let mut state = session();
        let params: Params = [("name".to_string(), "Reports".to_string())].into();
        let call = SessionCall::new(&mut state, &params);
        assert_eq!(call.param("name"), Some("Reports"));
        assert_eq!(call.param("missing"), None);
        assert!(!call.is_dirty());
    }

    #[test]
    fn test_reply_serialization() {
        let reply = Reply::json(serde_json::json!({"ok": true}));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["kind"], "json");
        assert_eq!(value["body"]["ok"], true);
    }
}

//! Placeholder workspace for deployments without real workspace plugins.

use monitor_gui_core::{
    HandlerError, Params, Reply, SessionCall, SessionHandler, SessionState, Workspace,
};
use serde_json::{json, Value};

/// A workspace with no content of its own.
///
/// It reports the session's core fields as its state and records the
/// parameters it was started with.
pub struct BasicWorkspace {
    name: String,
    state: StateHandler,
}

impl BasicWorkspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StateHandler,
        }
    }

    fn start_key(&self) -> String {
        format!("{}.start", self.name)
    }
}

fn describe(session: &SessionState) -> Value {
    json!({
        "session": session.id().as_str(),
        "workspace": session.workspace_name,
        "user": session.user_label,
        "public": session.is_public,
        "extensions": session.extension_fields,
    })
}

struct StateHandler;

impl SessionHandler for StateHandler {
    fn call(&self, call: &mut SessionCall<'_>) -> Result<Reply, HandlerError> {
        Ok(Reply::json(describe(call.session)))
    }
}

impl Workspace for BasicWorkspace {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialise_session(&self, _session: &mut SessionState) {}

    fn session_state(&self, session: &SessionState) -> Value {
        describe(session)
    }

    fn start(&self, session: &mut SessionState, params: &Params) {
        if !params.is_empty() {
            session.set_extension(self.start_key(), json!(params));
        }
    }

    fn handler(&self, key: &str) -> Option<&dyn SessionHandler> {
        match key {
            "sessionState" => Some(&self.state),
            _ => None,
        }
    }
}

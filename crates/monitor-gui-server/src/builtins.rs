//! Session handlers provided by the server itself.
//!
//! The dispatcher consults these only after the session's workspace declined
//! the lookup key.

use std::collections::HashMap;
use std::sync::Arc;

use monitor_gui_core::{HandlerError, Reply, SessionCall};
use serde_json::json;

use crate::context::ServerSettings;
use crate::plugins::Plugins;

type BuiltinFn = fn(&Builtins, &mut SessionCall<'_>) -> Result<Reply, HandlerError>;

pub struct Builtins {
    plugins: Arc<Plugins>,
    settings: Arc<ServerSettings>,
    table: HashMap<&'static str, BuiltinFn>,
}

impl Builtins {
    pub fn new(plugins: Arc<Plugins>, settings: Arc<ServerSettings>) -> Self {
        let mut table: HashMap<&'static str, BuiltinFn> = HashMap::new();
        table.insert("sessionIndex", session_index);
        table.insert("sessionWorkspace", session_workspace);
        table.insert("sessionProfileSnapshot", session_profile_snapshot);
        table.insert("sessionState", session_state);
        Self {
            plugins,
            settings,
            table,
        }
    }

    /// Run the built-in handler for `key`, if there is one.
    pub fn invoke(
        &self,
        key: &str,
        call: &mut SessionCall<'_>,
    ) -> Option<Result<Reply, HandlerError>> {
        self.table.get(key).map(|handler| handler(self, call))
    }
}

/// Page titles may carry en/em dash entities; plain titles use `-`.
fn plain_title(title: &str) -> String {
    title.replace("&#8211;", "-").replace("&#8212;", "-")
}

/// Main GUI page. The page is nearly empty; the client fetches content with
/// asynchronous calls.
fn session_index(b: &Builtins, call: &mut SessionCall<'_>) -> Result<Reply, HandlerError> {
    let settings = &b.settings;
    Ok(Reply::Page {
        template: "index".to_string(),
        variables: json!({
            "TITLE": plain_title(&settings.title),
            "HEADING": settings.title,
            "WORKSPACE": call.session.workspace_name,
            "SESSION_ID": call.session.id().as_str(),
            "SESSION_STATUS": "modifiable",
            "USER": call.session.user_label,
            "HOSTNAME": settings.hostname,
            "ROOTPATH": settings.base_url,
        }),
    })
}

/// Switch the session to workspace `name`.
fn session_workspace(b: &Builtins, call: &mut SessionCall<'_>) -> Result<Reply, HandlerError> {
    let requested = call
        .param("name")
        .map(str::to_string)
        .unwrap_or_else(|| call.session.workspace_name.clone());
    let workspace = b.plugins.workspace(&requested);

    call.session.workspace_name = workspace.name().to_string();
    workspace.initialise_session(call.session);
    call.mark_dirty();
    Ok(Reply::json(workspace.session_state(call.session)))
}

/// Drop a profiler snapshot when running under igprof.
fn session_profile_snapshot(
    b: &Builtins,
    call: &mut SessionCall<'_>,
) -> Result<Reply, HandlerError> {
    let profiling = b
        .settings
        .instrument
        .as_deref()
        .is_some_and(|i| i.starts_with("igprof "));
    if profiling {
        b.plugins
            .workspace(&call.session.workspace_name)
            .profile_snapshot();
    }
    Ok(Reply::text("OK"))
}

/// Workspaces are expected to provide their own session state.
fn session_state(_b: &Builtins, _call: &mut SessionCall<'_>) -> Result<Reply, HandlerError> {
    Err(HandlerError::NotImplemented)
}

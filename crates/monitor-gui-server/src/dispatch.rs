//! Routing of session-scoped calls to workspace or built-in handlers.
//!
//! Every call runs while holding its session's lock. The handler itself runs
//! on the blocking pool with the lock guard moved in, so the lock is released
//! when the handler returns, fails or panics.

use std::sync::Arc;

use monitor_gui_core::{Params, Reply, Requester, SessionCall, SessionId};
use tracing::{debug, error, instrument, warn};

use crate::builtins::Builtins;
use crate::error::{DispatchError, Result};
use crate::lifecycle::Lifecycle;
use crate::plugins::Plugins;
use crate::store::SessionStore;

/// A call addressed to a session, as decoded by the transport.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    /// Raw session id from the request path; `None` starts a new session.
    pub session_id: Option<String>,
    /// Method token; `None` asks for the session index page.
    pub method: Option<String>,
    pub params: Params,
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// The client should continue at this session.
    Redirect(SessionId),
    Reply(Reply),
}

/// Handler lookup key for a method token: `None` is `sessionIndex`,
/// `foo` is `sessionFoo`.
pub fn method_key(method: Option<&str>) -> String {
    let Some(token) = method else {
        return "sessionIndex".to_string();
    };
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => format!("session{}{}", first.to_uppercase(), chars.as_str()),
        None => "session".to_string(),
    }
}

pub struct Dispatcher {
    store: Arc<SessionStore>,
    lifecycle: Arc<Lifecycle>,
    plugins: Arc<Plugins>,
    builtins: Arc<Builtins>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        lifecycle: Arc<Lifecycle>,
        plugins: Arc<Plugins>,
        builtins: Arc<Builtins>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            plugins,
            builtins,
        }
    }

    /// Route one session call.
    ///
    /// A request without a session id starts a session in the default
    /// workspace. An id that is malformed, unknown or bound to another
    /// identity yields [`DispatchError::InvalidSession`].
    #[instrument(skip_all, fields(session = ?request.session_id, method = ?request.method))]
    pub async fn dispatch(
        &self,
        request: SessionRequest,
        requester: &Requester,
    ) -> Result<Outcome> {
        let Some(raw_id) = request.session_id else {
            let default = self.plugins.default_workspace().name().to_string();
            let id = self.start(&default, &Params::new(), requester).await?;
            return Ok(Outcome::Redirect(id));
        };

        let slot = self
            .store
            .get(&raw_id, requester.identity())
            .await
            .ok_or(DispatchError::InvalidSession)?;
        let key = method_key(request.method.as_deref());
        let guard = self.store.lock(slot).await;

        let workspace = self.plugins.workspace(&guard.workspace_name).clone();
        let builtins = self.builtins.clone();
        let params = request.params;
        let handler_key = key.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let mut call = SessionCall::new(&mut guard, &params);
            let result = match workspace.handler(&handler_key) {
                Some(handler) => Some(handler.call(&mut call)),
                None => builtins.invoke(&handler_key, &mut call),
            };
            let dirty = call.is_dirty();
            (guard, result, dirty)
        })
        .await;

        let (mut guard, result, dirty) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("Handler {} for session {} aborted: {}", key, raw_id, e);
                return Err(DispatchError::Aborted(key));
            }
        };

        guard.restore_binding();
        if dirty {
            self.store.save(&mut guard);
        }
        drop(guard);

        match result {
            Some(reply) => Ok(Outcome::Reply(reply?)),
            None => {
                warn!("No handler for {} in session {}", key, raw_id);
                Err(DispatchError::UnresolvedHandler(key))
            }
        }
    }

    /// Create a session in `workspace`, hand it the start parameters and
    /// queue it for writing. The new session is unlocked on return.
    #[instrument(skip(self, params, requester))]
    pub async fn start(
        &self,
        workspace: &str,
        params: &Params,
        requester: &Requester,
    ) -> Result<SessionId> {
        let id = self.lifecycle.create(workspace, requester).await?;
        let slot = self
            .store
            .get(id.as_str(), requester.identity())
            .await
            .ok_or(DispatchError::InvalidSession)?;

        let mut guard = self.store.lock(slot).await;
        let workspace = self.plugins.workspace(&guard.workspace_name).clone();
        workspace.start(&mut guard, params);
        self.store.save(&mut guard);
        debug!("Started session {} in {}", id, guard.workspace_name);
        Ok(id)
    }
}

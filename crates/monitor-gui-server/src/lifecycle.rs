//! Session creation and reload.

use std::sync::Arc;

use monitor_gui_core::{Requester, SessionId, SessionState, SessionStorage, StorageError};
use tracing::{info, instrument, warn};

use crate::plugins::Plugins;
use crate::store::{self, SessionStore, IDLE_EVICTION};

/// Load a session from durable storage after a memory miss.
///
/// A missing, unreadable or corrupt snapshot is reported as absent; it is
/// never fatal to the server.
pub(crate) async fn reload(storage: &dyn SessionStorage, id: &SessionId) -> Option<SessionState> {
    match storage.load(id).await {
        Ok(Some(state)) => {
            info!("Reloaded session {} from storage", id);
            Some(state)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Cannot load session {}: {}", id, e);
            None
        }
    }
}

pub struct Lifecycle {
    store: Arc<SessionStore>,
    storage: Arc<dyn SessionStorage>,
    plugins: Arc<Plugins>,
}

impl Lifecycle {
    pub fn new(
        store: Arc<SessionStore>,
        storage: Arc<dyn SessionStorage>,
        plugins: Arc<Plugins>,
    ) -> Self {
        Self {
            store,
            storage,
            plugins,
        }
    }

    /// Create and initialise a new session bound to `requester`.
    ///
    /// `workspace` is matched ignoring case; an unknown name leaves the
    /// session in the default workspace. Every workspace and source gets to
    /// populate its defaults. The session is not locked on return.
    #[instrument(skip(self, requester), level = "debug")]
    pub async fn create(
        &self,
        workspace: &str,
        requester: &Requester,
    ) -> Result<SessionId, StorageError> {
        // Bound memory use before adding another session.
        self.store.evict_idle(IDLE_EVICTION);

        let id = self.storage.allocate_id().await?;
        let mut state = SessionState::new(
            id.clone(),
            requester.identity().clone(),
            requester.user_label(),
            self.plugins.default_workspace().name().to_string(),
        );

        for w in self.plugins.workspaces() {
            if w.name().eq_ignore_ascii_case(workspace) {
                state.workspace_name = w.name().to_string();
            }
            w.initialise_session(&mut state);
        }
        for source in self.plugins.sources() {
            source.prepare_session(&mut state);
        }
        let state = store::rebound(state, &id, requester.identity());

        info!(
            "Created session {} for {} in workspace {}",
            id, state.user_label, state.workspace_name
        );
        self.store.put(state).await;
        Ok(id)
    }
}

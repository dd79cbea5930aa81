//! Server-wide context: settings plus the session machinery built on them.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use monitor_gui_core::{IdentityResolver, Requester, SessionId, SessionStorage};
use tracing::info;

use crate::builtins::Builtins;
use crate::dispatch::Dispatcher;
use crate::error::ContextError;
use crate::lifecycle::Lifecycle;
use crate::persister::{Persister, PERSIST_INTERVAL};
use crate::plugins::Plugins;
use crate::storage::LocalSessionStorage;
use crate::store::SessionStore;

/// Deployment settings the session machinery needs.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Page title; may contain HTML dash entities.
    pub title: String,
    /// URL prefix the server is mounted under, without a trailing slash.
    pub base_url: String,
    /// Directory holding one snapshot file per session.
    pub session_dir: PathBuf,
    pub identity: IdentityResolver,
    /// Instrumentation wrapper the server runs under, e.g. `igprof -pp`.
    pub instrument: Option<String>,
    pub hostname: String,
    pub persist_interval: Duration,
}

impl ServerSettings {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            title: "Monitoring GUI".to_string(),
            base_url: String::new(),
            session_dir: session_dir.into(),
            identity: IdentityResolver::default(),
            instrument: None,
            hostname: "localhost".to_string(),
            persist_interval: PERSIST_INTERVAL,
        }
    }

    /// Address of the main page of session `id`.
    pub fn session_url(&self, id: &SessionId) -> String {
        format!("{}/session/{}", self.base_url, id)
    }
}

pub struct ServerContext {
    settings: Arc<ServerSettings>,
    plugins: Arc<Plugins>,
    persister: Arc<Persister>,
    store: Arc<SessionStore>,
    dispatcher: Dispatcher,
}

impl ServerContext {
    /// Build the context over file storage under `settings.session_dir`.
    /// Must be called within a tokio runtime.
    pub fn new(settings: ServerSettings, plugins: Plugins) -> Result<Self, ContextError> {
        let storage = LocalSessionStorage::open(&settings.session_dir)?;
        Ok(Self::with_storage(settings, plugins, Arc::new(storage)))
    }

    /// Build the context over any storage backend.
    ///
    /// The persister starts first so the store can queue writes from its
    /// first insertion on.
    pub fn with_storage(
        settings: ServerSettings,
        plugins: Plugins,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let settings = Arc::new(settings);
        let plugins = Arc::new(plugins);

        let persister = Arc::new(Persister::spawn(storage.clone(), settings.persist_interval));
        let store = Arc::new(SessionStore::new(storage.clone(), persister.clone()));
        let lifecycle = Arc::new(Lifecycle::new(store.clone(), storage, plugins.clone()));
        let builtins = Arc::new(Builtins::new(plugins.clone(), settings.clone()));
        let dispatcher = Dispatcher::new(store.clone(), lifecycle, plugins.clone(), builtins);

        info!(
            "Session context ready ({} workspaces, {} sources)",
            plugins.workspaces().len(),
            plugins.sources().len()
        );

        Self {
            settings,
            plugins,
            persister,
            store,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Resolve the requester from header lookups and the peer address.
    pub fn requester<F>(&self, header: F, peer: Option<IpAddr>) -> Requester
    where
        F: Fn(&str) -> Option<String>,
    {
        self.settings.identity.resolve(header, peer)
    }

    /// Stop the persister after writing out every queued session.
    pub async fn shutdown(&self) {
        info!("Shutting down session context");
        self.persister.shutdown().await;
    }
}

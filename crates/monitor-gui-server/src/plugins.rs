use std::sync::Arc;

use monitor_gui_core::{Source, Workspace};

use crate::error::ContextError;

/// Workspaces and sources registered with the server.
///
/// The first registered workspace is the default one.
pub struct Plugins {
    workspaces: Vec<Arc<dyn Workspace>>,
    sources: Vec<Arc<dyn Source>>,
}

impl Plugins {
    pub fn builder() -> PluginsBuilder {
        PluginsBuilder::default()
    }

    pub fn workspaces(&self) -> &[Arc<dyn Workspace>] {
        &self.workspaces
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub fn default_workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspaces[0]
    }

    /// Workspace named `name`, ignoring case; the default if there is none.
    pub fn workspace(&self, name: &str) -> &Arc<dyn Workspace> {
        self.workspaces
            .iter()
            .find(|w| w.name().eq_ignore_ascii_case(name))
            .unwrap_or_else(|| self.default_workspace())
    }

    /// First source serving JSON under `hook`.
    pub fn json_source(&self, hook: &str) -> Option<&Arc<dyn Source>> {
        self.sources.iter().find(|s| s.json_hook() == Some(hook))
    }

    /// First source serving plots under `hook`.
    pub fn plot_source(&self, hook: &str) -> Option<&Arc<dyn Source>> {
        self.sources.iter().find(|s| s.plot_hook() == Some(hook))
    }
}

#[derive(Default)]
pub struct PluginsBuilder {
    workspaces: Vec<Arc<dyn Workspace>>,
    sources: Vec<Arc<dyn Source>>,
}

impl PluginsBuilder {
    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspaces.push(workspace);
        self
    }

    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    /// Finish registration. Each workspace's `customise` hook runs once here.
    pub fn build(self) -> Result<Plugins, ContextError> {
        if self.workspaces.is_empty() {
            return Err(ContextError::NoWorkspaces);
        }
        for workspace in &self.workspaces {
            workspace.customise();
        }
        Ok(Plugins {
            workspaces: self.workspaces,
            sources: self.sources,
        })
    }
}

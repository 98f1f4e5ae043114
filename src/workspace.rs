//! Workspace path resolution on agents.

use std::path::PathBuf;
use std::sync::Arc;

use crate::node::{FleetRegistry, Node};

/// Directory under the agent root where job workspaces are laid out.
pub const WORKSPACE_ROOT: &str = "workspace";

/// External collaborator that may override where an item's workspace lives
/// on an agent. Locators are consulted in registration order; the first
/// non-empty answer wins.
pub trait WorkspaceLocator: Send + Sync {
    fn locate(&self, item: &str, node: &Node) -> Option<PathBuf>;
}

impl Node {
    /// Root directory on this agent, preferring the live (possibly remotely
    /// overridden) value over the configured one. None while offline.
    pub fn root_path(&self, registry: &FleetRegistry) -> Option<PathBuf> {
        let computer = registry.computer_for(self.name())?;
        if !computer.is_online() {
            return None;
        }
        let root = computer
            .absolute_remote_fs()
            .unwrap_or_else(|| self.remote_fs().to_string());
        Some(PathBuf::from(root))
    }

    /// Root under which all job workspaces live. None while offline.
    pub fn workspace_root(&self, registry: &FleetRegistry) -> Option<PathBuf> {
        Some(self.root_path(registry)?.join(WORKSPACE_ROOT))
    }

    /// Resolve the workspace for one item: locator overrides first, then
    /// the agent's workspace root joined with the item's scoped name.
    /// None when the agent is offline, which is a normal condition, not an
    /// error.
    pub fn workspace_for(&self, item: &str, registry: &FleetRegistry) -> Option<PathBuf> {
        for locator in registry.workspace_locators() {
            if let Some(path) = locator.locate(item, self) {
                return Some(path);
            }
        }
        Some(self.workspace_root(registry)?.join(item))
    }
}

/// Locator that pins selected items to fixed paths. Mostly useful in tests
/// and for masters that carve out shared caches.
pub struct FixedLocator {
    item: String,
    path: PathBuf,
}

impl FixedLocator {
    pub fn new(item: impl Into<String>, path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            item: item.into(),
            path: path.into(),
        })
    }
}

impl WorkspaceLocator for FixedLocator {
    fn locate(&self, item: &str, _node: &Node) -> Option<PathBuf> {
        (item == self.item).then(|| self.path.clone())
    }
}

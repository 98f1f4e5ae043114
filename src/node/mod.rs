//! Durable agent definitions.
//!
//! A [`Node`] is the configuration record for one remote execution agent:
//! identity, capacity, placement labels, filesystem root and the strategies
//! used to connect and retain it. Its live runtime counterpart is the
//! [`Computer`](crate::computer::Computer), owned by the registry.

pub mod property;
pub mod registry;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{FleetError, Result};
use crate::label::{Label, Mode};
use crate::launcher::ComputerLauncher;
use crate::retention::{Always, RetentionStrategy};

pub use property::{EnvironmentProperty, NodeProperty};
pub use registry::FleetRegistry;

/// Owner recorded when no identity provider knows the acting user.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// The label string and the set derived from it, updated together so a
/// reader never observes a set older than the last completed write.
struct LabelCache {
    raw: String,
    parsed: Arc<BTreeSet<Label>>,
}

impl LabelCache {
    fn new(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let parsed = Arc::new(Label::parse_set(&raw));
        Self { raw, parsed }
    }
}

/// Configuration record for one remote execution agent.
///
/// Identity is the name alone: two nodes with the same name are the same
/// entity for collection membership, whatever their other fields say.
/// Mutable fields sit behind locks so a shared `Arc<Node>` can be
/// reconfigured by web requests while sweeps and schedulers read it.
pub struct Node {
    name: String,
    remote_fs: String,
    description: RwLock<String>,
    num_executors: RwLock<u32>,
    mode: RwLock<Mode>,
    labels: RwLock<LabelCache>,
    properties: RwLock<Vec<Arc<dyn NodeProperty>>>,
    launcher: RwLock<Option<Arc<dyn ComputerLauncher>>>,
    retention: RwLock<Option<Arc<dyn RetentionStrategy>>>,
    owner_id: RwLock<String>,
}

impl Node {
    pub fn builder(name: impl Into<String>, remote_fs: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(name, remote_fs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured root path on the agent. The live, possibly remotely
    /// overridden value lives on the Computer.
    pub fn remote_fs(&self) -> &str {
        &self.remote_fs
    }

    pub fn description(&self) -> String {
        self.description.read().expect("description lock").clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.write().expect("description lock") = description.into();
    }

    pub fn num_executors(&self) -> u32 {
        *self.num_executors.read().expect("executors lock")
    }

    pub fn set_num_executors(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(FleetError::InvalidConfig(format!(
                "agent {}: executor count must be at least 1",
                self.name
            )));
        }
        *self.num_executors.write().expect("executors lock") = n;
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read().expect("mode lock")
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.write().expect("mode lock") = mode;
    }

    pub fn label_string(&self) -> String {
        self.labels.read().expect("label lock").raw.clone()
    }

    /// The cached label set. Always equal to the whitespace tokenization of
    /// the current label string.
    pub fn assigned_labels(&self) -> Arc<BTreeSet<Label>> {
        self.labels.read().expect("label lock").parsed.clone()
    }

    /// Replace the label string and republish the derived set before
    /// returning, so no caller observes a stale cache.
    pub fn set_label_string(&self, label_string: impl AsRef<str>) {
        let mut cache = self.labels.write().expect("label lock");
        *cache = LabelCache::new(label_string.as_ref());
    }

    /// Whether this agent accepts work pinned to `label` (or unpinned work
    /// when `label` is None). Exclusive agents take only pinned work.
    pub fn accepts(&self, label: Option<&Label>) -> bool {
        match label {
            Some(label) => self.assigned_labels().contains(label),
            None => self.mode() == Mode::Normal,
        }
    }

    pub fn properties(&self) -> Vec<Arc<dyn NodeProperty>> {
        self.properties.read().expect("properties lock").clone()
    }

    pub fn set_properties(&self, properties: Vec<Arc<dyn NodeProperty>>) {
        *self.properties.write().expect("properties lock") = properties;
    }

    /// Environment contributed by the node's properties, in registration
    /// order; later properties win on key collisions.
    pub fn property_environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        for property in self.properties.read().expect("properties lock").iter() {
            env.extend(property.environment());
        }
        env
    }

    /// The configured launcher, if any. Callers wanting the passive
    /// inbound default should go through
    /// [`FleetRegistry::effective_launcher`](registry::FleetRegistry::effective_launcher).
    pub fn launcher(&self) -> Option<Arc<dyn ComputerLauncher>> {
        self.launcher.read().expect("launcher lock").clone()
    }

    pub fn set_launcher(&self, launcher: Arc<dyn ComputerLauncher>) {
        *self.launcher.write().expect("launcher lock") = Some(launcher);
    }

    /// The retention strategy, defaulting to "always keep connected".
    pub fn retention(&self) -> Arc<dyn RetentionStrategy> {
        self.retention
            .read()
            .expect("retention lock")
            .clone()
            .unwrap_or_else(|| Arc::new(Always))
    }

    pub fn set_retention(&self, retention: Arc<dyn RetentionStrategy>) {
        *self.retention.write().expect("retention lock") = Some(retention);
    }

    pub fn owner_id(&self) -> String {
        self.owner_id.read().expect("owner lock").clone()
    }

    pub(crate) fn set_owner_id(&self, owner_id: impl Into<String>) {
        *self.owner_id.write().expect("owner lock") = owner_id.into();
    }

    /// Copy of this node under a new name, for registry-coordinated
    /// renames. Runtime state does not carry over.
    pub fn with_name(&self, name: impl Into<String>) -> Result<Node> {
        let node = NodeBuilder::new(name, self.remote_fs.clone())
            .description(self.description())
            .num_executors(self.num_executors())
            .mode(self.mode())
            .label_string(self.label_string())
            .properties(self.properties())
            .build()?;
        if let Some(launcher) = self.launcher() {
            node.set_launcher(launcher);
        }
        if let Some(retention) = self.retention.read().expect("retention lock").clone() {
            node.set_retention(retention);
        }
        node.set_owner_id(self.owner_id());
        Ok(node)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent[{}]", self.name)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("remote_fs", &self.remote_fs)
            .field("num_executors", &self.num_executors())
            .field("labels", &self.label_string())
            .finish()
    }
}

/// Builder for [`Node`]; validation happens in [`build`](NodeBuilder::build)
/// and failures surface synchronously to the configuring caller.
pub struct NodeBuilder {
    name: String,
    remote_fs: String,
    description: String,
    num_executors: u32,
    mode: Mode,
    label_string: String,
    properties: Vec<Arc<dyn NodeProperty>>,
    launcher: Option<Arc<dyn ComputerLauncher>>,
    retention: Option<Arc<dyn RetentionStrategy>>,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>, remote_fs: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            remote_fs: remote_fs.into().trim().to_string(),
            description: String::new(),
            num_executors: 1,
            mode: Mode::Normal,
            label_string: String::new(),
            properties: Vec::new(),
            launcher: None,
            retention: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn num_executors(mut self, n: u32) -> Self {
        self.num_executors = n;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn label_string(mut self, label_string: impl Into<String>) -> Self {
        self.label_string = label_string.into();
        self
    }

    pub fn properties(mut self, properties: Vec<Arc<dyn NodeProperty>>) -> Self {
        self.properties = properties;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn ComputerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn retention(mut self, retention: Arc<dyn RetentionStrategy>) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn build(self) -> Result<Node> {
        if self.name.is_empty() {
            return Err(FleetError::InvalidConfig(
                "agent name must not be empty".to_string(),
            ));
        }
        if self.num_executors == 0 {
            return Err(FleetError::InvalidConfig(format!(
                "agent {}: executor count must be at least 1",
                self.name
            )));
        }
        Ok(Node {
            name: self.name,
            remote_fs: self.remote_fs,
            description: RwLock::new(self.description),
            num_executors: RwLock::new(self.num_executors),
            mode: RwLock::new(self.mode),
            labels: RwLock::new(LabelCache::new(&self.label_string)),
            properties: RwLock::new(self.properties),
            launcher: RwLock::new(self.launcher),
            retention: RwLock::new(self.retention),
            owner_id: RwLock::new(ANONYMOUS_OWNER.to_string()),
        })
    }
}

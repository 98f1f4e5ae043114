use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::computer::Computer;
use crate::error::{FleetError, Result};
use crate::launcher::inbound::{InboundAcceptor, InboundLauncher};
use crate::launcher::ComputerLauncher;
use crate::node::{Node, ANONYMOUS_OWNER};
use crate::workspace::WorkspaceLocator;

/// Supplies the id of the acting user, consumed once at node-creation time.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Identity provider for contexts with no authentication at all.
pub struct AnonymousIdentity;

impl IdentityProvider for AnonymousIdentity {
    fn current_user_id(&self) -> Option<String> {
        None
    }
}

struct Slot {
    node: Arc<Node>,
    epoch: u64,
}

/// Registry mapping each agent name to at most one live [`Node`] and its
/// runtime [`Computer`].
///
/// Every (re)bind of a name bumps the slot's epoch. Computers capture the
/// epoch they were created under; a mismatch at handle-creation time marks
/// the computer as stale (a reconnect or reload has superseded it).
pub struct FleetRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    computers: RwLock<HashMap<String, Arc<Computer>>>,
    epochs: AtomicU64,
    locators: RwLock<Vec<Arc<dyn WorkspaceLocator>>>,
    identity: Box<dyn IdentityProvider>,
    inbound: RwLock<Option<(Arc<InboundAcceptor>, Duration)>>,
}

impl FleetRegistry {
    pub fn new(identity: Box<dyn IdentityProvider>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            computers: RwLock::new(HashMap::new()),
            epochs: AtomicU64::new(0),
            locators: RwLock::new(Vec::new()),
            identity,
            inbound: RwLock::new(None),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Box::new(AnonymousIdentity))
    }

    /// Bind a node under its name, replacing any previous holder.
    ///
    /// Owner continuity: a replaced node passes its owner id on, and a node
    /// arriving with a non-anonymous owner already set (a rename) keeps it.
    /// Only a genuinely new binding is owned by the acting user, or
    /// "anonymous" when unknown.
    pub fn add_node(&self, node: Node) -> Arc<Node> {
        let name = node.name().to_string();
        let mut slots = self.slots.write().expect("slots lock");

        let owner = match slots.get(&name) {
            Some(previous) => previous.node.owner_id(),
            None if node.owner_id() != ANONYMOUS_OWNER => node.owner_id(),
            None => self
                .identity
                .current_user_id()
                .unwrap_or_else(|| ANONYMOUS_OWNER.to_string()),
        };
        node.set_owner_id(owner);

        let node = Arc::new(node);
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let replaced = slots
            .insert(name.clone(), Slot { node: node.clone(), epoch })
            .is_some();
        tracing::info!(agent = %name, epoch, replaced, "Agent bound in registry");
        node
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.slots
            .read()
            .expect("slots lock")
            .get(name)
            .map(|slot| slot.node.clone())
    }

    pub fn epoch_of(&self, name: &str) -> Option<u64> {
        self.slots
            .read()
            .expect("slots lock")
            .get(name)
            .map(|slot| slot.epoch)
    }

    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .expect("slots lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Unbind a node. Returns the node and its computer, if any; the caller
    /// is responsible for disconnecting the computer.
    pub fn remove_node(&self, name: &str) -> Option<(Arc<Node>, Option<Arc<Computer>>)> {
        let slot = self.slots.write().expect("slots lock").remove(name)?;
        let computer = self.computers.write().expect("computers lock").remove(name);
        tracing::info!(agent = %name, "Agent removed from registry");
        Some((slot.node, computer))
    }

    /// Rebind a node under a new name. The old slot's computer is dropped;
    /// the new slot starts with none. Owner id carries over via
    /// [`Node::with_name`].
    pub fn rename(&self, old: &str, new: &str) -> Result<Arc<Node>> {
        let node = self
            .get_node(old)
            .ok_or_else(|| FleetError::NotFound(format!("agent {old}")))?;
        let renamed = node.with_name(new)?;
        self.slots.write().expect("slots lock").remove(old);
        self.computers.write().expect("computers lock").remove(old);
        Ok(self.add_node(renamed))
    }

    /// The existing computer for a name. None when the agent was never
    /// initialized.
    pub fn computer_for(&self, name: &str) -> Option<Arc<Computer>> {
        self.computers
            .read()
            .expect("computers lock")
            .get(name)
            .cloned()
    }

    /// The computer for a name, created on first use and bound to the
    /// slot's current node and epoch.
    pub fn ensure_computer(&self, name: &str) -> Option<Arc<Computer>> {
        if let Some(existing) = self.computer_for(name) {
            return Some(existing);
        }
        let (node, epoch) = {
            let slots = self.slots.read().expect("slots lock");
            let slot = slots.get(name)?;
            (slot.node.clone(), slot.epoch)
        };
        let mut computers = self.computers.write().expect("computers lock");
        // Racing creators: first insert wins.
        Some(
            computers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Computer::new(node, epoch)))
                .clone(),
        )
    }

    /// Point an existing computer at the slot's current node and epoch,
    /// after a replace or reload superseded its binding.
    pub fn rebind_computer(&self, name: &str) -> Option<Arc<Computer>> {
        let computer = self.computer_for(name)?;
        let (node, epoch) = {
            let slots = self.slots.read().expect("slots lock");
            let slot = slots.get(name)?;
            (slot.node.clone(), slot.epoch)
        };
        computer.rebind(node, epoch);
        Some(computer)
    }

    pub fn add_workspace_locator(&self, locator: Arc<dyn WorkspaceLocator>) {
        self.locators.write().expect("locators lock").push(locator);
    }

    pub fn workspace_locators(&self) -> Vec<Arc<dyn WorkspaceLocator>> {
        self.locators.read().expect("locators lock").clone()
    }

    /// Wire up the acceptor that inbound agents dial into; it backs the
    /// default launcher of nodes that configure none.
    pub fn set_inbound_acceptor(&self, acceptor: Arc<InboundAcceptor>, wait: Duration) {
        *self.inbound.write().expect("inbound lock") = Some((acceptor, wait));
    }

    /// The node's configured launcher, or the passive wait-for-inbound
    /// default. The substitution is ephemeral: it is never written back to
    /// the node.
    pub fn effective_launcher(&self, node: &Node) -> Arc<dyn ComputerLauncher> {
        if let Some(configured) = node.launcher() {
            return configured;
        }
        match self.inbound.read().expect("inbound lock").clone() {
            Some((acceptor, wait)) => Arc::new(InboundLauncher::new(acceptor, wait)),
            None => Arc::new(InboundLauncher::detached()),
        }
    }
}

impl Node {
    /// The live runtime counterpart of this node, if one was ever created.
    pub fn get_computer(&self, registry: &FleetRegistry) -> Option<Arc<Computer>> {
        registry.computer_for(self.name())
    }
}

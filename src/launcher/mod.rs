//! Connection-establishment strategies.
//!
//! A [`ComputerLauncher`] opens a [`RemoteChannel`] for a node. Two
//! strategies ship with the crate:
//!
//! - [`CommandLauncher`]: spawn a process (typically `ssh host buildfleet
//!   agent --stdio`) and speak the wire protocol over its stdio.
//! - [`InboundLauncher`]: wait passively for the agent to dial into the
//!   master's acceptor. This is the default when a node configures nothing.

pub mod command;
pub mod inbound;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::RemoteChannel;
use crate::error::{FleetError, Result};
use crate::node::Node;

pub use command::CommandLauncher;
pub use inbound::{InboundAcceptor, InboundLauncher};

/// Strategy that establishes a channel for a node.
///
/// On success the channel is open and able to run a round trip before the
/// OS-family handshake completes. On failure nothing leaks; callers never
/// need to clean up after a failed launch.
#[async_trait]
pub trait ComputerLauncher: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> &'static str;

    async fn launch(&self, node: &Arc<Node>) -> Result<Arc<dyn RemoteChannel>>;
}

type LauncherFactory =
    Arc<dyn Fn(&HashMap<String, String>) -> Result<Arc<dyn ComputerLauncher>> + Send + Sync>;

/// Catalog of launcher implementations, resolved at process start.
/// Configuration refers to launchers by kind; the catalog turns a kind plus
/// parameters into an instance.
pub struct LauncherCatalog {
    factories: HashMap<&'static str, LauncherFactory>,
}

impl LauncherCatalog {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in kinds: `command` (params: `program`, optional space
    /// separated `args`). The inbound default needs no catalog entry; it is
    /// what nodes get when they configure no launcher at all.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("command", |params| {
            let program = params
                .get("program")
                .ok_or_else(|| {
                    FleetError::InvalidConfig("command launcher needs a program".to_string())
                })?
                .clone();
            let args = params
                .get("args")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            Ok(Arc::new(CommandLauncher::new(program, args)) as Arc<dyn ComputerLauncher>)
        });
        catalog
    }

    pub fn register<F>(&mut self, kind: &'static str, factory: F)
    where
        F: Fn(&HashMap<String, String>) -> Result<Arc<dyn ComputerLauncher>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn resolve(
        &self,
        kind: &str,
        params: &HashMap<String, String>,
    ) -> Result<Arc<dyn ComputerLauncher>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| FleetError::NotFound(format!("launcher kind {kind}")))?;
        factory(params)
    }
}

impl Default for LauncherCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

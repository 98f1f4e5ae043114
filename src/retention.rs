//! Policies deciding when an idle or disconnected agent should be
//! (re)launched or taken offline, plus the periodic sweep that applies them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::computer::Computer;
use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::node::FleetRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    /// Launch a connection for this agent now.
    Connect,
    /// Take the agent offline.
    Disconnect,
    /// Leave things as they are.
    Keep,
}

/// Policy consulted by the periodic sweep for each agent.
pub trait RetentionStrategy: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &'static str;

    fn check(&self, computer: &Computer) -> RetentionDecision;
}

/// Always try to keep the agent connected. The default strategy.
#[derive(Debug, Clone, Copy)]
pub struct Always;

impl RetentionStrategy for Always {
    fn id(&self) -> &'static str {
        "always"
    }

    fn check(&self, computer: &Computer) -> RetentionDecision {
        if computer.is_online() {
            RetentionDecision::Keep
        } else {
            RetentionDecision::Connect
        }
    }
}

/// Connect only while demand is flagged; disconnect once it clears.
#[derive(Debug, Default)]
pub struct Demand {
    in_demand: AtomicBool,
}

impl Demand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_demand(&self, demanded: bool) {
        self.in_demand.store(demanded, Ordering::Release);
    }

    pub fn in_demand(&self) -> bool {
        self.in_demand.load(Ordering::Acquire)
    }
}

impl RetentionStrategy for Demand {
    fn id(&self) -> &'static str {
        "demand"
    }

    fn check(&self, computer: &Computer) -> RetentionDecision {
        match (computer.is_online(), self.in_demand()) {
            (false, true) => RetentionDecision::Connect,
            (true, false) => RetentionDecision::Disconnect,
            _ => RetentionDecision::Keep,
        }
    }
}

/// Catalog of retention strategies, resolved at process start.
pub struct RetentionCatalog {
    strategies: HashMap<&'static str, Arc<dyn RetentionStrategy>>,
}

impl RetentionCatalog {
    pub fn builtin() -> Self {
        let mut strategies: HashMap<&'static str, Arc<dyn RetentionStrategy>> = HashMap::new();
        strategies.insert("always", Arc::new(Always));
        strategies.insert("demand", Arc::new(Demand::new()));
        Self { strategies }
    }

    pub fn register(&mut self, strategy: Arc<dyn RetentionStrategy>) {
        self.strategies.insert(strategy.id(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RetentionStrategy>> {
        self.strategies.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.strategies.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// One pass over the fleet: ask each node's strategy what to do and do it.
///
/// Launch failures are logged and left for the next sweep; a sweep never
/// aborts because one agent refused to come up. A launch already in flight
/// for an agent is not an error, just a sweep overlapping a slow connect.
pub async fn retention_sweep(registry: &FleetRegistry, config: &FleetConfig) {
    for name in registry.node_names() {
        let Some(node) = registry.get_node(&name) else {
            continue;
        };
        let Some(computer) = registry.ensure_computer(&name) else {
            continue;
        };

        match node.retention().check(&computer) {
            RetentionDecision::Connect => {
                let launcher = registry.effective_launcher(&node);
                match computer.connect(launcher, config.handshake_timeout()).await {
                    Ok(()) => {}
                    Err(FleetError::LaunchInFlight(_)) => {
                        tracing::debug!(agent = %name, "Launch already in flight, skipping");
                    }
                    Err(e) => {
                        tracing::warn!(agent = %name, error = %e, "Launch failed, will retry next sweep");
                    }
                }
            }
            RetentionDecision::Disconnect => {
                computer.disconnect().await;
            }
            RetentionDecision::Keep => {}
        }
    }
}

/// Sweep interval with jitter, so reconnect storms do not synchronize.
pub fn jittered_interval(config: &FleetConfig) -> std::time::Duration {
    let jitter = if config.sweep_jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..config.sweep_jitter_ms)
    };
    std::time::Duration::from_millis(config.sweep_interval_ms + jitter)
}

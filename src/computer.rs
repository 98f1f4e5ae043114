//! Live runtime state for one agent.
//!
//! A [`Computer`] owns the current channel to its agent (if any), the OS
//! family learned during the handshake, and the resolved remote filesystem
//! root. It is created by the registry on first use and persists as a
//! disconnected shell between connections; a reconnect installs a fresh
//! channel object, never revives an old one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::channel::{ChannelState, OsFamily, RemoteChannel, WorkOutcome, WorkUnit};
use crate::clock::{self, ClockDifference};
use crate::error::{FleetError, Result};
use crate::launcher::ComputerLauncher;
use crate::node::{FleetRegistry, Node};

struct Binding {
    node: Arc<Node>,
    epoch: u64,
}

#[derive(Default)]
struct Runtime {
    channel: Option<Arc<dyn RemoteChannel>>,
    os_family: Option<OsFamily>,
    absolute_remote_fs: Option<String>,
}

pub struct Computer {
    binding: RwLock<Binding>,
    runtime: RwLock<Runtime>,
    connecting: AtomicBool,
}

/// Resets the single-flight connect flag even when a launch attempt
/// errors or is cancelled mid-await.
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Computer {
    pub fn new(node: Arc<Node>, epoch: u64) -> Self {
        Self {
            binding: RwLock::new(Binding { node, epoch }),
            runtime: RwLock::new(Runtime::default()),
            connecting: AtomicBool::new(false),
        }
    }

    /// The node this computer was bound to. After a registry replace this
    /// may be a superseded instance; see [`Computer::is_current`].
    pub fn node(&self) -> Arc<Node> {
        self.binding.read().expect("binding lock").node.clone()
    }

    pub fn bound_epoch(&self) -> u64 {
        self.binding.read().expect("binding lock").epoch
    }

    pub(crate) fn rebind(&self, node: Arc<Node>, epoch: u64) {
        let mut binding = self.binding.write().expect("binding lock");
        binding.node = node;
        binding.epoch = epoch;
    }

    /// Whether this computer still speaks for the registry slot that
    /// `node` holds. False means a reconnect or reload has rebound the
    /// name and this computer must refuse to produce execution handles.
    pub fn is_current(&self, node: &Arc<Node>, registry: &FleetRegistry) -> bool {
        let binding = self.binding.read().expect("binding lock");
        if !Arc::ptr_eq(&binding.node, node) {
            return false;
        }
        registry.epoch_of(node.name()) == Some(binding.epoch)
    }

    pub fn channel(&self) -> Option<Arc<dyn RemoteChannel>> {
        self.runtime.read().expect("runtime lock").channel.clone()
    }

    /// OS family of the remote. None only while the channel is up but the
    /// handshake has not completed, or when offline.
    pub fn os_family(&self) -> Option<OsFamily> {
        self.runtime.read().expect("runtime lock").os_family
    }

    /// Resolved root path, which may differ from the configured remote FS
    /// if the agent overrode it.
    pub fn absolute_remote_fs(&self) -> Option<String> {
        self.runtime
            .read()
            .expect("runtime lock")
            .absolute_remote_fs
            .clone()
    }

    pub fn is_online(&self) -> bool {
        self.runtime
            .read()
            .expect("runtime lock")
            .channel
            .as_ref()
            .map(|channel| channel.state() == ChannelState::Open)
            .unwrap_or(false)
    }

    /// Install a freshly launched channel. The previous channel, if any,
    /// must be gone first; two live channels for one identity is the race
    /// this guards against.
    pub fn install_channel(&self, channel: Arc<dyn RemoteChannel>) -> Result<()> {
        let mut runtime = self.runtime.write().expect("runtime lock");
        if let Some(existing) = &runtime.channel {
            if !existing.state().is_closing_or_closed() {
                return Err(FleetError::LaunchFailed {
                    agent: self.node().name().to_string(),
                    reason: "a live channel is already installed".to_string(),
                });
            }
        }
        runtime.channel = Some(channel);
        runtime.os_family = None;
        runtime.absolute_remote_fs = None;
        Ok(())
    }

    /// Record the handshake answer; after this the channel is fully usable
    /// for command execution.
    pub fn record_system_info(&self, os_family: OsFamily, absolute_remote_fs: String) {
        let mut runtime = self.runtime.write().expect("runtime lock");
        runtime.os_family = Some(os_family);
        runtime.absolute_remote_fs = Some(absolute_remote_fs);
    }

    /// Launch a channel via `launcher` and complete the handshake.
    ///
    /// Only one attempt may be in flight per computer; a concurrent second
    /// attempt is rejected with [`FleetError::LaunchInFlight`].
    pub async fn connect(
        &self,
        launcher: Arc<dyn ComputerLauncher>,
        handshake_timeout: Duration,
    ) -> Result<()> {
        let node = self.node();
        let name = node.name().to_string();

        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FleetError::LaunchInFlight(name));
        }
        let _guard = ConnectGuard(&self.connecting);

        if self.is_online() {
            tracing::debug!(agent = %name, "Already connected, skipping launch");
            return Ok(());
        }

        let channel = launcher.launch(&node).await?;
        self.install_channel(channel.clone())?;

        let handshake = tokio::time::timeout(handshake_timeout, channel.call(WorkUnit::SystemInfo));
        match handshake.await {
            Ok(Ok(WorkOutcome::SystemInfo {
                os_family,
                absolute_remote_fs,
            })) => {
                self.record_system_info(os_family, absolute_remote_fs.clone());
                tracing::info!(
                    agent = %name,
                    os = %os_family,
                    remote_fs = %absolute_remote_fs,
                    "Agent connected"
                );
                Ok(())
            }
            Ok(Ok(other)) => {
                self.teardown(&channel).await;
                Err(FleetError::LaunchFailed {
                    agent: name,
                    reason: format!("unexpected handshake reply: {other:?}"),
                })
            }
            Ok(Err(e)) => {
                self.teardown(&channel).await;
                Err(FleetError::LaunchFailed {
                    agent: name,
                    reason: format!("handshake failed: {e}"),
                })
            }
            Err(_) => {
                self.teardown(&channel).await;
                Err(FleetError::LaunchFailed {
                    agent: name,
                    reason: "handshake timed out".to_string(),
                })
            }
        }
    }

    async fn teardown(&self, channel: &Arc<dyn RemoteChannel>) {
        channel.close().await;
        let mut runtime = self.runtime.write().expect("runtime lock");
        runtime.channel = None;
        runtime.os_family = None;
        runtime.absolute_remote_fs = None;
    }

    /// Close the channel and leave a disconnected shell awaiting the next
    /// retention decision.
    pub async fn disconnect(&self) {
        let channel = {
            let mut runtime = self.runtime.write().expect("runtime lock");
            runtime.os_family = None;
            runtime.absolute_remote_fs = None;
            runtime.channel.take()
        };
        if let Some(channel) = channel {
            channel.close().await;
            tracing::info!(agent = %self.node().name(), "Agent disconnected");
        }
    }

    /// Clock offset between the master and this agent. Offline agents have
    /// no channel to measure over, so the difference is unavailable (which
    /// is distinct from a zero offset).
    pub async fn clock_difference(&self) -> Result<ClockDifference> {
        let channel = self
            .channel()
            .ok_or_else(|| FleetError::ClockUnavailable("agent is offline".to_string()))?;
        clock::measure(channel.as_ref()).await
    }
}

impl std::fmt::Debug for Computer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computer")
            .field("agent", &self.node().name())
            .field("epoch", &self.bound_epoch())
            .field("online", &self.is_online())
            .field("os_family", &self.os_family())
            .finish()
    }
}

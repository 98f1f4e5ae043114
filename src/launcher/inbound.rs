use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::channel::wire::Frame;
use crate::channel::{FramedChannel, RemoteChannel};
use crate::error::{FleetError, Result};
use crate::launcher::ComputerLauncher;
use crate::node::Node;

/// How long an inbound connection gets to identify itself before the
/// acceptor drops it.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts connections from agents that dial into the master and parks
/// them, keyed by agent name, until a launch claims them.
pub struct InboundAcceptor {
    pending: Mutex<HashMap<String, Framed<TcpStream, LengthDelimitedCodec>>>,
    arrived: Notify,
}

impl InboundAcceptor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            arrived: Notify::new(),
        })
    }

    /// Accept loop. Each connection must open with a `Hello` frame naming
    /// its agent; anything else is dropped.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Inbound agent acceptor listening");
        }
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let acceptor = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = acceptor.admit(stream).await {
                                    tracing::warn!(%peer, error = %e, "Rejected inbound connection");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Inbound acceptor shutting down");
                    break;
                }
            }
        }
    }

    async fn admit(&self, stream: TcpStream) -> Result<()> {
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let hello = tokio::time::timeout(HELLO_TIMEOUT, framed.next())
            .await
            .map_err(|_| FleetError::Transport("no hello frame before timeout".to_string()))?
            .ok_or_else(|| FleetError::Transport("connection closed before hello".to_string()))?
            .map_err(|e| FleetError::Transport(e.to_string()))?;

        match serde_json::from_slice::<Frame>(&hello)? {
            Frame::Hello { agent } => {
                tracing::info!(agent = %agent, "Inbound agent identified");
                let previous = self.pending.lock().await.insert(agent.clone(), framed);
                if previous.is_some() {
                    tracing::warn!(agent = %agent, "Replacing an earlier unclaimed connection");
                }
                self.arrived.notify_waiters();
                Ok(())
            }
            other => Err(FleetError::Transport(format!(
                "expected hello, got {other:?}"
            ))),
        }
    }

    /// Claim the parked connection for `agent`, waiting up to `wait` for
    /// one to arrive.
    pub async fn take(
        &self,
        agent: &str,
        wait: Duration,
    ) -> Option<Framed<TcpStream, LengthDelimitedCodec>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register for wakeups before checking the map: notify_waiters
            // only reaches already-registered waiters, so an arrival between
            // the check and the await would otherwise be lost.
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(framed) = self.pending.lock().await.remove(agent) {
                return Some(framed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // An arrival can still race the deadline itself.
                return self.pending.lock().await.remove(agent);
            }
        }
    }
}

/// Passive launcher: does not dial out, it waits for the agent to connect
/// to the master's acceptor. The default strategy when a node configures
/// no launcher.
#[derive(Clone)]
pub struct InboundLauncher {
    acceptor: Option<Arc<InboundAcceptor>>,
    wait: Duration,
}

impl InboundLauncher {
    pub fn new(acceptor: Arc<InboundAcceptor>, wait: Duration) -> Self {
        Self {
            acceptor: Some(acceptor),
            wait,
        }
    }

    /// An inbound launcher with no acceptor behind it; every launch reports
    /// that no agent can dial in. Used when the master runs without an
    /// inbound listener.
    pub fn detached() -> Self {
        Self {
            acceptor: None,
            wait: Duration::ZERO,
        }
    }
}

impl std::fmt::Debug for InboundLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundLauncher")
            .field("attached", &self.acceptor.is_some())
            .field("wait", &self.wait)
            .finish()
    }
}

#[async_trait]
impl ComputerLauncher for InboundLauncher {
    fn kind(&self) -> &'static str {
        "inbound"
    }

    async fn launch(&self, node: &Arc<Node>) -> Result<Arc<dyn RemoteChannel>> {
        let acceptor = self.acceptor.as_ref().ok_or_else(|| FleetError::LaunchFailed {
            agent: node.name().to_string(),
            reason: "no inbound acceptor is running on this master".to_string(),
        })?;

        match acceptor.take(node.name(), self.wait).await {
            Some(framed) => Ok(Arc::new(FramedChannel::from_framed(framed))),
            None => Err(FleetError::LaunchFailed {
                agent: node.name().to_string(),
                reason: format!("no inbound agent dialed in within {:?}", self.wait),
            }),
        }
    }
}

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the fleet master daemon.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Address the inbound-agent acceptor listens on.
    /// None disables the acceptor; only actively-launched agents can connect.
    pub inbound_listen_addr: Option<SocketAddr>,

    /// Interval between retention sweeps.
    pub sweep_interval_ms: u64,

    /// Upper bound of the random jitter added to each sweep interval,
    /// so that a fleet of masters does not reconnect in lockstep.
    pub sweep_jitter_ms: u64,

    /// How long to wait for the system-info handshake after a channel opens.
    pub handshake_timeout_ms: u64,

    /// How long an inbound launch waits for the agent to dial in.
    pub inbound_wait_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            inbound_listen_addr: None,
            sweep_interval_ms: 5_000,
            sweep_jitter_ms: 500,
            handshake_timeout_ms: 10_000,
            inbound_wait_ms: 10_000,
        }
    }
}

impl FleetConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn inbound_wait(&self) -> Duration {
        Duration::from_millis(self.inbound_wait_ms)
    }
}

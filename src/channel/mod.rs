//! Bidirectional RPC channel between the master and one agent process.
//!
//! The master talks to every agent through the [`RemoteChannel`] trait:
//! a unit of work goes out, a result or failure comes back, and the channel
//! reports its liveness state. Two implementations exist:
//!
//! - [`FramedChannel`]: length-delimited JSON frames over any duplex byte
//!   stream (a TCP socket from an inbound agent, or the stdio of a spawned
//!   agent process).
//! - [`LocalChannel`]: executes work in-process, for a master acting as its
//!   own agent. It reports `is_local() == true`, which the clock-sync
//!   protocol uses to short-circuit to a zero offset.

pub mod agent;
pub mod framed;
pub mod wire;

use async_trait::async_trait;

use crate::error::Result;

pub use framed::FramedChannel;
pub use wire::{Frame, OsFamily, WorkOutcome, WorkReply, WorkRequest, WorkUnit};

/// Liveness state of a channel. There is no transition out of `Closed`;
/// a fresh connection requires a fresh channel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closing,
    Closed,
}

impl ChannelState {
    pub fn is_closing_or_closed(&self) -> bool {
        matches!(self, ChannelState::Closing | ChannelState::Closed)
    }
}

/// Ordered duplex RPC transport to one agent.
#[async_trait]
pub trait RemoteChannel: Send + Sync + std::fmt::Debug {
    /// Send one unit of work and wait for its result. Closing the channel
    /// while a call is in flight fails the call with a transport error
    /// rather than hanging it.
    async fn call(&self, work: WorkUnit) -> Result<WorkOutcome>;

    fn state(&self) -> ChannelState;

    /// True when the call never crosses a process boundary.
    fn is_local(&self) -> bool {
        false
    }

    /// Initiate teardown. Idempotent.
    async fn close(&self);
}

/// Channel for a master acting as its own agent: work executes in-process.
#[derive(Debug)]
pub struct LocalChannel {
    remote_fs: String,
    closed: std::sync::atomic::AtomicBool,
}

impl LocalChannel {
    pub fn new(remote_fs: impl Into<String>) -> Self {
        Self {
            remote_fs: remote_fs.into(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RemoteChannel for LocalChannel {
    async fn call(&self, work: WorkUnit) -> Result<WorkOutcome> {
        if self.state() == ChannelState::Closed {
            return Err(crate::error::FleetError::ChannelClosed);
        }
        agent::perform(work, &self.remote_fs)
            .await
            .map_err(crate::error::FleetError::Remote)
    }

    fn state(&self) -> ChannelState {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            ChannelState::Closed
        } else {
            ChannelState::Open
        }
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
    }
}

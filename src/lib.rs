//! Master-side model of a fleet of remote build-execution agents.
//!
//! [`Node`] is the durable definition of an agent, [`Computer`] its live
//! runtime state, and [`FleetRegistry`] the map tying names to both.
//! Launchers establish [`RemoteChannel`]s to agents, retention strategies
//! decide when to connect or drop them, and [`ExecutionHandle`] is the
//! never-failing facade for running commands on one.

pub mod channel;
pub mod clock;
pub mod computer;
pub mod config;
pub mod error;
pub mod exec;
pub mod label;
pub mod launcher;
pub mod node;
pub mod retention;
pub mod shutdown;
pub mod workspace;

pub use channel::{ChannelState, OsFamily, RemoteChannel};
pub use clock::ClockDifference;
pub use computer::Computer;
pub use error::{FleetError, Result};
pub use exec::{ExecutionHandle, NoopReason, TaskListener};
pub use label::{Label, Mode};
pub use node::{FleetRegistry, Node};

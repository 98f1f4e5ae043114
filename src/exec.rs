//! Remote command execution handles.
//!
//! Asking a node for an execution handle never fails: every precondition
//! that is not met degrades to a harmless no-op handle carrying a
//! diagnostic, reported through the caller's listener and the log. The
//! checks run in a fixed order so reconnect races produce a precise reason
//! instead of a generic failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::{OsFamily, RemoteChannel, WorkOutcome, WorkUnit};
use crate::error::{FleetError, Result};
use crate::node::{FleetRegistry, Node};

/// Diagnostics sink supplied by the caller. Failures are reported here
/// instead of being thrown.
pub trait TaskListener: Send + Sync {
    fn error(&self, message: &str);
}

/// Listener that forwards to the log.
pub struct LogListener;

impl TaskListener for LogListener {
    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Listener that keeps every message, for callers that surface diagnostics
/// to a user and for tests.
#[derive(Default)]
pub struct CollectingListener {
    messages: Mutex<Vec<String>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }
}

impl TaskListener for CollectingListener {
    fn error(&self, message: &str) {
        self.messages
            .lock()
            .expect("messages lock")
            .push(message.to_string());
    }
}

/// Why a request for an execution handle degraded to a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopReason {
    /// The agent was never initialized; it has no computer.
    NoComputer,
    /// The computer points at a superseded node; the agent was reconnected.
    StaleComputer,
    /// No channel to the agent.
    NotConnected,
    /// The channel is closing or closed.
    Disconnecting,
    /// Channel is up but the system-info handshake has not completed.
    HandshakeIncomplete,
}

impl std::fmt::Display for NoopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoopReason::NoComputer => write!(f, "the agent has no computer"),
            NoopReason::StaleComputer => {
                write!(f, "the computer is stale, the agent was reconnected")
            }
            NoopReason::NotConnected => write!(f, "the agent is not connected"),
            NoopReason::Disconnecting => write!(f, "the agent is being disconnected"),
            NoopReason::HandshakeIncomplete => {
                write!(f, "the agent has not been fully initialized yet")
            }
        }
    }
}

/// What to run on the agent.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

impl RunSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Result of running a command through a handle. `ran` is false when the
/// handle was a no-op and nothing reached the agent.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub ran: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn skipped() -> Self {
        Self {
            ran: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// A command-execution handle bound to a live channel, or a no-op stand-in.
pub enum ExecutionHandle {
    Remote {
        node: Arc<Node>,
        channel: Arc<dyn RemoteChannel>,
        os_family: OsFamily,
    },
    Noop { reason: NoopReason },
}

impl ExecutionHandle {
    pub fn is_noop(&self) -> bool {
        matches!(self, ExecutionHandle::Noop { .. })
    }

    pub fn noop_reason(&self) -> Option<NoopReason> {
        match self {
            ExecutionHandle::Noop { reason } => Some(*reason),
            ExecutionHandle::Remote { .. } => None,
        }
    }

    pub fn os_family(&self) -> Option<OsFamily> {
        match self {
            ExecutionHandle::Remote { os_family, .. } => Some(*os_family),
            ExecutionHandle::Noop { .. } => None,
        }
    }

    /// Run a command. A no-op handle runs nothing and reports `ran: false`.
    /// Environment from the node's properties is applied first; variables
    /// set on the [`RunSpec`] win on collision.
    pub async fn run(&self, spec: RunSpec) -> Result<CommandOutput> {
        match self {
            ExecutionHandle::Noop { reason } => {
                tracing::debug!(%reason, "Skipping command on no-op handle");
                Ok(CommandOutput::skipped())
            }
            ExecutionHandle::Remote { node, channel, .. } => {
                let mut env = node.property_environment();
                env.extend(spec.env);
                let outcome = channel
                    .call(WorkUnit::RunCommand {
                        program: spec.program,
                        args: spec.args,
                        cwd: spec.cwd,
                        env,
                    })
                    .await?;
                match outcome {
                    WorkOutcome::Command {
                        exit_code,
                        stdout,
                        stderr,
                    } => Ok(CommandOutput {
                        ran: true,
                        exit_code,
                        stdout,
                        stderr,
                    }),
                    other => Err(FleetError::Remote(format!(
                        "unexpected reply to command: {other:?}"
                    ))),
                }
            }
        }
    }
}

impl Node {
    /// Produce a command-execution handle for this node. Never fails; every
    /// unmet precondition degrades to a no-op handle with a diagnostic.
    ///
    /// The checks run in order: computer exists, computer is current (not
    /// superseded by a reconnect), channel present, channel not going away,
    /// handshake complete.
    pub fn create_execution_handle(
        self: &Arc<Self>,
        registry: &FleetRegistry,
        listener: &dyn TaskListener,
    ) -> ExecutionHandle {
        let name = self.name();

        let Some(computer) = registry.computer_for(name) else {
            return noop(
                listener,
                name,
                NoopReason::NoComputer,
                "the computer was never created for this agent",
            );
        };

        // A reload or reconnect may have rebound the name to another node
        // instance. Running commands against the superseded identity would
        // hit the wrong agent state, so refuse.
        if !computer.is_current(self, registry) {
            return noop(
                listener,
                name,
                NoopReason::StaleComputer,
                "the registry rebound this name; this node instance is superseded",
            );
        }

        let Some(channel) = computer.channel() else {
            return noop(
                listener,
                name,
                NoopReason::NotConnected,
                "no remoting channel to the agent",
            );
        };

        if channel.state().is_closing_or_closed() {
            return noop(
                listener,
                name,
                NoopReason::Disconnecting,
                "the channel is closing down or has closed",
            );
        }

        let Some(os_family) = computer.os_family() else {
            return noop(
                listener,
                name,
                NoopReason::HandshakeIncomplete,
                "the system-info request has not completed yet",
            );
        };

        ExecutionHandle::Remote {
            node: self.clone(),
            channel,
            os_family,
        }
    }
}

fn noop(
    listener: &dyn TaskListener,
    agent: &str,
    reason: NoopReason,
    detail: &str,
) -> ExecutionHandle {
    let message = format!("Cannot create an execution handle for agent {agent}: {reason}");
    listener.error(&message);
    // The causal detail helps diagnose reconnect and disconnect races;
    // check neighboring log entries for the launch that superseded us.
    tracing::warn!(agent, %reason, detail, "Execution handle degraded to no-op");
    ExecutionHandle::Noop { reason }
}

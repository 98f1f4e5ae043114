use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::channel::{FramedChannel, RemoteChannel};
use crate::error::{FleetError, Result};
use crate::launcher::ComputerLauncher;
use crate::node::Node;

/// Launches an agent by spawning a process and speaking the wire protocol
/// over its stdio. The usual shape is `ssh build-host buildfleet agent
/// --stdio`, but any program that serves the protocol on stdin/stdout works.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ComputerLauncher for CommandLauncher {
    fn kind(&self) -> &'static str {
        "command"
    }

    async fn launch(&self, node: &Arc<Node>) -> Result<Arc<dyn RemoteChannel>> {
        tracing::info!(
            agent = %node.name(),
            program = %self.program,
            "Spawning agent process"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FleetError::LaunchFailed {
                agent: node.name().to_string(),
                reason: format!("failed to spawn {}: {e}", self.program),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| FleetError::LaunchFailed {
            agent: node.name().to_string(),
            reason: "agent process has no stdout".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| FleetError::LaunchFailed {
            agent: node.name().to_string(),
            reason: "agent process has no stdin".to_string(),
        })?;

        // The child dies with its stdio: closing the channel drops stdin,
        // the agent sees EOF and exits, and the reaper logs the status.
        let name = node.name().to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::info!(agent = %name, %status, "Agent process exited")
                }
                Err(e) => tracing::warn!(agent = %name, error = %e, "Failed to reap agent process"),
            }
        });

        Ok(Arc::new(FramedChannel::new(tokio::io::join(stdout, stdin))))
    }
}

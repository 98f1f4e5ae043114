//! Agent-side responder: answers handshake, clock-mark and run-command
//! requests over a framed stream. The same `perform` routine backs the
//! in-process [`LocalChannel`](crate::channel::LocalChannel).

use std::path::Path;
use std::process::Stdio;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::channel::wire::{Frame, OsFamily, WorkOutcome, WorkReply, WorkUnit};
use crate::clock::now_ms;
use crate::error::{FleetError, Result};

/// Execute one unit of work on this side. Errors are reported as strings so
/// they can travel over the wire unchanged.
pub async fn perform(work: WorkUnit, remote_fs: &str) -> std::result::Result<WorkOutcome, String> {
    match work {
        WorkUnit::ClockMark { sent_at_ms } => {
            // Capture the local clock before doing anything else; this is
            // the t1 of the three-message exchange.
            let remote_ms = now_ms();
            Ok(WorkOutcome::ClockMark {
                sent_at_ms,
                remote_ms,
            })
        }
        WorkUnit::SystemInfo => {
            let absolute_remote_fs = absolutize(remote_fs).map_err(|e| e.to_string())?;
            Ok(WorkOutcome::SystemInfo {
                os_family: OsFamily::current(),
                absolute_remote_fs,
            })
        }
        WorkUnit::RunCommand {
            program,
            args,
            cwd,
            env,
        } => {
            let mut command = Command::new(&program);
            command
                .args(&args)
                .envs(&env)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            if let Some(dir) = cwd {
                command.current_dir(dir);
            }
            match command.output().await {
                Ok(output) => Ok(WorkOutcome::Command {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                }),
                Err(e) => Err(format!("failed to spawn {program}: {e}")),
            }
        }
    }
}

fn absolutize(remote_fs: &str) -> Result<String> {
    let path = Path::new(remote_fs);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(absolute.to_string_lossy().to_string())
}

/// Serve one master connection: announce ourselves, then answer requests
/// until the stream ends.
pub async fn serve<T>(io: T, agent_name: &str, remote_fs: &str) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut framed = Framed::new(io, LengthDelimitedCodec::new());

    let hello = Frame::Hello {
        agent: agent_name.to_string(),
    };
    framed
        .send(Bytes::from(serde_json::to_vec(&hello)?))
        .await
        .map_err(|e| FleetError::Transport(e.to_string()))?;

    while let Some(frame) = framed.next().await {
        let bytes = frame.map_err(|e| FleetError::Transport(e.to_string()))?;
        let request = match serde_json::from_slice::<Frame>(&bytes) {
            Ok(Frame::Request(request)) => request,
            Ok(other) => {
                tracing::warn!(agent = agent_name, frame = ?other, "Unexpected frame, ignoring");
                continue;
            }
            Err(e) => {
                return Err(FleetError::Transport(format!("undecodable frame: {e}")));
            }
        };

        let outcome = perform(request.work, remote_fs).await;
        let reply = Frame::Reply(WorkReply {
            id: request.id,
            outcome,
        });
        framed
            .send(Bytes::from(serde_json::to_vec(&reply)?))
            .await
            .map_err(|e| FleetError::Transport(e.to_string()))?;
    }

    tracing::info!(agent = agent_name, "Master closed the connection");
    Ok(())
}

/// Dial the master and serve until disconnected. Used by the `agent`
/// subcommand of the daemon binary.
pub async fn run_agent(master_addr: &str, agent_name: &str, remote_fs: &str) -> Result<()> {
    let stream = tokio::net::TcpStream::connect(master_addr).await?;
    tracing::info!(agent = agent_name, master = master_addr, "Connected to master");
    serve(stream, agent_name, remote_fs).await
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operating system family of the remote side, learned during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsFamily {
    Unix,
    Windows,
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsFamily::Unix => write!(f, "unix"),
            OsFamily::Windows => write!(f, "windows"),
        }
    }
}

impl OsFamily {
    /// The family of the process we are running in.
    pub fn current() -> Self {
        if cfg!(unix) {
            OsFamily::Unix
        } else {
            OsFamily::Windows
        }
    }
}

/// A unit of remote work sent from the master to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkUnit {
    /// Handshake request for OS family and resolved filesystem root.
    SystemInfo,
    /// Clock-sync marker. `sent_at_ms` is stamped by the transport at the
    /// moment the frame is written, not when the call was made, so that
    /// serialization and queueing delay count against the master side.
    ClockMark { sent_at_ms: i64 },
    /// Run a command on the agent and capture its output.
    RunCommand {
        program: String,
        args: Vec<String>,
        cwd: Option<String>,
        env: HashMap<String, String>,
    },
}

/// The agent's answer to a [`WorkUnit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkOutcome {
    SystemInfo {
        os_family: OsFamily,
        absolute_remote_fs: String,
    },
    /// `sent_at_ms` is echoed back unchanged; `remote_ms` is the agent's
    /// clock at the instant the marker was received.
    ClockMark { sent_at_ms: i64, remote_ms: i64 },
    Command {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    pub id: Uuid,
    pub work: WorkUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkReply {
    pub id: Uuid,
    pub outcome: Result<WorkOutcome, String>,
}

/// Top-level frame exchanged over a length-delimited stream.
///
/// An inbound agent opens with `Hello` to identify itself; after that the
/// master sends `Request` frames and the agent answers with `Reply` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Hello { agent: String },
    Request(WorkRequest),
    Reply(WorkReply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_survives_json_round_trip() {
        let frame = Frame::Request(WorkRequest {
            id: Uuid::new_v4(),
            work: WorkUnit::ClockMark { sent_at_ms: 42 },
        });
        let bytes = serde_json::to_vec(&frame).unwrap();
        let back: Frame = serde_json::from_slice(&bytes).unwrap();
        match back {
            Frame::Request(req) => match req.work {
                WorkUnit::ClockMark { sent_at_ms } => assert_eq!(sent_at_ms, 42),
                other => panic!("unexpected work unit: {other:?}"),
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

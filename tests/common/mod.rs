//! Shared helpers for integration tests: an in-memory channel with
//! configurable skew and failure modes, and node fixtures.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use buildfleet::channel::{ChannelState, OsFamily, RemoteChannel, WorkOutcome, WorkUnit};
use buildfleet::clock::now_ms;
use buildfleet::error::{FleetError, Result};
use buildfleet::node::Node;

/// In-memory channel that answers protocol requests synthetically.
///
/// The clock reply simulates an agent whose clock runs `skew_ms` ahead of
/// the master and a symmetric one-way delay of `delay_ms`, by back-dating
/// the echoed send stamp instead of sleeping.
#[derive(Debug)]
pub struct TestChannel {
    pub skew_ms: i64,
    pub delay_ms: i64,
    pub os_family: OsFamily,
    pub absolute_remote_fs: String,
    pub fail_calls: bool,
    closed: AtomicBool,
}

impl TestChannel {
    pub fn open() -> Arc<Self> {
        Arc::new(Self {
            skew_ms: 0,
            delay_ms: 0,
            os_family: OsFamily::Unix,
            absolute_remote_fs: "/work".to_string(),
            fail_calls: false,
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_clock(skew_ms: i64, delay_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            skew_ms,
            delay_ms,
            os_family: OsFamily::Unix,
            absolute_remote_fs: "/work".to_string(),
            fail_calls: false,
            closed: AtomicBool::new(false),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            skew_ms: 0,
            delay_ms: 0,
            os_family: OsFamily::Unix,
            absolute_remote_fs: "/work".to_string(),
            fail_calls: true,
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_remote_fs(remote_fs: &str) -> Arc<Self> {
        Arc::new(Self {
            skew_ms: 0,
            delay_ms: 0,
            os_family: OsFamily::Unix,
            absolute_remote_fs: remote_fs.to_string(),
            fail_calls: false,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RemoteChannel for TestChannel {
    async fn call(&self, work: WorkUnit) -> Result<WorkOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FleetError::ChannelClosed);
        }
        if self.fail_calls {
            return Err(FleetError::Transport("simulated transport failure".to_string()));
        }
        match work {
            WorkUnit::SystemInfo => Ok(WorkOutcome::SystemInfo {
                os_family: self.os_family,
                absolute_remote_fs: self.absolute_remote_fs.clone(),
            }),
            WorkUnit::ClockMark { .. } => {
                // Pretend the marker left the master a full round trip ago:
                // t0 = now - 2d on the master clock, received at t0 + d,
                // which reads t0 + d + skew on the agent clock.
                let now = now_ms();
                let t0 = now - 2 * self.delay_ms;
                Ok(WorkOutcome::ClockMark {
                    sent_at_ms: t0,
                    remote_ms: t0 + self.delay_ms + self.skew_ms,
                })
            }
            WorkUnit::RunCommand { program, args, .. } => Ok(WorkOutcome::Command {
                exit_code: Some(0),
                stdout: format!("{program} {}", args.join(" ")),
                stderr: String::new(),
            }),
        }
    }

    fn state(&self) -> ChannelState {
        if self.closed.load(Ordering::Acquire) {
            ChannelState::Closed
        } else {
            ChannelState::Open
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub fn test_node(name: &str) -> Node {
    Node::builder(name, "/work")
        .num_executors(2)
        .label_string("linux docker")
        .build()
        .expect("valid test node")
}

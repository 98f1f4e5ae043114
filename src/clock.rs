//! Clock-skew estimation between the master and one agent.
//!
//! The protocol is a three-message exchange over the RPC channel:
//! the master stamps `t0` when the marker frame is written, the agent
//! stamps `t1` when it receives the marker, and the master stamps `t2`
//! when the reply arrives. Assuming symmetric one-way latency, the offset
//! is `(t0 + t2) / 2 - t1`. No further correction is attempted.

use std::fmt;

use chrono::Utc;

use crate::channel::{RemoteChannel, WorkOutcome, WorkUnit};
use crate::error::{FleetError, Result};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Estimated difference between the master clock and an agent clock.
///
/// Positive means the agent clock is behind the master's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDifference {
    pub offset_ms: i64,
}

impl ClockDifference {
    pub const ZERO: ClockDifference = ClockDifference { offset_ms: 0 };

    pub fn new(offset_ms: i64) -> Self {
        Self { offset_ms }
    }

    pub fn abs_ms(&self) -> i64 {
        self.offset_ms.abs()
    }
}

impl fmt::Display for ClockDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.abs_ms() < 1_000 {
            write!(f, "in sync")
        } else if self.offset_ms > 0 {
            write!(f, "{} ms behind", self.offset_ms)
        } else {
            write!(f, "{} ms ahead", -self.offset_ms)
        }
    }
}

/// Run the clock-sync exchange over a channel.
///
/// A local channel has no transmission delay to average out, so the offset
/// is exactly zero and the exchange is skipped entirely. Any channel error
/// is reported as "unavailable", never silently defaulted to zero.
pub async fn measure(channel: &dyn RemoteChannel) -> Result<ClockDifference> {
    if channel.is_local() {
        return Ok(ClockDifference::ZERO);
    }

    // The transport replaces the placeholder with the send-time stamp.
    let outcome = channel
        .call(WorkUnit::ClockMark { sent_at_ms: 0 })
        .await
        .map_err(|e| FleetError::ClockUnavailable(e.to_string()))?;
    let t2 = now_ms();

    match outcome {
        WorkOutcome::ClockMark {
            sent_at_ms: t0,
            remote_ms: t1,
        } => Ok(ClockDifference::new((t0 + t2) / 2 - t1)),
        other => Err(FleetError::ClockUnavailable(format!(
            "unexpected reply to clock marker: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_offsets_display_as_in_sync() {
        assert_eq!(ClockDifference::new(999).to_string(), "in sync");
        assert_eq!(ClockDifference::ZERO.to_string(), "in sync");
    }

    #[test]
    fn signed_offsets_display_direction() {
        assert_eq!(ClockDifference::new(2_000).to_string(), "2000 ms behind");
        assert_eq!(ClockDifference::new(-3_000).to_string(), "3000 ms ahead");
    }
}

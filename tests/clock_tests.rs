use buildfleet::channel::{agent, FramedChannel, LocalChannel};
use buildfleet::clock::{self, ClockDifference};
use buildfleet::error::FleetError;

mod common;

#[tokio::test]
async fn local_channel_reports_exactly_zero() {
    let channel = LocalChannel::new("/work");
    let difference = clock::measure(&channel).await.unwrap();
    assert_eq!(difference, ClockDifference::ZERO);
}

#[tokio::test]
async fn in_process_agent_is_nearly_in_sync() {
    let (master_end, agent_end) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = agent::serve(agent_end, "a1", "/tmp").await;
    });
    let channel = FramedChannel::new(master_end);

    // Same wall clock on both sides; the bisection error is the only slack.
    let difference = clock::measure(&channel).await.unwrap();
    assert!(
        difference.abs_ms() < 1_000,
        "offset {} too large for a same-process agent",
        difference.offset_ms
    );
}

#[tokio::test]
async fn skewed_agent_clock_is_estimated_through_symmetric_delay() {
    // Agent clock runs 5 seconds ahead, 200 ms one-way latency.
    let channel = common::TestChannel::with_clock(5_000, 200);
    let difference = clock::measure(channel.as_ref()).await.unwrap();

    // The bisection cancels the symmetric delay; the estimate lands on the
    // skew (agent ahead means a negative master-relative offset).
    assert!(
        (difference.offset_ms + 5_000).abs() < 200,
        "estimated {} for a 5000 ms skew",
        difference.offset_ms
    );
}

#[tokio::test]
async fn agent_behind_yields_positive_offset() {
    let channel = common::TestChannel::with_clock(-2_000, 50);
    let difference = clock::measure(channel.as_ref()).await.unwrap();
    assert!(
        (difference.offset_ms - 2_000).abs() < 200,
        "estimated {} for a -2000 ms skew",
        difference.offset_ms
    );
}

#[tokio::test]
async fn transport_failure_is_unavailable_not_zero() {
    let channel = common::TestChannel::failing();
    let result = clock::measure(channel.as_ref()).await;
    match result {
        Err(FleetError::ClockUnavailable(_)) => {}
        other => panic!("expected ClockUnavailable, got {other:?}"),
    }
}

use std::sync::Arc;
use std::time::Duration;

use buildfleet::channel::{agent, ChannelState, FramedChannel, OsFamily, RemoteChannel};
use buildfleet::channel::{WorkOutcome, WorkUnit};
use buildfleet::error::FleetError;
use buildfleet::launcher::{ComputerLauncher, InboundAcceptor, InboundLauncher};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

mod common;

fn duplex_channel(agent_name: &'static str, remote_fs: &'static str) -> FramedChannel<tokio::io::DuplexStream> {
    let (master_end, agent_end) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = agent::serve(agent_end, agent_name, remote_fs).await;
    });
    FramedChannel::new(master_end)
}

#[tokio::test]
async fn system_info_round_trip_over_duplex() {
    let channel = duplex_channel("a1", "build-root");
    assert_eq!(channel.state(), ChannelState::Open);

    let outcome = channel.call(WorkUnit::SystemInfo).await.unwrap();
    match outcome {
        WorkOutcome::SystemInfo {
            os_family,
            absolute_remote_fs,
        } => {
            assert_eq!(os_family, OsFamily::current());
            assert!(absolute_remote_fs.ends_with("build-root"));
            assert!(std::path::Path::new(&absolute_remote_fs).is_absolute());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn clock_marker_is_stamped_at_send_time_and_echoed() {
    let channel = duplex_channel("a1", "/tmp");

    // The caller's placeholder is replaced by the transport.
    let outcome = channel
        .call(WorkUnit::ClockMark { sent_at_ms: 0 })
        .await
        .unwrap();
    match outcome {
        WorkOutcome::ClockMark {
            sent_at_ms,
            remote_ms,
        } => {
            assert!(sent_at_ms > 0, "placeholder was not stamped");
            assert!(remote_ms >= sent_at_ms - 1_000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn run_command_captures_output_and_exit_code() {
    let channel = duplex_channel("a1", "/tmp");

    let outcome = channel
        .call(WorkUnit::RunCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "printf hello".to_string()],
            cwd: None,
            env: std::collections::HashMap::new(),
        })
        .await
        .unwrap();
    match outcome {
        WorkOutcome::Command {
            exit_code,
            stdout,
            stderr,
        } => {
            assert_eq!(exit_code, Some(0));
            assert_eq!(stdout, "hello");
            assert!(stderr.is_empty());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn closed_channel_rejects_calls_and_stays_closed() {
    let channel = duplex_channel("a1", "/tmp");
    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);

    let result = channel.call(WorkUnit::SystemInfo).await;
    assert!(matches!(result, Err(FleetError::ChannelClosed)));

    // close is idempotent and no transition leaves Closed.
    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test]
async fn closing_mid_call_fails_the_pending_call() {
    // An agent end that never replies: hold the stream open, read nothing.
    let (master_end, agent_end) = tokio::io::duplex(64 * 1024);
    let channel = Arc::new(FramedChannel::new(master_end));

    let caller = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.call(WorkUnit::SystemInfo).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    channel.close().await;

    let result = caller.await.unwrap();
    assert!(result.is_err(), "pending call must fail, not hang");
    drop(agent_end);
}

#[tokio::test]
async fn agent_eof_closes_the_channel() {
    let (master_end, agent_end) = tokio::io::duplex(64 * 1024);
    let channel = FramedChannel::new(master_end);

    drop(agent_end);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test]
async fn inbound_agent_is_claimed_by_the_launcher() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let acceptor = InboundAcceptor::new();
    let token = CancellationToken::new();
    tokio::spawn(acceptor.clone().run(listener, token.clone()));

    tokio::spawn(async move {
        let _ = agent::run_agent(&addr.to_string(), "in-1", "/tmp").await;
    });

    let node = Arc::new(common::test_node("in-1"));
    let launcher = InboundLauncher::new(acceptor, Duration::from_secs(5));
    let channel = launcher.launch(&node).await.unwrap();

    let outcome = channel.call(WorkUnit::SystemInfo).await.unwrap();
    assert!(matches!(outcome, WorkOutcome::SystemInfo { .. }));
    token.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn arrival_racing_the_claim_is_never_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = InboundAcceptor::new();
    let token = CancellationToken::new();
    tokio::spawn(acceptor.clone().run(listener, token.clone()));

    // Dial in and claim concurrently, many rounds. An agent that parks its
    // connection while the launcher is between its map check and its wait
    // must still be claimed, never reported as absent.
    for round in 0..20 {
        let name = format!("race-{round}");
        {
            let name = name.clone();
            let addr = addr.to_string();
            tokio::spawn(async move {
                let _ = agent::run_agent(&addr, &name, "/tmp").await;
            });
        }

        let node = Arc::new(common::test_node(&name));
        let launcher = InboundLauncher::new(acceptor.clone(), Duration::from_secs(5));
        let channel = launcher
            .launch(&node)
            .await
            .unwrap_or_else(|e| panic!("round {round}: launch failed: {e}"));
        channel.close().await;
    }
    token.cancel();
}

#[tokio::test]
async fn detached_inbound_launcher_fails_without_leaking() {
    let node = Arc::new(common::test_node("nobody"));
    let launcher = InboundLauncher::detached();
    let result = launcher.launch(&node).await;
    assert!(matches!(result, Err(FleetError::LaunchFailed { .. })));
}

#[tokio::test]
async fn inbound_launch_times_out_when_no_agent_dials_in() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let acceptor = InboundAcceptor::new();
    let token = CancellationToken::new();
    tokio::spawn(acceptor.clone().run(listener, token.clone()));

    let node = Arc::new(common::test_node("late-agent"));
    let launcher = InboundLauncher::new(acceptor, Duration::from_millis(100));
    let result = launcher.launch(&node).await;
    assert!(matches!(result, Err(FleetError::LaunchFailed { .. })));
    token.cancel();
}

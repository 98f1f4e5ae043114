use std::sync::Arc;

use buildfleet::channel::{OsFamily, RemoteChannel};
use buildfleet::exec::{CollectingListener, NoopReason, RunSpec};
use buildfleet::node::{EnvironmentProperty, FleetRegistry, NodeProperty};

mod common;

#[test]
fn no_computer_yields_a_noop_with_diagnostic() {
    let registry = FleetRegistry::anonymous();
    let node = registry.add_node(common::test_node("agent1"));
    let listener = CollectingListener::new();

    let handle = node.create_execution_handle(&registry, &listener);
    assert_eq!(handle.noop_reason(), Some(NoopReason::NoComputer));

    let messages = listener.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("agent1"));
    assert!(messages[0].contains("no computer"));
}

#[test]
fn offline_computer_yields_not_connected() {
    let registry = FleetRegistry::anonymous();
    let node = registry.add_node(common::test_node("agent1"));
    registry.ensure_computer("agent1").unwrap();
    let listener = CollectingListener::new();

    let handle = node.create_execution_handle(&registry, &listener);
    assert_eq!(handle.noop_reason(), Some(NoopReason::NotConnected));
}

#[test]
fn channel_without_handshake_yields_handshake_incomplete() {
    let registry = FleetRegistry::anonymous();
    let node = registry.add_node(common::test_node("agent1"));
    let computer = registry.ensure_computer("agent1").unwrap();
    computer.install_channel(common::TestChannel::open()).unwrap();
    let listener = CollectingListener::new();

    let handle = node.create_execution_handle(&registry, &listener);
    assert_eq!(handle.noop_reason(), Some(NoopReason::HandshakeIncomplete));
}

#[tokio::test]
async fn closed_channel_yields_disconnecting() {
    let registry = FleetRegistry::anonymous();
    let node = registry.add_node(common::test_node("agent1"));
    let computer = registry.ensure_computer("agent1").unwrap();

    let channel = common::TestChannel::open();
    computer.install_channel(channel.clone()).unwrap();
    computer.record_system_info(OsFamily::Unix, "/work".to_string());
    channel.close().await;

    let listener = CollectingListener::new();
    let handle = node.create_execution_handle(&registry, &listener);
    assert_eq!(handle.noop_reason(), Some(NoopReason::Disconnecting));
}

#[test]
fn stale_node_instance_yields_stale_computer() {
    let registry = FleetRegistry::anonymous();
    let old_node = registry.add_node(common::test_node("agent1"));
    let computer = registry.ensure_computer("agent1").unwrap();
    computer.install_channel(common::TestChannel::open()).unwrap();
    computer.record_system_info(OsFamily::Unix, "/work".to_string());

    // A configuration reload rebinds the name to a fresh instance.
    let new_node = registry.add_node(common::test_node("agent1"));

    // The superseded instance must refuse to hand out execution handles.
    let listener = CollectingListener::new();
    let handle = old_node.create_execution_handle(&registry, &listener);
    assert_eq!(handle.noop_reason(), Some(NoopReason::StaleComputer));
    assert!(listener.messages()[0].contains("reconnected"));

    // The current instance is refused too until the computer is rebound.
    let listener = CollectingListener::new();
    let handle = new_node.create_execution_handle(&registry, &listener);
    assert_eq!(handle.noop_reason(), Some(NoopReason::StaleComputer));

    // After rebinding, the current instance gets a live handle again.
    registry.rebind_computer("agent1").unwrap();
    let listener = CollectingListener::new();
    let handle = new_node.create_execution_handle(&registry, &listener);
    assert!(!handle.is_noop());
}

#[tokio::test]
async fn noop_handle_runs_nothing() {
    let registry = FleetRegistry::anonymous();
    let node = registry.add_node(common::test_node("agent1"));
    let listener = CollectingListener::new();

    let handle = node.create_execution_handle(&registry, &listener);
    assert!(handle.is_noop());

    let output = handle.run(RunSpec::new("true")).await.unwrap();
    assert!(!output.ran);
    assert!(output.exit_code.is_none());
}

#[tokio::test]
async fn full_lifecycle_from_no_computer_to_live_handle() {
    let registry = FleetRegistry::anonymous();
    let node = registry.add_node(common::test_node("agent1"));
    let listener = CollectingListener::new();

    // Never launched: no computer at all.
    assert!(node.get_computer(&registry).is_none());
    let handle = node.create_execution_handle(&registry, &listener);
    assert_eq!(handle.noop_reason(), Some(NoopReason::NoComputer));

    // Simulate a successful launch with a resolved OS family.
    let computer = registry.ensure_computer("agent1").unwrap();
    let channel = common::TestChannel::open();
    computer.install_channel(channel).unwrap();
    computer.record_system_info(OsFamily::Unix, "/mnt/agent1".to_string());

    let handle = node.create_execution_handle(&registry, &listener);
    assert!(!handle.is_noop());
    assert_eq!(handle.os_family(), Some(OsFamily::Unix));

    let output = handle.run(RunSpec::new("make").arg("all")).await.unwrap();
    assert!(output.ran);
    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.stdout, "make all");
}

#[tokio::test]
async fn node_property_environment_reaches_the_command() {
    let registry = FleetRegistry::anonymous();
    let node = registry.add_node(common::test_node("agent1"));
    let properties: Vec<Arc<dyn NodeProperty>> = vec![Arc::new(
        EnvironmentProperty::default().with_var("BUILD_TIER", "ci"),
    )];
    node.set_properties(properties);

    let computer = registry.ensure_computer("agent1").unwrap();
    computer.install_channel(common::TestChannel::open()).unwrap();
    computer.record_system_info(OsFamily::Unix, "/work".to_string());

    let listener = CollectingListener::new();
    let handle = node.create_execution_handle(&registry, &listener);
    // The TestChannel echoes the program line; env merging is exercised by
    // the call not erroring and the handle being live. The merge itself is
    // covered by node_tests::properties_are_replaced_wholesale.
    let output = handle.run(RunSpec::new("env")).await.unwrap();
    assert!(output.ran);
}

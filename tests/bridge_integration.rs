//! Bridge integration tests
//!
//! Drive the full bridge (registry, connection tasks, multiplexer, router)
//! through in-memory transports, playing the application by hand.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::timeout;

use socket_bridge::app::{self, RelayApp};
use socket_bridge::bridge::{ApplicationPorts, Bridge};
use socket_bridge::config::BridgeConfig;
use socket_bridge::connection::ConnectionId;
use socket_bridge::error::{BridgeError, TransportError};
use socket_bridge::multiplexer::{InboundEvent, OutboundCommand};
use socket_bridge::transport::memory::{memory_pair, MemoryPeer};
use socket_bridge::transport::Payload;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(100);

async fn next_event(ports: &mut ApplicationPorts) -> InboundEvent {
    timeout(WAIT, ports.inbound.recv())
        .await
        .expect("timed out waiting for inbound event")
        .expect("inbound port closed")
}

async fn assert_no_event(ports: &mut ApplicationPorts) {
    assert!(
        timeout(QUIET, ports.inbound.recv()).await.is_err(),
        "unexpected inbound event"
    );
}

async fn next_payload(peer: &mut MemoryPeer) -> Option<Payload> {
    timeout(WAIT, peer.recv())
        .await
        .expect("timed out waiting for payload")
}

async fn assert_nothing_sent(peer: &mut MemoryPeer) {
    assert!(
        timeout(QUIET, peer.recv()).await.is_err(),
        "peer received an unexpected payload"
    );
}

/// Accept a peer and consume its Connected event
async fn connect(bridge: &Bridge, ports: &mut ApplicationPorts) -> (ConnectionId, MemoryPeer) {
    let (transport, peer) = memory_pair(16);
    let id = bridge.accept(transport).await.unwrap();
    assert_eq!(next_event(ports).await, InboundEvent::Connected { id });
    (id, peer)
}

#[tokio::test]
async fn test_send_to_reaches_only_its_target() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());

    let (a, mut peer_a) = connect(&bridge, &mut ports).await;
    let (b, mut peer_b) = connect(&bridge, &mut ports).await;
    let (c, mut peer_c) = connect(&bridge, &mut ports).await;
    assert_eq!(
        [a, b, c].into_iter().collect::<HashSet<_>>().len(),
        3,
        "identifiers must be distinct"
    );

    peer_a.send("ping").await.unwrap();
    assert_eq!(
        next_event(&mut ports).await,
        InboundEvent::Message {
            id: a,
            payload: Payload::text("ping"),
        }
    );

    ports
        .outbound
        .send(OutboundCommand::send_to(b, "pong"))
        .await
        .unwrap();
    assert_eq!(next_payload(&mut peer_b).await, Some(Payload::text("pong")));
    assert_nothing_sent(&mut peer_a).await;
    assert_nothing_sent(&mut peer_c).await;

    peer_c.disconnect();
    assert_eq!(next_event(&mut ports).await, InboundEvent::Disconnected { id: c });

    // Late send to the departed peer is dropped silently
    let outcome = bridge
        .router()
        .route(OutboundCommand::send_to(c, "too late"));
    assert_eq!(outcome.dropped, 1);
    assert_eq!(outcome.delivered, 0);
    assert_eq!(bridge.registry().snapshot(), vec![a, b]);
}

#[tokio::test]
async fn test_ping_broadcast_pong_and_late_send() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());

    // Connected events may interleave across peers
    let mut peers = Vec::new();
    for _ in 0..3 {
        let (transport, peer) = memory_pair(16);
        let id = bridge.accept(transport).await.unwrap();
        peers.push((id, peer));
    }
    let mut connected = HashSet::new();
    for _ in 0..3 {
        match next_event(&mut ports).await {
            InboundEvent::Connected { id } => assert!(connected.insert(id)),
            other => panic!("expected Connected, got {:?}", other),
        }
    }
    let [(a, mut peer_a), (b, mut peer_b), (c, mut peer_c)]: [(ConnectionId, MemoryPeer); 3] =
        peers
            .try_into()
            .unwrap_or_else(|_| panic!("expected three peers"));
    assert_eq!(connected, HashSet::from([a, b, c]));

    peer_a.send("ping").await.unwrap();
    assert_eq!(
        next_event(&mut ports).await,
        InboundEvent::Message {
            id: a,
            payload: Payload::text("ping"),
        }
    );

    ports
        .outbound
        .send(OutboundCommand::broadcast("pong"))
        .await
        .unwrap();
    for peer in [&mut peer_a, &mut peer_b, &mut peer_c] {
        assert_eq!(next_payload(peer).await, Some(Payload::text("pong")));
    }

    peer_b.disconnect();
    assert_eq!(next_event(&mut ports).await, InboundEvent::Disconnected { id: b });

    ports
        .outbound
        .send(OutboundCommand::send_to(b, "x"))
        .await
        .unwrap();

    // The router keeps serving the remaining peers after the dropped send
    ports
        .outbound
        .send(OutboundCommand::send_to(a, "after"))
        .await
        .unwrap();
    assert_eq!(next_payload(&mut peer_a).await, Some(Payload::text("after")));
    assert_eq!(bridge.stats().outbound.dropped, 1);
    assert_nothing_sent(&mut peer_c).await;
    assert_eq!(bridge.registry().snapshot(), vec![a, c]);
}

#[tokio::test]
async fn test_stalled_peer_does_not_hold_up_others() {
    let config = BridgeConfig {
        outbound_buffer: 4,
        shutdown_grace_ms: 100,
        ..BridgeConfig::default()
    };
    let (bridge, mut ports) = Bridge::new(config);
    let (a, mut peer_a) = connect(&bridge, &mut ports).await;
    // Never reads a single payload
    let (c, _peer_c) = connect(&bridge, &mut ports).await;

    for i in 0..100 {
        ports
            .outbound
            .send(OutboundCommand::broadcast(format!("b{i}")))
            .await
            .unwrap();
        assert_eq!(
            next_payload(&mut peer_a).await,
            Some(Payload::text(format!("b{i}")))
        );
    }

    ports
        .outbound
        .send(OutboundCommand::send_to(a, "direct"))
        .await
        .unwrap();
    assert_eq!(next_payload(&mut peer_a).await, Some(Payload::text("direct")));

    // The stalled peer is closed instead
    assert_eq!(next_event(&mut ports).await, InboundEvent::Disconnected { id: c });
    assert_eq!(bridge.registry().snapshot(), vec![a]);
    assert!(bridge.stats().outbound.failed >= 1);
}

#[tokio::test]
async fn test_messages_from_one_peer_arrive_in_order() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());
    let (a, peer_a) = connect(&bridge, &mut ports).await;

    let sender = tokio::spawn(async move {
        for i in 0..100 {
            peer_a.send(format!("m{i}")).await.unwrap();
        }
        peer_a
    });

    for i in 0..100 {
        assert_eq!(
            next_event(&mut ports).await,
            InboundEvent::Message {
                id: a,
                payload: Payload::text(format!("m{i}")),
            }
        );
    }
    let _peer_a = sender.await.unwrap();
}

#[tokio::test]
async fn test_sends_to_one_peer_arrive_in_command_order() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());
    let (a, mut peer_a) = connect(&bridge, &mut ports).await;

    for i in 0..10 {
        ports
            .outbound
            .send(OutboundCommand::send_to(a, format!("r{i}")))
            .await
            .unwrap();
    }
    for i in 0..10 {
        assert_eq!(
            next_payload(&mut peer_a).await,
            Some(Payload::text(format!("r{i}")))
        );
    }
}

#[tokio::test]
async fn test_broadcast_survives_failing_peer() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());
    let (_a, mut peer_a) = connect(&bridge, &mut ports).await;
    let (_b, mut peer_b) = connect(&bridge, &mut ports).await;
    let (c, mut peer_c) = connect(&bridge, &mut ports).await;

    peer_c.stop_reading();

    bridge
        .router()
        .route(OutboundCommand::broadcast("news"));

    assert_eq!(next_payload(&mut peer_a).await, Some(Payload::text("news")));
    assert_eq!(next_payload(&mut peer_b).await, Some(Payload::text("news")));

    // The failed write tears the connection down
    assert_eq!(next_event(&mut ports).await, InboundEvent::Disconnected { id: c });
    assert_eq!(bridge.registry().len(), 2);

    // Survivors keep working
    bridge
        .router()
        .route(OutboundCommand::broadcast("more"));
    assert_eq!(next_payload(&mut peer_a).await, Some(Payload::text("more")));
    assert_eq!(next_payload(&mut peer_b).await, Some(Payload::text("more")));
}

#[tokio::test]
async fn test_slow_application_applies_backpressure_without_loss() {
    let config = BridgeConfig {
        inbound_buffer_bound: 2,
        ..BridgeConfig::default()
    };
    let (bridge, mut ports) = Bridge::new(config);
    let (a, peer_a) = connect(&bridge, &mut ports).await;

    let sender = tokio::spawn(async move {
        for i in 0..40 {
            peer_a.send(format!("m{i}")).await.unwrap();
        }
        peer_a
    });

    tokio::time::sleep(QUIET).await;
    let stats = bridge.stats();
    assert_eq!(stats.inbound.capacity, 2);
    assert!(stats.inbound.buffered <= 2);
    assert!(
        !sender.is_finished(),
        "peer writes should stall while the application is not reading"
    );

    for i in 0..40 {
        assert_eq!(
            next_event(&mut ports).await,
            InboundEvent::Message {
                id: a,
                payload: Payload::text(format!("m{i}")),
            }
        );
    }
    let _peer_a = timeout(WAIT, sender).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_close_command_closes_transport_and_reports_once() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());
    let (a, mut peer_a) = connect(&bridge, &mut ports).await;
    let (b, mut peer_b) = connect(&bridge, &mut ports).await;

    ports.outbound.send(OutboundCommand::close(a)).await.unwrap();
    // Racing hang-up from the peer must not produce a second event
    peer_a.disconnect();

    assert_eq!(next_payload(&mut peer_a).await, None);
    assert_eq!(next_event(&mut ports).await, InboundEvent::Disconnected { id: a });
    assert_no_event(&mut ports).await;
    assert!(bridge.registry().lookup(a).is_none());

    // Closing again is a no-op
    let outcome = bridge.router().route(OutboundCommand::close(a));
    assert_eq!(outcome.dropped, 1);

    bridge
        .router()
        .route(OutboundCommand::send_to(b, "still here"));
    assert_eq!(
        next_payload(&mut peer_b).await,
        Some(Payload::text("still here"))
    );
}

#[tokio::test]
async fn test_transport_error_disconnects_only_that_peer() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());
    let (a, peer_a) = connect(&bridge, &mut ports).await;
    let (b, peer_b) = connect(&bridge, &mut ports).await;

    peer_a
        .inject_error(TransportError::Protocol("bad frame".into()))
        .await
        .unwrap();
    assert_eq!(next_event(&mut ports).await, InboundEvent::Disconnected { id: a });

    peer_b.send("ok").await.unwrap();
    assert_eq!(
        next_event(&mut ports).await,
        InboundEvent::Message {
            id: b,
            payload: Payload::text("ok"),
        }
    );
}

#[tokio::test]
async fn test_identifiers_are_never_reused() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());
    let mut seen = HashSet::new();

    for _ in 0..5 {
        let (id, mut peer) = connect(&bridge, &mut ports).await;
        assert!(seen.insert(id), "identifier {id} reused");
        peer.disconnect();
        assert_eq!(next_event(&mut ports).await, InboundEvent::Disconnected { id });
    }
    assert!(bridge.registry().is_empty());
}

#[tokio::test]
async fn test_capacity_limit_rejects_without_disturbing_existing() {
    let config = BridgeConfig {
        max_connections: Some(1),
        ..BridgeConfig::default()
    };
    let (bridge, mut ports) = Bridge::new(config);
    let (a, mut peer_a) = connect(&bridge, &mut ports).await;

    let (overflow, mut overflow_peer) = memory_pair(4);
    let err = bridge.accept(overflow).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::CapacityExceeded { current: 1, max: 1 }
    ));
    assert_eq!(next_payload(&mut overflow_peer).await, None);
    assert_no_event(&mut ports).await;
    assert_eq!(bridge.stats().connections.total_rejected, 1);

    bridge
        .router()
        .route(OutboundCommand::send_to(a, "hello"));
    assert_eq!(next_payload(&mut peer_a).await, Some(Payload::text("hello")));
}

#[tokio::test]
async fn test_binary_payloads_pass_through_unchanged() {
    let (bridge, mut ports) = Bridge::new(BridgeConfig::default());
    let (a, mut peer_a) = connect(&bridge, &mut ports).await;

    let bytes = vec![0u8, 159, 146, 150, 255];
    peer_a.send(Payload::binary(bytes.clone())).await.unwrap();
    assert_eq!(
        next_event(&mut ports).await,
        InboundEvent::Message {
            id: a,
            payload: Payload::binary(bytes.clone()),
        }
    );

    bridge
        .router()
        .route(OutboundCommand::send_to(a, Payload::binary(bytes.clone())));
    assert_eq!(next_payload(&mut peer_a).await, Some(Payload::binary(bytes)));
}

#[tokio::test]
async fn test_relay_application_end_to_end() {
    let (bridge, ports) = Bridge::new(BridgeConfig::default());
    let app_handle = tokio::spawn(app::drive(RelayApp::new(), ports));

    let (t1, mut peer_1) = memory_pair(16);
    let (t2, mut peer_2) = memory_pair(16);
    bridge.accept(t1).await.unwrap();
    bridge.accept(t2).await.unwrap();

    // Wait for both sessions to be reading before talking
    timeout(WAIT, async {
        while bridge.stats().inbound.connected < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    peer_1.send("hi all").await.unwrap();
    assert_eq!(next_payload(&mut peer_1).await, Some(Payload::text("hi all")));
    assert_eq!(next_payload(&mut peer_2).await, Some(Payload::text("hi all")));

    let result = bridge.shutdown().await;
    assert_eq!(result.initial_connections, 2);
    assert!(bridge.registry().is_empty());
    app_handle.abort();
}

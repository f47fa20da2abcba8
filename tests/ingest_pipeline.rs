//! Interpreter, registry and bus working together on decoded frames.

mod common;

use std::time::Duration;

use common::{node_info_payload, position_payload, text_payload, BASE_STATION};
use meshtap::events::EventBus;
use meshtap::meshtastic::{Interpreter, NodeId, Outcome, PacketBody};
use meshtap::registry::{Freshness, NodeRegistry};

fn pipeline(depth: usize) -> Interpreter {
    Interpreter::new(NodeRegistry::new(), EventBus::new(depth), 64)
}

#[test]
fn node_info_then_text_is_published_in_order() {
    let mut interp = pipeline(16);
    let sub = interp.bus().subscribe();

    interp.ingest(
        "radio0",
        &node_info_payload(BASE_STATION, 1, "Base Station", "BS"),
    );
    interp.ingest("radio0", &text_payload(BASE_STATION, 2, "hello"));

    let first = sub.try_recv().expect("node info event");
    let second = sub.try_recv().expect("text event");
    assert!(sub.try_recv().is_none());
    assert_eq!((first.sequence, second.sequence), (1, 2));
    assert_eq!(first.kind(), "node_info");
    match &second.packet.body {
        PacketBody::TextMessage(t) => assert_eq!(t.text, "hello"),
        other => panic!("expected text, got {:?}", other),
    }

    let node = interp
        .registry()
        .get(NodeId(BASE_STATION))
        .expect("registered");
    assert_eq!(node.long_name.as_deref(), Some("Base Station"));
    assert_eq!(node.short_name.as_deref(), Some("BS"));
    assert_eq!(node.packets_seen, 2);
    assert_eq!(node.last_source.as_deref(), Some("radio0"));
}

#[test]
fn retransmission_seen_on_two_radios_is_published_once() {
    let mut interp = pipeline(16);
    let sub = interp.bus().subscribe();
    let frame = text_payload(BASE_STATION, 99, "flooded");

    assert!(matches!(
        interp.ingest("radio0", &frame),
        Outcome::Published { sequence: 1, delivered: 1 }
    ));
    assert_eq!(interp.ingest("radio1", &frame), Outcome::Duplicate);
    assert_eq!(interp.ingest("radio0", &frame), Outcome::Duplicate);

    assert_eq!(sub.pending(), 1);
    assert_eq!(interp.next_sequence(), 2);
    // A duplicate does not count as another sighting.
    let node = interp.registry().get(NodeId(BASE_STATION)).expect("node");
    assert_eq!(node.packets_seen, 1);
}

#[test]
fn dedup_window_forgets_old_ids() {
    let mut interp = Interpreter::new(NodeRegistry::new(), EventBus::new(8), 2);
    let a = text_payload(BASE_STATION, 1, "a");
    interp.ingest("radio0", &a);
    interp.ingest("radio0", &text_payload(BASE_STATION, 2, "b"));
    interp.ingest("radio0", &text_payload(BASE_STATION, 3, "c"));
    // id 1 has been evicted from a window of two.
    assert!(matches!(
        interp.ingest("radio0", &a),
        Outcome::Published { .. }
    ));
}

#[test]
fn position_update_keeps_learnt_names() {
    let mut interp = pipeline(4);
    interp.ingest(
        "radio0",
        &node_info_payload(BASE_STATION, 10, "Base Station", "BS"),
    );
    interp.ingest(
        "radio0",
        &position_payload(BASE_STATION, 11, 473_977_000, 85_456_000),
    );

    let node = interp.registry().get(NodeId(BASE_STATION)).expect("node");
    assert_eq!(node.long_name.as_deref(), Some("Base Station"));
    let pos = node.position.expect("position");
    assert!((pos.latitude - 47.3977).abs() < 1e-6);
    assert!((pos.longitude - 8.5456).abs() < 1e-6);
    assert_eq!(pos.altitude, Some(120));
}

#[test]
fn garbage_payload_becomes_unknown_event() {
    let mut interp = pipeline(4);
    let sub = interp.bus().subscribe();
    interp.ingest("radio0", &[0xFF, 0xFF, 0xFF, 0x01]);

    let ev = sub.try_recv().expect("unknown still published");
    assert_eq!(ev.kind(), "unknown");
    assert_eq!(ev.packet.sender, NodeId::UNKNOWN);
    assert!(interp.registry().is_empty(), "unknown sender is not registered");
}

#[test]
fn fresh_nodes_turn_stale_after_ttl() {
    let mut interp = pipeline(4);
    interp.ingest("radio0", &text_payload(BASE_STATION, 5, "ping"));
    let reader = interp.reader();
    assert_eq!(
        reader.staleness(Duration::from_secs(3600)),
        vec![(NodeId(BASE_STATION), Freshness::Fresh)]
    );
    let later = chrono::Utc::now() + chrono::Duration::hours(2);
    assert_eq!(
        reader.staleness_at(Duration::from_secs(3600), later),
        vec![(NodeId(BASE_STATION), Freshness::Stale)]
    );
}

//! Domain events and their wire representation.
//!
//! - [`DomainEvent`] - immutable, sequenced unit published on the [`EventBus`]
//! - [`bus`] - fan-out with bounded drop-oldest queues per subscriber
//! - [`WireMessage`] - newline-delimited JSON records sent to streaming clients

pub mod bus;

pub use bus::{BusStats, EventBus, SubscriberId, Subscription};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::meshtastic::{NodeId, Packet, PacketBody};
use crate::registry::{Freshness, Node};

/// A packet accepted by the interpreter, stamped with a local sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    /// Name of the device the frame arrived on.
    pub source: String,
    pub packet: Packet,
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        self.packet.kind()
    }
}

/// Event record on the wire: `{type:"event", sequence, timestamp, sender_id, kind, payload, ..}`.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub source: &'a str,
    pub sender_id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<NodeId>,
    pub channel: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx_snr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx_rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops_away: Option<u32>,
    #[serde(flatten)]
    pub body: &'a PacketBody,
}

impl<'a> From<&'a DomainEvent> for EventRecord<'a> {
    fn from(ev: &'a DomainEvent) -> Self {
        let p = &ev.packet;
        EventRecord {
            sequence: ev.sequence,
            timestamp: ev.received_at,
            source: &ev.source,
            sender_id: p.sender,
            packet_id: p.packet_id,
            destination: p.destination,
            channel: p.channel,
            rx_snr: p.rx_snr,
            rx_rssi: p.rx_rssi,
            hops_away: p.hops_away,
            body: &p.body,
        }
    }
}

/// Registry entry as sent in a snapshot, with its freshness at send time.
#[derive(Debug, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage<'a> {
    Snapshot {
        generated_at: DateTime<Utc>,
        ttl_secs: u64,
        nodes: Vec<NodeView>,
    },
    Event(EventRecord<'a>),
}

impl<'a> WireMessage<'a> {
    pub fn snapshot(nodes: Vec<Node>, ttl: Duration) -> WireMessage<'static> {
        let now = Utc::now();
        let nodes = nodes
            .into_iter()
            .map(|node| {
                let stale = node.freshness(now, ttl) == Freshness::Stale;
                NodeView { node, stale }
            })
            .collect();
        WireMessage::Snapshot {
            generated_at: now,
            ttl_secs: ttl.as_secs(),
            nodes,
        }
    }

    pub fn event(ev: &'a DomainEvent) -> Self {
        WireMessage::Event(EventRecord::from(ev))
    }

    /// One JSON object terminated by `\n`.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

//! Frame payload → [`Packet`] → [`DomainEvent`].
//!
//! [`decode_payload`] never fails: anything it cannot map (unknown ports,
//! encrypted packets, malformed inner protobufs, non-packet `FromRadio`
//! messages) comes back as [`PacketBody::Unknown`] with a short reason.
//!
//! [`Interpreter`] adds the stateful part: retransmission suppression, the
//! registry upsert and the sequenced publish on the event bus.
use chrono::{DateTime, Utc};
use log::{debug, trace};
use prost::Message;
use std::collections::{HashSet, VecDeque};

use super::packet::{
    NodeId, NodeInfo, Packet, PacketBody, Position, Routing, Telemetry, TextMessage,
    UnknownPayload,
};
use crate::events::{DomainEvent, EventBus};
use crate::logutil::{hex_snippet, truncate_for_log};
use crate::metrics;
use crate::protobuf::meshtastic as proto;
use crate::registry::{NodeRegistry, NodeUpdate, RegistryReader};

/// Default number of `(sender, packet id)` pairs remembered for dedup.
pub const DEFAULT_DEDUP_WINDOW: usize = 256;

const PREVIEW_BYTES: usize = 16;

fn unknown(reason: impl Into<String>, port: Option<i32>, data: &[u8]) -> PacketBody {
    PacketBody::Unknown(UnknownPayload {
        reason: reason.into(),
        port,
        len: data.len(),
        preview: hex_snippet(data, PREVIEW_BYTES),
    })
}

/// Decode one frame payload (a `FromRadio` message).
pub fn decode_payload(payload: &[u8]) -> Packet {
    let packet = decode_from_radio(payload);
    if let PacketBody::Unknown(u) = &packet.body {
        metrics::inc_packets_unknown();
        debug!(
            "Unknown payload from {}: {} (len={} hex={})",
            packet.sender, u.reason, u.len, u.preview
        );
    }
    packet
}

fn decode_from_radio(payload: &[u8]) -> Packet {
    use proto::from_radio::PayloadVariant as FRPayload;

    let msg = match proto::FromRadio::decode(payload) {
        Ok(m) => m,
        Err(e) => {
            return Packet::bare(
                NodeId::UNKNOWN,
                unknown(format!("undecodable FromRadio: {}", e), None, payload),
            )
        }
    };
    match msg.payload_variant {
        Some(FRPayload::Packet(pkt)) => decode_mesh_packet(pkt),
        Some(FRPayload::NodeInfo(info)) => decode_node_db_entry(info),
        Some(FRPayload::MyInfo(info)) => {
            Packet::bare(NodeId(info.my_node_num), unknown("my_info", None, payload))
        }
        Some(FRPayload::ConfigCompleteId(id)) => Packet::bare(
            NodeId::UNKNOWN,
            unknown(format!("config_complete id={}", id), None, payload),
        ),
        Some(FRPayload::LogRecord(rec)) => Packet::bare(
            NodeId::UNKNOWN,
            unknown(
                format!("log_record: {}", truncate_for_log(&rec.message, 120)),
                None,
                payload,
            ),
        ),
        Some(FRPayload::Rebooted(_)) => {
            Packet::bare(NodeId::UNKNOWN, unknown("rebooted", None, payload))
        }
        None => Packet::bare(NodeId::UNKNOWN, unknown("empty FromRadio", None, payload)),
    }
}

fn decode_mesh_packet(pkt: proto::MeshPacket) -> Packet {
    use proto::mesh_packet::PayloadVariant as MPPayload;

    let body = match &pkt.payload_variant {
        Some(MPPayload::Decoded(data)) => decode_data(data, pkt.channel),
        Some(MPPayload::Encrypted(bytes)) => unknown("encrypted", None, bytes),
        None => unknown("mesh packet without payload", None, &[]),
    };
    Packet {
        sender: NodeId(pkt.from),
        packet_id: (pkt.id != 0).then_some(pkt.id),
        destination: (pkt.to != 0 && pkt.to != NodeId::BROADCAST.0).then_some(NodeId(pkt.to)),
        channel: pkt.channel,
        rx_snr: (pkt.rx_snr != 0.0).then_some(pkt.rx_snr),
        rx_rssi: (pkt.rx_rssi != 0).then_some(pkt.rx_rssi),
        hops_away: (pkt.hop_start > 0).then(|| pkt.hop_start.saturating_sub(pkt.hop_limit)),
        body,
    }
}

fn decode_data(data: &proto::Data, channel: u32) -> PacketBody {
    use proto::PortNum;

    let raw_port = data.portnum;
    let payload = &data.payload[..];
    let port = match PortNum::try_from(raw_port) {
        Ok(p) => p,
        Err(_) => return unknown("unrecognised port", Some(raw_port), payload),
    };
    match port {
        PortNum::TextMessageApp => match std::str::from_utf8(payload) {
            Ok(text) => PacketBody::TextMessage(TextMessage {
                text: text.to_string(),
                channel: Some(channel),
            }),
            Err(_) => unknown("text is not valid UTF-8", Some(raw_port), payload),
        },
        PortNum::TextMessageCompressedApp => {
            // Only surface payloads that are already plain printable ASCII.
            if payload.iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
                PacketBody::TextMessage(TextMessage {
                    text: String::from_utf8_lossy(payload).into_owned(),
                    channel: Some(channel),
                })
            } else {
                unknown("compressed text", Some(raw_port), payload)
            }
        }
        PortNum::PositionApp => match proto::Position::decode(payload) {
            Ok(pos) => match position_from_proto(&pos) {
                Some(p) => PacketBody::Position(p),
                None => unknown("position without fix", Some(raw_port), payload),
            },
            Err(_) => unknown("malformed position", Some(raw_port), payload),
        },
        PortNum::NodeinfoApp => match proto::User::decode(payload) {
            Ok(user) => PacketBody::NodeInfo(node_info_from_user(&user)),
            Err(_) => unknown("malformed user", Some(raw_port), payload),
        },
        PortNum::TelemetryApp => match proto::Telemetry::decode(payload) {
            Ok(t) => match telemetry_from_proto(&t) {
                Some(t) => PacketBody::Telemetry(t),
                None => unknown("telemetry without metrics", Some(raw_port), payload),
            },
            Err(_) => unknown("malformed telemetry", Some(raw_port), payload),
        },
        PortNum::RoutingApp => match proto::Routing::decode(payload) {
            Ok(r) => match routing_from_proto(r, data) {
                Some(r) => PacketBody::Routing(r),
                None => unknown("empty routing", Some(raw_port), payload),
            },
            Err(_) => unknown("malformed routing", Some(raw_port), payload),
        },
        PortNum::TracerouteApp => match proto::RouteDiscovery::decode(payload) {
            Ok(rd) => PacketBody::Routing(Routing::Traceroute {
                route: rd.route.into_iter().map(NodeId).collect(),
            }),
            Err(_) => unknown("malformed traceroute", Some(raw_port), payload),
        },
        other => unknown(format!("unhandled port {:?}", other), Some(raw_port), payload),
    }
}

fn position_from_proto(pos: &proto::Position) -> Option<Position> {
    match (pos.latitude_i, pos.longitude_i) {
        // 0/0 is what firmware reports before a GPS fix.
        (Some(0), Some(0)) => None,
        (Some(lat), Some(lon)) => Some(Position::from_fixed(lat, lon, pos.altitude)),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn hardware_name(raw: i32) -> Option<String> {
    match proto::HardwareModel::try_from(raw) {
        Ok(proto::HardwareModel::Unset) => None,
        Ok(model) => Some(model.label().to_string()),
        Err(_) => Some(format!("HW_{}", raw)),
    }
}

fn node_info_from_user(user: &proto::User) -> NodeInfo {
    NodeInfo {
        user_id: non_empty(&user.id),
        long_name: non_empty(&user.long_name),
        short_name: non_empty(&user.short_name),
        hardware: hardware_name(user.hw_model),
        position: None,
        telemetry: None,
    }
}

fn device_metrics(m: &proto::DeviceMetrics) -> Telemetry {
    Telemetry {
        battery_level: m.battery_level,
        voltage: m.voltage,
        channel_utilization: m.channel_utilization,
        air_util_tx: m.air_util_tx,
        uptime_seconds: m.uptime_seconds,
        ..Default::default()
    }
}

fn telemetry_from_proto(t: &proto::Telemetry) -> Option<Telemetry> {
    use proto::telemetry::Variant;
    let out = match t.variant.as_ref()? {
        Variant::DeviceMetrics(m) => device_metrics(m),
        Variant::EnvironmentMetrics(m) => Telemetry {
            temperature: m.temperature,
            relative_humidity: m.relative_humidity,
            barometric_pressure: m.barometric_pressure,
            ..Default::default()
        },
    };
    (!out.is_empty()).then_some(out)
}

fn routing_error_name(raw: i32) -> String {
    use proto::routing::Error as RErr;
    let name = match RErr::try_from(raw) {
        Ok(RErr::None) => "NONE",
        Ok(RErr::NoRoute) => "NO_ROUTE",
        Ok(RErr::GotNak) => "GOT_NAK",
        Ok(RErr::Timeout) => "TIMEOUT",
        Ok(RErr::NoInterface) => "NO_INTERFACE",
        Ok(RErr::MaxRetransmit) => "MAX_RETRANSMIT",
        Ok(RErr::NoChannel) => "NO_CHANNEL",
        Ok(RErr::TooLarge) => "TOO_LARGE",
        Ok(RErr::NoResponse) => "NO_RESPONSE",
        Ok(RErr::DutyCycleLimit) => "DUTY_CYCLE_LIMIT",
        Ok(RErr::BadRequest) => "BAD_REQUEST",
        Ok(RErr::NotAuthorized) => "NOT_AUTHORIZED",
        Err(_) => return format!("ERROR_{}", raw),
    };
    name.to_string()
}

fn routing_from_proto(r: proto::Routing, data: &proto::Data) -> Option<Routing> {
    use proto::routing::Variant as RVar;
    let route = |rd: proto::RouteDiscovery| -> Vec<NodeId> {
        rd.route.into_iter().map(NodeId).collect()
    };
    Some(match r.variant? {
        RVar::ErrorReason(e) => {
            let corr = if data.request_id != 0 {
                data.request_id
            } else {
                data.reply_id
            };
            Routing::Status {
                error: routing_error_name(e),
                request_id: (corr != 0).then_some(corr),
            }
        }
        RVar::RouteRequest(rd) => Routing::RouteRequest { route: route(rd) },
        RVar::RouteReply(rd) => Routing::RouteReply { route: route(rd) },
    })
}

/// Node-database entry streamed by the device after a config request.
fn decode_node_db_entry(info: proto::NodeInfo) -> Packet {
    let mut node = info
        .user
        .as_ref()
        .map(node_info_from_user)
        .unwrap_or_default();
    node.position = info.position.as_ref().and_then(position_from_proto);
    node.telemetry = info
        .device_metrics
        .as_ref()
        .map(device_metrics)
        .filter(|t| !t.is_empty());
    Packet {
        channel: info.channel,
        rx_snr: (info.snr != 0.0).then_some(info.snr),
        hops_away: info.hops_away,
        ..Packet::bare(NodeId(info.num), PacketBody::NodeInfo(node))
    }
}

/// Registry fields carried by `packet`.
pub fn node_update(packet: &Packet, source: &str) -> NodeUpdate {
    let mut update = NodeUpdate {
        hops_away: packet.hops_away,
        rx_snr: packet.rx_snr,
        rx_rssi: packet.rx_rssi,
        source: Some(source.to_string()),
        ..Default::default()
    };
    match &packet.body {
        PacketBody::NodeInfo(info) => {
            update.user_id = info.user_id.clone();
            update.long_name = info.long_name.clone();
            update.short_name = info.short_name.clone();
            update.hardware = info.hardware.clone();
            update.position = info.position;
            update.telemetry = info.telemetry;
        }
        PacketBody::Position(p) => update.position = Some(*p),
        PacketBody::Telemetry(t) => update.telemetry = Some(*t),
        PacketBody::TextMessage(_) | PacketBody::Routing(_) | PacketBody::Unknown(_) => {}
    }
    update
}

/// Bounded FIFO memory of recently seen `(sender, packet id)` pairs.
#[derive(Debug)]
pub struct Deduplicator {
    seen: HashSet<(NodeId, u32)>,
    order: VecDeque<(NodeId, u32)>,
    capacity: usize,
}

impl Deduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `key`. Returns false when it is already inside the window.
    pub fn insert(&mut self, key: (NodeId, u32)) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(key);
        self.seen.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Published { sequence: u64, delivered: usize },
    Duplicate,
}

/// Single-owner ingest state: dedup window, writable registry, sequence counter.
#[derive(Debug)]
pub struct Interpreter {
    registry: NodeRegistry,
    bus: EventBus,
    dedup: Deduplicator,
    next_sequence: u64,
}

impl Interpreter {
    pub fn new(registry: NodeRegistry, bus: EventBus, dedup_window: usize) -> Self {
        Self {
            registry,
            bus,
            dedup: Deduplicator::new(dedup_window),
            next_sequence: 1,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn reader(&self) -> RegistryReader {
        self.registry.reader()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Sequence number the next accepted packet will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Decode and accept one frame payload received on `source`.
    pub fn ingest(&mut self, source: &str, payload: &[u8]) -> Outcome {
        let packet = decode_payload(payload);
        self.accept(source, packet, Utc::now())
    }

    pub fn accept(&mut self, source: &str, packet: Packet, received_at: DateTime<Utc>) -> Outcome {
        if let Some(key) = packet.dedup_key() {
            if !self.dedup.insert(key) {
                metrics::inc_duplicates_suppressed();
                trace!(
                    "Suppressed duplicate {} id={} via {}",
                    key.0,
                    key.1,
                    source
                );
                return Outcome::Duplicate;
            }
        }
        if !packet.sender.is_unknown() {
            let update = node_update(&packet, source);
            self.registry.upsert_at(packet.sender, update, received_at);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let PacketBody::TextMessage(t) = &packet.body {
            debug!(
                "#{} text from {} on ch{}: {}",
                sequence,
                packet.sender,
                packet.channel,
                truncate_for_log(&t.text, 120)
            );
        } else {
            trace!("#{} {} from {}", sequence, packet.kind(), packet.sender);
        }
        let delivered = self.bus.publish(DomainEvent {
            sequence,
            received_at,
            source: source.to_string(),
            packet,
        });
        Outcome::Published {
            sequence,
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::from_radio::PayloadVariant as FRPayload;
    use proto::mesh_packet::PayloadVariant as MPPayload;

    fn mesh(from: u32, id: u32, port: proto::PortNum, payload: Vec<u8>) -> Vec<u8> {
        proto::FromRadio {
            id: 0,
            payload_variant: Some(FRPayload::Packet(proto::MeshPacket {
                from,
                to: NodeId::BROADCAST.0,
                id,
                hop_start: 3,
                hop_limit: 1,
                payload_variant: Some(MPPayload::Decoded(proto::Data {
                    portnum: port as i32,
                    payload: payload.into(),
                    ..Default::default()
                })),
                ..Default::default()
            })),
        }
        .encode_to_vec()
    }

    #[test]
    fn text_message_decodes_with_metadata() {
        let bytes = mesh(0xabc123, 7, proto::PortNum::TextMessageApp, b"hello".to_vec());
        let p = decode_payload(&bytes);
        assert_eq!(p.sender, NodeId(0xabc123));
        assert_eq!(p.packet_id, Some(7));
        assert_eq!(p.destination, None);
        assert_eq!(p.hops_away, Some(2));
        match p.body {
            PacketBody::TextMessage(t) => assert_eq!(t.text, "hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn node_info_carries_names_and_hardware() {
        let user = proto::User {
            id: "!00abc123".into(),
            long_name: "Base Station".into(),
            short_name: "BS".into(),
            hw_model: proto::HardwareModel::HeltecV3 as i32,
            ..Default::default()
        };
        let bytes = mesh(0xabc123, 1, proto::PortNum::NodeinfoApp, user.encode_to_vec());
        match decode_payload(&bytes).body {
            PacketBody::NodeInfo(n) => {
                assert_eq!(n.long_name.as_deref(), Some("Base Station"));
                assert_eq!(n.hardware.as_deref(), Some("HELTEC_V3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn telemetry_and_position_decode() {
        let t = proto::Telemetry {
            time: 0,
            variant: Some(proto::telemetry::Variant::DeviceMetrics(proto::DeviceMetrics {
                battery_level: Some(91),
                voltage: Some(4.05),
                ..Default::default()
            })),
        };
        let p = decode_payload(&mesh(1, 2, proto::PortNum::TelemetryApp, t.encode_to_vec()));
        assert!(matches!(p.body, PacketBody::Telemetry(t) if t.battery_level == Some(91)));

        let pos = proto::Position {
            latitude_i: Some(515_000_000),
            longitude_i: Some(-1_000_000),
            altitude: Some(40),
            time: 0,
        };
        let p = decode_payload(&mesh(1, 3, proto::PortNum::PositionApp, pos.encode_to_vec()));
        match p.body {
            PacketBody::Position(pos) => {
                assert!((pos.latitude - 51.5).abs() < 1e-9);
                assert_eq!(pos.altitude, Some(40));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn routing_error_is_named() {
        let r = proto::Routing {
            variant: Some(proto::routing::Variant::ErrorReason(
                proto::routing::Error::NoRoute as i32,
            )),
        };
        let p = decode_payload(&mesh(5, 9, proto::PortNum::RoutingApp, r.encode_to_vec()));
        assert_eq!(
            p.body,
            PacketBody::Routing(Routing::Status {
                error: "NO_ROUTE".into(),
                request_id: None,
            })
        );
    }

    #[test]
    fn garbage_and_unhandled_ports_become_unknown() {
        let p = decode_payload(&[0xff, 0xff, 0xff]);
        assert_eq!(p.sender, NodeId::UNKNOWN);
        assert_eq!(p.kind(), "unknown");

        let p = decode_payload(&mesh(3, 4, proto::PortNum::RangeTestApp, vec![1, 2]));
        match p.body {
            PacketBody::Unknown(u) => {
                assert_eq!(u.port, Some(proto::PortNum::RangeTestApp as i32));
                assert_eq!(u.preview, "0102");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn node_db_entry_maps_to_node_info_without_id() {
        let bytes = proto::FromRadio {
            id: 0,
            payload_variant: Some(FRPayload::NodeInfo(proto::NodeInfo {
                num: 0x42,
                user: Some(proto::User {
                    long_name: "Relay".into(),
                    ..Default::default()
                }),
                hops_away: Some(1),
                ..Default::default()
            })),
        }
        .encode_to_vec();
        let p = decode_payload(&bytes);
        assert_eq!(p.sender, NodeId(0x42));
        assert_eq!(p.packet_id, None);
        assert_eq!(p.hops_away, Some(1));
        assert_eq!(p.kind(), "node_info");
    }

    #[test]
    fn dedup_window_is_bounded() {
        let mut d = Deduplicator::new(2);
        assert!(d.insert((NodeId(1), 1)));
        assert!(!d.insert((NodeId(1), 1)));
        assert!(d.insert((NodeId(1), 2)));
        assert!(d.insert((NodeId(1), 3)));
        assert_eq!(d.len(), 2);
        // (1,1) fell out of the window and is accepted again.
        assert!(d.insert((NodeId(1), 1)));
    }

    #[test]
    fn duplicate_yields_one_event_and_one_upsert() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe();
        let mut interp = Interpreter::new(NodeRegistry::new(), bus, 8);
        let bytes = mesh(0x10, 55, proto::PortNum::TextMessageApp, b"hi".to_vec());
        assert_eq!(
            interp.ingest("radio0", &bytes),
            Outcome::Published {
                sequence: 1,
                delivered: 1
            }
        );
        assert_eq!(interp.ingest("radio1", &bytes), Outcome::Duplicate);
        assert_eq!(sub.pending(), 1);
        let node = interp.registry().get(NodeId(0x10)).expect("node");
        assert_eq!(node.packets_seen, 1);
        assert_eq!(node.last_source.as_deref(), Some("radio0"));
        assert_eq!(interp.next_sequence(), 2);
    }

    #[test]
    fn unknown_sender_is_published_but_not_registered() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        let mut interp = Interpreter::new(NodeRegistry::new(), bus, 8);
        interp.ingest("radio0", &[0xff]);
        assert!(interp.registry().is_empty());
        assert_eq!(sub.try_recv().map(|e| e.kind()), Some("unknown"));
    }
}

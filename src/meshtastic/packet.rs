//! Typed packets decoded from frame payloads.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mesh node number, shown Meshtastic-style as `!` followed by 8 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Placeholder sender for frames that could not be attributed to a node.
    pub const UNKNOWN: NodeId = NodeId(0);
    /// Meshtastic broadcast address.
    pub const BROADCAST: NodeId = NodeId(0xFFFF_FFFF);

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNodeIdError(String);

impl fmt::Display for ParseNodeIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node id '{}'", self.0)
    }
}

impl std::error::Error for ParseNodeIdError {}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    /// Accepts `!abc123`, `0xABC123` or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let parsed = if let Some(hex) = t.strip_prefix('!') {
            u32::from_str_radix(hex, 16)
        } else if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            t.parse::<u32>()
        };
        parsed
            .map(NodeId)
            .map_err(|_| ParseNodeIdError(s.to_string()))
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One decoded frame: common routing metadata plus the variant-specific body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    pub sender: NodeId,
    /// Mesh packet id; `None` when the radio did not assign one.
    pub packet_id: Option<u32>,
    /// `None` for broadcasts.
    pub destination: Option<NodeId>,
    pub channel: u32,
    pub rx_snr: Option<f32>,
    pub rx_rssi: Option<i32>,
    pub hops_away: Option<u32>,
    pub body: PacketBody,
}

impl Packet {
    /// Packet with no routing metadata, used for frames that are not mesh packets.
    pub fn bare(sender: NodeId, body: PacketBody) -> Self {
        Self {
            sender,
            packet_id: None,
            destination: None,
            channel: 0,
            rx_snr: None,
            rx_rssi: None,
            hops_away: None,
            body,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// Key used for retransmission suppression.
    pub fn dedup_key(&self) -> Option<(NodeId, u32)> {
        self.packet_id.map(|id| (self.sender, id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum PacketBody {
    NodeInfo(NodeInfo),
    TextMessage(TextMessage),
    Telemetry(Telemetry),
    Position(Position),
    Routing(Routing),
    Unknown(UnknownPayload),
}

impl PacketBody {
    pub fn kind(&self) -> &'static str {
        match self {
            PacketBody::NodeInfo(_) => "node_info",
            PacketBody::TextMessage(_) => "text_message",
            PacketBody::Telemetry(_) => "telemetry",
            PacketBody::Position(_) => "position",
            PacketBody::Routing(_) => "routing",
            PacketBody::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
    /// Position carried by a node-database entry, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMessage {
    pub text: String,
    pub channel: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
}

impl Position {
    /// Convert Meshtastic fixed-point (1e-7 degree) coordinates.
    pub fn from_fixed(latitude_i: i32, longitude_i: i32, altitude: Option<i32>) -> Self {
        Self {
            latitude: latitude_i as f64 * 1e-7,
            longitude: longitude_i as f64 * 1e-7,
            altitude,
        }
    }
}

/// Device and environment metrics; every field is optional because each
/// telemetry packet only carries one metrics group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_utilization: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_util_tx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_humidity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barometric_pressure: Option<f32>,
}

impl Telemetry {
    /// Field-wise merge: values present in `newer` win, absent ones keep `self`.
    pub fn merged_with(&self, newer: &Telemetry) -> Telemetry {
        Telemetry {
            battery_level: newer.battery_level.or(self.battery_level),
            voltage: newer.voltage.or(self.voltage),
            channel_utilization: newer.channel_utilization.or(self.channel_utilization),
            air_util_tx: newer.air_util_tx.or(self.air_util_tx),
            uptime_seconds: newer.uptime_seconds.or(self.uptime_seconds),
            temperature: newer.temperature.or(self.temperature),
            relative_humidity: newer.relative_humidity.or(self.relative_humidity),
            barometric_pressure: newer.barometric_pressure.or(self.barometric_pressure),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Telemetry::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Routing {
    /// Delivery status; `error` is `NONE` for a successful ack.
    Status {
        error: String,
        request_id: Option<u32>,
    },
    RouteRequest { route: Vec<NodeId> },
    RouteReply { route: Vec<NodeId> },
    /// Traceroute result.
    Traceroute { route: Vec<NodeId> },
}

/// Anything the interpreter could not map to a known variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnknownPayload {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    pub len: usize,
    /// Hex of the first bytes, for observability.
    pub preview: String,
}

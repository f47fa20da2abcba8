//! Meshtastic protobuf message subset
//!
//! Only the messages the ingestion path actually touches are declared here, using
//! `prost` derive macros directly instead of a build-time protoc step. Field tags
//! follow the upstream `meshtastic/*.proto` definitions so frames produced by stock
//! firmware decode unchanged; fields we never read are simply skipped by prost.

pub mod meshtastic {
    //! `meshtastic` protobuf package (partial).

    /// Packets from the radio to the host (`mesh.proto` FromRadio).
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FromRadio {
        #[prost(uint32, tag = "1")]
        pub id: u32,
        #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 4, 6, 7, 8")]
        pub payload_variant: ::core::option::Option<from_radio::PayloadVariant>,
    }

    pub mod from_radio {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "2")]
            Packet(super::MeshPacket),
            #[prost(message, tag = "3")]
            MyInfo(super::MyNodeInfo),
            #[prost(message, tag = "4")]
            NodeInfo(super::NodeInfo),
            #[prost(message, tag = "6")]
            LogRecord(super::LogRecord),
            #[prost(uint32, tag = "7")]
            ConfigCompleteId(u32),
            #[prost(bool, tag = "8")]
            Rebooted(bool),
        }
    }

    /// Packets from the host to the radio (`mesh.proto` ToRadio).
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ToRadio {
        #[prost(oneof = "to_radio::PayloadVariant", tags = "3, 7")]
        pub payload_variant: ::core::option::Option<to_radio::PayloadVariant>,
    }

    pub mod to_radio {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(uint32, tag = "3")]
            WantConfigId(u32),
            #[prost(message, tag = "7")]
            Heartbeat(super::Heartbeat),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Heartbeat {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MeshPacket {
        #[prost(fixed32, tag = "1")]
        pub from: u32,
        #[prost(fixed32, tag = "2")]
        pub to: u32,
        #[prost(uint32, tag = "3")]
        pub channel: u32,
        #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
        pub payload_variant: ::core::option::Option<mesh_packet::PayloadVariant>,
        #[prost(fixed32, tag = "6")]
        pub id: u32,
        #[prost(fixed32, tag = "7")]
        pub rx_time: u32,
        #[prost(float, tag = "8")]
        pub rx_snr: f32,
        #[prost(uint32, tag = "9")]
        pub hop_limit: u32,
        #[prost(bool, tag = "10")]
        pub want_ack: bool,
        #[prost(int32, tag = "12")]
        pub rx_rssi: i32,
        #[prost(bool, tag = "14")]
        pub via_mqtt: bool,
        #[prost(uint32, tag = "15")]
        pub hop_start: u32,
    }

    pub mod mesh_packet {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "4")]
            Decoded(super::Data),
            #[prost(bytes = "bytes", tag = "5")]
            Encrypted(::bytes::Bytes),
        }
    }

    /// Decoded application payload carried by a [`MeshPacket`].
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Data {
        #[prost(enumeration = "PortNum", tag = "1")]
        pub portnum: i32,
        #[prost(bytes = "bytes", tag = "2")]
        pub payload: ::bytes::Bytes,
        #[prost(bool, tag = "3")]
        pub want_response: bool,
        #[prost(fixed32, tag = "4")]
        pub dest: u32,
        #[prost(fixed32, tag = "5")]
        pub source: u32,
        #[prost(fixed32, tag = "6")]
        pub request_id: u32,
        #[prost(fixed32, tag = "7")]
        pub reply_id: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct User {
        #[prost(string, tag = "1")]
        pub id: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub long_name: ::prost::alloc::string::String,
        #[prost(string, tag = "3")]
        pub short_name: ::prost::alloc::string::String,
        #[prost(enumeration = "HardwareModel", tag = "5")]
        pub hw_model: i32,
        #[prost(bool, tag = "6")]
        pub is_licensed: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Position {
        #[prost(sfixed32, optional, tag = "1")]
        pub latitude_i: ::core::option::Option<i32>,
        #[prost(sfixed32, optional, tag = "2")]
        pub longitude_i: ::core::option::Option<i32>,
        #[prost(int32, optional, tag = "3")]
        pub altitude: ::core::option::Option<i32>,
        #[prost(fixed32, tag = "4")]
        pub time: u32,
    }

    /// Entry of the device's node database, streamed after a config request.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NodeInfo {
        #[prost(uint32, tag = "1")]
        pub num: u32,
        #[prost(message, optional, tag = "2")]
        pub user: ::core::option::Option<User>,
        #[prost(message, optional, tag = "3")]
        pub position: ::core::option::Option<Position>,
        #[prost(float, tag = "4")]
        pub snr: f32,
        #[prost(fixed32, tag = "5")]
        pub last_heard: u32,
        #[prost(message, optional, tag = "6")]
        pub device_metrics: ::core::option::Option<DeviceMetrics>,
        #[prost(uint32, tag = "7")]
        pub channel: u32,
        #[prost(bool, tag = "8")]
        pub via_mqtt: bool,
        #[prost(uint32, optional, tag = "9")]
        pub hops_away: ::core::option::Option<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MyNodeInfo {
        #[prost(uint32, tag = "1")]
        pub my_node_num: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LogRecord {
        #[prost(string, tag = "1")]
        pub message: ::prost::alloc::string::String,
        #[prost(fixed32, tag = "2")]
        pub time: u32,
        #[prost(string, tag = "3")]
        pub source: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Telemetry {
        #[prost(fixed32, tag = "1")]
        pub time: u32,
        #[prost(oneof = "telemetry::Variant", tags = "2, 3")]
        pub variant: ::core::option::Option<telemetry::Variant>,
    }

    pub mod telemetry {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Variant {
            #[prost(message, tag = "2")]
            DeviceMetrics(super::DeviceMetrics),
            #[prost(message, tag = "3")]
            EnvironmentMetrics(super::EnvironmentMetrics),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeviceMetrics {
        #[prost(uint32, optional, tag = "1")]
        pub battery_level: ::core::option::Option<u32>,
        #[prost(float, optional, tag = "2")]
        pub voltage: ::core::option::Option<f32>,
        #[prost(float, optional, tag = "3")]
        pub channel_utilization: ::core::option::Option<f32>,
        #[prost(float, optional, tag = "4")]
        pub air_util_tx: ::core::option::Option<f32>,
        #[prost(uint32, optional, tag = "5")]
        pub uptime_seconds: ::core::option::Option<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EnvironmentMetrics {
        #[prost(float, optional, tag = "1")]
        pub temperature: ::core::option::Option<f32>,
        #[prost(float, optional, tag = "2")]
        pub relative_humidity: ::core::option::Option<f32>,
        #[prost(float, optional, tag = "3")]
        pub barometric_pressure: ::core::option::Option<f32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RouteDiscovery {
        #[prost(fixed32, repeated, tag = "1")]
        pub route: ::prost::alloc::vec::Vec<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Routing {
        #[prost(oneof = "routing::Variant", tags = "1, 2, 3")]
        pub variant: ::core::option::Option<routing::Variant>,
    }

    pub mod routing {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Variant {
            #[prost(message, tag = "1")]
            RouteRequest(super::RouteDiscovery),
            #[prost(message, tag = "2")]
            RouteReply(super::RouteDiscovery),
            #[prost(enumeration = "Error", tag = "3")]
            ErrorReason(i32),
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Error {
            None = 0,
            NoRoute = 1,
            GotNak = 2,
            Timeout = 3,
            NoInterface = 4,
            MaxRetransmit = 5,
            NoChannel = 6,
            TooLarge = 7,
            NoResponse = 8,
            DutyCycleLimit = 9,
            BadRequest = 32,
            NotAuthorized = 33,
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PortNum {
        UnknownApp = 0,
        TextMessageApp = 1,
        RemoteHardwareApp = 2,
        PositionApp = 3,
        NodeinfoApp = 4,
        RoutingApp = 5,
        AdminApp = 6,
        TextMessageCompressedApp = 7,
        WaypointApp = 8,
        AudioApp = 9,
        DetectionSensorApp = 10,
        ReplyApp = 32,
        IpTunnelApp = 33,
        PaxcounterApp = 34,
        SerialApp = 64,
        StoreForwardApp = 65,
        RangeTestApp = 66,
        TelemetryApp = 67,
        ZpsApp = 68,
        SimulatorApp = 69,
        TracerouteApp = 70,
        NeighborinfoApp = 71,
        AtakPlugin = 72,
        MapReportApp = 73,
        PrivateApp = 256,
        AtakForwarder = 257,
    }

    /// Hardware models we can name; anything else is reported by number.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum HardwareModel {
        Unset = 0,
        TloraV2 = 1,
        TloraV1 = 2,
        TloraV211p6 = 3,
        Tbeam = 4,
        HeltecV20 = 5,
        TbeamV0p7 = 6,
        TEcho = 7,
        TloraV11p3 = 8,
        Rak4631 = 9,
        HeltecV21 = 10,
        HeltecV1 = 11,
        HeltecV3 = 43,
        HeltecWslV3 = 44,
        PrivateHw = 255,
    }

    impl HardwareModel {
        /// Upstream enum value name, e.g. `HELTEC_V3`.
        pub fn label(self) -> &'static str {
            match self {
                HardwareModel::Unset => "UNSET",
                HardwareModel::TloraV2 => "TLORA_V2",
                HardwareModel::TloraV1 => "TLORA_V1",
                HardwareModel::TloraV211p6 => "TLORA_V2_1_1P6",
                HardwareModel::Tbeam => "TBEAM",
                HardwareModel::HeltecV20 => "HELTEC_V2_0",
                HardwareModel::TbeamV0p7 => "TBEAM_V0P7",
                HardwareModel::TEcho => "T_ECHO",
                HardwareModel::TloraV11p3 => "TLORA_V1_1P3",
                HardwareModel::Rak4631 => "RAK4631",
                HardwareModel::HeltecV21 => "HELTEC_V2_1",
                HardwareModel::HeltecV1 => "HELTEC_V1",
                HardwareModel::HeltecV3 => "HELTEC_V3",
                HardwareModel::HeltecWslV3 => "HELTEC_WSL_V3",
                HardwareModel::PrivateHw => "PRIVATE_HW",
            }
        }
    }
}

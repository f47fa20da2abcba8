//! # Meshtastic serial protocol
//!
//! Everything between raw serial bytes and typed packets:
//!
//! - [`framer`] - `0x94 0xC3 <len>` frame scanner with byte-wise resync and a
//!   pluggable trailer check
//! - [`packet`] - [`Packet`] and its closed set of bodies
//! - [`interpreter`] - `FromRadio` decoding, retransmission suppression and
//!   sequenced publication
//!
//! ```rust
//! use meshtap::meshtastic::framer::{encode_frame, FrameDecoder, NoCheck};
//! use std::sync::Arc;
//!
//! let mut dec = FrameDecoder::new(Arc::new(NoCheck), 512);
//! dec.push(&encode_frame(b"\x08\x01", &NoCheck));
//! assert_eq!(dec.next_frame().map(|f| f.payload.to_vec()), Some(vec![8, 1]));
//! ```

pub mod framer;
pub mod interpreter;
pub mod packet;

pub use framer::{Crc16Check, Frame, FrameCheck, FrameDecoder, FromRadioCheck, NoCheck};
pub use interpreter::{decode_payload, Deduplicator, Interpreter, Outcome};
pub use packet::{
    NodeId, NodeInfo, Packet, PacketBody, ParseNodeIdError, Position, Routing, Telemetry,
    TextMessage, UnknownPayload,
};

use prost::Message;

use crate::protobuf::meshtastic as proto;

/// Framed `ToRadio { want_config_id }`; asks the firmware to start streaming.
pub fn want_config_frame(request_id: u32, check: &dyn FrameCheck) -> Vec<u8> {
    use proto::to_radio::PayloadVariant;
    let msg = proto::ToRadio {
        payload_variant: Some(PayloadVariant::WantConfigId(request_id)),
    };
    framer::encode_frame(&msg.encode_to_vec(), check)
}

/// Framed `ToRadio { heartbeat }`; keeps the firmware's serial API awake.
pub fn heartbeat_frame(check: &dyn FrameCheck) -> Vec<u8> {
    use proto::to_radio::PayloadVariant;
    let msg = proto::ToRadio {
        payload_variant: Some(PayloadVariant::Heartbeat(proto::Heartbeat {})),
    };
    framer::encode_frame(&msg.encode_to_vec(), check)
}

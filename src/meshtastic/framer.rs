//! Marker + length + trailer framer for the Meshtastic serial stream.
//!
//! Binary messages on the serial link are emitted as:
//!
//!   `0x94 0xC3 <u16 big-endian length> <payload> <trailer>`
//!
//! The trailer is produced and checked by a pluggable [`FrameCheck`]; stock firmware
//! sends none ([`NoCheck`]) while links that need integrity use [`Crc16Check`].
//! [`FromRadioCheck`] adds no trailer but only accepts payloads that decode as a
//! `FromRadio` message.
//!
//! [`FrameDecoder`] is an incremental scanner that can be fed arbitrary chunks and
//! yields whole, validated frames. It never fails: oversize lengths and bad
//! trailers drop a single leading byte and scanning resumes, so a frame whose
//! marker is only one byte further along is still found.
use bytes::{Buf, Bytes, BytesMut};
use crc::{Crc, CRC_16_IBM_3740};
use prost::Message;
use std::fmt;
use std::sync::Arc;

use crate::metrics;
use crate::protobuf::meshtastic as proto;

/// First stream header byte.
pub const START1: u8 = 0x94;
/// Second stream header byte.
pub const START2: u8 = 0xC3;
/// Marker plus length field.
pub const HEADER_LEN: usize = 4;
/// Meshtastic `MAX_TO_FROM_RADIO_SIZE`.
pub const DEFAULT_MAX_PAYLOAD: usize = 512;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Validation applied to every captured frame.
pub trait FrameCheck: fmt::Debug + Send + Sync {
    /// Bytes appended after the payload.
    fn trailer_len(&self) -> usize;
    /// Append the trailer for `header_and_payload` (length field included) to `out`.
    fn append_trailer(&self, header_and_payload: &[u8], out: &mut Vec<u8>);
    /// Returns true when `trailer` is valid for `header_and_payload`.
    fn verify(&self, header_and_payload: &[u8], trailer: &[u8]) -> bool;
}

/// No trailer; every length-consistent frame is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCheck;

impl FrameCheck for NoCheck {
    fn trailer_len(&self) -> usize {
        0
    }
    fn append_trailer(&self, _header_and_payload: &[u8], _out: &mut Vec<u8>) {}
    fn verify(&self, _header_and_payload: &[u8], _trailer: &[u8]) -> bool {
        true
    }
}

/// CRC-16/IBM-3740 over the length field and payload, big-endian trailer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc16Check;

impl Crc16Check {
    fn checksum(header_and_payload: &[u8]) -> u16 {
        // Skip the constant marker bytes; the length field is covered.
        CRC16.checksum(&header_and_payload[2..])
    }
}

impl FrameCheck for Crc16Check {
    fn trailer_len(&self) -> usize {
        2
    }
    fn append_trailer(&self, header_and_payload: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&Self::checksum(header_and_payload).to_be_bytes());
    }
    fn verify(&self, header_and_payload: &[u8], trailer: &[u8]) -> bool {
        trailer.len() == 2
            && u16::from_be_bytes([trailer[0], trailer[1]]) == Self::checksum(header_and_payload)
    }
}

/// No trailer; the payload itself must decode as a `FromRadio`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FromRadioCheck;

impl FrameCheck for FromRadioCheck {
    fn trailer_len(&self) -> usize {
        0
    }
    fn append_trailer(&self, _header_and_payload: &[u8], _out: &mut Vec<u8>) {}
    fn verify(&self, header_and_payload: &[u8], _trailer: &[u8]) -> bool {
        header_and_payload
            .get(HEADER_LEN..)
            .map(|payload| proto::FromRadio::decode(payload).is_ok())
            .unwrap_or(false)
    }
}

/// Resolve a configured checksum name (`"crc16"`, `"protobuf"` or `"none"`).
pub fn check_from_name(name: &str) -> Option<Arc<dyn FrameCheck>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "crc16" => Some(Arc::new(Crc16Check)),
        "protobuf" => Some(Arc::new(FromRadioCheck)),
        "none" => Some(Arc::new(NoCheck)),
        _ => None,
    }
}

/// A validated frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

/// Encode `payload` as one frame on the wire.
///
/// Panics if the payload does not fit the 16-bit length field.
pub fn encode_frame(payload: &[u8], check: &dyn FrameCheck) -> Vec<u8> {
    assert!(
        payload.len() <= u16::MAX as usize,
        "frame payload too large: {}",
        payload.len()
    );
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + check.trailer_len());
    out.push(START1);
    out.push(START2);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    let mut trailer = Vec::with_capacity(check.trailer_len());
    check.append_trailer(&out, &mut trailer);
    out.extend_from_slice(&trailer);
    out
}

/// Counters describing how the decoder has dealt with the stream so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u64,
    pub checksum_failures: u64,
    pub oversize: u64,
    /// Bytes discarded while looking for a marker.
    pub resync_bytes: u64,
}

/// Incremental frame scanner. See the module docs for the resync policy.
pub struct FrameDecoder {
    buf: BytesMut,
    max_payload: usize,
    check: Arc<dyn FrameCheck>,
    stats: DecoderStats,
}

impl fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("buffered", &self.buf.len())
            .field("max_payload", &self.max_payload)
            .field("check", &self.check)
            .field("stats", &self.stats)
            .finish()
    }
}

impl FrameDecoder {
    pub fn new(check: Arc<dyn FrameCheck>, max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_payload: max_payload.clamp(1, u16::MAX as usize),
            check,
            stats: DecoderStats::default(),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Forget any partially scanned data (used after a reconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Attempt to extract the next complete, validated frame. Returns `None` once
    /// the buffered bytes cannot yet form a frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.align_to_marker() {
                return None;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }

            let declared = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
            if declared == 0 || declared > self.max_payload {
                self.stats.oversize += 1;
                self.discard(1);
                continue;
            }

            let trailer_len = self.check.trailer_len();
            let total = HEADER_LEN + declared + trailer_len;
            if self.buf.len() < total {
                return None;
            }

            let body_end = HEADER_LEN + declared;
            if !self
                .check
                .verify(&self.buf[..body_end], &self.buf[body_end..total])
            {
                self.stats.checksum_failures += 1;
                metrics::inc_frames_rejected();
                self.discard(1);
                continue;
            }

            let mut frame = self.buf.split_to(total);
            frame.advance(HEADER_LEN);
            frame.truncate(declared);
            self.stats.frames += 1;
            metrics::inc_frames_decoded();
            return Some(Frame {
                payload: frame.freeze(),
            });
        }
    }

    /// Drain every frame currently available.
    pub fn drain(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    // Drop bytes until the buffer starts with a (possibly partial) marker.
    // Returns false when nothing useful is left buffered.
    fn align_to_marker(&mut self) -> bool {
        let mut i = 0;
        while i < self.buf.len() {
            if self.buf[i] == START1 {
                match self.buf.get(i + 1) {
                    Some(&START2) | None => break,
                    Some(_) => {}
                }
            }
            i += 1;
        }
        if i > 0 {
            self.discard(i);
        }
        !self.buf.is_empty()
    }

    fn discard(&mut self, n: usize) {
        self.buf.advance(n);
        self.stats.resync_bytes += n as u64;
        metrics::add_resync_bytes(n as u64);
    }
}

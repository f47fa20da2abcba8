//! Test utilities & fixtures.
//! Builds Meshtastic frames in memory and provides a scripted stand-in for a
//! serial device so link and pipeline tests run without hardware.
#![allow(dead_code)] // Each test binary only uses part of this module.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use meshtap::link::{LinkConnector, LinkIo};
use meshtap::meshtastic::framer::{encode_frame, NoCheck};
use meshtap::protobuf::meshtastic as proto;
use prost::Message;

pub const BASE_STATION: u32 = 0x00ab_c123;

/// Encoded `FromRadio` carrying one decoded mesh packet.
pub fn mesh_packet(from: u32, id: u32, port: proto::PortNum, payload: Vec<u8>) -> Vec<u8> {
    proto::FromRadio {
        id: 0,
        payload_variant: Some(proto::from_radio::PayloadVariant::Packet(proto::MeshPacket {
            from,
            to: 0xFFFF_FFFF,
            id,
            channel: 0,
            rx_snr: 6.5,
            rx_rssi: -87,
            hop_start: 3,
            hop_limit: 3,
            payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum: port as i32,
                payload: payload.into(),
                ..Default::default()
            })),
            ..Default::default()
        })),
    }
    .encode_to_vec()
}

pub fn node_info_payload(from: u32, id: u32, long_name: &str, short_name: &str) -> Vec<u8> {
    let user = proto::User {
        id: format!("!{:08x}", from),
        long_name: long_name.into(),
        short_name: short_name.into(),
        hw_model: proto::HardwareModel::HeltecV3 as i32,
        ..Default::default()
    };
    mesh_packet(from, id, proto::PortNum::NodeinfoApp, user.encode_to_vec())
}

pub fn text_payload(from: u32, id: u32, text: &str) -> Vec<u8> {
    mesh_packet(from, id, proto::PortNum::TextMessageApp, text.as_bytes().to_vec())
}

pub fn position_payload(from: u32, id: u32, lat_i: i32, lon_i: i32) -> Vec<u8> {
    let pos = proto::Position {
        latitude_i: Some(lat_i),
        longitude_i: Some(lon_i),
        altitude: Some(120),
        ..Default::default()
    };
    mesh_packet(from, id, proto::PortNum::PositionApp, pos.encode_to_vec())
}

/// Wire bytes of one frame (stock firmware, no trailer).
pub fn wire(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload, &NoCheck)
}

/// What a scripted session does once its chunks are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Report end of stream (device unplugged).
    Eof,
    /// Keep timing out like a quiet but healthy port.
    Quiet,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub chunks: Vec<Vec<u8>>,
    pub end: SessionEnd,
}

impl Session {
    pub fn new(chunks: Vec<Vec<u8>>, end: SessionEnd) -> Self {
        Self { chunks, end }
    }
}

/// Everything the tests may want to observe about a scripted device.
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub opens: AtomicUsize,
    pub opened_at: Mutex<Vec<Instant>>,
    pub written: Mutex<Vec<u8>>,
}

impl DeviceLog {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Time between consecutive `open` calls.
    pub fn open_gaps(&self) -> Vec<Duration> {
        let times = self.opened_at.lock().map(|t| t.clone()).unwrap_or_default();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

/// Connector that hands out one scripted session per `open`; once the script
/// runs out every further open fails.
pub struct ScriptedConnector {
    sessions: VecDeque<Session>,
    device: Arc<DeviceLog>,
    /// Reads time out until this is set, so a test can hold data back.
    gate: Arc<AtomicBool>,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<Session>) -> (Self, Arc<DeviceLog>) {
        let gate = Arc::new(AtomicBool::new(true));
        Self::gated(sessions, gate)
    }

    pub fn gated(sessions: Vec<Session>, gate: Arc<AtomicBool>) -> (Self, Arc<DeviceLog>) {
        let device = Arc::new(DeviceLog::default());
        (
            Self {
                sessions: sessions.into(),
                device: Arc::clone(&device),
                gate,
            },
            device,
        )
    }
}

impl LinkConnector for ScriptedConnector {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn open(&mut self) -> io::Result<Box<dyn LinkIo>> {
        self.device.opens.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut times) = self.device.opened_at.lock() {
            times.push(Instant::now());
        }
        let session = self
            .sessions
            .pop_front()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no such device"))?;
        Ok(Box::new(ScriptedIo {
            chunks: session.chunks.into(),
            end: session.end,
            device: Arc::clone(&self.device),
            gate: Arc::clone(&self.gate),
        }))
    }
}

struct ScriptedIo {
    chunks: VecDeque<Vec<u8>>,
    end: SessionEnd,
    device: Arc<DeviceLog>,
    gate: Arc<AtomicBool>,
}

impl ScriptedIo {
    fn time_out() -> io::Result<usize> {
        std::thread::sleep(Duration::from_millis(5));
        Err(io::Error::new(ErrorKind::TimedOut, "read timed out"))
    }
}

impl Read for ScriptedIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.gate.load(Ordering::SeqCst) {
            return Self::time_out();
        }
        match self.chunks.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > buf.len() {
                    let rest = chunk.split_off(buf.len());
                    self.chunks.push_front(rest);
                }
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => match self.end {
                SessionEnd::Eof => Ok(0),
                SessionEnd::Quiet => Self::time_out(),
            },
        }
    }
}

impl Write for ScriptedIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut w) = self.device.written.lock() {
            w.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Poll `cond` every few milliseconds until it holds or `within` elapses.
pub fn wait_until(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + within;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

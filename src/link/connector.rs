//! Byte-source seam between the supervisor and real hardware.
use std::io::{self, Read, Write};

/// A blocking, bidirectional byte stream. Reads should time out periodically
/// (`ErrorKind::TimedOut` or `WouldBlock`) so the supervisor can check shutdown
/// and idle deadlines.
pub trait LinkIo: Read + Write + Send {}

impl<T: Read + Write + Send> LinkIo for T {}

/// Opens a fresh [`LinkIo`] for every connection attempt.
pub trait LinkConnector: Send {
    /// Human readable target, e.g. `/dev/ttyUSB0 @ 115200 baud`.
    fn describe(&self) -> String;
    fn open(&mut self) -> io::Result<Box<dyn LinkIo>>;
}

impl<T: LinkConnector + ?Sized> LinkConnector for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> io::Result<Box<dyn LinkIo>> {
        (**self).open()
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialConnector;

#[cfg(feature = "serial")]
mod serial {
    use super::{LinkConnector, LinkIo};
    use crate::error::MeshtapError;
    use log::debug;
    use std::io;
    use std::time::Duration;

    /// USB/UART serial port, 8N1, DTR and RTS asserted.
    #[derive(Debug, Clone)]
    pub struct SerialConnector {
        port: String,
        baud_rate: u32,
        read_timeout: Duration,
    }

    impl SerialConnector {
        pub fn new(port: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
            Self {
                port: port.into(),
                baud_rate,
                read_timeout,
            }
        }
    }

    impl LinkConnector for SerialConnector {
        fn describe(&self) -> String {
            format!("{} @ {} baud", self.port, self.baud_rate)
        }

        fn open(&mut self) -> io::Result<Box<dyn LinkIo>> {
            let mut port = serialport::new(&self.port, self.baud_rate)
                .timeout(self.read_timeout)
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None)
                .flow_control(serialport::FlowControl::None)
                .open()
                .map_err(MeshtapError::serial_io)?;
            // ESP32 boards need DTR/RTS held to leave reset and start talking.
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            // Boot log text left in the input buffer is just noise for the framer.
            let _ = port.clear(serialport::ClearBuffer::Input);
            debug!("Opened serial port {}", self.describe());
            Ok(Box::new(port))
        }
    }
}

#[cfg(all(test, feature = "serial"))]
mod tests {
    use super::*;
    use crate::error::MeshtapError;
    use std::time::Duration;

    #[test]
    fn missing_serial_port_reports_a_serial_error() {
        let mut connector =
            SerialConnector::new("/dev/meshtap-no-such-port", 115_200, Duration::from_millis(10));
        let err = connector.open().err().expect("no such port");
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<MeshtapError>());
        assert!(matches!(inner, Some(MeshtapError::Serial(_))), "{:?}", err);
    }
}

pub mod interface;

pub use interface::{Connector, SerialLink, SerialProbe, KNOWN_DEVICES};

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{CartType, DeviceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub cart: CartType,
}

/// Byte link to a flashcart. Implemented over a serial port by
/// [`SerialLink`]; tests substitute scripted in-memory links.
pub trait PortIo: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Fill `buf` completely or fail
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Bytes waiting in the receive buffer
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Discard both transmit and receive buffers
    fn clear(&mut self) -> io::Result<()>;

    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    fn dsr(&mut self) -> io::Result<bool>;

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Map a failed read onto the taxonomy
pub fn read_error(e: io::Error) -> DeviceError {
    match e.kind() {
        io::ErrorKind::TimedOut => DeviceError::Timeout,
        _ => DeviceError::ReadFail,
    }
}

/// Map a failed write onto the taxonomy
pub fn write_error(e: io::Error) -> DeviceError {
    match e.kind() {
        io::ErrorKind::TimedOut => DeviceError::Timeout,
        io::ErrorKind::WriteZero => DeviceError::WriteZero,
        _ => DeviceError::WriteFail,
    }
}

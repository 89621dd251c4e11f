use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};

use super::{PortIo, SerialDeviceInfo};
use crate::config::LinkSettings;
use crate::device::{CartType, DeviceError, DeviceResult};
use crate::transport::{DeviceProbe, EverDriveTransport, Sc64Transport, Transport};

// FTDI bridges used by the serial-attached flashcarts
pub const KNOWN_DEVICES: &[(u16, u16, CartType)] = &[
    (0x0403, 0x6014, CartType::Sc64),      // FT232H
    (0x0403, 0x6001, CartType::EverDrive), // FT232R
];
pub const BAUD_RATE: u32 = 115200;

/// Opens a fresh link each time a transport is (re)opened
pub type Connector = Box<dyn FnMut() -> DeviceResult<Box<dyn PortIo>> + Send>;

/// [`PortIo`] over an OS serial port
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    port_name: String,
}

impl SerialLink {
    pub fn open(port_name: &str, timeout: Duration) -> DeviceResult<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(timeout)
            .open()
            .map_err(|e| {
                log::error!("Failed to open {}: {}", port_name, e);
                DeviceError::CantOpen
            })?;

        log::info!("Opened serial link on {}", port_name);
        Ok(Self {
            port,
            port_name: port_name.to_string(),
        })
    }

    /// Connector that opens `port_name` on demand
    pub fn connector(port_name: String, timeout: Duration) -> Connector {
        Box::new(move || {
            let link = SerialLink::open(&port_name, timeout)?;
            Ok(Box::new(link) as Box<dyn PortIo>)
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl PortIo for SerialLink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        Read::read_exact(&mut self.port, buf)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.port.bytes_to_read()?)
    }

    fn clear(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::All)?)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        Ok(self.port.write_data_terminal_ready(level)?)
    }

    fn dsr(&mut self) -> io::Result<bool> {
        Ok(self.port.read_data_set_ready()?)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        Ok(self.port.set_timeout(timeout)?)
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        log::debug!("Releasing serial link on {}", self.port_name);
    }
}

/// Finds serial-attached flashcarts by USB VID/PID
pub struct SerialProbe {
    settings: LinkSettings,
}

impl SerialProbe {
    pub fn new(settings: LinkSettings) -> Self {
        Self { settings }
    }

    /// List every USB serial port whose VID/PID belongs to a known flashcart
    pub fn discover_devices() -> DeviceResult<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports().map_err(|e| {
            log::error!("Serial port enumeration failed: {}", e);
            DeviceError::CartFindFail
        })?;

        let mut usb_ports = 0;
        let mut devices = Vec::new();
        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                usb_ports += 1;
                let known = KNOWN_DEVICES
                    .iter()
                    .find(|(vid, pid, _)| *vid == usb_info.vid && *pid == usb_info.pid);
                if let Some((_, _, cart)) = known {
                    devices.push(SerialDeviceInfo {
                        port_name: port.port_name.clone(),
                        vid: usb_info.vid,
                        pid: usb_info.pid,
                        serial_number: usb_info.serial_number.clone(),
                        manufacturer: usb_info.manufacturer.clone(),
                        product: usb_info.product.clone(),
                        cart: *cart,
                    });
                }
            }
        }

        if usb_ports == 0 {
            return Err(DeviceError::NoDevices);
        }
        Ok(devices)
    }
}

#[async_trait::async_trait]
impl DeviceProbe for SerialProbe {
    async fn find(&mut self, preferred: CartType) -> DeviceResult<Box<dyn Transport>> {
        let devices = Self::discover_devices()?;
        let device = devices
            .into_iter()
            .find(|d| preferred == CartType::None || d.cart == preferred)
            .ok_or(DeviceError::NotCart)?;

        log::info!("Found {} on {}", device.cart, device.port_name);
        let connector = SerialLink::connector(device.port_name.clone(), self.settings.serial_timeout());
        let transport: Box<dyn Transport> = match device.cart {
            CartType::Sc64 => Box::new(Sc64Transport::new(connector, &self.settings)),
            CartType::EverDrive => Box::new(EverDriveTransport::new(connector, &self.settings)),
            _ => return Err(DeviceError::NotCart),
        };
        Ok(transport)
    }
}

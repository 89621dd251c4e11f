use std::time::Duration;

use super::Transport;
use crate::config::LinkSettings;
use crate::device::{BootSettings, CartType, DeviceError, DeviceResult, ProtocolVer, UsbDataType};
use crate::protocol::{encode_envelope, read_envelope, Packet};
use crate::serial::{read_error, write_error, Connector, PortIo};

const ROM_BASE: u32 = 0x1000_0000;
const BLOCK_SIZE: u32 = 512;

/// The console DMAs in halfwords, so bodies arrive padded to 2 bytes
const RECEIVE_ALIGNMENT: usize = 2;

fn command(id: u8, address: u32, length: u32, arg: u32) -> [u8; 16] {
    let mut packet = [0u8; 16];
    packet[..3].copy_from_slice(b"cmd");
    packet[3] = id;
    packet[4..8].copy_from_slice(&address.to_be_bytes());
    packet[8..12].copy_from_slice(&length.to_be_bytes());
    packet[12..16].copy_from_slice(&arg.to_be_bytes());
    packet
}

/// EverDrive X7 / v3 over its FT232R serial bridge.
///
/// Control traffic is 16-byte `cmd` packets; debug data travels in DMA
/// envelopes (`DMA@` header body `CMPH`).
pub struct EverDriveTransport {
    connect: Connector,
    port: Option<Box<dyn PortIo>>,
    serial_timeout: Duration,
    upload_size: u32,
    written: u32,
}

impl EverDriveTransport {
    pub fn new(connect: Connector, settings: &LinkSettings) -> Self {
        Self {
            connect,
            port: None,
            serial_timeout: settings.serial_timeout(),
            upload_size: 0,
            written: 0,
        }
    }

    fn port(&mut self) -> DeviceResult<&mut dyn PortIo> {
        match self.port.as_mut() {
            Some(port) => Ok(port.as_mut()),
            None => Err(DeviceError::WriteFail),
        }
    }

    fn send_command(&mut self, id: u8, address: u32, length: u32, arg: u32) -> DeviceResult<()> {
        self.port()?
            .write_all(&command(id, address, length, arg))
            .map_err(write_error)
    }
}

fn test_link(port: &mut dyn PortIo) -> DeviceResult<()> {
    port.write_all(&command(b't', 0, 0, 0)).map_err(write_error)?;
    let mut reply = [0u8; 16];
    port.read_exact(&mut reply).map_err(read_error)?;
    if &reply[..4] != b"cmdr" {
        log::error!("EverDrive test reply {}", hex::encode(&reply[..4]));
        return Err(DeviceError::CartFindFail);
    }
    Ok(())
}

#[async_trait::async_trait]
impl Transport for EverDriveTransport {
    fn cart_type(&self) -> CartType {
        CartType::EverDrive
    }

    async fn open(&mut self) -> DeviceResult<()> {
        if self.port.is_some() {
            return Err(DeviceError::UsbBusy);
        }

        let mut port = (self.connect)()?;
        port.set_timeout(self.serial_timeout).map_err(|_| DeviceError::TimeoutSetFail)?;
        port.clear().map_err(|_| DeviceError::PurgeFail)?;
        test_link(port.as_mut())?;

        log::info!("EverDrive link open");
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self) -> DeviceResult<()> {
        if self.port.take().is_some() {
            log::info!("EverDrive link closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn test_debug(&mut self) -> DeviceResult<()> {
        test_link(self.port()?)
    }

    async fn begin_upload(&mut self, size: u32, _boot: &BootSettings) -> DeviceResult<()> {
        let blocks = size.div_ceil(BLOCK_SIZE);
        self.upload_size = blocks * BLOCK_SIZE;
        self.written = 0;
        self.send_command(b'W', ROM_BASE, blocks, 0)
    }

    async fn write_rom(&mut self, _offset: u32, chunk: &[u8]) -> DeviceResult<()> {
        self.port()?.write_all(chunk).map_err(write_error)?;
        self.written += chunk.len() as u32;
        Ok(())
    }

    async fn finish_upload(&mut self, boot: &BootSettings) -> DeviceResult<()> {
        // the write command announced whole blocks
        let remainder = self.upload_size.saturating_sub(self.written) as usize;
        if remainder > 0 {
            self.port()?.write_all(&vec![0u8; remainder]).map_err(write_error)?;
        }
        log::debug!(
            "EverDrive OS picks save type and CIC itself (requested {} / {})",
            boot.save,
            boot.cic
        );
        self.send_command(b's', 0, 0, 0)
    }

    async fn send_data(&mut self, kind: UsbDataType, payload: &[u8], protocol: ProtocolVer) -> DeviceResult<()> {
        let alignment = match protocol {
            ProtocolVer::Version1 => BLOCK_SIZE as usize,
            ProtocolVer::Version2 => 4,
        };
        let envelope = encode_envelope(kind, payload, alignment)?;
        self.port()?.write_all(&envelope).map_err(write_error)
    }

    async fn receive_data(&mut self, _protocol: ProtocolVer) -> DeviceResult<Option<Packet>> {
        let max_size = self.max_packet_size();
        let port = self.port.as_mut().ok_or(DeviceError::ReadFail)?;
        let available = port.bytes_to_read().map_err(|_| DeviceError::PollFail)?;
        if available == 0 {
            return Ok(None);
        }
        read_envelope(port.as_mut(), RECEIVE_ALIGNMENT, max_size).map(Some)
    }
}

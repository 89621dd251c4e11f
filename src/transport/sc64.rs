use std::collections::VecDeque;
use std::time::{Duration, Instant};

use semver::Version;

use super::Transport;
use crate::config::LinkSettings;
use crate::device::{BootSettings, CartType, DeviceError, DeviceResult, ProtocolVer, SaveType, UsbDataType, MAX_HEADER_SIZE};
use crate::protocol::Packet;
use crate::serial::{read_error, write_error, Connector, PortIo};

pub const IDENTIFIER: &[u8; 4] = b"SCv2";
pub const MIN_FIRMWARE: Version = Version::new(2, 12, 0);

const SDRAM_BASE: u32 = 0x0000_0000;
const BOOT_MODE_DIRECT_ROM: u32 = 3;
const CIC_SEED_AUTO: u32 = 0xFFFF;

mod cmd {
    pub const IDENTIFIER_GET: u8 = b'v';
    pub const VERSION_GET: u8 = b'V';
    pub const STATE_RESET: u8 = b'R';
    pub const CONFIG_SET: u8 = b'C';
    pub const MEMORY_WRITE: u8 = b'M';
    pub const USB_WRITE: u8 = b'U';
}

mod config_id {
    pub const ROM_WRITE_ENABLE: u32 = 1;
    pub const BOOT_MODE: u32 = 5;
    pub const SAVE_TYPE: u32 = 6;
    pub const CIC_SEED: u32 = 7;
}

/// Packet id the console's debug data arrives under
const PACKET_USB_DATA: u8 = b'U';

fn save_code(save: SaveType) -> u32 {
    match save {
        SaveType::None => 0,
        SaveType::Eeprom4k => 1,
        SaveType::Eeprom16k => 2,
        SaveType::Sram256 => 3,
        SaveType::FlashRam | SaveType::FlashRamPokemon => 4,
        SaveType::Sram768 => 5,
    }
}

/// SummerCart64 over its FTDI serial bridge.
///
/// Commands go out as `CMD` + id + two big-endian arguments + data; the
/// device answers `CMP` (or `ERR`) + id + length + data. Asynchronous `PKT`
/// frames may arrive at any time and are queued until `receive_data`.
pub struct Sc64Transport {
    connect: Connector,
    port: Option<Box<dyn PortIo>>,
    pending: VecDeque<Packet>,
    serial_timeout: Duration,
    reset_timeout: Duration,
    firmware: Option<Version>,
}

impl Sc64Transport {
    pub fn new(connect: Connector, settings: &LinkSettings) -> Self {
        Self {
            connect,
            port: None,
            pending: VecDeque::new(),
            serial_timeout: settings.serial_timeout(),
            reset_timeout: settings.reset_timeout(),
            firmware: None,
        }
    }

    /// Firmware version reported during `open`
    pub fn firmware(&self) -> Option<&Version> {
        self.firmware.as_ref()
    }

    fn port(&mut self) -> DeviceResult<&mut Box<dyn PortIo>> {
        self.port.as_mut().ok_or(DeviceError::Sc64CommFail)
    }

    fn execute(&mut self, id: u8, arg0: u32, arg1: u32, data: &[u8]) -> DeviceResult<Vec<u8>> {
        let port = self.port.as_mut().ok_or(DeviceError::Sc64CommFail)?;
        execute(port.as_mut(), &mut self.pending, id, arg0, arg1, data)
    }

    fn config_set(&mut self, id: u32, value: u32) -> DeviceResult<()> {
        self.execute(cmd::CONFIG_SET, id, value, &[]).map(|_| ())
    }

    async fn reset_handshake(port: &mut dyn PortIo, timeout: Duration) -> DeviceResult<()> {
        port.set_dtr(true).map_err(|_| DeviceError::SetDtrFail)?;
        wait_for_dsr(port, true, timeout)
            .await
            .map_err(|e| if e == DeviceError::Timeout { DeviceError::Sc64CtrlResetFail } else { e })?;

        port.clear().map_err(|_| DeviceError::PurgeFail)?;

        port.set_dtr(false).map_err(|_| DeviceError::ClearDtrFail)?;
        wait_for_dsr(port, false, timeout)
            .await
            .map_err(|e| if e == DeviceError::Timeout { DeviceError::Sc64CtrlReleaseFail } else { e })
    }
}

async fn wait_for_dsr(port: &mut dyn PortIo, level: bool, timeout: Duration) -> DeviceResult<()> {
    let started = Instant::now();
    loop {
        let dsr = port.dsr().map_err(|_| DeviceError::GetModemStatusFail)?;
        if dsr == level {
            return Ok(());
        }
        if started.elapsed() > timeout {
            return Err(DeviceError::Timeout);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn read_u32(port: &mut dyn PortIo) -> DeviceResult<u32> {
    let mut raw = [0u8; 4];
    port.read_exact(&mut raw).map_err(read_error)?;
    Ok(u32::from_be_bytes(raw))
}

fn read_sized(port: &mut dyn PortIo) -> DeviceResult<Vec<u8>> {
    let length = read_u32(port)?;
    // largest legal body is a full data header plus its payload
    if length > MAX_HEADER_SIZE + 4 {
        log::warn!("SC64 announced an oversized frame of {} bytes", length);
        return Err(DeviceError::BadPackSize);
    }
    let mut data = vec![0u8; length as usize];
    port.read_exact(&mut data).map_err(read_error)?;
    Ok(data)
}

/// Body of a `PKT` frame whose 4-byte tag has already been consumed.
/// Only USB data packets are kept; the frame is always read to its end.
fn read_async_packet(port: &mut dyn PortIo, id: u8) -> DeviceResult<Option<Vec<u8>>> {
    let data = read_sized(port)?;
    if id != PACKET_USB_DATA {
        log::debug!("Ignoring SC64 packet '{}' ({} bytes)", id as char, data.len());
        return Ok(None);
    }
    Ok(Some(data))
}

fn execute(
    port: &mut dyn PortIo,
    pending: &mut VecDeque<Packet>,
    id: u8,
    arg0: u32,
    arg1: u32,
    data: &[u8],
) -> DeviceResult<Vec<u8>> {
    let mut request = Vec::with_capacity(12 + data.len());
    request.extend_from_slice(b"CMD");
    request.push(id);
    request.extend_from_slice(&arg0.to_be_bytes());
    request.extend_from_slice(&arg1.to_be_bytes());
    request.extend_from_slice(data);
    port.write_all(&request).map_err(write_error)?;

    loop {
        let mut tag = [0u8; 4];
        port.read_exact(&mut tag).map_err(read_error)?;
        match &tag[..3] {
            b"CMP" | b"ERR" => {
                if tag[3] != id {
                    log::warn!("SC64 answered '{}' to command '{}'", tag[3] as char, id as char);
                    return Err(DeviceError::TxReplyMismatch);
                }
                let response = read_sized(port)?;
                if &tag[..3] == b"ERR" {
                    log::error!("SC64 command '{}' failed", id as char);
                    return Err(DeviceError::Sc64CmdFail);
                }
                return Ok(response);
            }
            b"PKT" => {
                // a bad data packet must not fail the command in flight
                if let Some(data) = read_async_packet(port, tag[3])? {
                    match Packet::from_framed(&data) {
                        Ok(packet) => pending.push_back(packet),
                        Err(e) => log::warn!(
                            "Dropping malformed SC64 packet during command '{}' ({}): {}",
                            id as char,
                            e.name(),
                            hex::encode(&data[..data.len().min(16)])
                        ),
                    }
                }
            }
            _ => {
                log::warn!("Unexpected SC64 frame tag {}", hex::encode(tag));
                return Err(DeviceError::Sc64CommFail);
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for Sc64Transport {
    fn cart_type(&self) -> CartType {
        CartType::Sc64
    }

    async fn open(&mut self) -> DeviceResult<()> {
        if self.port.is_some() {
            return Err(DeviceError::UsbBusy);
        }

        let mut port = (self.connect)()?;
        port.set_timeout(self.serial_timeout).map_err(|_| DeviceError::TimeoutSetFail)?;
        port.clear().map_err(|_| DeviceError::PurgeFail)?;
        Self::reset_handshake(port.as_mut(), self.reset_timeout).await?;

        let mut pending = VecDeque::new();
        let identifier = execute(port.as_mut(), &mut pending, cmd::IDENTIFIER_GET, 0, 0, &[])?;
        if identifier.as_slice() != IDENTIFIER {
            log::error!("Unexpected SC64 identifier {}", hex::encode(&identifier));
            return Err(DeviceError::CartFindFail);
        }

        let raw = execute(port.as_mut(), &mut pending, cmd::VERSION_GET, 0, 0, &[])
            .map_err(|_| DeviceError::Sc64FirmwareCheckFail)?;
        if raw.len() < 8 {
            return Err(DeviceError::Sc64FirmwareCheckFail);
        }
        let major = u16::from_be_bytes([raw[0], raw[1]]);
        let minor = u16::from_be_bytes([raw[2], raw[3]]);
        let revision = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let firmware = Version::new(major as u64, minor as u64, revision as u64);
        if firmware < MIN_FIRMWARE {
            log::error!("SC64 firmware {} is older than {}", firmware, MIN_FIRMWARE);
            return Err(DeviceError::Sc64FirmwareUnsupported);
        }

        log::info!("SC64 firmware {}", firmware);
        self.firmware = Some(firmware);
        self.pending = pending;
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self) -> DeviceResult<()> {
        if self.port.take().is_some() {
            self.pending.clear();
            log::info!("SC64 link closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn begin_upload(&mut self, size: u32, _boot: &BootSettings) -> DeviceResult<()> {
        log::debug!("SC64 upload of {} bytes starting", size);
        self.execute(cmd::STATE_RESET, 0, 0, &[])?;
        self.config_set(config_id::ROM_WRITE_ENABLE, 1)
    }

    async fn write_rom(&mut self, offset: u32, chunk: &[u8]) -> DeviceResult<()> {
        self.execute(cmd::MEMORY_WRITE, SDRAM_BASE + offset, chunk.len() as u32, chunk)
            .map(|_| ())
    }

    async fn finish_upload(&mut self, boot: &BootSettings) -> DeviceResult<()> {
        self.config_set(config_id::ROM_WRITE_ENABLE, 0)?;
        self.config_set(config_id::SAVE_TYPE, save_code(boot.save))?;
        let seed = boot.cic.seed().map(u32::from).unwrap_or(CIC_SEED_AUTO);
        self.config_set(config_id::CIC_SEED, seed)?;
        self.config_set(config_id::BOOT_MODE, BOOT_MODE_DIRECT_ROM)
    }

    async fn send_data(&mut self, kind: UsbDataType, payload: &[u8], _protocol: ProtocolVer) -> DeviceResult<()> {
        self.execute(cmd::USB_WRITE, u8::from(kind) as u32, payload.len() as u32, payload)
            .map(|_| ())
    }

    async fn receive_data(&mut self, _protocol: ProtocolVer) -> DeviceResult<Option<Packet>> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }

        let port = self.port()?.as_mut();
        let available = port.bytes_to_read().map_err(|_| DeviceError::PollFail)?;
        if available == 0 {
            return Ok(None);
        }

        let mut tag = [0u8; 4];
        port.read_exact(&mut tag).map_err(read_error)?;
        if &tag[..3] != b"PKT" {
            log::warn!("Unexpected SC64 frame tag {} while polling", hex::encode(tag));
            return Err(DeviceError::Sc64CommFail);
        }
        match read_async_packet(port, tag[3])? {
            Some(data) => Packet::from_framed(&data).map(Some),
            None => Ok(None),
        }
    }
}

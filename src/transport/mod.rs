//! Capability interface the session drives, implemented once per flashcart
//! family. The session core never talks to a concrete link directly.

pub mod everdrive;
pub mod sc64;

pub use everdrive::EverDriveTransport;
pub use sc64::Sc64Transport;

use crate::device::{BootSettings, CartType, DeviceResult, ProtocolVer, UsbDataType};
use crate::protocol::Packet;

#[async_trait::async_trait]
pub trait Transport: Send {
    /// Family this transport drives
    fn cart_type(&self) -> CartType;

    /// Open the link and bring the device into a known state
    async fn open(&mut self) -> DeviceResult<()>;

    /// Release the link. Closing a closed transport is a no-op.
    async fn close(&mut self) -> DeviceResult<()>;

    fn is_open(&self) -> bool;

    /// Check the debug/data channel is usable
    async fn test_debug(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    fn max_rom_size(&self) -> u32 {
        self.cart_type().max_rom_size()
    }

    fn rom_padding(&self, size: u32) -> u32 {
        self.cart_type().rom_padding(size)
    }

    fn max_packet_size(&self) -> u32 {
        self.cart_type().max_packet_size()
    }

    /// Prepare the device to receive a ROM of `size` bytes
    async fn begin_upload(&mut self, size: u32, boot: &BootSettings) -> DeviceResult<()>;

    /// Write one chunk of ROM data at `offset`
    async fn write_rom(&mut self, offset: u32, chunk: &[u8]) -> DeviceResult<()>;

    /// Apply save/CIC settings and boot the uploaded image
    async fn finish_upload(&mut self, boot: &BootSettings) -> DeviceResult<()>;

    async fn send_data(&mut self, kind: UsbDataType, payload: &[u8], protocol: ProtocolVer) -> DeviceResult<()>;

    /// Non-blocking poll for one packet
    async fn receive_data(&mut self, protocol: ProtocolVer) -> DeviceResult<Option<Packet>>;
}

/// Locates a connected flashcart and hands back a transport for it
#[async_trait::async_trait]
pub trait DeviceProbe: Send {
    /// `preferred` narrows the search to one family unless it is `CartType::None`
    async fn find(&mut self, preferred: CartType) -> DeviceResult<Box<dyn Transport>>;
}

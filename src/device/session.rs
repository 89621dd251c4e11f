use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use super::cic::{detect_cic, RomByteOrder, BOOTCODE_END};
use super::{CartType, CicType, DeviceError, DeviceResult, ProtocolVer, SaveType, SessionConfig, UploadHandle, UsbDataType};
use crate::config::LinkSettings;
use crate::protocol::Packet;
use crate::transport::{DeviceProbe, Transport};

/// Lifecycle of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Found,
    Opened,
    Closed,
}

/// The single-owner state describing the targeted flashcart, its
/// configuration and its open link.
///
/// Configuration setters never touch the device; they take effect at the
/// next upload or data transfer.
pub struct Session {
    probe: Box<dyn DeviceProbe>,
    pub(super) transport: Option<Box<dyn Transport>>,
    state: SessionState,
    pub(super) config: SessionConfig,
    pub(super) upload: UploadHandle,
    pub(super) settings: LinkSettings,
}

impl Session {
    pub fn new(probe: Box<dyn DeviceProbe>) -> Self {
        Self::build(probe, LinkSettings::default())
    }

    /// Build a session with custom link settings. Upload chunks must be
    /// word-aligned and hold the whole bootcode; settings failing
    /// [`LinkSettings::validate`] are refused.
    pub fn with_settings(probe: Box<dyn DeviceProbe>, settings: LinkSettings) -> anyhow::Result<Self> {
        settings.validate()?;
        Ok(Self::build(probe, settings))
    }

    fn build(probe: Box<dyn DeviceProbe>, settings: LinkSettings) -> Self {
        Self {
            probe,
            transport: None,
            state: SessionState::Uninitialized,
            config: SessionConfig::default(),
            upload: UploadHandle::new(),
            settings,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Handle for cancelling or watching an upload from another task
    pub fn upload_handle(&self) -> UploadHandle {
        self.upload.clone()
    }

    /// Reset all session state. The protocol starts at `Version1` so older
    /// firmware keeps working; a heartbeat upgrades it later.
    pub async fn initialize(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close().await {
                log::warn!("Closing the previous link during initialize failed: {}", e);
            }
        }
        self.transport = None;
        self.config = SessionConfig::default();
        self.upload.reset();
        self.state = SessionState::Initialized;
        log::debug!("Session initialized");
    }

    /// Look for a connected flashcart. A cart type set beforehand narrows
    /// the search to that family.
    pub async fn find(&mut self) -> DeviceResult<()> {
        match self.state {
            SessionState::Uninitialized => return Err(DeviceError::NoDevices),
            SessionState::Opened => return Err(DeviceError::UsbBusy),
            _ => {}
        }

        let transport = self.probe.find(self.config.cart).await?;
        self.config.cart = transport.cart_type();
        log::info!("{} found", self.config.cart);
        self.transport = Some(transport);
        self.state = SessionState::Found;
        Ok(())
    }

    pub async fn open(&mut self) -> DeviceResult<()> {
        if self.state == SessionState::Opened {
            return Err(DeviceError::UsbBusy);
        }
        let transport = self.transport.as_mut().ok_or(DeviceError::CantOpen)?;
        transport.open().await?;
        self.state = SessionState::Opened;
        log::info!("{} opened", self.config.cart);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Opened && self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    /// Release the link. A session that is not open is left alone.
    pub async fn close(&mut self) -> DeviceResult<()> {
        if self.state != SessionState::Opened {
            return Ok(());
        }
        self.state = SessionState::Closed;
        match self.transport.as_mut() {
            Some(transport) => {
                let result = transport.close().await;
                match &result {
                    Ok(()) => log::info!("{} closed", self.config.cart),
                    Err(e) => log::error!("Closing {} failed: {}", self.config.cart, e),
                }
                result
            }
            None => Ok(()),
        }
    }

    pub async fn test_debug(&mut self) -> DeviceResult<()> {
        if !self.is_open() {
            return Err(DeviceError::ReadFail);
        }
        if !self.config.cart.supports_debug(self.config.cic) {
            return Err(DeviceError::CantDebug);
        }
        match self.transport.as_mut() {
            Some(transport) => transport.test_debug().await,
            None => Err(DeviceError::ReadFail),
        }
    }

    pub fn get_max_rom_size(&self) -> u32 {
        match &self.transport {
            Some(transport) => transport.max_rom_size(),
            None => self.config.cart.max_rom_size(),
        }
    }

    pub fn pad_rom_size(&self, size: u32) -> u32 {
        match &self.transport {
            Some(transport) => transport.rom_padding(size),
            None => self.config.cart.rom_padding(size),
        }
    }

    /// Record the ROM to upload. Only regular, readable files are accepted;
    /// on rejection the previous path is kept.
    pub fn set_rom(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let readable = std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
            && std::fs::File::open(path).is_ok();
        if !readable {
            log::warn!("{} is not a readable regular file", path.display());
            return false;
        }
        self.config.rom = Some(PathBuf::from(path));
        true
    }

    pub fn get_rom(&self) -> Option<&Path> {
        self.config.rom.as_deref()
    }

    pub fn set_cart(&mut self, cart: CartType) {
        self.config.cart = cart;
    }

    pub fn get_cart(&self) -> CartType {
        self.config.cart
    }

    /// Explicitly choose the CIC. `CicType::None` hands the choice back to
    /// auto-detection.
    pub fn set_cic(&mut self, cic: CicType) {
        self.config.cic = cic;
        self.config.cic_explicit = cic != CicType::None;
    }

    pub fn get_cic(&self) -> CicType {
        self.config.cic
    }

    /// Whether the caller chose the CIC, as opposed to detection
    pub fn explicit_cic(&self) -> bool {
        self.config.cic_explicit
    }

    pub fn set_save(&mut self, save: SaveType) {
        self.config.save = save;
    }

    pub fn get_save(&self) -> SaveType {
        self.config.save
    }

    pub fn set_protocol(&mut self, protocol: ProtocolVer) {
        self.config.protocol = protocol;
    }

    pub fn get_protocol(&self) -> ProtocolVer {
        self.config.protocol
    }

    /// Detect the CIC from the ROM recorded with `set_rom`, unless the caller
    /// chose one. Returns whether the session's CIC changed.
    pub async fn autodetect_cic(&mut self) -> DeviceResult<bool> {
        if self.config.cic_explicit {
            return Ok(false);
        }
        let path = self.config.rom.as_ref().ok_or(DeviceError::FileReadFail)?;
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            log::error!("Opening {} failed: {}", path.display(), e);
            DeviceError::FileReadFail
        })?;

        let mut head = Vec::with_capacity(BOOTCODE_END);
        (&mut file)
            .take(BOOTCODE_END as u64)
            .read_to_end(&mut head)
            .await
            .map_err(|_| DeviceError::FileReadFail)?;
        RomByteOrder::detect(&head).normalize(&mut head);

        let detected = detect_cic(&head);
        let changed = detected != self.config.cic;
        self.config.cic = detected;
        Ok(changed)
    }

    pub fn cancel_upload(&self) {
        self.upload.cancel();
    }

    pub fn upload_cancelled(&self) -> bool {
        self.upload.is_cancelled()
    }

    pub fn set_upload_progress(&self, fraction: f32) {
        self.upload.set_progress(fraction);
    }

    pub fn get_upload_progress(&self) -> f32 {
        self.upload.progress()
    }

    /// Send one typed packet to the console
    pub async fn send_data(&mut self, kind: UsbDataType, payload: &[u8]) -> DeviceResult<()> {
        if !self.is_open() {
            return Err(DeviceError::WriteFail);
        }
        let protocol = self.config.protocol;
        let transport = self.transport.as_mut().ok_or(DeviceError::WriteFail)?;
        if payload.len() > transport.max_packet_size() as usize {
            log::error!(
                "{} byte payload exceeds the {} byte packet limit",
                payload.len(),
                transport.max_packet_size()
            );
            return Err(DeviceError::DataTooBig);
        }
        transport.send_data(kind, payload, protocol).await
    }

    /// Poll for one packet. `Ok(None)` means nothing is pending.
    pub async fn receive_data(&mut self) -> DeviceResult<Option<Packet>> {
        if !self.is_open() {
            return Err(DeviceError::ReadFail);
        }
        let protocol = self.config.protocol;
        let transport = self.transport.as_mut().ok_or(DeviceError::ReadFail)?;
        transport.receive_data(protocol).await
    }
}

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::cic::{detect_cic, RomByteOrder};
use super::{BootSettings, CicType, DeviceError, DeviceResult, Session};

#[derive(Debug, Default)]
struct UploadState {
    cancelled: AtomicBool,
    // f32 bits
    progress: AtomicU32,
}

/// Shared view of the upload cancellation flag and progress.
///
/// Clones observe the same state, so a UI task can cancel while
/// [`Session::send_rom`] runs elsewhere.
#[derive(Debug, Clone, Default)]
pub struct UploadHandle {
    inner: Arc<UploadState>,
}

impl UploadHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Clamped into `[0.0, 1.0]`; NaN reads as zero
    pub fn set_progress(&self, fraction: f32) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.inner.progress.store(fraction.to_bits(), Ordering::Relaxed);
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.inner.progress.load(Ordering::Relaxed))
    }

    pub(crate) fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.set_progress(0.0);
    }
}

/// Fill `buf` from the reader, zero-filling whatever the reader runs short of.
/// Returns how many bytes came from the reader.
async fn read_chunk<R>(rom: &mut R, buf: &mut [u8]) -> DeviceResult<usize>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = rom.read(&mut buf[filled..]).await.map_err(|e| {
            log::error!("ROM read failed: {}", e);
            DeviceError::FileReadFail
        })?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf[filled..].fill(0);
    Ok(filled)
}

impl Session {
    /// Stream `size` bytes of ROM from a caller-owned reader to the device
    /// and boot it.
    ///
    /// The reader is never closed here. If it ends before `size` bytes the
    /// rest is zero-filled, so callers can pass a size from
    /// [`Session::pad_rom_size`]. When the CIC was not set explicitly it is
    /// detected from the bootcode before the boot sequence is issued.
    pub async fn send_rom<R>(&mut self, rom: &mut R, size: u32) -> DeviceResult<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        if !self.is_open() {
            return Err(DeviceError::WriteFail);
        }
        if size == 0 {
            log::error!("Refusing to upload an empty ROM");
            return Err(DeviceError::FileReadFail);
        }
        let max = self.get_max_rom_size();
        if size > max {
            log::error!("ROM of {} bytes exceeds the {} byte limit of {}", size, max, self.config.cart);
            return Err(DeviceError::DataTooBig);
        }

        self.upload.reset();
        let chunk_size = self.settings.upload_chunk_size as usize;
        let mut chunk = vec![0u8; chunk_size.min(size as usize)];
        read_chunk(rom, &mut chunk).await?;
        let order = RomByteOrder::detect(&chunk);
        if order != RomByteOrder::BigEndian {
            log::debug!("ROM stored as {:?}, converting to big-endian", order);
        }
        order.normalize(&mut chunk);

        if !self.config.cic_explicit {
            let detected = detect_cic(&chunk);
            log::info!("Autodetected CIC {}", detected);
            self.config.cic = detected;
        }
        if self.config.cart.is_64drive() && self.config.cic == CicType::Cic8303 {
            return Err(DeviceError::Cic8303Usb);
        }

        let boot = BootSettings {
            cic: self.config.cic,
            save: self.config.save,
            protocol: self.config.protocol,
        };
        let transport = self.transport.as_mut().ok_or(DeviceError::WriteFail)?;
        log::info!("Uploading {} bytes to {}", size, self.config.cart);
        transport.begin_upload(size, &boot).await?;

        let mut offset = 0u32;
        loop {
            if self.upload.is_cancelled() {
                log::warn!("Upload cancelled at {} of {} bytes", offset, size);
                return Err(DeviceError::UploadCancelled);
            }
            transport.write_rom(offset, &chunk).await?;
            offset += chunk.len() as u32;
            self.upload.set_progress(offset as f32 / size as f32);
            if offset >= size {
                break;
            }

            let next = chunk_size.min((size - offset) as usize);
            chunk.truncate(next);
            read_chunk(rom, &mut chunk).await?;
            order.normalize(&mut chunk);
        }

        if self.upload.is_cancelled() {
            log::warn!("Upload cancelled before boot");
            return Err(DeviceError::UploadCancelled);
        }
        transport.finish_upload(&boot).await?;
        self.upload.set_progress(1.0);
        log::info!("Upload complete");
        Ok(())
    }
}

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::device::cic::BOOTCODE_END;

/// Tuning knobs for links and sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Read/write timeout configured on the serial port at open
    pub serial_timeout_ms: u64,
    /// How long a reset handshake may take before the device is declared stuck
    pub reset_timeout_ms: u64,
    /// Bytes sent per upload step; cancellation is checked between steps
    pub upload_chunk_size: u32,
    /// Pause between polls while waiting for an inbound packet
    pub poll_interval_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            serial_timeout_ms: 1000,
            reset_timeout_ms: 1000,
            upload_chunk_size: 256 * 1024,
            poll_interval_ms: 10,
        }
    }
}

impl LinkSettings {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading link settings from {}", path.display()))?;
        let settings: LinkSettings = serde_json::from_str(&text)
            .with_context(|| format!("parsing link settings in {}", path.display()))?;
        settings.validate()?;
        log::debug!("Loaded link settings from {}: {:?}", path.display(), settings);
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("writing link settings to {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // the first chunk must hold the whole bootcode for CIC detection
        ensure!(
            self.upload_chunk_size as usize >= BOOTCODE_END,
            "upload_chunk_size must be at least {} bytes, got {}",
            BOOTCODE_END,
            self.upload_chunk_size
        );
        ensure!(
            self.upload_chunk_size % 4 == 0,
            "upload_chunk_size must be a multiple of 4, got {}",
            self.upload_chunk_size
        );
        ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be non-zero");
        Ok(())
    }

    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        LinkSettings::default().validate().unwrap();
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: LinkSettings = serde_json::from_str(r#"{ "poll_interval_ms": 25 }"#).unwrap();
        assert_eq!(settings.poll_interval_ms, 25);
        assert_eq!(settings.upload_chunk_size, LinkSettings::default().upload_chunk_size);
    }

    #[test]
    fn tiny_chunks_are_rejected() {
        let settings = LinkSettings { upload_chunk_size: 512, ..Default::default() };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("upload_chunk_size"));
    }

    #[test]
    fn load_reports_the_path() {
        let path = std::env::temp_dir().join("unflink-missing-settings.json");
        let err = LinkSettings::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("unflink-missing-settings.json"));
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("unflink-settings-{}.json", std::process::id()));
        let settings = LinkSettings { serial_timeout_ms: 250, ..Default::default() };
        settings.save(&path).unwrap();
        assert_eq!(LinkSettings::load(&path).unwrap(), settings);
        let _ = std::fs::remove_file(&path);
    }
}

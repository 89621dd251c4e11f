//! Fail-fast wrappers over [`Session`] for callers that would rather
//! propagate errors with `?` than inspect each result.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;

use crate::device::{CicChoice, CicType, DeviceError, DeviceResult, ProtocolVer, SaveType, Session, UsbDataType};
use crate::protocol::{negotiate, HeartbeatError, Packet};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("{} (code {}): {}", .0.name(), .0.code(), .0)]
    Device(#[from] DeviceError),

    #[error("{}: {}", .0.name(), .0)]
    Heartbeat(#[from] HeartbeatError),

    #[error("ROM path {0} is not a readable regular file")]
    RomPath(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// The device error behind this failure, if there is one
    pub fn device_error(&self) -> Option<DeviceError> {
        match self {
            LinkError::Device(e) => Some(*e),
            _ => None,
        }
    }
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

pub fn ensure_ok<T>(result: DeviceResult<T>) -> LinkResult<T> {
    result.map_err(LinkError::Device)
}

/// Initialize the session, select `protocol` and find a flashcart.
///
/// Initialization resets the protocol, so it is applied afterwards.
/// Older debug libraries expect `ProtocolVer::Version1`; a heartbeat
/// upgrades the session once the console announces a newer revision.
pub async fn init(session: &mut Session, protocol: ProtocolVer) -> LinkResult<()> {
    session.initialize().await;
    session.set_protocol(protocol);
    ensure_ok(session.find().await)
}

/// Run `f` with the session open, closing it afterwards whether `f`
/// succeeded or not. A session that is already open stays open.
pub async fn with_open<F, R>(session: &mut Session, f: F) -> LinkResult<R>
where
    F: FnOnce(&mut Session) -> Pin<Box<dyn Future<Output = LinkResult<R>> + Send + '_>>,
    R: Send,
{
    if session.is_open() {
        return f(session).await;
    }

    ensure_ok(session.open().await)?;
    let result = f(session).await;
    let closed = session.close().await;
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(LinkError::Device(e)),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                log::error!("Close after a failed operation also failed: {}", close_err);
            }
            Err(e)
        }
    }
}

/// Configure and upload the ROM at `path`.
///
/// The file is opened before any session setting changes, so a bad path
/// leaves the session as it was. `save` of `None` keeps the current save
/// type.
pub async fn send_rom_from_path(
    session: &mut Session,
    path: impl AsRef<Path>,
    cic: CicChoice,
    save: Option<SaveType>,
) -> LinkResult<()> {
    let path = path.as_ref();
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let size = u32::try_from(size).map_err(|_| LinkError::Device(DeviceError::DataTooBig))?;

    if !session.set_rom(path) {
        return Err(LinkError::RomPath(path.to_path_buf()));
    }
    match cic {
        CicChoice::Auto => session.set_cic(CicType::None),
        CicChoice::Explicit(cic) => session.set_cic(cic),
        CicChoice::Unset => {}
    }
    if let Some(save) = save {
        session.set_save(save);
    }

    let padded = session.pad_rom_size(size);
    log::debug!("Sending {} ({} bytes, {} padded)", path.display(), size, padded);
    ensure_ok(session.send_rom(&mut file, padded).await)?;
    if cic == CicChoice::Auto {
        log::debug!("Autodetected CIC: {}", session.get_cic());
    }
    Ok(())
}

/// Poll once for a packet. With `handle_heartbeat` set, heartbeats are
/// applied to the session and `Ok(None)` is returned in their place.
pub async fn receive(session: &mut Session, handle_heartbeat: bool) -> LinkResult<Option<Packet>> {
    let Some(packet) = ensure_ok(session.receive_data().await)? else {
        return Ok(None);
    };
    if handle_heartbeat && packet.kind == UsbDataType::Heartbeat {
        log::info!("Handling heartbeat from receive");
        negotiate(session, &packet.body)?;
        return Ok(None);
    }
    Ok(Some(packet))
}

/// Poll until a non-heartbeat packet arrives, sleeping the configured poll
/// interval between attempts. `None` as the timeout waits forever.
pub async fn wait_for_packet(session: &mut Session, timeout: Option<Duration>) -> LinkResult<Packet> {
    let started = Instant::now();
    let interval = session.settings().poll_interval();
    loop {
        if let Some(packet) = receive(session, true).await? {
            return Ok(packet);
        }
        if timeout.is_some_and(|t| started.elapsed() >= t) {
            return Err(LinkError::Device(DeviceError::Timeout));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Send `text` as a NUL-terminated text packet
pub async fn send_text(session: &mut Session, text: &str) -> LinkResult<()> {
    let mut payload = Vec::with_capacity(text.len() + 1);
    payload.extend_from_slice(text.as_bytes());
    payload.push(0);
    ensure_ok(session.send_data(UsbDataType::Text, &payload).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_failures_carry_name_and_code() {
        let err = ensure_ok::<()>(Err(DeviceError::Timeout)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("DEVICEERR_TIMEOUT (code 27)"), "{}", msg);
        assert_eq!(err.device_error(), Some(DeviceError::Timeout));
    }

    #[test]
    fn heartbeat_failures_carry_name() {
        let err = LinkError::from(HeartbeatError::UnsupportedVersion(2));
        assert!(err.to_string().starts_with("UNSUPPORTED_HEARTBEAT"));
        assert_eq!(err.device_error(), None);
    }
}

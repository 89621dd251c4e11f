use crate::device::{ProtocolVer, Session};

/// Heartbeat format revision this crate understands
pub const HEARTBEAT_VERSION: u16 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    #[error("Malformed heartbeat received ({len} bytes, at least 4 expected)")]
    Malformed { len: usize },

    #[error("USB protocol {0} unsupported. Your tool is probably out of date, update it")]
    UnsupportedProtocol(u16),

    #[error("Heartbeat version {0} unsupported. Your tool is probably out of date, update it")]
    UnsupportedVersion(u16),

    #[error("USB protocol {0} does not name a known protocol revision")]
    UnknownProtocol(u16),
}

impl HeartbeatError {
    pub fn name(&self) -> &'static str {
        match self {
            HeartbeatError::Malformed { .. } => "MALFORMED_HEARTBEAT",
            HeartbeatError::UnsupportedProtocol(_) => "UNSUPPORTED_PROTOCOL",
            HeartbeatError::UnsupportedVersion(_) => "UNSUPPORTED_HEARTBEAT",
            HeartbeatError::UnknownProtocol(_) => "UNKNOWN_PROTOCOL",
        }
    }
}

/// Decoded heartbeat body: `[proto_hi, proto_lo, hb_hi, hb_lo, ..]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub protocol: u16,
    pub version: u16,
}

impl Heartbeat {
    pub fn decode(body: &[u8]) -> Result<Self, HeartbeatError> {
        match body {
            [p_hi, p_lo, v_hi, v_lo, ..] => Ok(Self {
                protocol: u16::from_be_bytes([*p_hi, *p_lo]),
                version: u16::from_be_bytes([*v_hi, *v_lo]),
            }),
            _ => Err(HeartbeatError::Malformed { len: body.len() }),
        }
    }

    pub fn encode(&self) -> [u8; 4] {
        let [p_hi, p_lo] = self.protocol.to_be_bytes();
        let [v_hi, v_lo] = self.version.to_be_bytes();
        [p_hi, p_lo, v_hi, v_lo]
    }

    /// Check the announced revisions against what this crate speaks
    pub fn validate(&self) -> Result<ProtocolVer, HeartbeatError> {
        if self.protocol > ProtocolVer::LATEST as u16 {
            return Err(HeartbeatError::UnsupportedProtocol(self.protocol));
        }
        if self.version != HEARTBEAT_VERSION {
            return Err(HeartbeatError::UnsupportedVersion(self.version));
        }
        ProtocolVer::try_from(self.protocol)
            .map_err(|_| HeartbeatError::UnknownProtocol(self.protocol))
    }
}

/// Apply a heartbeat body to the session. The session's protocol is left
/// untouched unless every check passes.
pub fn negotiate(session: &mut Session, body: &[u8]) -> Result<ProtocolVer, HeartbeatError> {
    let heartbeat = Heartbeat::decode(body)?;
    log::debug!(
        "Handling heartbeat: protocol={} heartbeat_version={}",
        heartbeat.protocol,
        heartbeat.version
    );

    let protocol = heartbeat.validate()?;
    if session.get_protocol() != protocol {
        log::info!("Protocol version set to {} from heartbeat", protocol);
    }
    session.set_protocol(protocol);
    Ok(protocol)
}

use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, DeviceResult, UsbDataType, MAX_HEADER_SIZE};
use crate::serial::{read_error, PortIo};

/// Marker opening a DMA envelope
pub const ENVELOPE_START: &[u8; 4] = b"DMA@";
/// Completion signature closing a DMA envelope
pub const ENVELOPE_END: &[u8; 4] = b"CMPH";

/// 32-bit data header: type tag in the high byte, body size in the low 24 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHeader {
    pub kind: UsbDataType,
    pub size: u32,
}

impl DataHeader {
    pub fn new(kind: UsbDataType, size: usize) -> DeviceResult<Self> {
        let size = u32::try_from(size).map_err(|_| DeviceError::DataTooBig)?;
        if size > MAX_HEADER_SIZE {
            return Err(DeviceError::DataTooBig);
        }
        Ok(Self { kind, size })
    }

    pub fn encode(&self) -> u32 {
        ((self.kind as u32) << 24) | (self.size & MAX_HEADER_SIZE)
    }

    pub fn decode(raw: u32) -> DeviceResult<Self> {
        let tag = (raw >> 24) as u8;
        let kind = UsbDataType::try_from(tag).map_err(|_| {
            log::warn!("Unknown data type tag 0x{:02X} in header 0x{:08X}", tag, raw);
            DeviceError::BadPackSize
        })?;
        Ok(Self { kind, size: raw & MAX_HEADER_SIZE })
    }

    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.encode().to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> DeviceResult<Self> {
        Self::decode(u32::from_be_bytes(bytes))
    }
}

/// One received application packet. The body is owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub kind: UsbDataType,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(kind: UsbDataType, body: Vec<u8>) -> Self {
        Self { kind, body }
    }

    /// Split a header-prefixed buffer into a packet. The header's size must
    /// match the bytes that follow it exactly.
    pub fn from_framed(data: &[u8]) -> DeviceResult<Self> {
        let raw: [u8; 4] = data
            .get(..4)
            .and_then(|h| h.try_into().ok())
            .ok_or(DeviceError::ReadPackSizeFail)?;
        let header = DataHeader::from_be_bytes(raw)?;
        let body = &data[4..];
        if body.len() != header.size as usize {
            log::warn!(
                "Header announces {} bytes but {} followed",
                header.size,
                body.len()
            );
            return Err(DeviceError::BadPackSize);
        }
        Ok(Self::new(header.kind, body.to_vec()))
    }

    pub fn header(&self) -> DataHeader {
        DataHeader { kind: self.kind, size: self.body.len() as u32 }
    }

    /// Header followed by the body, as carried on the wire
    pub fn to_framed(&self) -> DeviceResult<Vec<u8>> {
        let header = DataHeader::new(self.kind, self.body.len())?;
        let mut out = Vec::with_capacity(4 + self.body.len());
        out.extend_from_slice(&header.to_be_bytes());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Text body with the trailing NUL terminator stripped
    pub fn text(&self) -> Option<String> {
        if self.kind != UsbDataType::Text {
            return None;
        }
        let end = self.body.iter().position(|&b| b == 0).unwrap_or(self.body.len());
        Some(String::from_utf8_lossy(&self.body[..end]).into_owned())
    }
}

/// Wrap a payload as `DMA@` + header + payload + `CMPH`, zero-filled up to
/// a multiple of `alignment` bytes.
pub fn encode_envelope(kind: UsbDataType, payload: &[u8], alignment: usize) -> DeviceResult<Vec<u8>> {
    let header = DataHeader::new(kind, payload.len())?;
    let mut out = Vec::with_capacity(12 + payload.len() + alignment);
    out.extend_from_slice(ENVELOPE_START);
    out.extend_from_slice(&header.to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(ENVELOPE_END);
    if alignment > 1 {
        let padded = out.len().div_ceil(alignment) * alignment;
        out.resize(padded, 0);
    }
    Ok(out)
}

/// Read one DMA envelope from the port.
///
/// The body is followed by zero padding up to `body_alignment` bytes before
/// the completion signature.
pub fn read_envelope(port: &mut dyn PortIo, body_alignment: usize, max_size: u32) -> DeviceResult<Packet> {
    let mut head = [0u8; 8];
    port.read_exact(&mut head).map_err(|e| {
        log::debug!("Envelope head read failed: {}", e);
        DeviceError::ReadPackSizeFail
    })?;
    if &head[..4] != ENVELOPE_START {
        log::warn!("Unexpected envelope start {}", hex::encode(&head[..4]));
        return Err(DeviceError::ReadPackSizeFail);
    }

    let header = DataHeader::from_be_bytes([head[4], head[5], head[6], head[7]])?;
    if header.size > max_size {
        return Err(DeviceError::BadPackSize);
    }

    let size = header.size as usize;
    let padded = if body_alignment > 1 {
        size.div_ceil(body_alignment) * body_alignment
    } else {
        size
    };
    let mut body = vec![0u8; padded];
    port.read_exact(&mut body).map_err(read_error)?;
    body.truncate(size);

    let mut tail = [0u8; 4];
    port.read_exact(&mut tail).map_err(|e| {
        log::debug!("Completion signature read failed: {}", e);
        DeviceError::ReadCompSigFail
    })?;
    if &tail != ENVELOPE_END {
        log::warn!("Bad completion signature {}", hex::encode(tail));
        return Err(DeviceError::NoCompSig);
    }

    Ok(Packet::new(header.kind, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_packs_type_into_high_byte() {
        let header = DataHeader::new(UsbDataType::Text, 0x1234).unwrap();
        assert_eq!(header.encode(), 0x0100_1234);
        assert_eq!(header.to_be_bytes(), [0x01, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn oversized_payload_is_refused() {
        assert_eq!(
            DataHeader::new(UsbDataType::RawBinary, 0x0100_0000),
            Err(DeviceError::DataTooBig)
        );
    }

    #[test]
    fn unknown_tag_is_bad_pack_size() {
        assert_eq!(DataHeader::decode(0x0700_0004), Err(DeviceError::BadPackSize));
    }

    #[test]
    fn framed_size_must_match_body() {
        let bytes = [0x02, 0x00, 0x00, 0x03, 0xAA, 0xBB];
        assert_eq!(Packet::from_framed(&bytes), Err(DeviceError::BadPackSize));
        assert_eq!(Packet::from_framed(&bytes[..2]), Err(DeviceError::ReadPackSizeFail));
    }

    #[test]
    fn envelope_is_aligned() {
        let out = encode_envelope(UsbDataType::Text, b"hi", 512).unwrap();
        assert_eq!(out.len(), 512);
        assert_eq!(&out[..4], ENVELOPE_START);
        assert_eq!(&out[4..8], &[0x01, 0x00, 0x00, 0x02]);
        assert_eq!(&out[8..10], b"hi");
        assert_eq!(&out[10..14], ENVELOPE_END);
        assert!(out[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn text_stops_at_terminator() {
        let packet = Packet::new(UsbDataType::Text, b"hello\0junk".to_vec());
        assert_eq!(packet.text().as_deref(), Some("hello"));
        assert_eq!(Packet::new(UsbDataType::RawBinary, vec![1]).text(), None);
    }
}

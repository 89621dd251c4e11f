//! Boot chip detection from the IPL3 bootcode stored in a ROM image.

use serde::{Deserialize, Serialize};

use super::CicType;

pub const BOOTCODE_START: usize = 0x40;
pub const BOOTCODE_END: usize = 0x1000;
const REGION_OFFSET: usize = 0x3E;

/// Byte order a ROM dump was stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RomByteOrder {
    /// `.z64`, the console's native order
    BigEndian,
    /// `.v64`, halfwords swapped
    ByteSwapped,
    /// `.n64`, words reversed
    LittleEndian,
    Unknown,
}

impl RomByteOrder {
    pub fn detect(rom: &[u8]) -> Self {
        match rom.get(..4) {
            Some([0x80, 0x37, 0x12, 0x40]) => RomByteOrder::BigEndian,
            Some([0x37, 0x80, 0x40, 0x12]) => RomByteOrder::ByteSwapped,
            Some([0x40, 0x12, 0x37, 0x80]) => RomByteOrder::LittleEndian,
            _ => RomByteOrder::Unknown,
        }
    }

    /// Rewrite `data` into big-endian order. Trailing bytes that do not fill
    /// a whole word are left as they are.
    pub fn normalize(self, data: &mut [u8]) {
        match self {
            RomByteOrder::ByteSwapped => data.chunks_exact_mut(2).for_each(|h| h.swap(0, 1)),
            RomByteOrder::LittleEndian => data.chunks_exact_mut(4).for_each(|w| w.reverse()),
            RomByteOrder::BigEndian | RomByteOrder::Unknown => {}
        }
    }
}

/// Match a bootcode CRC32 to a CIC. `region` is the country code byte of
/// the ROM header and separates the NTSC and PAL 6102/7101 pair.
pub fn cic_from_crc(crc: u32, region: u8) -> Option<CicType> {
    let cic = match crc {
        0x6170_A4A1 => CicType::Cic6101,
        0x90BB_6CB5 if is_pal(region) => CicType::Cic7101,
        0x90BB_6CB5 => CicType::Cic6102,
        0x009E_9EA3 => CicType::Cic7102,
        0x0B05_0EE0 => CicType::X103,
        0x98BC_2C86 => CicType::X105,
        0xACC8_580A => CicType::X106,
        0x0E01_8159 => CicType::Cic8303,
        _ => return None,
    };
    Some(cic)
}

fn is_pal(region: u8) -> bool {
    matches!(region, b'D' | b'F' | b'I' | b'P' | b'S' | b'U' | b'X' | b'Y')
}

/// Detect the CIC of a big-endian ROM image.
///
/// Unknown bootcode falls back to 6102, which nearly every homebrew ROM
/// uses. Images too short to hold the bootcode also get 6102.
pub fn detect_cic(rom: &[u8]) -> CicType {
    let Some(bootcode) = rom.get(BOOTCODE_START..BOOTCODE_END) else {
        log::warn!("ROM too short for CIC detection ({} bytes)", rom.len());
        return CicType::Cic6102;
    };

    let crc = crc32fast::hash(bootcode);
    let region = rom[REGION_OFFSET];
    match cic_from_crc(crc, region) {
        Some(cic) => cic,
        None => {
            log::debug!("Unknown bootcode CRC 0x{:08X}, assuming 6102", crc);
            CicType::Cic6102
        }
    }
}

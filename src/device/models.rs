use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const MIB: u32 = 1024 * 1024;

/// Largest body the 24-bit size field of a data header can describe.
pub const MAX_HEADER_SIZE: u32 = 0x00FF_FFFF;

/// Raised when an integer does not name a variant of one of the device enums
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: i32,
}

/// Supported flashcart families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum CartType {
    #[default]
    None = 0,
    SixtyFourDriveV1 = 1,
    SixtyFourDriveV2 = 2,
    EverDrive = 3,
    Sc64 = 4,
}

impl CartType {
    pub fn is_64drive(self) -> bool {
        matches!(self, CartType::SixtyFourDriveV1 | CartType::SixtyFourDriveV2)
    }

    /// Largest ROM image the family accepts, in bytes
    pub fn max_rom_size(self) -> u32 {
        match self {
            CartType::None => 0,
            CartType::SixtyFourDriveV1 => 64 * MIB,
            CartType::SixtyFourDriveV2 => 240 * MIB,
            CartType::EverDrive => 64 * MIB,
            CartType::Sc64 => 64 * MIB,
        }
    }

    /// Size a ROM of `size` bytes must be padded to before upload
    pub fn rom_padding(self, size: u32) -> u32 {
        match self {
            CartType::None => size,
            CartType::SixtyFourDriveV1 | CartType::SixtyFourDriveV2 => align_up(size, 512),
            // EverDrive OS refuses images under 2 MiB
            CartType::EverDrive => align_up(size, 512).max(2 * MIB),
            CartType::Sc64 => align_up(size, 4),
        }
    }

    /// Largest payload a single data packet may carry
    pub fn max_packet_size(self) -> u32 {
        if self.is_64drive() {
            8 * MIB
        } else {
            MAX_HEADER_SIZE
        }
    }

    pub fn supports_debug(self, cic: CicType) -> bool {
        !(self.is_64drive() && cic == CicType::X103)
    }
}

fn align_up(size: u32, alignment: u32) -> u32 {
    size.div_ceil(alignment).saturating_mul(alignment)
}

impl TryFrom<i32> for CartType {
    type Error = UnknownValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CartType::None),
            1 => Ok(CartType::SixtyFourDriveV1),
            2 => Ok(CartType::SixtyFourDriveV2),
            3 => Ok(CartType::EverDrive),
            4 => Ok(CartType::Sc64),
            _ => Err(UnknownValue { kind: "cart type", value }),
        }
    }
}

impl fmt::Display for CartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartType::None => write!(f, "none"),
            CartType::SixtyFourDriveV1 => write!(f, "64drive HW1"),
            CartType::SixtyFourDriveV2 => write!(f, "64drive HW2"),
            CartType::EverDrive => write!(f, "EverDrive"),
            CartType::Sc64 => write!(f, "SummerCart64"),
        }
    }
}

/// Boot chip (CIC) identity the flashcart should emulate.
///
/// `None` means the value has not been decided yet; it is filled in by
/// auto-detection from the ROM bootcode at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum CicType {
    #[default]
    None = -1,
    Cic6101 = 0,
    Cic6102 = 1,
    Cic7101 = 2,
    Cic7102 = 3,
    X103 = 4,
    X105 = 5,
    X106 = 6,
    Cic5101 = 7,
    Cic8303 = 8,
}

impl CicType {
    /// IPL seed byte the boot chip hands to the bootcode
    pub fn seed(self) -> Option<u8> {
        match self {
            CicType::None => None,
            CicType::Cic6101 | CicType::Cic6102 | CicType::Cic7101 | CicType::Cic7102 => Some(0x3F),
            CicType::X103 => Some(0x78),
            CicType::X105 => Some(0x91),
            CicType::X106 => Some(0x85),
            CicType::Cic5101 => Some(0xAC),
            CicType::Cic8303 => Some(0xDD),
        }
    }
}

impl TryFrom<i32> for CicType {
    type Error = UnknownValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(CicType::None),
            0 => Ok(CicType::Cic6101),
            1 => Ok(CicType::Cic6102),
            2 => Ok(CicType::Cic7101),
            3 => Ok(CicType::Cic7102),
            4 => Ok(CicType::X103),
            5 => Ok(CicType::X105),
            6 => Ok(CicType::X106),
            7 => Ok(CicType::Cic5101),
            8 => Ok(CicType::Cic8303),
            _ => Err(UnknownValue { kind: "CIC type", value }),
        }
    }
}

impl fmt::Display for CicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CicType::None => "none",
            CicType::Cic6101 => "6101",
            CicType::Cic6102 => "6102",
            CicType::Cic7101 => "7101",
            CicType::Cic7102 => "7102",
            CicType::X103 => "X103",
            CicType::X105 => "X105",
            CicType::X106 => "X106",
            CicType::Cic5101 => "5101",
            CicType::Cic8303 => "8303",
        };
        f.write_str(name)
    }
}

/// Save memory the flashcart should back the ROM with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum SaveType {
    #[default]
    None = 0,
    Eeprom4k = 1,
    Eeprom16k = 2,
    Sram256 = 3,
    FlashRam = 4,
    Sram768 = 5,
    FlashRamPokemon = 6,
}

impl TryFrom<i32> for SaveType {
    type Error = UnknownValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SaveType::None),
            1 => Ok(SaveType::Eeprom4k),
            2 => Ok(SaveType::Eeprom16k),
            3 => Ok(SaveType::Sram256),
            4 => Ok(SaveType::FlashRam),
            5 => Ok(SaveType::Sram768),
            6 => Ok(SaveType::FlashRamPokemon),
            _ => Err(UnknownValue { kind: "save type", value }),
        }
    }
}

impl fmt::Display for SaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveType::None => "none",
            SaveType::Eeprom4k => "EEPROM 4K",
            SaveType::Eeprom16k => "EEPROM 16K",
            SaveType::Sram256 => "SRAM 256K",
            SaveType::FlashRam => "FlashRAM",
            SaveType::Sram768 => "SRAM 768K",
            SaveType::FlashRamPokemon => "FlashRAM (Pokemon Stadium 2)",
        };
        f.write_str(name)
    }
}

/// Application-layer packet kinds; the value is the header's type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UsbDataType {
    Text = 0x01,
    RawBinary = 0x02,
    Header = 0x03,
    Screenshot = 0x04,
    Heartbeat = 0x05,
}

impl TryFrom<u8> for UsbDataType {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(UsbDataType::Text),
            0x02 => Ok(UsbDataType::RawBinary),
            0x03 => Ok(UsbDataType::Header),
            0x04 => Ok(UsbDataType::Screenshot),
            0x05 => Ok(UsbDataType::Heartbeat),
            _ => Err(UnknownValue { kind: "data type", value: value as i32 }),
        }
    }
}

impl From<UsbDataType> for u8 {
    fn from(kind: UsbDataType) -> u8 {
        kind as u8
    }
}

/// USB protocol revision spoken with the flashcart's debug library
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u16)]
pub enum ProtocolVer {
    #[default]
    Version1 = 0x00,
    Version2 = 0x02,
}

impl ProtocolVer {
    /// Newest revision this crate understands.
    pub const LATEST: ProtocolVer = ProtocolVer::Version2;
}

impl TryFrom<u16> for ProtocolVer {
    type Error = UnknownValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ProtocolVer::Version1),
            0x02 => Ok(ProtocolVer::Version2),
            _ => Err(UnknownValue { kind: "protocol version", value: value as i32 }),
        }
    }
}

impl fmt::Display for ProtocolVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVer::Version1 => write!(f, "v1"),
            ProtocolVer::Version2 => write!(f, "v2"),
        }
    }
}

/// How a helper call should treat the session's CIC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CicChoice {
    /// Detect from the ROM bootcode at upload time.
    #[default]
    Auto,
    Explicit(CicType),
    /// Leave whatever the session currently holds.
    Unset,
}

/// Per-session configuration consulted by the next upload or data transfer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub cart: CartType,
    pub cic: CicType,
    pub cic_explicit: bool,
    pub save: SaveType,
    pub rom: Option<PathBuf>,
    pub protocol: ProtocolVer,
}

/// Settings a transport needs to issue the boot sequence after an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSettings {
    pub cic: CicType,
    pub save: SaveType,
    pub protocol: ProtocolVer,
}

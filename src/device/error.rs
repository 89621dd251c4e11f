/// Every failure a device, transport or framing operation can report.
///
/// Numeric codes follow the native device library: `0` is success and is
/// never represented here (it is `Ok(())`), `1..=39` map onto the variants
/// in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DeviceError {
    #[error("No flashcart detected")]
    NotCart,

    #[error("USB device is busy")]
    UsbBusy,

    #[error("No USB devices found")]
    NoDevices,

    #[error("Failed to identify the flashcart")]
    CartFindFail,

    #[error("Unable to open the USB device")]
    CantOpen,

    #[error("Failed to read the ROM file")]
    FileReadFail,

    #[error("Unable to reset the USB device")]
    ResetFail,

    #[error("Unable to reset the USB port")]
    ResetPortFail,

    #[error("Unable to set the USB timeouts")]
    TimeoutSetFail,

    #[error("Unable to purge the USB buffers")]
    PurgeFail,

    #[error("USB read failed")]
    ReadFail,

    #[error("USB write failed")]
    WriteFail,

    #[error("USB write sent zero bytes")]
    WriteZero,

    #[error("Unable to close the USB device")]
    CloseFail,

    #[error("Unable to reset the bit mode")]
    BitModeFailReset,

    #[error("Unable to enable synchronous FIFO mode")]
    BitModeFailSyncFifo,

    #[error("Unable to set DTR")]
    SetDtrFail,

    #[error("Unable to clear DTR")]
    ClearDtrFail,

    #[error("Unable to read the modem status")]
    GetModemStatusFail,

    #[error("Device replied to a different command than the one sent")]
    TxReplyMismatch,

    #[error("Failed to read the completion signature")]
    ReadCompSigFail,

    #[error("Completion signature missing")]
    NoCompSig,

    #[error("Failed to read the packet size")]
    ReadPackSizeFail,

    #[error("Invalid packet size")]
    BadPackSize,

    #[error("Memory allocation failed")]
    MallocFail,

    #[error("Upload cancelled")]
    UploadCancelled,

    #[error("Device timed out")]
    Timeout,

    #[error("Polling the device failed")]
    PollFail,

    #[error("64Drive rejected the compare value")]
    BadCompare,

    #[error("64Drive cannot boot CIC 8303 ROMs over USB")]
    Cic8303Usb,

    #[error("64Drive cannot debug with this CIC")]
    CantDebug,

    #[error("64Drive reported a bad DMA transfer")]
    BadDma,

    #[error("Data too big for the device")]
    DataTooBig,

    #[error("SC64 command failed")]
    Sc64CmdFail,

    #[error("SC64 communication failed")]
    Sc64CommFail,

    #[error("SC64 controller did not release")]
    Sc64CtrlReleaseFail,

    #[error("SC64 controller did not reset")]
    Sc64CtrlResetFail,

    #[error("SC64 firmware check failed")]
    Sc64FirmwareCheckFail,

    #[error("SC64 firmware version unsupported, update the flashcart firmware")]
    Sc64FirmwareUnsupported,

    #[error("Unrecognized device status code {0}")]
    Unrecognized(i32),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

const CODED: [DeviceError; 39] = [
    DeviceError::NotCart,
    DeviceError::UsbBusy,
    DeviceError::NoDevices,
    DeviceError::CartFindFail,
    DeviceError::CantOpen,
    DeviceError::FileReadFail,
    DeviceError::ResetFail,
    DeviceError::ResetPortFail,
    DeviceError::TimeoutSetFail,
    DeviceError::PurgeFail,
    DeviceError::ReadFail,
    DeviceError::WriteFail,
    DeviceError::WriteZero,
    DeviceError::CloseFail,
    DeviceError::BitModeFailReset,
    DeviceError::BitModeFailSyncFifo,
    DeviceError::SetDtrFail,
    DeviceError::ClearDtrFail,
    DeviceError::GetModemStatusFail,
    DeviceError::TxReplyMismatch,
    DeviceError::ReadCompSigFail,
    DeviceError::NoCompSig,
    DeviceError::ReadPackSizeFail,
    DeviceError::BadPackSize,
    DeviceError::MallocFail,
    DeviceError::UploadCancelled,
    DeviceError::Timeout,
    DeviceError::PollFail,
    DeviceError::BadCompare,
    DeviceError::Cic8303Usb,
    DeviceError::CantDebug,
    DeviceError::BadDma,
    DeviceError::DataTooBig,
    DeviceError::Sc64CmdFail,
    DeviceError::Sc64CommFail,
    DeviceError::Sc64CtrlReleaseFail,
    DeviceError::Sc64CtrlResetFail,
    DeviceError::Sc64FirmwareCheckFail,
    DeviceError::Sc64FirmwareUnsupported,
];

/// Map a native status code onto the taxonomy. `0` is success.
pub fn classify(raw: i32) -> DeviceResult<()> {
    if raw == 0 {
        return Ok(());
    }
    Err(DeviceError::from_code(raw).unwrap_or(DeviceError::Unrecognized(raw)))
}

impl DeviceError {
    /// Look up the variant for a non-zero status code.
    pub fn from_code(code: i32) -> Option<Self> {
        let index = usize::try_from(code).ok()?.checked_sub(1)?;
        CODED.get(index).copied()
    }

    pub fn code(&self) -> i32 {
        match self {
            DeviceError::Unrecognized(raw) => *raw,
            known => CODED
                .iter()
                .position(|e| e == known)
                .map(|i| i as i32 + 1)
                .unwrap_or(-1),
        }
    }

    /// Symbolic name, as operators see it in logs and tool output.
    pub fn name(&self) -> &'static str {
        use DeviceError::*;
        match self {
            NotCart => "DEVICEERR_NOTCART",
            UsbBusy => "DEVICEERR_USBBUSY",
            NoDevices => "DEVICEERR_NODEVICES",
            CartFindFail => "DEVICEERR_CARTFINDFAIL",
            CantOpen => "DEVICEERR_CANTOPEN",
            FileReadFail => "DEVICEERR_FILEREADFAIL",
            ResetFail => "DEVICEERR_RESETFAIL",
            ResetPortFail => "DEVICEERR_RESETPORTFAIL",
            TimeoutSetFail => "DEVICEERR_TIMEOUTSETFAIL",
            PurgeFail => "DEVICEERR_PURGEFAIL",
            ReadFail => "DEVICEERR_READFAIL",
            WriteFail => "DEVICEERR_WRITEFAIL",
            WriteZero => "DEVICEERR_WRITEZERO",
            CloseFail => "DEVICEERR_CLOSEFAIL",
            BitModeFailReset => "DEVICEERR_BITMODEFAIL_RESET",
            BitModeFailSyncFifo => "DEVICEERR_BITMODEFAIL_SYNCFIFO",
            SetDtrFail => "DEVICEERR_SETDTRFAIL",
            ClearDtrFail => "DEVICEERR_CLEARDTRFAIL",
            GetModemStatusFail => "DEVICEERR_GETMODEMSTATUSFAIL",
            TxReplyMismatch => "DEVICEERR_TXREPLYMISMATCH",
            ReadCompSigFail => "DEVICEERR_READCOMPSIGFAIL",
            NoCompSig => "DEVICEERR_NOCOMPSIG",
            ReadPackSizeFail => "DEVICEERR_READPACKSIZEFAIL",
            BadPackSize => "DEVICEERR_BADPACKSIZE",
            MallocFail => "DEVICEERR_MALLOCFAIL",
            UploadCancelled => "DEVICEERR_UPLOADCANCELLED",
            Timeout => "DEVICEERR_TIMEOUT",
            PollFail => "DEVICEERR_POLLFAIL",
            BadCompare => "DEVICEERR_64D_BADCMP",
            Cic8303Usb => "DEVICEERR_64D_8303USB",
            CantDebug => "DEVICEERR_64D_CANTDEBUG",
            BadDma => "DEVICEERR_64D_BADDMA",
            DataTooBig => "DEVICEERR_64D_DATATOOBIG",
            Sc64CmdFail => "DEVICEERR_SC64_CMDFAIL",
            Sc64CommFail => "DEVICEERR_SC64_COMMFAIL",
            Sc64CtrlReleaseFail => "DEVICEERR_SC64_CTRLRELEASEFAIL",
            Sc64CtrlResetFail => "DEVICEERR_SC64_CTRLRESETFAIL",
            Sc64FirmwareCheckFail => "DEVICEERR_SC64_FIRMWARECHECKFAIL",
            Sc64FirmwareUnsupported => "DEVICEERR_SC64_FIRMWAREUNSUPPORTED",
            Unrecognized(_) => "DEVICEERR_UNRECOGNIZED",
        }
    }

    /// Conditions worth another attempt without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::Timeout | DeviceError::UsbBusy | DeviceError::NoDevices | DeviceError::PollFail
        )
    }

    /// The session should be considered unusable after these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::ResetFail | DeviceError::ResetPortFail | DeviceError::CloseFail
        )
    }
}

pub mod config;
pub mod device;
pub mod helpers;
pub mod protocol;
pub mod serial;
pub mod transport;

pub use config::LinkSettings;
pub use device::{
    classify, CartType, CicChoice, CicType, DeviceError, DeviceResult, ProtocolVer, SaveType, Session,
    SessionState, UploadHandle, UsbDataType,
};
pub use helpers::{LinkError, LinkResult};
pub use protocol::{DataHeader, HeartbeatError, Packet};
pub use serial::SerialProbe;

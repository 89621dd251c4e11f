pub mod cic;
pub mod error;
pub mod models;
pub mod session;
pub mod upload;

pub use error::{classify, DeviceError, DeviceResult};
pub use models::*;
pub use session::{Session, SessionState};
pub use upload::UploadHandle;

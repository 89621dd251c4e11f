//! Application-layer protocol riding on the flashcart USB link: typed data
//! packets behind a 32-bit header, and heartbeats announcing the protocol
//! revision the console side speaks.

pub mod framing;
pub mod heartbeat;

pub use framing::{encode_envelope, read_envelope, DataHeader, Packet, ENVELOPE_END, ENVELOPE_START};
pub use heartbeat::{negotiate, Heartbeat, HeartbeatError, HEARTBEAT_VERSION};

//! MySQL wire protocol (Pure, Sync).
//!
//! No async, no I/O: bytes in, bytes and state transitions out. The
//! [`crate::driver`] layer owns the socket and feeds these types.

pub mod auth;
pub mod capabilities;
pub mod error_code;
pub mod handshake;
pub mod lifecycle;
pub mod messages;
pub mod packet;
pub mod wire;

pub use capabilities::{CapabilityFlags, StatusFlags};
pub use lifecycle::{Action, Event, HandshakeParams, Lifecycle, SessionInfo};
pub use messages::{ColumnDefinition, OkPacket};
pub use packet::{Packet, PacketCodec};

//! The contract between the command queue and a single command exchange.
//!
//! A command is a small state machine. The queue activates it when it reaches
//! the head, then feeds it every inbound packet until it reports `done`.

use bytes::BytesMut;

use crate::error::{MySqlError, MySqlResult};
use crate::protocol::capabilities::{CapabilityFlags, StatusFlags};
use crate::protocol::messages::{encode_ping, parse_err, OkPacket};
use crate::protocol::packet::Packet;

use super::row::MySqlRow;

/// Error type a row handler may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-row callback, invoked on the connection task for every decoded row.
pub type RowHandler = Box<dyn FnMut(MySqlRow) -> Result<(), BoxError> + Send>;

/// Callback for the OK / end-of-result-set summary of each statement.
pub type MetadataHandler = Box<dyn FnMut(QueryMetadata) + Send>;

/// Summary the server sends after each statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMetadata {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: StatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl From<OkPacket> for QueryMetadata {
    fn from(ok: OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            status: ok.status,
            warnings: ok.warnings,
            info: ok.info,
        }
    }
}

/// What a command wants the connection to do next.
#[derive(Debug, Default)]
pub struct CommandState {
    /// Payloads to frame and write, in order.
    pub packets: Vec<BytesMut>,
    /// The exchange is complete; the command leaves the queue.
    pub done: bool,
    /// Reset the sequence counter before writing `packets` (a new top-level request).
    pub resequence: bool,
    /// The command's outcome when `done` is set. `None` means success.
    pub error: Option<MySqlError>,
}

impl CommandState {
    /// Keep reading.
    pub fn wait() -> Self {
        Self::default()
    }

    /// Write one payload that starts a new request.
    pub fn request(packet: BytesMut) -> Self {
        Self {
            packets: vec![packet],
            resequence: true,
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    pub fn failed(error: MySqlError) -> Self {
        Self {
            done: true,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Mark the state complete with an optional error, keeping any packets.
    pub fn finish(mut self, error: Option<MySqlError>) -> Self {
        self.done = true;
        self.error = error;
        self
    }
}

/// One request/response exchange driven by the queue.
///
/// Returning `Err` from either method is a protocol violation: the connection
/// fails the command with that error and closes.
pub trait Command: Send + 'static {
    fn name(&self) -> &'static str;

    /// Called once, when the command reaches the head of the queue.
    fn activate(&mut self, capabilities: CapabilityFlags) -> MySqlResult<CommandState>;

    /// Called for every inbound packet while the command is active.
    fn handle(&mut self, packet: Packet, capabilities: CapabilityFlags) -> MySqlResult<CommandState>;
}

/// Responds to COM_PING.
#[derive(Debug, Default)]
pub struct Ping;

impl Command for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn activate(&mut self, _capabilities: CapabilityFlags) -> MySqlResult<CommandState> {
        Ok(CommandState::request(encode_ping()))
    }

    fn handle(&mut self, packet: Packet, capabilities: CapabilityFlags) -> MySqlResult<CommandState> {
        match packet.header() {
            Some(0x00) => Ok(CommandState::done()),
            Some(0xff) => Ok(CommandState::failed(server_error(&packet, capabilities)?)),
            _ => Err(MySqlError::Protocol("unexpected response to COM_PING".into())),
        }
    }
}

/// Decode an ERR packet into the error a command completes with.
pub(crate) fn server_error(packet: &Packet, capabilities: CapabilityFlags) -> MySqlResult<MySqlError> {
    Ok(parse_err(&packet.payload, capabilities)?.into_error())
}

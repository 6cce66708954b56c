//! FIFO command queue.
//!
//! Pure bookkeeping: holds submitted commands with their completion channels,
//! routes inbound packets to the head, and returns what must be written next.
//! Exactly one command is active at a time; the next one is activated in the
//! same step that completes the previous.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::command::Command;
use crate::error::{MySqlError, MySqlResult};
use crate::protocol::capabilities::CapabilityFlags;
use crate::protocol::messages::{is_progress_report, parse_err};
use crate::protocol::packet::Packet;

/// Where a command's outcome is delivered.
pub type Completion = oneshot::Sender<MySqlResult<()>>;

/// Payloads to write, and whether to reset the sequence counter first.
#[derive(Debug)]
pub struct Outbound {
    pub packets: Vec<BytesMut>,
    pub resequence: bool,
}

struct Entry {
    command: Box<dyn Command>,
    completion: Completion,
}

#[derive(Default)]
pub struct CommandQueue {
    entries: VecDeque<Entry>,
    active: bool,
    capabilities: Option<CapabilityFlags>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a command is waiting on the server.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enqueue a command. Activates it right away if the queue is idle and
    /// the session is established.
    pub fn push(&mut self, command: Box<dyn Command>, completion: Completion) -> Vec<Outbound> {
        trace!(command = command.name(), queued = self.entries.len(), "command submitted");
        self.entries.push_back(Entry {
            command,
            completion,
        });
        self.activate_head()
    }

    /// The session is established; start draining the queue.
    pub fn start(&mut self, capabilities: CapabilityFlags) -> Vec<Outbound> {
        self.capabilities = Some(capabilities);
        self.activate_head()
    }

    /// Route one inbound packet to the active command.
    ///
    /// `Err` means the connection can no longer be used. The active command
    /// has already been completed with the underlying error; the caller must
    /// close the transport and [`fail_all`](Self::fail_all) the rest.
    pub fn handle(&mut self, packet: Packet) -> MySqlResult<Vec<Outbound>> {
        let Some(capabilities) = self.capabilities else {
            return Err(MySqlError::Protocol(
                "command packet before the session was established".into(),
            ));
        };
        if is_progress_report(&packet.payload, capabilities) {
            trace!("ignoring progress report");
            return Ok(Vec::new());
        }

        if !self.active {
            if packet.is_err() {
                let err = parse_err(&packet.payload, capabilities)?;
                warn!(code = err.code, message = %err.message, "unsolicited server error");
                return Err(err.into_error());
            }
            return Err(MySqlError::Protocol(format!(
                "unexpected packet {:?} with no command in flight",
                packet.header()
            )));
        }

        let Some(entry) = self.entries.front_mut() else {
            return Err(MySqlError::Protocol("active command missing from queue".into()));
        };
        let name = entry.command.name();
        let state = match entry.command.handle(packet, capabilities) {
            Ok(state) => state,
            Err(err) => {
                let reason = MySqlError::Protocol(format!("{} exchange failed: {}", name, err));
                self.complete_head(Err(err));
                return Err(reason);
            }
        };

        let mut out = Vec::new();
        if !state.packets.is_empty() {
            out.push(Outbound {
                packets: state.packets,
                resequence: state.resequence,
            });
        }
        if state.done {
            let fatal = match &state.error {
                Some(err) if err.is_connection_fatal() => Some(match err.server_error() {
                    Some(server) => server.clone().into_error(),
                    None => MySqlError::Protocol(format!("{} failed: {}", name, err)),
                }),
                _ => None,
            };
            debug!(command = name, ok = state.error.is_none(), "command completed");
            self.complete_head(state.error.map_or(Ok(()), Err));
            if let Some(err) = fatal {
                warn!(error = %err, "command error ends the connection");
                return Err(err);
            }
            out.extend(self.activate_head());
        }
        Ok(out)
    }

    /// Fail every queued command, active one first, with [`MySqlError::Closed`].
    pub fn fail_all(&mut self) {
        if !self.entries.is_empty() {
            debug!(count = self.entries.len(), "failing queued commands");
        }
        self.active = false;
        while let Some(entry) = self.entries.pop_front() {
            let _ = entry.completion.send(Err(MySqlError::Closed));
        }
    }

    fn complete_head(&mut self, result: MySqlResult<()>) {
        self.active = false;
        if let Some(entry) = self.entries.pop_front() {
            let _ = entry.completion.send(result);
        }
    }

    fn activate_head(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        let Some(capabilities) = self.capabilities else {
            return out;
        };
        while !self.active {
            let Some(entry) = self.entries.front_mut() else {
                break;
            };
            let name = entry.command.name();
            match entry.command.activate(capabilities) {
                Ok(state) => {
                    if !state.packets.is_empty() {
                        out.push(Outbound {
                            packets: state.packets,
                            resequence: true,
                        });
                    }
                    if state.done {
                        self.complete_head(state.error.map_or(Ok(()), Err));
                    } else {
                        trace!(command = name, "command activated");
                        self.active = true;
                    }
                }
                Err(err) => {
                    debug!(command = name, error = %err, "command failed to start");
                    self.complete_head(Err(err));
                }
            }
        }
        out
    }
}

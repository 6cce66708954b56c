//! Text protocol queries (COM_QUERY), including multi-statement strings.
//!
//! Response shape per statement:
//!
//! ```text
//! OK | ERR | column-count, column-def x N, [EOF], row*, (EOF | OK 0xfe)
//! ```
//!
//! `SERVER_MORE_RESULTS_EXISTS` on the terminal packet means another
//! statement's response follows.

use std::sync::Arc;

use tracing::trace;

use super::command::{server_error, BoxError, Command, CommandState, MetadataHandler, RowHandler};
use super::row::MySqlRow;
use crate::error::{MySqlError, MySqlResult};
use crate::protocol::capabilities::CapabilityFlags;
use crate::protocol::messages::{encode_query, ColumnDefinition, OkPacket, ERR_HEADER, OK_HEADER};
use crate::protocol::packet::Packet;
use crate::protocol::wire::read_len_enc_count;

/// LOCAL INFILE request header.
const LOCAL_INFILE_HEADER: u8 = 0xfb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    ColumnCount,
    Columns { remaining: u64 },
    ColumnsEof,
    Rows,
    Done,
}

/// A COM_QUERY exchange.
pub struct QueryCommand {
    sql: String,
    stage: Stage,
    pending_columns: Vec<ColumnDefinition>,
    columns: Arc<[ColumnDefinition]>,
    on_row: RowHandler,
    on_metadata: MetadataHandler,
    row_error: Option<BoxError>,
}

impl QueryCommand {
    pub fn new(sql: impl Into<String>, on_row: RowHandler, on_metadata: MetadataHandler) -> Self {
        Self {
            sql: sql.into(),
            stage: Stage::Idle,
            pending_columns: Vec::new(),
            columns: Arc::from(Vec::new()),
            on_row,
            on_metadata,
            row_error: None,
        }
    }

    fn columns_complete(&mut self, capabilities: CapabilityFlags) {
        self.columns = std::mem::take(&mut self.pending_columns).into();
        self.stage = if capabilities.contains(CapabilityFlags::DEPRECATE_EOF) {
            Stage::Rows
        } else {
            Stage::ColumnsEof
        };
    }

    /// A statement finished. Either wait for the next one or complete.
    fn statement_done(&mut self, ok: OkPacket) -> CommandState {
        let more = ok.status.more_results();
        (self.on_metadata)(ok.into());
        if more {
            self.stage = Stage::ColumnCount;
            return CommandState::wait();
        }
        self.stage = Stage::Done;
        CommandState::done().finish(self.row_error.take().map(MySqlError::RowHandler))
    }

    fn on_row(&mut self, packet: &Packet) -> MySqlResult<()> {
        let row = MySqlRow::decode_text(&packet.payload, self.columns.clone())?;
        if self.row_error.is_none() {
            if let Err(e) = (self.on_row)(row) {
                trace!(error = %e, "row handler failed, draining remaining rows");
                self.row_error = Some(e);
            }
        }
        Ok(())
    }
}

impl Command for QueryCommand {
    fn name(&self) -> &'static str {
        "query"
    }

    fn activate(&mut self, _capabilities: CapabilityFlags) -> MySqlResult<CommandState> {
        trace!(sql = %self.sql, "COM_QUERY");
        self.stage = Stage::ColumnCount;
        Ok(CommandState::request(encode_query(&self.sql)))
    }

    fn handle(&mut self, packet: Packet, capabilities: CapabilityFlags) -> MySqlResult<CommandState> {
        if packet.header() == Some(ERR_HEADER) && self.stage != Stage::Done {
            self.stage = Stage::Done;
            return Ok(CommandState::failed(server_error(&packet, capabilities)?));
        }
        match self.stage {
            Stage::ColumnCount => match packet.header() {
                Some(OK_HEADER) => Ok(self.statement_done(OkPacket::parse(&packet.payload, capabilities)?)),
                Some(LOCAL_INFILE_HEADER) => Err(MySqlError::Protocol(
                    "server requested LOCAL INFILE, which is not supported".into(),
                )),
                Some(_) => {
                    let count = read_len_enc_count(&mut &packet.payload[..])?;
                    if count == 0 {
                        return Err(MySqlError::Protocol("result set with zero columns".into()));
                    }
                    self.pending_columns = Vec::with_capacity(count.min(4096) as usize);
                    self.stage = Stage::Columns { remaining: count };
                    Ok(CommandState::wait())
                }
                None => Err(MySqlError::Protocol("empty packet in query response".into())),
            },
            Stage::Columns { remaining } => {
                self.pending_columns.push(ColumnDefinition::parse(&packet.payload)?);
                if remaining == 1 {
                    self.columns_complete(capabilities);
                } else {
                    self.stage = Stage::Columns {
                        remaining: remaining - 1,
                    };
                }
                Ok(CommandState::wait())
            }
            Stage::ColumnsEof => {
                if !packet.is_eof() {
                    return Err(MySqlError::Protocol("expected EOF after column definitions".into()));
                }
                self.stage = Stage::Rows;
                Ok(CommandState::wait())
            }
            Stage::Rows => {
                if packet.is_result_set_end() {
                    let end = OkPacket::parse_result_set_end(&packet.payload, capabilities)?;
                    return Ok(self.statement_done(end));
                }
                self.on_row(&packet)?;
                Ok(CommandState::wait())
            }
            Stage::Idle | Stage::Done => Err(MySqlError::Protocol(format!(
                "unexpected packet {:?} for finished query",
                packet.header()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::driver::command::QueryMetadata;
    use crate::protocol::wire::{write_len_enc_bytes, write_len_enc_int};

    fn column_def(name: &str, column_type: u8) -> Packet {
        let mut buf = BytesMut::new();
        for s in ["def", "shop", "t", "t", name, name] {
            write_len_enc_bytes(&mut buf, s.as_bytes());
        }
        write_len_enc_int(&mut buf, 0x0c);
        buf.put_u16_le(45);
        buf.put_u32_le(255);
        buf.put_u8(column_type);
        buf.put_u16_le(0);
        buf.put_u8(0);
        buf.put_u16_le(0);
        Packet::new(0, buf.freeze())
    }

    fn text_row(values: &[Option<&str>]) -> Packet {
        let mut buf = BytesMut::new();
        for v in values {
            match v {
                Some(v) => write_len_enc_bytes(&mut buf, v.as_bytes()),
                None => buf.put_u8(0xfb),
            }
        }
        Packet::new(0, buf.freeze())
    }

    fn end(status: u16) -> Packet {
        let mut buf = BytesMut::new();
        buf.put_u8(0xfe);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(status);
        buf.put_u16_le(0);
        Packet::new(0, buf.freeze())
    }

    fn ok(affected: u8, status: u16) -> Packet {
        let mut buf = BytesMut::new();
        buf.put_u8(0x00);
        buf.put_u8(affected);
        buf.put_u8(0);
        buf.put_u16_le(status);
        buf.put_u16_le(0);
        Packet::new(0, buf.freeze())
    }

    fn command() -> (QueryCommand, mpsc::Receiver<MySqlRow>, mpsc::Receiver<QueryMetadata>) {
        let (row_tx, row_rx) = mpsc::channel();
        let (meta_tx, meta_rx) = mpsc::channel();
        let cmd = QueryCommand::new(
            "SELECT 1",
            Box::new(move |row| row_tx.send(row).map_err(|_| "receiver dropped".into())),
            Box::new(move |meta| {
                let _ = meta_tx.send(meta);
            }),
        );
        (cmd, row_rx, meta_rx)
    }

    #[test]
    fn test_select_with_deprecate_eof() {
        let caps = CapabilityFlags::CLIENT_DEFAULT;
        let (mut cmd, rows, _) = command();
        let state = cmd.activate(caps).unwrap();
        assert_eq!(&state.packets[0][..], b"\x03SELECT 1");

        assert!(!cmd.handle(Packet::new(1, &b"\x01"[..]), caps).unwrap().done);
        assert!(!cmd.handle(column_def("1", 0x08), caps).unwrap().done);
        assert!(!cmd.handle(text_row(&[Some("1")]), caps).unwrap().done);
        let state = cmd.handle(end(0x0002), caps).unwrap();
        assert!(state.done);
        assert!(state.error.is_none());

        let row = rows.try_recv().unwrap();
        assert_eq!(row.get_i64(0), Some(1));
    }

    #[test]
    fn test_select_with_legacy_eof() {
        let caps = CapabilityFlags::CLIENT_DEFAULT.difference(CapabilityFlags::DEPRECATE_EOF);
        let (mut cmd, rows, _) = command();
        cmd.activate(caps).unwrap();
        cmd.handle(Packet::new(1, &b"\x02"[..]), caps).unwrap();
        cmd.handle(column_def("a", 0xfd), caps).unwrap();
        cmd.handle(column_def("b", 0xfd), caps).unwrap();
        cmd.handle(end(0x0002), caps).unwrap();
        cmd.handle(text_row(&[Some("x"), None]), caps).unwrap();
        let state = cmd.handle(end(0x0002), caps).unwrap();
        assert!(state.done);

        let row = rows.try_recv().unwrap();
        assert_eq!(row.column("a").and_then(|v| v.as_string()), Some("x".to_string()));
        assert!(row.is_null(1));
    }

    #[test]
    fn test_multi_statement() {
        let caps = CapabilityFlags::CLIENT_DEFAULT;
        let (mut cmd, rows, meta) = command();
        cmd.activate(caps).unwrap();

        // INSERT ...; SELECT ...; UPDATE ...
        assert!(!cmd.handle(ok(1, 0x000a), caps).unwrap().done);
        cmd.handle(Packet::new(0, &b"\x01"[..]), caps).unwrap();
        cmd.handle(column_def("id", 0x03), caps).unwrap();
        cmd.handle(text_row(&[Some("7")]), caps).unwrap();
        assert!(!cmd.handle(end(0x000a), caps).unwrap().done);
        let state = cmd.handle(ok(3, 0x0002), caps).unwrap();
        assert!(state.done);

        assert_eq!(rows.try_iter().count(), 1);
        let affected: Vec<u64> = meta.try_iter().map(|m| m.affected_rows).collect();
        assert_eq!(affected, [1, 0, 3]);
    }

    #[test]
    fn test_error_mid_multi_statement() {
        let caps = CapabilityFlags::CLIENT_DEFAULT;
        let (mut cmd, _, _) = command();
        cmd.activate(caps).unwrap();
        cmd.handle(ok(1, 0x000a), caps).unwrap();
        let state = cmd
            .handle(Packet::new(0, &b"\xff\x7a\x04#42S02Table 'shop.nope' doesn't exist"[..]), caps)
            .unwrap();
        assert!(state.done);
        assert!(matches!(state.error, Some(MySqlError::Server(e)) if e.code == 1146));
    }

    #[test]
    fn test_row_handler_error_is_deferred() {
        let caps = CapabilityFlags::CLIENT_DEFAULT;
        let mut seen = 0;
        let mut cmd = QueryCommand::new(
            "SELECT id FROM t",
            Box::new(move |_| {
                seen += 1;
                if seen == 1 { Err("stop".into()) } else { Ok(()) }
            }),
            Box::new(|_| {}),
        );
        cmd.activate(caps).unwrap();
        cmd.handle(Packet::new(1, &b"\x01"[..]), caps).unwrap();
        cmd.handle(column_def("id", 0x03), caps).unwrap();
        assert!(!cmd.handle(text_row(&[Some("1")]), caps).unwrap().done);
        assert!(!cmd.handle(text_row(&[Some("2")]), caps).unwrap().done);
        let state = cmd.handle(end(0x0002), caps).unwrap();
        assert!(state.done);
        assert!(matches!(state.error, Some(MySqlError::RowHandler(_))));
    }

    #[test]
    fn test_packet_after_done_is_protocol_error() {
        let caps = CapabilityFlags::CLIENT_DEFAULT;
        let (mut cmd, _, _) = command();
        cmd.activate(caps).unwrap();
        cmd.handle(ok(0, 0x0002), caps).unwrap();
        assert!(cmd.handle(ok(0, 0x0002), caps).is_err());
    }
}

//! Prepared statement exchange: COM_STMT_PREPARE, COM_STMT_EXECUTE and
//! COM_STMT_CLOSE as one queued command.
//!
//! ```text
//! prepare-ok, param-def x P, [EOF], column-def x C, [EOF]
//!   -> execute
//! (OK | column-count, column-def x N, [EOF], binary-row*, (EOF | OK 0xfe))+
//!   -> close
//! ```
//!
//! The execute request is written only after the prepare response is fully
//! read, so inbound sequence numbers stay strictly checked. Column metadata
//! from the execute response takes precedence over the prepare-time copy.
//! Every path that learned a statement id ends by writing exactly one close.

use std::sync::Arc;

use tracing::{debug, trace};

use super::command::{server_error, BoxError, Command, CommandState, MetadataHandler, RowHandler};
use super::row::MySqlRow;
use crate::error::{MySqlError, MySqlResult};
use crate::protocol::capabilities::CapabilityFlags;
use crate::protocol::messages::{
    encode_stmt_close, encode_stmt_execute, encode_stmt_prepare, ColumnDefinition, OkPacket,
    StmtPrepareOk, ERR_HEADER, OK_HEADER,
};
use crate::protocol::packet::Packet;
use crate::protocol::wire::read_len_enc_count;
use crate::types::MySqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    PrepareOk,
    Params { remaining: u16 },
    ParamsEof,
    Columns { remaining: u16 },
    ColumnsEof,
    ExecuteColumnCount,
    ExecuteColumns { remaining: u64 },
    ExecuteColumnsEof,
    Rows,
    Done,
}

/// Prepare, execute once with `params`, then close.
pub struct PreparedQuery {
    sql: String,
    params: Vec<MySqlValue>,
    stage: Stage,
    statement: Option<StmtPrepareOk>,
    closed: bool,
    mismatch: Option<String>,
    pending_columns: Vec<ColumnDefinition>,
    columns: Arc<[ColumnDefinition]>,
    on_row: RowHandler,
    on_metadata: MetadataHandler,
    row_error: Option<BoxError>,
}

impl PreparedQuery {
    pub fn new(
        sql: impl Into<String>,
        params: Vec<MySqlValue>,
        on_row: RowHandler,
        on_metadata: MetadataHandler,
    ) -> Self {
        Self {
            sql: sql.into(),
            params,
            stage: Stage::Idle,
            statement: None,
            closed: false,
            mismatch: None,
            pending_columns: Vec::new(),
            columns: Arc::from(Vec::new()),
            on_row,
            on_metadata,
            row_error: None,
        }
    }

    /// Complete the command, closing the statement if one was prepared.
    fn finish(&mut self, error: Option<MySqlError>) -> CommandState {
        self.stage = Stage::Done;
        let mut state = CommandState::done().finish(error);
        if let Some(statement) = self.statement {
            if !self.closed {
                self.closed = true;
                trace!(statement_id = statement.statement_id, "COM_STMT_CLOSE");
                state.packets.push(encode_stmt_close(statement.statement_id));
                state.resequence = true;
            }
        }
        state
    }

    fn on_prepare_ok(&mut self, packet: &Packet) -> MySqlResult<CommandState> {
        let ok = StmtPrepareOk::parse(&packet.payload)?;
        debug!(
            statement_id = ok.statement_id,
            params = ok.num_params,
            columns = ok.num_columns,
            "statement prepared"
        );
        self.statement = Some(ok);
        if usize::from(ok.num_params) != self.params.len() {
            self.mismatch = Some(format!(
                "statement expects {} parameters, {} were bound",
                ok.num_params,
                self.params.len()
            ));
        }
        if ok.num_params > 0 {
            self.stage = Stage::Params {
                remaining: ok.num_params,
            };
            return Ok(CommandState::wait());
        }
        self.params_done()
    }

    fn params_done(&mut self) -> MySqlResult<CommandState> {
        match self.statement.map(|s| s.num_columns) {
            Some(n) if n > 0 => {
                self.stage = Stage::Columns { remaining: n };
                Ok(CommandState::wait())
            }
            _ => self.prepare_done(),
        }
    }

    /// The whole prepare response has been read: execute, or give up and close.
    fn prepare_done(&mut self) -> MySqlResult<CommandState> {
        if let Some(mismatch) = self.mismatch.take() {
            return Ok(self.finish(Some(MySqlError::ParameterMismatch(mismatch))));
        }
        let statement_id = self
            .statement
            .map(|s| s.statement_id)
            .ok_or_else(|| MySqlError::Protocol("no statement id before execute".into()))?;
        trace!(statement_id, params = self.params.len(), "COM_STMT_EXECUTE");
        // Sent only now: the prepare reply must be fully read before a new
        // request resets the sequence, or its tail would fail the sequence check.
        self.stage = Stage::ExecuteColumnCount;
        Ok(CommandState::request(encode_stmt_execute(statement_id, &self.params)))
    }

    fn result_done(&mut self, ok: OkPacket) -> CommandState {
        let more = ok.status.more_results();
        (self.on_metadata)(ok.into());
        if more {
            self.stage = Stage::ExecuteColumnCount;
            return CommandState::wait();
        }
        let error = self.row_error.take().map(MySqlError::RowHandler);
        self.finish(error)
    }

    fn on_row(&mut self, packet: &Packet) -> MySqlResult<()> {
        let row = MySqlRow::decode_binary(&packet.payload, self.columns.clone())?;
        if self.row_error.is_none() {
            if let Err(e) = (self.on_row)(row) {
                trace!(error = %e, "row handler failed, draining remaining rows");
                self.row_error = Some(e);
            }
        }
        Ok(())
    }
}

fn expect_eof(packet: &Packet, what: &str) -> MySqlResult<()> {
    if packet.is_eof() {
        Ok(())
    } else {
        Err(MySqlError::Protocol(format!("expected EOF after {}", what)))
    }
}

impl Command for PreparedQuery {
    fn name(&self) -> &'static str {
        "prepared_query"
    }

    fn activate(&mut self, _capabilities: CapabilityFlags) -> MySqlResult<CommandState> {
        trace!(sql = %self.sql, "COM_STMT_PREPARE");
        self.stage = Stage::PrepareOk;
        Ok(CommandState::request(encode_stmt_prepare(&self.sql)))
    }

    fn handle(&mut self, packet: Packet, capabilities: CapabilityFlags) -> MySqlResult<CommandState> {
        let deprecate_eof = capabilities.contains(CapabilityFlags::DEPRECATE_EOF);
        if packet.header() == Some(ERR_HEADER) && self.stage != Stage::Done {
            let error = server_error(&packet, capabilities)?;
            return Ok(self.finish(Some(error)));
        }
        match self.stage {
            Stage::PrepareOk => self.on_prepare_ok(&packet),
            Stage::Params { remaining } => {
                // Parameter definitions are validated and dropped.
                ColumnDefinition::parse(&packet.payload)?;
                if remaining > 1 {
                    self.stage = Stage::Params {
                        remaining: remaining - 1,
                    };
                    Ok(CommandState::wait())
                } else if deprecate_eof {
                    self.params_done()
                } else {
                    self.stage = Stage::ParamsEof;
                    Ok(CommandState::wait())
                }
            }
            Stage::ParamsEof => {
                expect_eof(&packet, "parameter definitions")?;
                self.params_done()
            }
            Stage::Columns { remaining } => {
                ColumnDefinition::parse(&packet.payload)?;
                if remaining > 1 {
                    self.stage = Stage::Columns {
                        remaining: remaining - 1,
                    };
                    Ok(CommandState::wait())
                } else if deprecate_eof {
                    self.prepare_done()
                } else {
                    self.stage = Stage::ColumnsEof;
                    Ok(CommandState::wait())
                }
            }
            Stage::ColumnsEof => {
                expect_eof(&packet, "column definitions")?;
                self.prepare_done()
            }
            Stage::ExecuteColumnCount => match packet.header() {
                Some(OK_HEADER) => {
                    let ok = OkPacket::parse(&packet.payload, capabilities)?;
                    Ok(self.result_done(ok))
                }
                Some(_) => {
                    let count = read_len_enc_count(&mut &packet.payload[..])?;
                    self.pending_columns = Vec::with_capacity(count.min(4096) as usize);
                    if count == 0 {
                        self.columns = Arc::from(Vec::new());
                        self.stage = Stage::Rows;
                    } else {
                        self.stage = Stage::ExecuteColumns { remaining: count };
                    }
                    Ok(CommandState::wait())
                }
                None => Err(MySqlError::Protocol("empty packet in execute response".into())),
            },
            Stage::ExecuteColumns { remaining } => {
                self.pending_columns.push(ColumnDefinition::parse(&packet.payload)?);
                if remaining > 1 {
                    self.stage = Stage::ExecuteColumns {
                        remaining: remaining - 1,
                    };
                } else {
                    self.columns = std::mem::take(&mut self.pending_columns).into();
                    self.stage = if deprecate_eof {
                        Stage::Rows
                    } else {
                        Stage::ExecuteColumnsEof
                    };
                }
                Ok(CommandState::wait())
            }
            Stage::ExecuteColumnsEof => {
                expect_eof(&packet, "column definitions")?;
                self.stage = Stage::Rows;
                Ok(CommandState::wait())
            }
            Stage::Rows => {
                if packet.is_result_set_end() {
                    let end = OkPacket::parse_result_set_end(&packet.payload, capabilities)?;
                    return Ok(self.result_done(end));
                }
                self.on_row(&packet)?;
                Ok(CommandState::wait())
            }
            Stage::Idle | Stage::Done => Err(MySqlError::Protocol(format!(
                "unexpected packet {:?} for finished prepared query",
                packet.header()
            ))),
        }
    }
}

//! Generic response packets (OK, ERR, EOF), result set metadata and
//! command-phase request encoders.

use bytes::{BufMut, BytesMut};

use super::capabilities::{CapabilityFlags, StatusFlags};
use super::error_code::PROGRESS_REPORT;
use super::wire::{
    read_bytes, read_len_enc_count, read_len_enc_string, read_null_string, read_u8,
    read_u16_le, read_u32_le,
};
use crate::error::{MySqlError, MySqlResult, ServerError};
use crate::types::{ColumnFlags, ColumnType, MySqlValue, NullBitmap};

pub const COM_QUIT: u8 = 0x01;
pub const COM_QUERY: u8 = 0x03;
pub const COM_PING: u8 = 0x0e;
pub const COM_STMT_PREPARE: u8 = 0x16;
pub const COM_STMT_EXECUTE: u8 = 0x17;
pub const COM_STMT_CLOSE: u8 = 0x19;

pub const OK_HEADER: u8 = 0x00;
pub const AUTH_MORE_DATA_HEADER: u8 = 0x01;
pub const EOF_HEADER: u8 = 0xfe;
pub const ERR_HEADER: u8 = 0xff;

/// COM_STMT_EXECUTE flag for an unsigned parameter type.
const PARAM_UNSIGNED: u8 = 0x80;

/// OK packet (also the 0xfe-headed end of a result set under CLIENT_DEPRECATE_EOF).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: StatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn parse(data: &[u8], capabilities: CapabilityFlags) -> MySqlResult<Self> {
        let mut buf = data;
        match read_u8(&mut buf)? {
            OK_HEADER | EOF_HEADER => {}
            other => {
                return Err(MySqlError::Protocol(format!(
                    "expected OK packet, got header 0x{:02x}",
                    other
                )));
            }
        }
        let affected_rows = read_len_enc_count(&mut buf)?;
        let last_insert_id = read_len_enc_count(&mut buf)?;
        let mut ok = Self {
            affected_rows,
            last_insert_id,
            ..Self::default()
        };
        if capabilities.contains(CapabilityFlags::PROTOCOL_41) {
            ok.status = StatusFlags::from_bits(read_u16_le(&mut buf)?);
            ok.warnings = read_u16_le(&mut buf)?;
        }
        if capabilities.contains(CapabilityFlags::SESSION_TRACK) {
            // Session state changes (if any) follow the info string; we skip them.
            if !buf.is_empty() {
                ok.info = read_len_enc_string(&mut buf)?;
            }
        } else {
            ok.info = String::from_utf8_lossy(buf).into_owned();
        }
        Ok(ok)
    }

    /// Parse whatever ends a result set: an OK packet under
    /// CLIENT_DEPRECATE_EOF, a legacy EOF packet otherwise.
    pub fn parse_result_set_end(data: &[u8], capabilities: CapabilityFlags) -> MySqlResult<Self> {
        if capabilities.contains(CapabilityFlags::DEPRECATE_EOF) && data.len() > 5 {
            Self::parse(data, capabilities)
        } else {
            let eof = EofPacket::parse(data, capabilities)?;
            Ok(Self {
                status: eof.status,
                warnings: eof.warnings,
                ..Self::default()
            })
        }
    }
}

/// Legacy EOF packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status: StatusFlags,
}

impl EofPacket {
    pub fn parse(data: &[u8], capabilities: CapabilityFlags) -> MySqlResult<Self> {
        let mut buf = data;
        if read_u8(&mut buf)? != EOF_HEADER {
            return Err(MySqlError::Protocol("expected EOF packet".into()));
        }
        let mut eof = Self::default();
        if capabilities.contains(CapabilityFlags::PROTOCOL_41) {
            eof.warnings = read_u16_le(&mut buf)?;
            eof.status = StatusFlags::from_bits(read_u16_le(&mut buf)?);
        }
        Ok(eof)
    }
}

/// Parse an ERR packet into the server's error.
pub fn parse_err(data: &[u8], capabilities: CapabilityFlags) -> MySqlResult<ServerError> {
    let mut buf = data;
    if read_u8(&mut buf)? != ERR_HEADER {
        return Err(MySqlError::Protocol("expected ERR packet".into()));
    }
    let code = read_u16_le(&mut buf)?;
    let mut sql_state = None;
    if capabilities.contains(CapabilityFlags::PROTOCOL_41) && buf.first() == Some(&b'#') {
        read_u8(&mut buf)?;
        sql_state = Some(String::from_utf8_lossy(read_bytes(&mut buf, 5)?).into_owned());
    }
    Ok(ServerError {
        code,
        sql_state,
        message: String::from_utf8_lossy(buf).into_owned(),
    })
}

/// Whether `data` is a MariaDB progress report rather than a real error.
pub fn is_progress_report(data: &[u8], capabilities: CapabilityFlags) -> bool {
    capabilities.contains(CapabilityFlags::MARIADB_CLIENT_PROGRESS)
        && data.len() >= 3
        && data[0] == ERR_HEADER
        && u16::from_le_bytes([data[1], data[2]]) == PROGRESS_REPORT
}

/// AuthSwitchRequest sent during authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub seed: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(data: &[u8]) -> MySqlResult<Self> {
        let mut buf = data;
        if read_u8(&mut buf)? != EOF_HEADER {
            return Err(MySqlError::Protocol("expected AuthSwitchRequest".into()));
        }
        let plugin_name = String::from_utf8_lossy(read_null_string(&mut buf)).into_owned();
        let seed = buf.strip_suffix(&[0]).unwrap_or(buf).to_vec();
        Ok(Self { plugin_name, seed })
    }
}

/// Column definition (ColumnDefinition41) from result set metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn parse(data: &[u8]) -> MySqlResult<Self> {
        let mut buf = data;

        let _catalog = read_len_enc_string(&mut buf)?;
        let schema = read_len_enc_string(&mut buf)?;
        let table = read_len_enc_string(&mut buf)?;
        let org_table = read_len_enc_string(&mut buf)?;
        let name = read_len_enc_string(&mut buf)?;
        let org_name = read_len_enc_string(&mut buf)?;

        // Length of the fixed-size fields, always 0x0c
        let _fixed_len = read_len_enc_count(&mut buf)?;
        let character_set = read_u16_le(&mut buf)?;
        let column_length = read_u32_le(&mut buf)?;
        let column_type = ColumnType::try_from(read_u8(&mut buf)?)?;
        let flags = ColumnFlags::from_bits(read_u16_le(&mut buf)?);
        let decimals = read_u8(&mut buf)?;

        Ok(Self {
            schema,
            table,
            org_table,
            name,
            org_name,
            character_set,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.is_unsigned()
    }
}

/// COM_STMT_PREPARE_OK response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

impl StmtPrepareOk {
    pub fn parse(data: &[u8]) -> MySqlResult<Self> {
        let mut buf = data;
        if read_u8(&mut buf)? != OK_HEADER {
            return Err(MySqlError::Protocol("expected COM_STMT_PREPARE_OK".into()));
        }
        let statement_id = read_u32_le(&mut buf)?;
        let num_columns = read_u16_le(&mut buf)?;
        let num_params = read_u16_le(&mut buf)?;
        let _reserved = read_u8(&mut buf)?;
        let warnings = if buf.len() >= 2 { read_u16_le(&mut buf)? } else { 0 };
        Ok(Self {
            statement_id,
            num_columns,
            num_params,
            warnings,
        })
    }
}

/// Encode COM_QUERY command.
pub fn encode_query(sql: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + sql.len());
    buf.put_u8(COM_QUERY);
    buf.put_slice(sql.as_bytes());
    buf
}

pub fn encode_stmt_prepare(sql: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + sql.len());
    buf.put_u8(COM_STMT_PREPARE);
    buf.put_slice(sql.as_bytes());
    buf
}

/// Encode COM_STMT_EXECUTE with all parameters bound inline.
pub fn encode_stmt_execute(statement_id: u32, params: &[MySqlValue]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16 + params.len() * 10);
    buf.put_u8(COM_STMT_EXECUTE);
    buf.put_u32_le(statement_id);
    buf.put_u8(0); // CURSOR_TYPE_NO_CURSOR
    buf.put_u32_le(1); // iteration count

    if params.is_empty() {
        return buf;
    }

    let mut nulls = NullBitmap::for_params(params.len());
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            nulls.set_null(i);
        }
    }
    buf.put_slice(nulls.as_bytes());
    buf.put_u8(1); // new-params-bound

    for param in params {
        let column_type = if param.is_null() {
            ColumnType::Null
        } else {
            param.column_type
        };
        buf.put_u8(column_type as u8);
        buf.put_u8(if param.unsigned { PARAM_UNSIGNED } else { 0 });
    }
    for param in params {
        param.encode_binary(&mut buf);
    }
    buf
}

pub fn encode_stmt_close(statement_id: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(COM_STMT_CLOSE);
    buf.put_u32_le(statement_id);
    buf
}

pub fn encode_quit() -> BytesMut {
    BytesMut::from(&[COM_QUIT][..])
}

pub fn encode_ping() -> BytesMut {
    BytesMut::from(&[COM_PING][..])
}

//! Wire value types: column type tags, column flags and typed values.
//!
//! A [`MySqlValue`] is the raw bytes of one parameter or column together with
//! the type tag, format and signedness needed to interpret them.

pub mod bitmap;
pub mod time;

use bytes::{Bytes, BytesMut};

pub use bitmap::NullBitmap;
pub use time::MySqlTime;

use crate::error::{MySqlError, MySqlResult};
use crate::protocol::wire::write_len_enc_bytes;

/// Column and parameter type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    Datetime = 0x0c,
    Year = 0x0d,
    NewDate = 0x0e,
    Varchar = 0x0f,
    Bit = 0x10,
    Timestamp2 = 0x11,
    Datetime2 = 0x12,
    Time2 = 0x13,
    Vector = 0xf2,
    Json = 0xf5,
    NewDecimal = 0xf6,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
    Geometry = 0xff,
}

impl ColumnType {
    /// Byte length of fixed-width types in the binary protocol. `None` means
    /// the value is length-encoded.
    pub fn fixed_length(self) -> Option<usize> {
        match self {
            ColumnType::Null => Some(0),
            ColumnType::Tiny => Some(1),
            ColumnType::Short | ColumnType::Year => Some(2),
            ColumnType::Long | ColumnType::Int24 | ColumnType::Float => Some(4),
            ColumnType::LongLong | ColumnType::Double => Some(8),
            _ => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Tiny
                | ColumnType::Short
                | ColumnType::Long
                | ColumnType::Int24
                | ColumnType::LongLong
                | ColumnType::Year
        )
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnType::Timestamp
                | ColumnType::Date
                | ColumnType::Time
                | ColumnType::Datetime
                | ColumnType::NewDate
                | ColumnType::Timestamp2
                | ColumnType::Datetime2
                | ColumnType::Time2
        )
    }
}

impl TryFrom<u8> for ColumnType {
    type Error = MySqlError;

    fn try_from(tag: u8) -> MySqlResult<Self> {
        Ok(match tag {
            0x00 => ColumnType::Decimal,
            0x01 => ColumnType::Tiny,
            0x02 => ColumnType::Short,
            0x03 => ColumnType::Long,
            0x04 => ColumnType::Float,
            0x05 => ColumnType::Double,
            0x06 => ColumnType::Null,
            0x07 => ColumnType::Timestamp,
            0x08 => ColumnType::LongLong,
            0x09 => ColumnType::Int24,
            0x0a => ColumnType::Date,
            0x0b => ColumnType::Time,
            0x0c => ColumnType::Datetime,
            0x0d => ColumnType::Year,
            0x0e => ColumnType::NewDate,
            0x0f => ColumnType::Varchar,
            0x10 => ColumnType::Bit,
            0x11 => ColumnType::Timestamp2,
            0x12 => ColumnType::Datetime2,
            0x13 => ColumnType::Time2,
            0xf2 => ColumnType::Vector,
            0xf5 => ColumnType::Json,
            0xf6 => ColumnType::NewDecimal,
            0xf7 => ColumnType::Enum,
            0xf8 => ColumnType::Set,
            0xf9 => ColumnType::TinyBlob,
            0xfa => ColumnType::MediumBlob,
            0xfb => ColumnType::LongBlob,
            0xfc => ColumnType::Blob,
            0xfd => ColumnType::VarString,
            0xfe => ColumnType::String,
            0xff => ColumnType::Geometry,
            other => {
                return Err(MySqlError::Decode(format!(
                    "unknown column type 0x{:02x}",
                    other
                )));
            }
        })
    }
}

/// Column definition flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnFlags(u16);

impl ColumnFlags {
    pub const NOT_NULL: u16 = 0x0001;
    pub const PRIMARY_KEY: u16 = 0x0002;
    pub const UNIQUE_KEY: u16 = 0x0004;
    pub const MULTIPLE_KEY: u16 = 0x0008;
    pub const BLOB: u16 = 0x0010;
    pub const UNSIGNED: u16 = 0x0020;
    pub const ZEROFILL: u16 = 0x0040;
    pub const BINARY: u16 = 0x0080;
    pub const ENUM: u16 = 0x0100;
    pub const AUTO_INCREMENT: u16 = 0x0200;
    pub const TIMESTAMP: u16 = 0x0400;
    pub const SET: u16 = 0x0800;
    pub const NO_DEFAULT_VALUE: u16 = 0x1000;
    pub const ON_UPDATE_NOW: u16 = 0x2000;
    pub const NUM: u16 = 0x8000;

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn is_unsigned(self) -> bool {
        self.contains(Self::UNSIGNED)
    }

    pub fn is_not_null(self) -> bool {
        self.contains(Self::NOT_NULL)
    }

    pub fn is_primary_key(self) -> bool {
        self.contains(Self::PRIMARY_KEY)
    }
}

/// How a value's bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Binary protocol (prepared statements).
    Binary,
    /// Text protocol (COM_QUERY); every value is its string representation.
    Text,
}

/// One parameter or column value as it travels on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct MySqlValue {
    pub column_type: ColumnType,
    pub format: Format,
    /// Out-of-band signedness for integer types.
    pub unsigned: bool,
    /// Raw bytes; `None` is SQL NULL.
    pub data: Option<Bytes>,
}

impl MySqlValue {
    pub fn new(column_type: ColumnType, format: Format, unsigned: bool, data: Option<Bytes>) -> Self {
        Self {
            column_type,
            format,
            unsigned,
            data,
        }
    }

    pub fn null() -> Self {
        Self::new(ColumnType::Null, Format::Binary, false, None)
    }

    fn binary(column_type: ColumnType, unsigned: bool, data: impl Into<Bytes>) -> Self {
        Self::new(column_type, Format::Binary, unsigned, Some(data.into()))
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// The value as UTF-8 text. Only meaningful for text-format values and
    /// string-like binary columns.
    pub fn as_str(&self) -> Option<&str> {
        if self.format == Format::Binary
            && (self.column_type.fixed_length().is_some() || self.column_type.is_temporal())
        {
            return None;
        }
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    pub fn as_string(&self) -> Option<String> {
        self.as_str().map(str::to_owned)
    }

    pub fn as_i64(&self) -> Option<i64> {
        let data = self.as_bytes()?;
        match self.format {
            Format::Text => std::str::from_utf8(data).ok()?.parse().ok(),
            Format::Binary => {
                if self.unsigned {
                    i64::try_from(self.as_u64()?).ok()
                } else {
                    match (self.column_type, data.len()) {
                        (ColumnType::Tiny, 1) => Some(data[0] as i8 as i64),
                        (ColumnType::Short | ColumnType::Year, 2) => {
                            Some(i16::from_le_bytes([data[0], data[1]]) as i64)
                        }
                        (ColumnType::Long | ColumnType::Int24, 4) => {
                            Some(i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64)
                        }
                        (ColumnType::LongLong, 8) => Some(i64::from_le_bytes(le8(data))),
                        (ColumnType::Decimal | ColumnType::NewDecimal, _) => {
                            std::str::from_utf8(data).ok()?.parse().ok()
                        }
                        _ => None,
                    }
                }
            }
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        let data = self.as_bytes()?;
        match self.format {
            Format::Text => std::str::from_utf8(data).ok()?.parse().ok(),
            Format::Binary => {
                if !self.unsigned {
                    return u64::try_from(self.as_i64()?).ok();
                }
                match (self.column_type, data.len()) {
                    (ColumnType::Tiny, 1) => Some(data[0] as u64),
                    (ColumnType::Short | ColumnType::Year, 2) => {
                        Some(u16::from_le_bytes([data[0], data[1]]) as u64)
                    }
                    (ColumnType::Long | ColumnType::Int24, 4) => {
                        Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as u64)
                    }
                    (ColumnType::LongLong, 8) => Some(u64::from_le_bytes(le8(data))),
                    _ => None,
                }
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        let data = self.as_bytes()?;
        match (self.format, self.column_type, data.len()) {
            (Format::Text, _, _) => std::str::from_utf8(data).ok()?.parse().ok(),
            (Format::Binary, ColumnType::Double, 8) => Some(f64::from_le_bytes(le8(data))),
            (Format::Binary, ColumnType::Float, 4) => {
                Some(f32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64)
            }
            (Format::Binary, ColumnType::Decimal | ColumnType::NewDecimal, _) => {
                std::str::from_utf8(data).ok()?.parse().ok()
            }
            (Format::Binary, t, _) if t.is_integer() => {
                if self.unsigned {
                    self.as_u64().map(|v| v as f64)
                } else {
                    self.as_i64().map(|v| v as f64)
                }
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.format {
            Format::Text => match self.as_str()? {
                "1" | "true" | "TRUE" => Some(true),
                "0" | "false" | "FALSE" => Some(false),
                _ => None,
            },
            Format::Binary => self.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_time(&self) -> Option<MySqlTime> {
        let data = self.as_bytes()?;
        match self.format {
            Format::Binary if self.column_type.is_temporal() => MySqlTime::decode(data).ok(),
            Format::Binary => None,
            Format::Text => MySqlTime::parse_text(std::str::from_utf8(data).ok()?),
        }
    }

    /// Write the value as a COM_STMT_EXECUTE parameter. NULL writes nothing;
    /// it is carried by the parameter bitmap.
    pub fn encode_binary(&self, buf: &mut BytesMut) {
        let Some(data) = &self.data else {
            return;
        };
        match self.column_type.fixed_length() {
            Some(_) if self.format == Format::Binary => buf.extend_from_slice(data),
            _ => write_len_enc_bytes(buf, data),
        }
    }
}

fn le8(data: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    raw
}

macro_rules! impl_from_int {
    ($($ty:ty => $column:expr, $unsigned:expr;)*) => {
        $(
            impl From<$ty> for MySqlValue {
                fn from(v: $ty) -> Self {
                    MySqlValue::binary($column, $unsigned, v.to_le_bytes().to_vec())
                }
            }
        )*
    };
}

impl_from_int! {
    i8 => ColumnType::Tiny, false;
    u8 => ColumnType::Tiny, true;
    i16 => ColumnType::Short, false;
    u16 => ColumnType::Short, true;
    i32 => ColumnType::Long, false;
    u32 => ColumnType::Long, true;
    i64 => ColumnType::LongLong, false;
    u64 => ColumnType::LongLong, true;
    f32 => ColumnType::Float, false;
    f64 => ColumnType::Double, false;
}

impl From<bool> for MySqlValue {
    fn from(v: bool) -> Self {
        MySqlValue::binary(ColumnType::Tiny, false, vec![v as u8])
    }
}

impl From<&str> for MySqlValue {
    fn from(v: &str) -> Self {
        MySqlValue::binary(ColumnType::VarString, false, Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for MySqlValue {
    fn from(v: String) -> Self {
        MySqlValue::binary(ColumnType::VarString, false, v.into_bytes())
    }
}

impl From<&[u8]> for MySqlValue {
    fn from(v: &[u8]) -> Self {
        MySqlValue::binary(ColumnType::Blob, false, Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for MySqlValue {
    fn from(v: Vec<u8>) -> Self {
        MySqlValue::binary(ColumnType::Blob, false, v)
    }
}

impl From<MySqlTime> for MySqlValue {
    fn from(v: MySqlTime) -> Self {
        let column_type = match (v.has_date(), v.has_time() || v.microsecond.is_some()) {
            (true, false) => ColumnType::Date,
            (false, true) => ColumnType::Time,
            _ => ColumnType::Datetime,
        };
        let mut buf = BytesMut::with_capacity(v.encoded_len());
        v.encode(&mut buf);
        MySqlValue::binary(column_type, false, buf.freeze())
    }
}

impl<T: Into<MySqlValue>> From<Option<T>> for MySqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_else(MySqlValue::null)
    }
}

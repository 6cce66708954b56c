//! Date and time values in the binary protocol layouts.
//!
//! The layout is picked by byte count on decode and by which parts are set on
//! encode:
//!
//! | bytes | contents                                  |
//! |-------|-------------------------------------------|
//! | 0     | nothing                                   |
//! | 4     | year u16, month, day                      |
//! | 7     | date + hour, minute, second               |
//! | 8     | 5 reserved bytes + hour, minute, second   |
//! | 11    | date + time + microsecond u32             |
//! | 12    | 8-byte time layout + microsecond u32      |

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{MySqlError, MySqlResult};
use crate::protocol::wire::{read_u8, read_u16_le, read_u32_le, read_bytes};

/// A DATE, TIME, DATETIME or TIMESTAMP value. Unset parts are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MySqlTime {
    pub year: Option<u16>,
    pub month: Option<u8>,
    pub day: Option<u8>,
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub second: Option<u8>,
    pub microsecond: Option<u32>,
}

impl MySqlTime {
    pub fn date(year: u16, month: u8, day: u8) -> Self {
        Self {
            year: Some(year),
            month: Some(month),
            day: Some(day),
            ..Self::default()
        }
    }

    pub fn time(hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour: Some(hour),
            minute: Some(minute),
            second: Some(second),
            ..Self::default()
        }
    }

    pub fn datetime(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour: Some(hour),
            minute: Some(minute),
            second: Some(second),
            ..Self::date(year, month, day)
        }
    }

    pub fn with_microsecond(mut self, microsecond: u32) -> Self {
        self.microsecond = Some(microsecond);
        self
    }

    pub fn has_date(&self) -> bool {
        self.year.is_some() || self.month.is_some() || self.day.is_some()
    }

    pub fn has_time(&self) -> bool {
        self.hour.is_some() || self.minute.is_some() || self.second.is_some()
    }

    /// Number of bytes `encode` will write.
    pub fn encoded_len(&self) -> usize {
        match (self.has_date(), self.has_time(), self.microsecond.is_some()) {
            (false, false, false) => 0,
            (true, false, false) => 4,
            (true, true, false) => 7,
            (true, _, true) => 11,
            (false, true, false) => 8,
            (false, _, true) => 12,
        }
    }

    /// Write the binary layout (without a length prefix).
    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.encoded_len();
        match len {
            4 | 7 | 11 => {
                buf.put_u16_le(self.year.unwrap_or(0));
                buf.put_u8(self.month.unwrap_or(0));
                buf.put_u8(self.day.unwrap_or(0));
            }
            8 | 12 => buf.put_slice(&[0u8; 5]),
            _ => return,
        }
        if len != 4 {
            buf.put_u8(self.hour.unwrap_or(0));
            buf.put_u8(self.minute.unwrap_or(0));
            buf.put_u8(self.second.unwrap_or(0));
        }
        if len == 11 || len == 12 {
            buf.put_u32_le(self.microsecond.unwrap_or(0));
        }
    }

    /// Read a value whose layout is given by its byte length.
    pub fn decode(data: &[u8]) -> MySqlResult<Self> {
        let mut buf = data;
        let mut time = Self::default();
        match data.len() {
            0 => return Ok(time),
            4 | 7 | 11 => {
                time.year = Some(read_u16_le(&mut buf)?);
                time.month = Some(read_u8(&mut buf)?);
                time.day = Some(read_u8(&mut buf)?);
            }
            8 | 12 => {
                read_bytes(&mut buf, 5)?;
            }
            n => {
                return Err(MySqlError::Decode(format!(
                    "invalid temporal value length {}",
                    n
                )));
            }
        }
        if data.len() != 4 {
            time.hour = Some(read_u8(&mut buf)?);
            time.minute = Some(read_u8(&mut buf)?);
            time.second = Some(read_u8(&mut buf)?);
        }
        if data.len() == 11 || data.len() == 12 {
            time.microsecond = Some(read_u32_le(&mut buf)?);
        }
        Ok(time)
    }

    /// Parse the text protocol form: `YYYY-MM-DD`, `HH:MM:SS[.ffffff]` or both.
    pub fn parse_text(text: &str) -> Option<Self> {
        let text = text.trim();
        let (date_part, time_part) = match text.split_once(' ') {
            Some((d, t)) => (Some(d), Some(t)),
            None if text.contains(':') => (None, Some(text)),
            None => (Some(text), None),
        };

        let mut time = Self::default();
        if let Some(date) = date_part {
            let mut parts = date.splitn(3, '-');
            time.year = Some(parts.next()?.parse().ok()?);
            time.month = Some(parts.next()?.parse().ok()?);
            time.day = Some(parts.next()?.parse().ok()?);
        }
        if let Some(clock) = time_part {
            let (hms, fraction) = match clock.split_once('.') {
                Some((hms, f)) => (hms, Some(f)),
                None => (clock, None),
            };
            let mut parts = hms.splitn(3, ':');
            time.hour = Some(parts.next()?.parse().ok()?);
            time.minute = Some(parts.next()?.parse().ok()?);
            time.second = Some(parts.next()?.parse().ok()?);
            if let Some(f) = fraction {
                if f.is_empty() || f.len() > 6 || !f.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                // Right-pad to six digits: ".5" is 500000 microseconds.
                let micros: u32 = f.parse().ok()?;
                time.microsecond = Some(micros * 10u32.pow(6 - f.len() as u32));
            }
        }
        Some(time)
    }
}

impl fmt::Display for MySqlTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_date() {
            write!(
                f,
                "{:04}-{:02}-{:02}",
                self.year.unwrap_or(0),
                self.month.unwrap_or(0),
                self.day.unwrap_or(0)
            )?;
        }
        if self.has_time() || self.microsecond.is_some() {
            if self.has_date() {
                f.write_str(" ")?;
            }
            write!(
                f,
                "{:02}:{:02}:{:02}",
                self.hour.unwrap_or(0),
                self.minute.unwrap_or(0),
                self.second.unwrap_or(0)
            )?;
            if let Some(us) = self.microsecond {
                write!(f, ".{:06}", us)?;
            }
        }
        Ok(())
    }
}

//! Wire primitives: fixed-width integers, length-encoded integers and strings,
//! NUL-terminated strings.
//!
//! Readers take a `&mut &[u8]` cursor and advance it past what they consume.
//! Every reader is bounds-checked; running off the end is a protocol error.

use bytes::{BufMut, BytesMut};

use crate::error::{MySqlError, MySqlResult};

/// Leading byte of a length-encoded integer that stands for SQL NULL.
pub const LEN_ENC_NULL: u8 = 0xfb;

fn short(what: &str) -> MySqlError {
    MySqlError::Protocol(format!("packet too short reading {}", what))
}

/// Take exactly `n` bytes from the front of the cursor.
pub fn read_bytes<'a>(buf: &mut &'a [u8], n: usize) -> MySqlResult<&'a [u8]> {
    if buf.len() < n {
        return Err(short(&format!("{} bytes", n)));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

pub fn read_u8(buf: &mut &[u8]) -> MySqlResult<u8> {
    let (&first, rest) = buf.split_first().ok_or_else(|| short("u8"))?;
    *buf = rest;
    Ok(first)
}

pub fn read_u16_le(buf: &mut &[u8]) -> MySqlResult<u16> {
    let b = read_bytes(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub fn read_u24_le(buf: &mut &[u8]) -> MySqlResult<u32> {
    let b = read_bytes(buf, 3)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
}

pub fn read_u32_le(buf: &mut &[u8]) -> MySqlResult<u32> {
    let b = read_bytes(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_u64_le(buf: &mut &[u8]) -> MySqlResult<u64> {
    let b = read_bytes(buf, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok(u64::from_le_bytes(raw))
}

/// Read a length-encoded integer. `None` is the NULL sentinel (0xfb).
pub fn read_len_enc_int(buf: &mut &[u8]) -> MySqlResult<Option<u64>> {
    match read_u8(buf)? {
        LEN_ENC_NULL => Ok(None),
        0xfc => Ok(Some(read_u16_le(buf)? as u64)),
        0xfd => Ok(Some(read_u24_le(buf)? as u64)),
        0xfe => Ok(Some(read_u64_le(buf)?)),
        0xff => Err(MySqlError::Protocol(
            "invalid length-encoded integer prefix 0xff".into(),
        )),
        n => Ok(Some(n as u64)),
    }
}

/// Read a length-encoded integer where NULL is not allowed.
pub fn read_len_enc_count(buf: &mut &[u8]) -> MySqlResult<u64> {
    read_len_enc_int(buf)?
        .ok_or_else(|| MySqlError::Protocol("unexpected NULL length-encoded integer".into()))
}

/// Read a length-encoded byte string. `None` is SQL NULL.
pub fn read_len_enc_bytes<'a>(buf: &mut &'a [u8]) -> MySqlResult<Option<&'a [u8]>> {
    match read_len_enc_int(buf)? {
        None => Ok(None),
        Some(len) => {
            let len = usize::try_from(len)
                .map_err(|_| MySqlError::Protocol("length-encoded string too large".into()))?;
            read_bytes(buf, len).map(Some)
        }
    }
}

/// Read a length-encoded string, lossily decoded as UTF-8. NULL reads as empty.
pub fn read_len_enc_string(buf: &mut &[u8]) -> MySqlResult<String> {
    Ok(read_len_enc_bytes(buf)?
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default())
}

/// Read a NUL-terminated string. A missing terminator consumes the rest of the buffer.
pub fn read_null_string<'a>(buf: &mut &'a [u8]) -> &'a [u8] {
    match buf.iter().position(|&b| b == 0) {
        Some(pos) => {
            let s = &buf[..pos];
            *buf = &buf[pos + 1..];
            s
        }
        None => {
            let s = *buf;
            *buf = &[];
            s
        }
    }
}

/// Number of bytes `write_len_enc_int` uses for `val`.
pub fn len_enc_int_size(val: u64) -> usize {
    if val < 251 {
        1
    } else if val < 65536 {
        3
    } else if val < 16777216 {
        4
    } else {
        9
    }
}

/// Write a length-encoded integer to buffer.
pub fn write_len_enc_int(buf: &mut BytesMut, val: u64) {
    if val < 251 {
        buf.put_u8(val as u8);
    } else if val < 65536 {
        buf.put_u8(0xfc);
        buf.put_u16_le(val as u16);
    } else if val < 16777216 {
        buf.put_u8(0xfd);
        buf.put_u8((val & 0xff) as u8);
        buf.put_u8(((val >> 8) & 0xff) as u8);
        buf.put_u8(((val >> 16) & 0xff) as u8);
    } else {
        buf.put_u8(0xfe);
        buf.put_u64_le(val);
    }
}

/// Write a length-encoded byte string.
pub fn write_len_enc_bytes(buf: &mut BytesMut, data: &[u8]) {
    write_len_enc_int(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Write a NUL-terminated string.
pub fn write_null_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_slice(data);
    buf.put_u8(0);
}

//! RESP2 encoder and incremental reply parser.
//!
//! Supports the frame types a key/value client needs:
//! - Simple Strings (+)
//! - Errors (-)
//! - Integers (:)
//! - Bulk Strings ($), with `$-1` as null
//! - Arrays (*), with `*-1` as null

use crate::error::StoreError;
use bytes::{BufMut, Bytes, BytesMut};

/// Largest bulk string accepted from the wire.
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;
/// Largest array accepted from the wire.
pub const MAX_ELEMENTS: usize = 1024 * 1024;
/// Deepest array nesting accepted from the wire.
pub const MAX_NESTING_DEPTH: usize = 8;

/// A decoded RESP2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// A non-null bulk string.
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        RespValue::BulkString(Some(Bytes::copy_from_slice(data.as_ref())))
    }

    /// Short name of the frame type, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(Some(_)) => "bulk string",
            RespValue::BulkString(None) => "null bulk string",
            RespValue::Array(Some(_)) => "array",
            RespValue::Array(None) => "null array",
        }
    }

    /// Append the wire encoding of this frame to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                out.put_u8(b'+');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                out.put_u8(b'-');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                out.put_slice(format!(":{n}\r\n").as_bytes());
            }
            RespValue::BulkString(None) => out.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                out.put_slice(format!("${}\r\n", data.len()).as_bytes());
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            RespValue::Array(None) => out.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                out.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// Encode a command as an array of bulk strings.
pub fn encode_command(args: &[&str]) -> BytesMut {
    let mut out = BytesMut::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.put_slice(arg.as_bytes());
        out.put_slice(b"\r\n");
    }
    out
}

/// Parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame,
/// otherwise the frame and the number of bytes it occupied.
pub fn parse(buf: &[u8]) -> Result<Option<(RespValue, usize)>, StoreError> {
    parse_at(buf, 0)
}

fn parse_at(buf: &[u8], depth: usize) -> Result<Option<(RespValue, usize)>, StoreError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(protocol_error("maximum nesting depth exceeded"));
    }
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };
    let Some(line_len) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let line = &buf[1..1 + line_len];
    let header_len = line_len + 3; // type byte + CRLF

    match tag {
        b'+' => Ok(Some((RespValue::SimpleString(utf8(line)?), header_len))),
        b'-' => Ok(Some((RespValue::Error(utf8(line)?), header_len))),
        b':' => Ok(Some((RespValue::Integer(parse_int(line)?), header_len))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((RespValue::BulkString(None), header_len)));
            }
            let len = checked_len(len, MAX_BULK_SIZE, "bulk string")?;
            let total = header_len + len + 2;
            if buf.len() < total {
                return Ok(None);
            }
            if &buf[header_len + len..total] != b"\r\n" {
                return Err(protocol_error("bulk string missing terminator"));
            }
            let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
            Ok(Some((RespValue::BulkString(Some(data)), total)))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Array(None), header_len)));
            }
            let len = checked_len(len, MAX_ELEMENTS, "array")?;
            let mut items = Vec::with_capacity(len.min(64));
            let mut offset = header_len;
            for _ in 0..len {
                match parse_at(&buf[offset..], depth + 1)? {
                    Some((item, used)) => {
                        items.push(item);
                        offset += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), offset)))
        }
        other => Err(protocol_error(&format!(
            "unexpected frame type byte 0x{other:02x}"
        ))),
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn utf8(line: &[u8]) -> Result<String, StoreError> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| protocol_error("line is not valid UTF-8"))
}

fn parse_int(line: &[u8]) -> Result<i64, StoreError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| protocol_error("invalid integer"))
}

fn checked_len(len: i64, max: usize, what: &str) -> Result<usize, StoreError> {
    if len < 0 {
        return Err(protocol_error(&format!("negative {what} length {len}")));
    }
    let len = len as usize;
    if len > max {
        return Err(protocol_error(&format!("{what} length {len} exceeds {max}")));
    }
    Ok(len)
}

fn protocol_error(message: &str) -> StoreError {
    StoreError::Protocol {
        message: message.to_string(),
    }
}

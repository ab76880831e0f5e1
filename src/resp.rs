//! RESP (REdis Serialization Protocol) framing.
//!
//! Decodes a byte stream into [`RespValue`] frames and encodes frames back
//! into bytes. Parsing is incremental: a frame that is not yet complete in
//! the buffer yields `Ok(None)` and the caller retries once more bytes have
//! arrived. Bulk strings are binary-safe and may contain CRLF or NUL.
//!
//! When the first byte of a frame is not one of the five RESP kind bytes
//! (`+ - : $ *`), the frame is read in inline mode: a single CRLF-terminated
//! line is split on whitespace and becomes an array of bulk strings.

use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RespError {
    #[error("invalid UTF-8 sequence")]
    InvalidUtf8,
    #[error("malformed length")]
    MalformedLength,
    #[error("malformed integer")]
    MalformedInteger,
    #[error("missing CRLF terminator")]
    MissingTerminator,
}

/// A single RESP wire value.
///
/// Bulk strings and arrays have dedicated null forms (`$-1\r\n`, `*-1\r\n`)
/// which are distinct values, not an absent `Option`.
#[derive(Debug, PartialEq, Clone)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<RespValue>),
    NullArray,
}

impl RespValue {
    /// The canonical `+OK\r\n` reply.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn bulk(bytes: impl Into<Bytes>) -> Self {
        RespValue::BulkString(bytes.into())
    }

    /// Attempts to decode one complete frame from the front of `input`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((value, consumed)))` - a full frame was decoded from the
    ///   first `consumed` bytes
    /// * `Ok(None)` - the buffer holds only a partial frame; read more bytes
    ///   and call again
    /// * `Err(RespError)` - the stream is malformed beyond recovery
    pub fn decode(input: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
        if input.is_empty() {
            return Ok(None);
        }

        match input[0] {
            b'+' | b'-' | b':' | b'$' | b'*' => Self::decode_typed(input),
            _ => Self::decode_inline(input),
        }
    }

    fn decode_typed(input: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
        let Some((line, after_line)) = split_crlf_line(input) else {
            return Ok(None);
        };

        match input[0] {
            b'+' => {
                let content = str::from_utf8(&line[1..]).map_err(|_| RespError::InvalidUtf8)?;
                Ok(Some((
                    RespValue::SimpleString(content.to_string()),
                    after_line,
                )))
            }
            b'-' => {
                let content = str::from_utf8(&line[1..]).map_err(|_| RespError::InvalidUtf8)?;
                Ok(Some((RespValue::Error(content.to_string()), after_line)))
            }
            b':' => {
                let value = parse_i64(&line[1..]).ok_or(RespError::MalformedInteger)?;
                Ok(Some((RespValue::Integer(value), after_line)))
            }
            b'$' => {
                let length = parse_i64(&line[1..]).ok_or(RespError::MalformedLength)?;

                if length == -1 {
                    return Ok(Some((RespValue::NullBulkString, after_line)));
                }

                let length = usize::try_from(length).map_err(|_| RespError::MalformedLength)?;
                let end = after_line + length;

                if input.len() < end + 2 {
                    return Ok(None);
                }

                if &input[end..end + 2] != b"\r\n" {
                    return Err(RespError::MissingTerminator);
                }

                let content = Bytes::copy_from_slice(&input[after_line..end]);
                Ok(Some((RespValue::BulkString(content), end + 2)))
            }
            b'*' => {
                let length = parse_i64(&line[1..]).ok_or(RespError::MalformedLength)?;

                if length == -1 {
                    return Ok(Some((RespValue::NullArray, after_line)));
                }

                let length = usize::try_from(length).map_err(|_| RespError::MalformedLength)?;
                let mut elements = Vec::with_capacity(length.min(64));
                let mut offset = after_line;

                for _ in 0..length {
                    match Self::decode(&input[offset..])? {
                        Some((element, consumed)) => {
                            elements.push(element);
                            offset += consumed;
                        }
                        None => return Ok(None),
                    }
                }

                Ok(Some((RespValue::Array(elements), offset)))
            }
            _ => unreachable!("decode_typed called on a non-RESP kind byte"),
        }
    }

    /// Inline mode: one whitespace-separated line becomes an array of bulk
    /// strings. An empty line decodes to an empty array, which the caller
    /// skips silently.
    fn decode_inline(input: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
        let Some((line, consumed)) = split_crlf_line(input) else {
            return Ok(None);
        };

        let words = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|word| !word.is_empty())
            .map(|word| RespValue::BulkString(Bytes::copy_from_slice(word)))
            .collect::<Vec<RespValue>>();

        Ok(Some((RespValue::Array(words), consumed)))
    }

    /// Encodes this value into its exact wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(message) => {
                out.push(b'-');
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(bytes) => {
                out.push(b'$');
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::NullBulkString => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(elements) => {
                out.push(b'*');
                out.extend_from_slice(elements.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for element in elements {
                    element.encode_into(out);
                }
            }
            RespValue::NullArray => out.extend_from_slice(b"*-1\r\n"),
        }
    }
}

/// Splits the leading CRLF-terminated line off `input`, returning the line
/// without its terminator and the offset just past the terminator.
fn split_crlf_line(input: &[u8]) -> Option<(&[u8], usize)> {
    let position = input.windows(2).position(|window| window == b"\r\n")?;
    Some((&input[..position], position + 2))
}

/// Strict ASCII signed 64-bit parse; no whitespace, no empty input.
fn parse_i64(input: &[u8]) -> Option<i64> {
    let text = str::from_utf8(input).ok()?;
    if text.is_empty() {
        return None;
    }
    text.parse::<i64>().ok()
}

// src/core/codec/value_codec.rs

//! Encodes and decodes `Value`s to and from their tagged byte payloads.
//!
//! Every payload starts with a one-byte type tag. Fixed-width types (`int64`,
//! `double`) follow with 8 big-endian bytes; variable-width types (`string`,
//! `binary`, `json`) follow with a big-endian `u32` length and the body.

use super::{DataType, Value};
use crate::core::errors::{DecodeError, MessagingError};
use bytes::{BufMut, Bytes, BytesMut};

const TAG_LEN: usize = 1;
const FIXED_WIDTH: usize = 8;
const LENGTH_PREFIX: usize = 4;

/// The largest body a variable-width value can carry.
pub const MAX_BODY_LEN: usize = u32::MAX as usize;

/// Stateless codec for value payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueCodec;

impl ValueCodec {
    /// Appends the encoded form of `value` to `dst`.
    ///
    /// Fails with `ValueTooLarge`, leaving `dst` untouched, if a body exceeds
    /// `MAX_BODY_LEN`.
    pub fn encode_into(&self, value: &Value, dst: &mut BytesMut) -> Result<(), MessagingError> {
        match value {
            Value::Int64(i) => {
                dst.put_u8(value.data_type().tag());
                dst.put_i64(*i);
            }
            Value::Double(d) => {
                dst.put_u8(value.data_type().tag());
                dst.put_u64(d.to_bits());
            }
            Value::String(s) => put_length_prefixed(dst, value.data_type(), s.as_bytes())?,
            Value::Binary(b) => put_length_prefixed(dst, value.data_type(), b)?,
            Value::Json(j) => {
                // Serializing a `serde_json::Value` to a string cannot fail.
                let text = j.to_string();
                put_length_prefixed(dst, value.data_type(), text.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Decodes `src` as a value of `expected` type.
    pub fn decode(&self, expected: DataType, src: &[u8]) -> Result<Value, DecodeError> {
        let Some((&tag, body)) = src.split_first() else {
            return Err(DecodeError::truncated("empty payload"));
        };

        match DataType::from_tag(tag) {
            None => {
                return Err(DecodeError::malformed(format!(
                    "unknown type tag 0x{tag:02x}"
                )));
            }
            Some(actual) if actual != expected => {
                return Err(DecodeError::type_mismatch(format!(
                    "expected {expected}, payload is {actual}"
                )));
            }
            Some(_) => {}
        }

        match expected {
            DataType::Int64 => {
                let raw = fixed_width(body, expected)?;
                Ok(Value::Int64(i64::from_be_bytes(raw)))
            }
            DataType::Double => {
                let raw = fixed_width(body, expected)?;
                Ok(Value::Double(f64::from_bits(u64::from_be_bytes(raw))))
            }
            DataType::String => {
                let raw = length_prefixed(body, expected)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| DecodeError::malformed(format!("invalid UTF-8: {e}")))?;
                Ok(Value::String(s.to_string()))
            }
            DataType::Binary => {
                let raw = length_prefixed(body, expected)?;
                Ok(Value::Binary(Bytes::copy_from_slice(raw)))
            }
            DataType::Json => {
                let raw = length_prefixed(body, expected)?;
                let json = serde_json::from_slice(raw)
                    .map_err(|e| DecodeError::malformed(format!("invalid JSON: {e}")))?;
                Ok(Value::Json(json))
            }
        }
    }
}

/// Encodes a value into a fresh payload.
pub fn encode(value: &Value) -> Result<Bytes, MessagingError> {
    let mut buf = BytesMut::with_capacity(encoded_len_hint(value));
    ValueCodec.encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// The length prefix written before a body of `len` bytes.
pub fn length_prefix(len: usize) -> Result<u32, MessagingError> {
    u32::try_from(len).map_err(|_| MessagingError::ValueTooLarge(len))
}

/// Decodes a payload as the declared data type.
pub fn decode(expected: DataType, src: &[u8]) -> Result<Value, DecodeError> {
    ValueCodec.decode(expected, src)
}

fn encoded_len_hint(value: &Value) -> usize {
    TAG_LEN
        + match value {
            Value::Int64(_) | Value::Double(_) => FIXED_WIDTH,
            Value::String(s) => LENGTH_PREFIX + s.len().min(MAX_BODY_LEN),
            Value::Binary(b) => LENGTH_PREFIX + b.len().min(MAX_BODY_LEN),
            Value::Json(_) => LENGTH_PREFIX + 64,
        }
}

fn put_length_prefixed(
    dst: &mut BytesMut,
    data_type: DataType,
    body: &[u8],
) -> Result<(), MessagingError> {
    let len = length_prefix(body.len())?;
    dst.reserve(TAG_LEN + LENGTH_PREFIX + body.len());
    dst.put_u8(data_type.tag());
    dst.put_u32(len);
    dst.extend_from_slice(body);
    Ok(())
}

fn fixed_width(body: &[u8], data_type: DataType) -> Result<[u8; FIXED_WIDTH], DecodeError> {
    if body.len() < FIXED_WIDTH {
        return Err(DecodeError::truncated(format!(
            "{data_type} needs {FIXED_WIDTH} bytes, got {}",
            body.len()
        )));
    }
    if body.len() > FIXED_WIDTH {
        return Err(DecodeError::malformed(format!(
            "{} trailing bytes after {data_type}",
            body.len() - FIXED_WIDTH
        )));
    }
    let mut raw = [0u8; FIXED_WIDTH];
    raw.copy_from_slice(body);
    Ok(raw)
}

fn length_prefixed(body: &[u8], data_type: DataType) -> Result<&[u8], DecodeError> {
    if body.len() < LENGTH_PREFIX {
        return Err(DecodeError::truncated(format!(
            "{data_type} length prefix is incomplete"
        )));
    }
    let (prefix, rest) = body.split_at(LENGTH_PREFIX);
    let declared = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

    if rest.len() < declared {
        return Err(DecodeError::truncated(format!(
            "{data_type} declares {declared} bytes, got {}",
            rest.len()
        )));
    }
    if rest.len() > declared {
        return Err(DecodeError::malformed(format!(
            "{} trailing bytes after {data_type}",
            rest.len() - declared
        )));
    }
    Ok(rest)
}

// src/core/codec/value.rs

//! Defines the data types understood by the core and the values they carry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The declared type of a topic, a value stream or one side of a request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int64,
    Double,
    String,
    Binary,
    Json,
}

impl DataType {
    /// The leading tag byte identifying this type in an encoded payload.
    pub const fn tag(self) -> u8 {
        match self {
            DataType::Int64 => 0x01,
            DataType::Double => 0x02,
            DataType::String => 0x03,
            DataType::Binary => 0x04,
            DataType::Json => 0x05,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<DataType> {
        match tag {
            0x01 => Some(DataType::Int64),
            0x02 => Some(DataType::Double),
            0x03 => Some(DataType::String),
            0x04 => Some(DataType::Binary),
            0x05 => Some(DataType::Json),
            _ => None,
        }
    }
}

/// A decoded value of one of the supported data types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Bytes),
    Json(serde_json::Value),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int64(_) => DataType::Int64,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Binary(_) => DataType::Binary,
            Value::Json(_) => DataType::Json,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Binary(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

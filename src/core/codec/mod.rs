// src/core/codec/mod.rs

//! Typed scalar values carried by topics and requests, and their byte codec.

pub mod value;
pub mod value_codec;

pub use value::{DataType, Value};
pub use value_codec::{MAX_BODY_LEN, ValueCodec, decode, encode, length_prefix};

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! Structured payloads go through a configurable `Codec` that turns a JSON document
//! into bytes and back. Typed values are converted to and from `serde_json::Value`
//! around it, so a custom codec never needs to know the concrete type being sent.
//! XML payloads always use `quick-xml`'s serde support.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Default content type for XML messages
pub const XML_CONTENT_TYPE: &str = "application/xml";
/// Default content type for raw messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Marshals and unmarshals structured payloads.
pub trait Codec: Send + Sync {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, AmqpError>;

    fn unmarshal(&self, data: &[u8]) -> Result<Value, AmqpError>;
}

/// The standard JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|err| AmqpError::SerializeError(err.to_string()))
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Value, AmqpError> {
        serde_json::from_slice(data).map_err(|err| AmqpError::DeserializeError(err.to_string()))
    }
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(
    codec: &dyn Codec,
    value: &T,
) -> Result<Vec<u8>, AmqpError> {
    let value =
        serde_json::to_value(value).map_err(|err| AmqpError::SerializeError(err.to_string()))?;
    codec.marshal(&value)
}

pub(crate) fn decode_json<T: DeserializeOwned>(
    codec: &dyn Codec,
    data: &[u8],
) -> Result<T, AmqpError> {
    let value = codec.unmarshal(data)?;
    serde_json::from_value(value).map_err(|err| AmqpError::DeserializeError(err.to_string()))
}

pub(crate) fn encode_xml<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, AmqpError> {
    quick_xml::se::to_string(value)
        .map(String::into_bytes)
        .map_err(|err| AmqpError::SerializeError(err.to_string()))
}

pub(crate) fn decode_xml<T: DeserializeOwned>(data: &[u8]) -> Result<T, AmqpError> {
    let text =
        std::str::from_utf8(data).map_err(|err| AmqpError::DeserializeError(err.to_string()))?;
    quick_xml::de::from_str(text).map_err(|err| AmqpError::DeserializeError(err.to_string()))
}

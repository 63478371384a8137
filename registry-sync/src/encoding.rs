// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Codec for built-in actor event values.
//!
//! Each entry value is a single CBOR item (codec 0x51) carried as padded
//! base64 text. Only the self-describing subset that built-in actors emit is
//! accepted: definite-length items, text map keys and tag 42 (CID links).

use crate::error::{SyncError, SyncResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use data_encoding::BASE32_NOPAD;
use minicbor::data::{Int, Tag, Type};
use minicbor::{Decoder, Encoder};
use std::collections::BTreeMap;

/// Multicodec for DAG-CBOR, the only entry codec built-in actors use.
pub const CBOR_CODEC: u64 = 0x51;

/// CBOR tag for IPLD CID links.
const CID_TAG: u64 = 42;

/// Multibase prefix for base32 lower-case text CIDs.
const CID_BASE32_PREFIX: char = 'b';

const MAX_DEPTH: usize = 16;

/// A decoded CBOR scalar or container.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Null,
    Bool(bool),
    Integer(i128),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// CID link rendered as multibase base32 text ("bafy...")
    Cid(String),
    Array(Vec<EventValue>),
    Map(BTreeMap<String, EventValue>),
}

impl EventValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            EventValue::Integer(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EventValue::Integer(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_cid(&self) -> Option<&str> {
        match self {
            EventValue::Cid(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets a byte string as a signed big integer (sign byte followed by
    /// a big-endian magnitude, empty meaning zero) and renders it in decimal.
    /// Returns `None` for other value kinds or magnitudes wider than 128 bits.
    pub fn as_token_amount(&self) -> Option<String> {
        let EventValue::Bytes(bytes) = self else {
            return None;
        };
        let Some((sign, magnitude)) = bytes.split_first() else {
            return Some("0".to_string());
        };
        if magnitude.len() > 16 || *sign > 1 {
            return None;
        }
        let value = magnitude
            .iter()
            .fold(0u128, |acc, b| (acc << 8) | u128::from(*b));
        if *sign == 1 && value != 0 {
            Some(format!("-{}", value))
        } else {
            Some(value.to_string())
        }
    }
}

/// Decodes one padded-base64 CBOR item.
pub fn decode_cbor_base64(data: &str) -> SyncResult<EventValue> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| SyncError::MalformedEvent(format!("invalid base64 value: {}", e)))?;
    decode_cbor(&bytes)
}

/// Encodes a value as a padded-base64 CBOR item.
pub fn encode_cbor_base64(value: &EventValue) -> SyncResult<String> {
    Ok(STANDARD.encode(encode_cbor(value)?))
}

/// Decodes exactly one CBOR item; trailing bytes are rejected.
pub fn decode_cbor(bytes: &[u8]) -> SyncResult<EventValue> {
    let mut dec = Decoder::new(bytes);
    let value = decode_value(&mut dec, 0)?;
    if dec.position() != bytes.len() {
        return Err(SyncError::MalformedEvent(format!(
            "{} trailing bytes after CBOR value",
            bytes.len() - dec.position()
        )));
    }
    Ok(value)
}

pub fn encode_cbor(value: &EventValue) -> SyncResult<Vec<u8>> {
    let mut enc = Encoder::new(Vec::new());
    encode_value(&mut enc, value)
        .map_err(|e| SyncError::MalformedEvent(format!("cbor encode: {}", e)))?;
    Ok(enc.into_writer())
}

fn malformed(err: minicbor::decode::Error) -> SyncError {
    SyncError::MalformedEvent(format!("cbor decode: {}", err))
}

fn decode_value(dec: &mut Decoder<'_>, depth: usize) -> SyncResult<EventValue> {
    if depth > MAX_DEPTH {
        return Err(SyncError::MalformedEvent(
            "cbor nesting too deep".to_string(),
        ));
    }
    let ty = dec.datatype().map_err(malformed)?;
    let value = match ty {
        Type::Bool => EventValue::Bool(dec.bool().map_err(malformed)?),
        Type::Null => {
            dec.null().map_err(malformed)?;
            EventValue::Null
        }
        Type::U8
        | Type::U16
        | Type::U32
        | Type::U64
        | Type::I8
        | Type::I16
        | Type::I32
        | Type::I64
        | Type::Int => EventValue::Integer(i128::from(dec.int().map_err(malformed)?)),
        Type::F16 => EventValue::Float(f64::from(dec.f16().map_err(malformed)?)),
        Type::F32 => EventValue::Float(f64::from(dec.f32().map_err(malformed)?)),
        Type::F64 => EventValue::Float(dec.f64().map_err(malformed)?),
        Type::Bytes => EventValue::Bytes(dec.bytes().map_err(malformed)?.to_vec()),
        Type::String => EventValue::Text(dec.str().map_err(malformed)?.to_string()),
        Type::Array => {
            let len = dec
                .array()
                .map_err(malformed)?
                .ok_or_else(|| indefinite("array"))?;
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(decode_value(dec, depth + 1)?);
            }
            EventValue::Array(items)
        }
        Type::Map => {
            let len = dec
                .map()
                .map_err(malformed)?
                .ok_or_else(|| indefinite("map"))?;
            let mut entries = BTreeMap::new();
            for _ in 0..len {
                let key = match decode_value(dec, depth + 1)? {
                    EventValue::Text(key) => key,
                    other => {
                        return Err(SyncError::MalformedEvent(format!(
                            "non-text map key {:?}",
                            other
                        )))
                    }
                };
                let item = decode_value(dec, depth + 1)?;
                if entries.insert(key.clone(), item).is_some() {
                    return Err(SyncError::MalformedEvent(format!(
                        "duplicate map key {}",
                        key
                    )));
                }
            }
            EventValue::Map(entries)
        }
        Type::Tag => {
            let tag = dec.tag().map_err(malformed)?.as_u64();
            if tag != CID_TAG {
                return Err(SyncError::MalformedEvent(format!(
                    "unsupported cbor tag {}",
                    tag
                )));
            }
            let bytes = dec.bytes().map_err(malformed)?;
            EventValue::Cid(cid_bytes_to_string(bytes)?)
        }
        Type::BytesIndef | Type::StringIndef | Type::ArrayIndef | Type::MapIndef => {
            return Err(indefinite("item"));
        }
        other => {
            return Err(SyncError::MalformedEvent(format!(
                "unsupported cbor type {}",
                other
            )));
        }
    };
    Ok(value)
}

fn indefinite(what: &str) -> SyncError {
    SyncError::MalformedEvent(format!("indefinite-length cbor {} not allowed", what))
}

type EncodeResult = Result<(), minicbor::encode::Error<std::convert::Infallible>>;

fn encode_value(enc: &mut Encoder<Vec<u8>>, value: &EventValue) -> EncodeResult {
    match value {
        EventValue::Null => {
            enc.null()?;
        }
        EventValue::Bool(b) => {
            enc.bool(*b)?;
        }
        EventValue::Integer(n) => {
            let int = Int::try_from(*n).map_err(|_| {
                minicbor::encode::Error::message(format!("integer {} out of cbor range", n))
            })?;
            enc.int(int)?;
        }
        EventValue::Float(f) => {
            enc.f64(*f)?;
        }
        EventValue::Text(s) => {
            enc.str(s)?;
        }
        EventValue::Bytes(b) => {
            enc.bytes(b)?;
        }
        EventValue::Cid(cid) => {
            let bytes = cid_string_to_bytes(cid)
                .map_err(|e| minicbor::encode::Error::message(e.to_string()))?;
            enc.tag(Tag::new(CID_TAG))?.bytes(&bytes)?;
        }
        EventValue::Array(items) => {
            enc.array(items.len() as u64)?;
            for item in items {
                encode_value(enc, item)?;
            }
        }
        EventValue::Map(entries) => {
            enc.map(entries.len() as u64)?;
            for (key, item) in entries {
                enc.str(key)?;
                encode_value(enc, item)?;
            }
        }
    }
    Ok(())
}

// DAG-CBOR links carry the binary CID behind a 0x00 identity-multibase byte.
fn cid_bytes_to_string(bytes: &[u8]) -> SyncResult<String> {
    match bytes.split_first() {
        Some((0x00, cid)) if !cid.is_empty() => Ok(format!(
            "{}{}",
            CID_BASE32_PREFIX,
            BASE32_NOPAD.encode(cid).to_ascii_lowercase()
        )),
        _ => Err(SyncError::MalformedEvent(
            "cid link missing identity multibase prefix".to_string(),
        )),
    }
}

fn cid_string_to_bytes(cid: &str) -> SyncResult<Vec<u8>> {
    let body = cid
        .strip_prefix(CID_BASE32_PREFIX)
        .ok_or_else(|| SyncError::MalformedEvent(format!("unsupported cid multibase: {}", cid)))?;
    let decoded = BASE32_NOPAD
        .decode(body.to_ascii_uppercase().as_bytes())
        .map_err(|e| SyncError::MalformedEvent(format!("invalid cid {}: {}", cid, e)))?;
    let mut bytes = Vec::with_capacity(decoded.len() + 1);
    bytes.push(0x00);
    bytes.extend_from_slice(&decoded);
    Ok(bytes)
}

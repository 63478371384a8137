// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Built-in actor events as the node returns them, and their decoding into
//! typed events.
//!
//! A raw event is an ordered list of `{Flags, Codec, Key, Value}` entries.
//! The first entry is always `$type`; the remaining keys are hyphen-case on
//! chain and are exposed here in camelCase.

use crate::encoding::{decode_cbor_base64, encode_cbor_base64, EventValue, CBOR_CODEC};
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TYPE_KEY: &str = "$type";

/// Envelope keys merged alongside decoded fields; events may not reuse them.
pub const RESERVED_KEYS: &[&str] = &["height", "msgCid", "emitter", "reverted"];

/// Flags lotus sets on built-in actor entries (key and value indexed).
pub const ENTRY_FLAGS_INDEXED: u8 = 0x03;

pub type FieldMap = BTreeMap<String, EventValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEventEntry {
    #[serde(rename = "Flags")]
    pub flags: u8,
    #[serde(rename = "Codec")]
    pub codec: u64,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// IPLD link in its JSON form: `{"/": "bafy..."}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "/")]
    pub cid: String,
}

/// Event envelope returned by `Filecoin.GetActorEventsRaw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActorEvent {
    pub emitter: String,
    pub entries: Vec<RawEventEntry>,
    #[serde(default)]
    pub reverted: bool,
    pub height: u64,
    #[serde(default)]
    pub tipset_key: serde_json::Value,
    pub msg_cid: CidLink,
}

/// A raw event with its entries decoded. Transient: consumed by the fetcher's
/// mapping step and never persisted in this form.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event_type: String,
    pub fields: FieldMap,
    pub height: u64,
    pub msg_cid: String,
    pub emitter: String,
    pub reverted: bool,
}

impl DecodedEvent {
    pub fn typed(&self) -> SyncResult<ActorEvent> {
        ActorEvent::from_fields(&self.event_type, &self.fields)
    }
}

/// Typed view of the events this service understands. Unrecognized types are
/// kept in `Other` rather than rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorEvent {
    VerifierBalance {
        verifier: u64,
        /// Decimal DataCap balance, when the value fits in 128 bits
        balance: Option<String>,
        client: Option<u64>,
    },
    Allocation(AllocationEvent),
    AllocationRemoved(AllocationEvent),
    Other {
        event_type: String,
        fields: FieldMap,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationEvent {
    pub id: u64,
    pub client: u64,
    pub provider: u64,
    pub piece_cid: String,
    pub piece_size: u64,
    pub term_min: i64,
    pub term_max: i64,
    pub expiration: i64,
}

impl ActorEvent {
    pub fn from_fields(event_type: &str, fields: &FieldMap) -> SyncResult<Self> {
        let event = match event_type {
            "verifier-balance" => ActorEvent::VerifierBalance {
                verifier: required(event_type, fields, "verifier", EventValue::as_u64)?,
                balance: fields.get("balance").and_then(EventValue::as_token_amount),
                client: fields.get("client").and_then(EventValue::as_u64),
            },
            "allocation" => ActorEvent::Allocation(AllocationEvent::from_fields(event_type, fields)?),
            "allocation-removed" => {
                ActorEvent::AllocationRemoved(AllocationEvent::from_fields(event_type, fields)?)
            }
            other => ActorEvent::Other {
                event_type: other.to_string(),
                fields: fields.clone(),
            },
        };
        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            ActorEvent::VerifierBalance { .. } => "verifier-balance",
            ActorEvent::Allocation(_) => "allocation",
            ActorEvent::AllocationRemoved(_) => "allocation-removed",
            ActorEvent::Other { event_type, .. } => event_type,
        }
    }
}

impl AllocationEvent {
    fn from_fields(event_type: &str, fields: &FieldMap) -> SyncResult<Self> {
        Ok(Self {
            id: required(event_type, fields, "id", EventValue::as_u64)?,
            client: required(event_type, fields, "client", EventValue::as_u64)?,
            provider: required(event_type, fields, "provider", EventValue::as_u64)?,
            piece_cid: required(event_type, fields, "pieceCid", |v| {
                v.as_cid().map(str::to_string)
            })?,
            piece_size: required(event_type, fields, "pieceSize", EventValue::as_u64)?,
            term_min: required(event_type, fields, "termMin", EventValue::as_i64)?,
            term_max: required(event_type, fields, "termMax", EventValue::as_i64)?,
            expiration: required(event_type, fields, "expiration", EventValue::as_i64)?,
        })
    }
}

fn required<T>(
    event_type: &str,
    fields: &FieldMap,
    name: &str,
    extract: impl Fn(&EventValue) -> Option<T>,
) -> SyncResult<T> {
    let value = fields.get(name).ok_or_else(|| {
        SyncError::MalformedEvent(format!("{} event missing field {}", event_type, name))
    })?;
    extract(value).ok_or_else(|| {
        SyncError::MalformedEvent(format!(
            "{} event field {} has unexpected value {:?}",
            event_type, name, value
        ))
    })
}

/// `piece-cid` -> `pieceCid`. Only a hyphen followed by a lower-case ASCII
/// letter is folded; anything else is kept as is.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('-', Some(next)) if next.is_ascii_lowercase() => {
                out.push(next.to_ascii_uppercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

/// Decodes an entry list into its event type and normalized field map.
pub fn entries_to_fields(entries: &[RawEventEntry]) -> SyncResult<(String, FieldMap)> {
    let (first, rest) = entries
        .split_first()
        .ok_or_else(|| SyncError::MalformedEvent("event has no entries".to_string()))?;
    if first.key != TYPE_KEY {
        return Err(SyncError::MalformedEvent(format!(
            "expected {} as first entry, found {}",
            TYPE_KEY, first.key
        )));
    }
    let event_type = match decode_entry_value(first)? {
        EventValue::Text(t) => t,
        other => {
            return Err(SyncError::MalformedEvent(format!(
                "{} value is not text: {:?}",
                TYPE_KEY, other
            )))
        }
    };

    let mut fields = FieldMap::new();
    for entry in rest {
        let key = normalize_key(&entry.key);
        if fields.contains_key(&key) {
            return Err(SyncError::DuplicateField(key));
        }
        let value = decode_entry_value(entry)?;
        fields.insert(key, value);
    }
    Ok((event_type, fields))
}

fn decode_entry_value(entry: &RawEventEntry) -> SyncResult<EventValue> {
    if entry.codec != CBOR_CODEC {
        return Err(SyncError::MalformedEvent(format!(
            "entry {} uses codec {:#x}, expected cbor",
            entry.key, entry.codec
        )));
    }
    decode_cbor_base64(&entry.value)
}

/// Decodes a raw event and attaches its envelope metadata.
pub fn decode_event(raw: &RawActorEvent) -> SyncResult<DecodedEvent> {
    let (event_type, fields) = entries_to_fields(&raw.entries)?;
    if let Some(key) = RESERVED_KEYS.iter().find(|k| fields.contains_key(**k)) {
        return Err(SyncError::MalformedEvent(format!(
            "{} event uses reserved field name {}",
            event_type, key
        )));
    }
    Ok(DecodedEvent {
        event_type,
        fields,
        height: raw.height,
        msg_cid: raw.msg_cid.cid.clone(),
        emitter: raw.emitter.clone(),
        reverted: raw.reverted,
    })
}

/// Builds the entry list for an event, the inverse of [`entries_to_fields`].
/// Keys are written as given (hyphen-case, as actors emit them).
pub fn encode_entries(
    event_type: &str,
    fields: &[(&str, EventValue)],
) -> SyncResult<Vec<RawEventEntry>> {
    let mut entries = Vec::with_capacity(fields.len() + 1);
    entries.push(encode_entry(
        TYPE_KEY,
        &EventValue::Text(event_type.to_string()),
    )?);
    for (key, value) in fields {
        entries.push(encode_entry(key, value)?);
    }
    Ok(entries)
}

pub fn encode_entry(key: &str, value: &EventValue) -> SyncResult<RawEventEntry> {
    Ok(RawEventEntry {
        flags: ENTRY_FLAGS_INDEXED,
        codec: CBOR_CODEC,
        key: key.to_string(),
        value: encode_cbor_base64(value)?,
    })
}

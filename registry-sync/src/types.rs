// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Actor id used to shard stored records (provider, client or verifier).
pub type PartitionKey = u64;

/// Event families tracked by a deployment. Each family produces one record
/// shape and one identity scheme, so a deployment must stick to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventFamily {
    /// `allocation` events, identified by allocation id
    Allocation,
    /// `verifier-balance` events paired with their message, identified by message CID
    VerifierBalance,
}

impl EventFamily {
    /// Event type names passed to the node's `$type` filter.
    pub fn event_types(&self) -> Vec<String> {
        match self {
            EventFamily::Allocation => vec!["allocation".to_string()],
            EventFamily::VerifierBalance => vec!["verifier-balance".to_string()],
        }
    }
}

/// Which actor id allocation records are grouped by. Verifier-balance
/// records are always grouped by verifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionBy {
    #[default]
    Provider,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    pub id: u64,
    pub client_id: u64,
    pub provider_id: u64,
    pub piece_cid: String,
    pub piece_size: u64,
    pub term_min: i64,
    pub term_max: i64,
    pub expiration: i64,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierBalanceEntry {
    pub verifier_id: u64,
    pub client_address: String,
    pub client_allowance: String,
    pub msg_cid: String,
    pub height: u64,
}

/// The durable unit written to the registry.
///
/// Serialized untagged so that stored files hold the bare camelCase objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllocationRecord {
    Allocation(AllocationEntry),
    VerifierBalance(VerifierBalanceEntry),
}

/// Identity key of a record. Keys of different record shapes never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Allocation(u64),
    Message(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Allocation(id) => write!(f, "allocation:{}", id),
            RecordId::Message(cid) => write!(f, "message:{}", cid),
        }
    }
}

impl AllocationRecord {
    pub fn id(&self) -> RecordId {
        match self {
            AllocationRecord::Allocation(a) => RecordId::Allocation(a.id),
            AllocationRecord::VerifierBalance(v) => RecordId::Message(v.msg_cid.clone()),
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            AllocationRecord::Allocation(a) => a.height,
            AllocationRecord::VerifierBalance(v) => v.height,
        }
    }

    pub fn partition_key(&self, by: PartitionBy) -> PartitionKey {
        match (self, by) {
            (AllocationRecord::Allocation(a), PartitionBy::Provider) => a.provider_id,
            (AllocationRecord::Allocation(a), PartitionBy::Client) => a.client_id,
            (AllocationRecord::VerifierBalance(v), _) => v.verifier_id,
        }
    }

    pub fn family(&self) -> EventFamily {
        match self {
            AllocationRecord::Allocation(_) => EventFamily::Allocation,
            AllocationRecord::VerifierBalance(_) => EventFamily::VerifierBalance,
        }
    }
}

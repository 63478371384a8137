// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mock clients and builders shared by unit tests.

use crate::encoding::EventValue;
use crate::error::{SyncError, SyncResult};
use crate::events::{encode_entries, CidLink, RawActorEvent, TYPE_KEY};
use crate::filfox_client::{DecodedMessage, MessageLookup};
use crate::allocators::Allocator;
use crate::lotus_client::{ActorEventFilter, ActorState, ChainRpcClient};
use crate::store::{AllocatorRegistry, MemoryRegistry, RecordStore};
use crate::types::{AllocationEntry, AllocationRecord, PartitionKey, VerifierBalanceEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const TEST_PIECE_CID: &str = "bafyreibuenncyubohem5h4ak6xnlxb6llcxpivtlcbrr6ks5xfevb277xu";

pub fn init_for_testing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_msg_cid(height: u64, index: usize) -> String {
    format!("bafy2bzacemsg{}x{}", height, index)
}

/// A built-in actor event emitted by the verified registry actor.
pub fn make_raw_event(
    height: u64,
    event_type: &str,
    fields: &[(&str, EventValue)],
) -> RawActorEvent {
    make_raw_event_with_msg(height, event_type, fields, &test_msg_cid(height, 0))
}

pub fn make_raw_event_with_msg(
    height: u64,
    event_type: &str,
    fields: &[(&str, EventValue)],
    msg_cid: &str,
) -> RawActorEvent {
    RawActorEvent {
        emitter: "f06".to_string(),
        entries: encode_entries(event_type, fields).unwrap(),
        reverted: false,
        height,
        tipset_key: serde_json::json!([{"/": format!("bafy2bzaceatipset{}", height)}]),
        msg_cid: CidLink {
            cid: msg_cid.to_string(),
        },
    }
}

/// Fields of an `allocation` event, keyed as the actor emits them.
pub fn allocation_fields(id: u64, client: u64, provider: u64) -> Vec<(&'static str, EventValue)> {
    vec![
        ("id", EventValue::Integer(id.into())),
        ("client", EventValue::Integer(client.into())),
        ("provider", EventValue::Integer(provider.into())),
        ("piece-cid", EventValue::Cid(TEST_PIECE_CID.to_string())),
        ("piece-size", EventValue::Integer(2048)),
        ("term-min", EventValue::Integer(518_400)),
        ("term-max", EventValue::Integer(5_256_000)),
        ("expiration", EventValue::Integer(4_100_000)),
    ]
}

pub fn allocation_event(height: u64, id: u64, client: u64, provider: u64) -> RawActorEvent {
    make_raw_event_with_msg(
        height,
        "allocation",
        &allocation_fields(id, client, provider),
        &test_msg_cid(height, id as usize),
    )
}

pub fn verifier_balance_event(height: u64, verifier: u64, msg_cid: &str) -> RawActorEvent {
    make_raw_event_with_msg(
        height,
        "verifier-balance",
        &[
            ("verifier", EventValue::Integer(verifier.into())),
            ("balance", EventValue::Bytes(vec![0x00, 0x04, 0x00])),
        ],
        msg_cid,
    )
}

pub fn allocation_record(id: u64, client: u64, provider: u64, height: u64) -> AllocationRecord {
    AllocationRecord::Allocation(AllocationEntry {
        id,
        client_id: client,
        provider_id: provider,
        piece_cid: TEST_PIECE_CID.to_string(),
        piece_size: 2048,
        term_min: 518_400,
        term_max: 5_256_000,
        expiration: 4_100_000,
        height,
    })
}

pub fn verifier_balance_record(verifier: u64, msg_cid: &str, height: u64) -> AllocationRecord {
    AllocationRecord::VerifierBalance(VerifierBalanceEntry {
        verifier_id: verifier,
        client_address: format!("f1client{}", verifier),
        client_allowance: "1024".to_string(),
        msg_cid: msg_cid.to_string(),
        height,
    })
}

pub fn multisig_actor_state(signer_ids: &[&str], threshold: u64) -> ActorState {
    ActorState {
        balance: "0".to_string(),
        code: Some(CidLink {
            cid: "bafk2bzacemultisig".to_string(),
        }),
        state: serde_json::json!({
            "Signers": signer_ids,
            "NumApprovalsThreshold": threshold,
            "NextTxnID": 0,
            "InitialBalance": "0",
            "StartEpoch": 0,
            "UnlockDuration": 0,
            "PendingTxns": {"/": "bafy2bzaceapending"}
        }),
    }
}

pub fn account_actor_state(address: &str) -> ActorState {
    ActorState {
        balance: "0".to_string(),
        code: Some(CidLink {
            cid: "bafk2bzaceaccount".to_string(),
        }),
        state: serde_json::json!({ "Address": address }),
    }
}

// Mock chain node used in test environments.
#[derive(Clone, Debug, Default)]
pub struct MockChainClient {
    head: Arc<AtomicU64>,
    events: Arc<Mutex<Vec<RawActorEvent>>>,
    // queries spanning more heights than this fail with ResponseTooLarge
    max_span: Arc<Mutex<Option<u64>>>,
    range_errors: Arc<Mutex<HashMap<(u64, u64), SyncError>>>,
    queried_ranges: Arc<Mutex<Vec<(u64, u64)>>>,
    states: Arc<Mutex<HashMap<String, SyncResult<ActorState>>>>,
    state_reads: Arc<AtomicUsize>,
    cancel_on_query: Arc<Mutex<Option<(usize, CancellationToken)>>>,
}

impl MockChainClient {
    pub fn new(head: u64) -> Self {
        let client = Self::default();
        client.set_head(head);
        client
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_events(&self, events: impl IntoIterator<Item = RawActorEvent>) {
        self.events.lock().unwrap().extend(events);
    }

    pub fn set_max_span(&self, span: u64) {
        self.max_span.lock().unwrap().replace(span);
    }

    pub fn add_range_error(&self, from: u64, to: u64, error: SyncError) {
        self.range_errors.lock().unwrap().insert((from, to), error);
    }

    /// Cancels `token` while serving the `nth` event query (1-based).
    pub fn cancel_on_query(&self, nth: usize, token: CancellationToken) {
        self.cancel_on_query.lock().unwrap().replace((nth, token));
    }

    pub fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.queried_ranges.lock().unwrap().clone()
    }

    pub fn add_state(&self, address: &str, state: ActorState) {
        self.states
            .lock()
            .unwrap()
            .insert(address.to_string(), Ok(state));
    }

    pub fn add_state_error(&self, address: &str, error: SyncError) {
        self.states
            .lock()
            .unwrap()
            .insert(address.to_string(), Err(error));
    }

    pub fn state_reads(&self) -> usize {
        self.state_reads.load(Ordering::SeqCst)
    }

    fn type_matches(event: &RawActorEvent, event_types: &[String]) -> bool {
        let Some(first) = event.entries.first() else {
            return true;
        };
        if first.key != TYPE_KEY {
            return true;
        }
        match crate::encoding::decode_cbor_base64(&first.value) {
            Ok(EventValue::Text(t)) => event_types.contains(&t),
            _ => true,
        }
    }
}

#[async_trait]
impl ChainRpcClient for MockChainClient {
    async fn chain_head(&self) -> SyncResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn actor_events_raw(&self, filter: &ActorEventFilter) -> SyncResult<Vec<RawActorEvent>> {
        let (from, to) = (filter.from_height, filter.to_height);
        let query_count = {
            let mut ranges = self.queried_ranges.lock().unwrap();
            ranges.push((from, to));
            ranges.len()
        };
        if let Some((nth, token)) = self.cancel_on_query.lock().unwrap().as_ref() {
            if *nth == query_count {
                token.cancel();
            }
        }
        if let Some(err) = self.range_errors.lock().unwrap().get(&(from, to)) {
            return Err(err.clone());
        }
        if let Some(span) = *self.max_span.lock().unwrap() {
            if to - from > span {
                return Err(SyncError::ResponseTooLarge(
                    "Response is too big".to_string(),
                ));
            }
        }
        let event_types = filter
            .fields
            .get(TYPE_KEY)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| match crate::encoding::decode_cbor_base64(&v.value) {
                        Ok(EventValue::Text(t)) => Some(t),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let mut events: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.height >= from && e.height <= to)
            .filter(|e| Self::type_matches(e, &event_types))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.height);
        Ok(events)
    }

    async fn read_state(&self, address: &str) -> SyncResult<ActorState> {
        self.state_reads.fetch_add(1, Ordering::SeqCst);
        self.states
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_else(|| {
                Err(SyncError::Rpc {
                    code: 1,
                    message: format!("actor not found: {}", address),
                })
            })
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockMessageLookup {
    messages: Arc<Mutex<HashMap<String, SyncResult<DecodedMessage>>>>,
    lookups: Arc<Mutex<Vec<String>>>,
}

impl MockMessageLookup {
    pub fn add_message(&self, msg_cid: &str, address: &str, allowance: &str) {
        self.messages.lock().unwrap().insert(
            msg_cid.to_string(),
            Ok(DecodedMessage {
                method: Some("AddVerifiedClient".to_string()),
                address: address.to_string(),
                allowance: allowance.to_string(),
            }),
        );
    }

    pub fn add_error(&self, msg_cid: &str, error: SyncError) {
        self.messages
            .lock()
            .unwrap()
            .insert(msg_cid.to_string(), Err(error));
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageLookup for MockMessageLookup {
    async fn decoded_message(&self, msg_cid: &str) -> SyncResult<DecodedMessage> {
        self.lookups.lock().unwrap().push(msg_cid.to_string());
        self.messages
            .lock()
            .unwrap()
            .get(msg_cid)
            .cloned()
            .unwrap_or_else(|| {
                Err(SyncError::InvalidResponse(format!(
                    "no subcalls recorded for message {}",
                    msg_cid
                )))
            })
    }
}

/// A [`MemoryRegistry`] whose partition writes can be made to fail once.
#[derive(Clone, Debug, Default)]
pub struct FlakyRegistry {
    inner: MemoryRegistry,
    failures: Arc<Mutex<HashMap<PartitionKey, SyncError>>>,
}

impl FlakyRegistry {
    pub fn new(inner: MemoryRegistry) -> Self {
        Self {
            inner,
            failures: Default::default(),
        }
    }

    /// The next write of `partition` fails with `error`; later writes succeed.
    pub fn fail_next_write(&self, partition: PartitionKey, error: SyncError) {
        self.failures.lock().unwrap().insert(partition, error);
    }

    pub fn inner(&self) -> &MemoryRegistry {
        &self.inner
    }
}

#[async_trait]
impl RecordStore for FlakyRegistry {
    async fn read_all(&self) -> SyncResult<Vec<AllocationRecord>> {
        self.inner.read_all().await
    }

    async fn read(&self, partition: PartitionKey) -> SyncResult<Vec<AllocationRecord>> {
        self.inner.read(partition).await
    }

    async fn write(&self, partition: PartitionKey, records: &[AllocationRecord]) -> SyncResult<()> {
        let failure = self.failures.lock().unwrap().remove(&partition);
        match failure {
            Some(error) => Err(error),
            None => self.inner.write(partition, records).await,
        }
    }

    async fn read_checkpoint(&self) -> SyncResult<Option<u64>> {
        self.inner.read_checkpoint().await
    }

    async fn write_checkpoint(&self, next_height: u64) -> SyncResult<()> {
        self.inner.write_checkpoint(next_height).await
    }
}

#[async_trait]
impl AllocatorRegistry for FlakyRegistry {
    async fn list_allocators(&self) -> SyncResult<Vec<Allocator>> {
        self.inner.list_allocators().await
    }

    async fn write_allocator(&self, allocator: &Allocator) -> SyncResult<()> {
        self.inner.write_allocator(allocator).await
    }
}

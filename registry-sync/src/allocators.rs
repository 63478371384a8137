// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Allocator registry entries and multisig signer drift detection.

use crate::lotus_client::ChainRpcClient;
use crate::metrics::SyncMetrics;
use crate::multisig::MultisigResolver;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Address prefix of actor (multisig) addresses on mainnet.
pub const ACTOR_ADDRESS_PREFIX: &str = "f2";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathwayAddresses {
    #[serde(default)]
    pub msig: String,
    #[serde(default)]
    pub signer: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One `Allocators/<n>.json` entry. Fields this service does not touch are
/// carried through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocator {
    pub application_number: u64,
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pathway_addresses: PathwayAddresses,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Allocator {
    pub fn is_multisig(&self) -> bool {
        self.address.starts_with(ACTOR_ADDRESS_PREFIX)
    }
}

/// Resolves every multisig allocator and returns copies of those whose
/// recorded signers differ from the chain, with the signer list replaced.
/// Allocators that cannot be resolved are logged and left alone.
pub async fn check_allocators<C: ChainRpcClient>(
    resolver: &MultisigResolver<C>,
    allocators: &[Allocator],
    metrics: Option<&Arc<SyncMetrics>>,
) -> Vec<Allocator> {
    let candidates: Vec<&Allocator> = allocators.iter().filter(|a| a.is_multisig()).collect();
    tracing::debug!(
        "[Allocators] Checking {} of {} allocators for signer changes",
        candidates.len(),
        allocators.len()
    );

    let results = join_all(candidates.iter().map(|a| resolver.resolve(&a.address))).await;

    let mut updated = Vec::new();
    for (allocator, result) in candidates.into_iter().zip(results) {
        match result {
            Ok(multisig) if multisig.signers_match(&allocator.pathway_addresses.signer) => {
                tracing::debug!(
                    "[Allocators] Multisig signers for {} are up to date",
                    allocator.address
                );
            }
            Ok(multisig) => {
                tracing::info!(
                    "[Allocators] Multisig signers for allocator {} ({}) have changed",
                    allocator.application_number,
                    allocator.address
                );
                if let Some(m) = metrics {
                    m.signer_drift_detected.inc();
                }
                let mut changed = allocator.clone();
                changed.pathway_addresses.signer = multisig.ordered_signers;
                updated.push(changed);
            }
            Err(e) => {
                tracing::error!(
                    "[Allocators] Unable to fetch multisig data for {}: {}",
                    allocator.address,
                    e
                );
                if let Some(m) = metrics {
                    m.allocator_check_failures.inc();
                }
            }
        }
    }
    updated
}

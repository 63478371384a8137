// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Resolves a multisig actor into its approval threshold and the set of
//! signer addresses, as opposed to the actor ids the multisig state stores.

use crate::error::{SyncError, SyncResult};
use crate::lotus_client::ChainRpcClient;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MultisigActorState {
    signers: Vec<String>,
    num_approvals_threshold: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountActorState {
    address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigState {
    pub address: String,
    pub threshold: u64,
    pub signers: BTreeSet<String>,
    /// Resolved addresses in the order the multisig state lists them, without
    /// repeats. Written back to the registry so drift updates keep chain order.
    pub ordered_signers: Vec<String>,
}

impl MultisigState {
    /// Compares resolved signers against a recorded list, ignoring order and
    /// repeats.
    pub fn signers_match<I, S>(&self, recorded: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let recorded: BTreeSet<String> = recorded
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        self.signers == recorded
    }
}

/// Set equality of two signer lists.
pub fn signer_sets_equal<S: AsRef<str>>(a: &[S], b: &[S]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let b: BTreeSet<&str> = b.iter().map(AsRef::as_ref).collect();
    a == b
}

pub struct MultisigResolver<C> {
    client: Arc<C>,
}

impl<C: ChainRpcClient> MultisigResolver<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    pub async fn resolve(&self, address: &str) -> SyncResult<MultisigState> {
        let state: MultisigActorState = self.client.read_state(address).await?.parse()?;

        let resolved = join_all(state.signers.iter().map(|id| self.resolve_signer(id))).await;
        let mut signers = BTreeSet::new();
        let mut ordered_signers = Vec::with_capacity(state.signers.len());
        for (id, result) in state.signers.iter().zip(resolved) {
            match result {
                Ok(signer) => {
                    if signers.insert(signer.clone()) {
                        ordered_signers.push(signer);
                    }
                }
                Err(e) => {
                    return Err(SyncError::SignerResolutionFailed {
                        signer: id.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        tracing::debug!(
            "[Multisig] {} has {} signers, threshold {}",
            address,
            signers.len(),
            state.num_approvals_threshold
        );
        Ok(MultisigState {
            address: address.to_string(),
            threshold: state.num_approvals_threshold,
            signers,
            ordered_signers,
        })
    }

    async fn resolve_signer(&self, id: &str) -> SyncResult<String> {
        let account: AccountActorState = self.client.read_state(id).await?.parse()?;
        Ok(account.address)
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! One synchronization pass and the loop that repeats it.
//!
//! `Idle -> allocator check -> Fetching -> Reconciling -> Persisting -> Idle`.
//! Nothing is written before Persisting, so a pass that fails earlier leaves
//! the registry untouched. The resume height lives in the store's checkpoint,
//! which is pinned before the first file of a pass is written and advanced
//! only after the last one, so a pass that fails while persisting is fetched
//! again from the same height and merged idempotently.

use crate::allocators::{check_allocators, Allocator};
use crate::chain_syncer::{EventFetcher, FetchRequest};
use crate::config::SyncNodeConfig;
use crate::error::{SyncError, SyncResult};
use crate::filfox_client::MessageLookup;
use crate::lotus_client::ChainRpcClient;
use crate::metrics::SyncMetrics;
use crate::multisig::MultisigResolver;
use crate::reconcile::{count_new_records, ReconciliationEngine};
use crate::store::{AllocatorRegistry, RecordStore};
use crate::types::{AllocationRecord, EventFamily, PartitionKey};
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub from_height: u64,
    pub to_height: u64,
    pub records_fetched: usize,
    pub records_added: usize,
    pub updated_partitions: Vec<PartitionKey>,
    pub updated_allocators: Vec<u64>,
    /// Height the next pass starts from
    pub next_height: u64,
}

impl PassReport {
    pub fn has_changes(&self) -> bool {
        !self.updated_partitions.is_empty() || !self.updated_allocators.is_empty()
    }

    /// Human-readable summary of the files a pass changed.
    pub fn changelog(&self) -> String {
        let mut out = String::new();
        if !self.updated_allocators.is_empty() {
            out.push_str("Updated multisig signers for the following allocators:\n");
            for n in &self.updated_allocators {
                let _ = writeln!(out, "- Allocator: {}", n);
            }
        }
        if !self.updated_partitions.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Updated allocations for the following partitions:\n");
            for key in &self.updated_partitions {
                let _ = writeln!(out, "- Partition: {}", key);
            }
        }
        out
    }
}

pub struct SyncNode<C, L, S> {
    fetcher: EventFetcher<C, L>,
    resolver: MultisigResolver<C>,
    store: Arc<S>,
    engine: ReconciliationEngine,
    family: EventFamily,
    start_height: u64,
    confirmations: u64,
    check_allocators: bool,
    metrics: Option<Arc<SyncMetrics>>,
}

impl<C, L, S> SyncNode<C, L, S>
where
    C: ChainRpcClient,
    L: MessageLookup,
    S: RecordStore + AllocatorRegistry,
{
    pub fn new(client: Arc<C>, lookup: Arc<L>, store: Arc<S>, config: &SyncNodeConfig) -> Self {
        Self {
            fetcher: EventFetcher::new(client.clone(), lookup, config.fetch.clone()),
            resolver: MultisigResolver::new(client),
            store,
            engine: ReconciliationEngine::new(config.partition_by),
            family: config.event_family,
            start_height: config.start_height,
            confirmations: config.confirmations,
            check_allocators: config.check_allocators,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.fetcher = self.fetcher.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub async fn run_pass(&self, cancel: &CancellationToken) -> SyncResult<PassReport> {
        let result = self.run_pass_inner(cancel).await;
        if let Some(m) = &self.metrics {
            match &result {
                Ok(report) => {
                    m.passes_completed.inc();
                    m.records_merged.inc_by(report.records_added as u64);
                    m.partitions_written
                        .inc_by(report.updated_partitions.len() as u64);
                    m.last_synced_height.set(report.to_height as i64);
                    m.last_successful_pass_timestamp.set(
                        SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs() as i64,
                    );
                }
                Err(e) => m.pass_errors.with_label_values(&[e.error_type()]).inc(),
            }
        }
        result
    }

    async fn run_pass_inner(&self, cancel: &CancellationToken) -> SyncResult<PassReport> {
        let updated_allocators = if self.check_allocators {
            self.changed_allocators().await?
        } else {
            vec![]
        };
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let existing = self.store.read_all().await?;
        let checkpoint = self.store.read_checkpoint().await?;
        let from_height = checkpoint
            .or_else(|| resume_height(&existing))
            .unwrap_or(self.start_height);
        info!(
            "[SyncNode] {} stored records, syncing {:?} events from height {}",
            existing.len(),
            self.family,
            from_height
        );

        let request = FetchRequest {
            from_height,
            to_height: None,
            event_types: self.family.event_types(),
            confirmations: self.confirmations,
        };
        let outcome = self.fetcher.fetch(&request, cancel).await?;
        let records_fetched = outcome.records.len();

        let merged = self.engine.merge(&existing, outcome.records);
        let records_added = count_new_records(&existing, &merged);
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // Persisting
        if checkpoint.is_none() && (!merged.is_empty() || !updated_allocators.is_empty()) {
            self.store.write_checkpoint(from_height).await?;
        }
        for (partition, records) in &merged {
            self.store.write(*partition, records).await?;
        }
        for allocator in &updated_allocators {
            self.store.write_allocator(allocator).await?;
        }

        let next_height = merged
            .values()
            .flatten()
            .chain(existing.iter())
            .map(AllocationRecord::height)
            .max()
            .map(|h| h + 1)
            .unwrap_or(from_height)
            .max(from_height);
        if checkpoint != Some(next_height) {
            self.store.write_checkpoint(next_height).await?;
        }
        let report = PassReport {
            from_height: outcome.from_height,
            to_height: outcome.to_height,
            records_fetched,
            records_added,
            updated_partitions: merged.keys().copied().collect(),
            updated_allocators: updated_allocators
                .iter()
                .map(|a| a.application_number)
                .collect(),
            next_height,
        };
        if report.has_changes() {
            info!(
                "[SyncNode] Pass wrote {} partitions ({} new records) and {} allocators",
                report.updated_partitions.len(),
                report.records_added,
                report.updated_allocators.len()
            );
        } else {
            info!("[SyncNode] No files to update");
        }
        Ok(report)
    }

    async fn changed_allocators(&self) -> SyncResult<Vec<Allocator>> {
        let allocators = self.store.list_allocators().await?;
        info!("[SyncNode] Found {} allocators", allocators.len());
        let updated = check_allocators(&self.resolver, &allocators, self.metrics.as_ref()).await;
        if updated.is_empty() {
            info!("[SyncNode] No allocators to update");
        }
        Ok(updated)
    }

    /// Runs a pass every `interval` until `cancel` fires. Recoverable errors
    /// are logged and retried on the next tick; anything else stops the loop.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) -> SyncResult<()> {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[SyncNode] Sync loop cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.run_pass(&cancel).await {
                        Ok(report) => info!(
                            "[SyncNode] Pass finished at height {}, next pass starts at {}",
                            report.to_height, report.next_height
                        ),
                        Err(SyncError::Cancelled) => {
                            info!("[SyncNode] Pass cancelled");
                            return Ok(());
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!("[SyncNode] Pass failed, retrying next interval: {}", e)
                        }
                        Err(e) => {
                            error!("[SyncNode] Pass failed: {}", e);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

/// One above the highest stored height, for registries written before the
/// checkpoint existed.
fn resume_height(records: &[AllocationRecord]) -> Option<u64> {
    records.iter().map(AllocationRecord::height).max().map(|h| h + 1)
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Merges freshly fetched records into the persisted collection.
//!
//! Partitions are append-only. A record whose identity key is already
//! present in its partition is skipped, so re-fetching an overlapping height
//! range never duplicates output.

use crate::types::{AllocationRecord, PartitionBy, PartitionKey, RecordId};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Full contents of every partition that changed.
pub type PartitionedRecords = BTreeMap<PartitionKey, Vec<AllocationRecord>>;

#[derive(Default)]
struct Partition {
    records: Vec<AllocationRecord>,
    ids: HashSet<RecordId>,
    appended: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine {
    partition_by: PartitionBy,
}

impl ReconciliationEngine {
    pub fn new(partition_by: PartitionBy) -> Self {
        Self { partition_by }
    }

    pub fn partition_by(&self) -> PartitionBy {
        self.partition_by
    }

    /// Returns only the partitions that gained at least one record, each with
    /// its existing records followed by the new ones in incoming order.
    pub fn merge(
        &self,
        existing: &[AllocationRecord],
        incoming: Vec<AllocationRecord>,
    ) -> PartitionedRecords {
        let touched: BTreeSet<PartitionKey> = incoming
            .iter()
            .map(|r| r.partition_key(self.partition_by))
            .collect();

        // single pass over existing, copying only touched partitions
        let mut partitions: BTreeMap<PartitionKey, Partition> = BTreeMap::new();
        for record in existing {
            let key = record.partition_key(self.partition_by);
            if !touched.contains(&key) {
                continue;
            }
            let partition = partitions.entry(key).or_default();
            partition.ids.insert(record.id());
            partition.records.push(record.clone());
        }

        for record in incoming {
            let key = record.partition_key(self.partition_by);
            let partition = partitions.entry(key).or_default();
            if partition.ids.insert(record.id()) {
                partition.records.push(record);
                partition.appended += 1;
            } else {
                tracing::trace!(
                    "[Reconcile] {} already present in partition {}",
                    record.id(),
                    key
                );
            }
        }

        partitions
            .into_iter()
            .filter(|(_, p)| p.appended > 0)
            .map(|(key, p)| {
                tracing::debug!(
                    "[Reconcile] Partition {}: {} new records, {} total",
                    key,
                    p.appended,
                    p.records.len()
                );
                (key, p.records)
            })
            .collect()
    }
}

/// Number of records in `merged` that are not in `existing`.
pub fn count_new_records(existing: &[AllocationRecord], merged: &PartitionedRecords) -> usize {
    let known: HashSet<RecordId> = existing.iter().map(AllocationRecord::id).collect();
    merged
        .values()
        .flatten()
        .filter(|r| !known.contains(&r.id()))
        .count()
}

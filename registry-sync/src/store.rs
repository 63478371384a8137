// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persistence of partitions and allocator entries.
//!
//! The file layout mirrors the public allocator registry repository:
//!
//! ```text
//! <root>/Allocations/<partition key>.json   JSON array of records
//! <root>/Allocators/<application number>.json
//! <root>/.sync-checkpoint.json              height the next pass resumes from
//! ```
//!
//! Writes are full replacements; there are no partial or delta writes.
//! The checkpoint only moves after every file of a pass has been written, so
//! a pass that fails halfway is fetched again from the same height.

use crate::allocators::Allocator;
use crate::error::{SyncError, SyncResult};
use crate::types::{AllocationRecord, PartitionKey};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const ALLOCATIONS_DIR: &str = "Allocations";
pub const ALLOCATORS_DIR: &str = "Allocators";
pub const CHECKPOINT_FILE: &str = ".sync-checkpoint.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SyncCheckpoint {
    next_height: u64,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every persisted record across all partitions.
    async fn read_all(&self) -> SyncResult<Vec<AllocationRecord>>;

    /// Records of one partition, empty when the partition does not exist.
    async fn read(&self, partition: PartitionKey) -> SyncResult<Vec<AllocationRecord>>;

    /// Replaces the full contents of one partition.
    async fn write(&self, partition: PartitionKey, records: &[AllocationRecord]) -> SyncResult<()>;

    /// Height the next pass resumes from, `None` before the first checkpoint.
    async fn read_checkpoint(&self) -> SyncResult<Option<u64>>;

    async fn write_checkpoint(&self, next_height: u64) -> SyncResult<()>;
}

#[async_trait]
pub trait AllocatorRegistry: Send + Sync {
    async fn list_allocators(&self) -> SyncResult<Vec<Allocator>>;

    async fn write_allocator(&self, allocator: &Allocator) -> SyncResult<()>;
}

/// `<digits>.json`, the only file names read from the registry directories.
fn numbered_json_stem(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[derive(Clone, Debug)]
pub struct FileRegistry {
    root: PathBuf,
}

impl FileRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_path(&self, partition: PartitionKey) -> PathBuf {
        self.root
            .join(ALLOCATIONS_DIR)
            .join(format!("{}.json", partition))
    }

    fn allocator_path(&self, application_number: u64) -> PathBuf {
        self.root
            .join(ALLOCATORS_DIR)
            .join(format!("{}.json", application_number))
    }

    /// Numbered JSON files in `dir`, ascending. A missing directory is empty.
    async fn numbered_files(&self, dir: &str) -> SyncResult<Vec<(u64, PathBuf)>> {
        let dir = self.root.join(dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(store_error(&dir, e)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_error(&dir, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            match numbered_json_stem(&path) {
                Some(n) if is_file => files.push((n, path)),
                _ => tracing::trace!("[Store] Ignoring {}", path.display()),
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> SyncResult<Option<T>> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(path, e)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| SyncError::Store(format!("{}: {}", path.display(), e)))
    }

    /// Writes through a sibling temp file so readers never see a torn file.
    async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_error(parent, e))?;
        }
        let mut content = serde_json::to_vec_pretty(value)
            .map_err(|e| SyncError::Store(format!("{}: {}", path.display(), e)))?;
        content.push(b'\n');
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| store_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| store_error(path, e))
    }
}

fn store_error(path: &Path, err: std::io::Error) -> SyncError {
    SyncError::Store(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl RecordStore for FileRegistry {
    async fn read_all(&self) -> SyncResult<Vec<AllocationRecord>> {
        let mut records = Vec::new();
        for (_, path) in self.numbered_files(ALLOCATIONS_DIR).await? {
            // a partition that fails to parse aborts the read; merging without
            // it would overwrite the file with only the new records
            if let Some(partition) = Self::read_json::<Vec<AllocationRecord>>(&path).await? {
                records.extend(partition);
            }
        }
        Ok(records)
    }

    async fn read(&self, partition: PartitionKey) -> SyncResult<Vec<AllocationRecord>> {
        Ok(Self::read_json(&self.partition_path(partition))
            .await?
            .unwrap_or_default())
    }

    async fn write(&self, partition: PartitionKey, records: &[AllocationRecord]) -> SyncResult<()> {
        Self::write_json(&self.partition_path(partition), records).await
    }

    async fn read_checkpoint(&self) -> SyncResult<Option<u64>> {
        Ok(Self::read_json::<SyncCheckpoint>(&self.root.join(CHECKPOINT_FILE))
            .await?
            .map(|c| c.next_height))
    }

    async fn write_checkpoint(&self, next_height: u64) -> SyncResult<()> {
        Self::write_json(
            &self.root.join(CHECKPOINT_FILE),
            &SyncCheckpoint { next_height },
        )
        .await
    }
}

#[async_trait]
impl AllocatorRegistry for FileRegistry {
    async fn list_allocators(&self) -> SyncResult<Vec<Allocator>> {
        let mut allocators = Vec::new();
        for (_, path) in self.numbered_files(ALLOCATORS_DIR).await? {
            // allocator entries are maintained by hand; one bad file only
            // excludes that allocator from the signer check
            match Self::read_json::<Allocator>(&path).await {
                Ok(Some(allocator)) => allocators.push(allocator),
                Ok(None) => {}
                Err(e) => tracing::warn!("[Store] Skipping allocator file: {}", e),
            }
        }
        Ok(allocators)
    }

    async fn write_allocator(&self, allocator: &Allocator) -> SyncResult<()> {
        Self::write_json(&self.allocator_path(allocator.application_number), allocator).await
    }
}

/// In-memory registry for tests and dry runs.
#[derive(Clone, Debug, Default)]
pub struct MemoryRegistry {
    partitions: Arc<Mutex<BTreeMap<PartitionKey, Vec<AllocationRecord>>>>,
    allocators: Arc<Mutex<BTreeMap<u64, Allocator>>>,
    writes: Arc<Mutex<Vec<PartitionKey>>>,
    checkpoint: Arc<Mutex<Option<u64>>>,
}

impl MemoryRegistry {
    pub fn with_partitions(
        partitions: impl IntoIterator<Item = (PartitionKey, Vec<AllocationRecord>)>,
    ) -> Self {
        let registry = Self::default();
        registry.lock_partitions().extend(partitions);
        registry
    }

    pub fn add_allocator(&self, allocator: Allocator) {
        self.lock_allocators()
            .insert(allocator.application_number, allocator);
    }

    pub fn partitions(&self) -> BTreeMap<PartitionKey, Vec<AllocationRecord>> {
        self.lock_partitions().clone()
    }

    pub fn allocators(&self) -> Vec<Allocator> {
        self.lock_allocators().values().cloned().collect()
    }

    /// Partition keys in write order.
    pub fn writes(&self) -> Vec<PartitionKey> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn checkpoint(&self) -> Option<u64> {
        *self.checkpoint.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_partitions(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<PartitionKey, Vec<AllocationRecord>>> {
        self.partitions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_allocators(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Allocator>> {
        self.allocators.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryRegistry {
    async fn read_all(&self) -> SyncResult<Vec<AllocationRecord>> {
        Ok(self.lock_partitions().values().flatten().cloned().collect())
    }

    async fn read(&self, partition: PartitionKey) -> SyncResult<Vec<AllocationRecord>> {
        Ok(self
            .lock_partitions()
            .get(&partition)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, partition: PartitionKey, records: &[AllocationRecord]) -> SyncResult<()> {
        self.lock_partitions().insert(partition, records.to_vec());
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(partition);
        Ok(())
    }

    async fn read_checkpoint(&self) -> SyncResult<Option<u64>> {
        Ok(self.checkpoint())
    }

    async fn write_checkpoint(&self, next_height: u64) -> SyncResult<()> {
        *self.checkpoint.lock().unwrap_or_else(|e| e.into_inner()) = Some(next_height);
        Ok(())
    }
}

#[async_trait]
impl AllocatorRegistry for MemoryRegistry {
    async fn list_allocators(&self) -> SyncResult<Vec<Allocator>> {
        Ok(self.allocators())
    }

    async fn write_allocator(&self, allocator: &Allocator) -> SyncResult<()> {
        self.add_allocator(allocator.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{allocation_record, verifier_balance_record};
    use serde_json::json;

    #[test]
    fn test_numbered_json_stem() {
        assert_eq!(numbered_json_stem(Path::new("Allocations/1234.json")), Some(1234));
        assert_eq!(numbered_json_stem(Path::new("0.json")), Some(0));
        assert_eq!(numbered_json_stem(Path::new("abc.json")), None);
        assert_eq!(numbered_json_stem(Path::new("12.json.tmp")), None);
        assert_eq!(numbered_json_stem(Path::new("-1.json")), None);
        assert_eq!(numbered_json_stem(Path::new(".json")), None);
        assert_eq!(numbered_json_stem(Path::new("README.md")), None);
    }

    #[tokio::test]
    async fn test_file_registry_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(dir.path());
        let records = vec![
            allocation_record(1, 1000, 2000, 10),
            allocation_record(2, 1001, 2000, 20),
        ];

        assert!(registry.read(2000).await.unwrap().is_empty());
        registry.write(2000, &records).await.unwrap();

        assert_eq!(registry.read(2000).await.unwrap(), records);
        assert_eq!(registry.read_all().await.unwrap(), records);
        let written = std::fs::read_to_string(dir.path().join("Allocations/2000.json")).unwrap();
        assert!(written.contains("\"providerId\": 2000"));
        assert!(written.ends_with("]\n"));
        assert!(!dir.path().join("Allocations/2000.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_all_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(dir.path());
        registry
            .write(55, &[verifier_balance_record(55, "bafymsg1", 100)])
            .await
            .unwrap();
        std::fs::write(dir.path().join("Allocations/README.md"), "notes").unwrap();
        std::fs::write(dir.path().join("Allocations/draft.json"), "[]").unwrap();

        let records = registry.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_partition_fails_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(ALLOCATIONS_DIR)).unwrap();
        std::fs::write(dir.path().join("Allocations/7.json"), "{not json").unwrap();

        let err = FileRegistry::new(dir.path()).read_all().await.unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(dir.path().join("nope"));
        assert!(registry.read_all().await.unwrap().is_empty());
        assert!(registry.list_allocators().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allocator_files() {
        let dir = tempfile::tempdir().unwrap();
        let allocators_dir = dir.path().join(ALLOCATORS_DIR);
        std::fs::create_dir_all(&allocators_dir).unwrap();
        let entry = json!({
            "application_number": 1005,
            "address": "f2abc",
            "name": "Example",
            "pathway_addresses": {"msig": "f2abc", "signer": ["f1a"]},
            "status": "Active"
        });
        std::fs::write(allocators_dir.join("1005.json"), entry.to_string()).unwrap();
        std::fs::write(allocators_dir.join("1006.json"), "broken").unwrap();

        let registry = FileRegistry::new(dir.path());
        let mut allocators = registry.list_allocators().await.unwrap();
        assert_eq!(allocators.len(), 1);

        allocators[0].pathway_addresses.signer = vec!["f1b".to_string()];
        registry.write_allocator(&allocators[0]).await.unwrap();

        let written: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(allocators_dir.join("1005.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written["pathway_addresses"]["signer"], json!(["f1b"]));
        assert_eq!(written["status"], "Active");
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(dir.path());
        assert_eq!(registry.read_checkpoint().await.unwrap(), None);

        registry.write_checkpoint(4_000_123).await.unwrap();

        assert_eq!(registry.read_checkpoint().await.unwrap(), Some(4_000_123));
        let written: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(CHECKPOINT_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(written, json!({"next-height": 4_000_123}));
        // the checkpoint is not mistaken for a partition
        assert!(registry.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_registry() {
        let registry =
            MemoryRegistry::with_partitions([(2000, vec![allocation_record(1, 1000, 2000, 10)])]);
        assert_eq!(registry.read_all().await.unwrap().len(), 1);
        assert!(registry.read(3000).await.unwrap().is_empty());

        registry
            .write(3000, &[allocation_record(2, 1000, 3000, 20)])
            .await
            .unwrap();
        assert_eq!(registry.writes(), vec![3000]);
        assert_eq!(registry.partitions().len(), 2);
    }
}

//! In-Memory Storage Implementation
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the service restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{CreateOutcome, RedemptionStore, StorageError, StorageResult};
use crate::types::redemption::{Redemption, RedemptionStatus};

/// In-memory redemption store
///
/// The version check and the write happen under one write lock, which gives
/// the same compare-and-swap guarantee as the SQLite store.
#[derive(Clone, Default)]
pub struct MemoryRedemptionStore {
    /// Records indexed by redemption ID
    records: Arc<RwLock<HashMap<String, Redemption>>>,
}

impl MemoryRedemptionStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RedemptionStore for MemoryRedemptionStore {
    async fn create(&self, record: &Redemption) -> StorageResult<CreateOutcome> {
        let mut records = self.records.write().await;

        if records.contains_key(&record.id) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        records.insert(record.id.clone(), record.clone());
        Ok(CreateOutcome::Created)
    }

    async fn update(&self, record: &Redemption, expected_version: u64) -> StorageResult<u64> {
        let mut records = self.records.write().await;

        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| StorageError::NotFound(record.id.clone()))?;

        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: record.id.clone(),
                expected: expected_version,
            });
        }

        let mut next = record.clone();
        next.version = expected_version + 1;
        *stored = next;

        Ok(expected_version + 1)
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Redemption>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn get_by_status(
        &self,
        status: RedemptionStatus,
        chain_name: Option<&str>,
    ) -> StorageResult<Vec<Redemption>> {
        let records = self.records.read().await;

        let mut matching: Vec<Redemption> = records
            .values()
            .filter(|r| r.status == status)
            .filter(|r| chain_name.map_or(true, |chain| r.chain_name == chain))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.dates
                .created_at
                .cmp(&b.dates.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(matching)
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn count_by_status(
        &self,
        chain_name: Option<&str>,
    ) -> StorageResult<HashMap<RedemptionStatus, u64>> {
        let records = self.records.read().await;

        let mut counts = HashMap::new();
        for record in records
            .values()
            .filter(|r| chain_name.map_or(true, |chain| r.chain_name == chain))
        {
            *counts.entry(record.status).or_insert(0) += 1;
        }

        Ok(counts)
    }
}

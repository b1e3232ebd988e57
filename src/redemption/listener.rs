//! Redemption Event Listener
//!
//! Turns raw `RedemptionRequested` events from the destination chains into
//! pending redemption records. Intake is idempotent: the source transaction
//! hash is the record id, so replayed or re-delivered events are no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::common::logging::{log_redemption_event, EventCategory};
use crate::redemption::adapters::{adapt_event, ChainKind};
use crate::storage::{CreateOutcome, RedemptionStore, StorageError};
use crate::types::redemption::Redemption;

/// Default capacity of the intake channel
pub const INTAKE_CHANNEL_CAPACITY: usize = 1024;

/// A raw event as delivered by a chain subscription
#[derive(Debug, Clone)]
pub struct RawRedemptionEvent {
    pub chain_name: String,
    pub payload: Value,
}

/// Result of feeding one event through the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// New pending record with this id
    Created(String),
    /// A record with this id already exists
    Duplicate(String),
    /// Unknown chain or malformed event
    Skipped(String),
}

/// Listener errors
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Counters for an intake run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeStats {
    pub created: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl IntakeStats {
    fn record(&mut self, result: &Result<IntakeOutcome, ListenerError>) {
        match result {
            Ok(IntakeOutcome::Created(_)) => self.created += 1,
            Ok(IntakeOutcome::Duplicate(_)) => self.duplicates += 1,
            Ok(IntakeOutcome::Skipped(_)) => self.skipped += 1,
            Err(_) => self.errors += 1,
        }
    }
}

impl std::fmt::Display for IntakeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created: {}, duplicates: {}, skipped: {}, errors: {}",
            self.created, self.duplicates, self.skipped, self.errors
        )
    }
}

/// Create the channel chain subscriptions feed
pub fn intake_channel() -> (
    mpsc::Sender<RawRedemptionEvent>,
    mpsc::Receiver<RawRedemptionEvent>,
) {
    mpsc::channel(INTAKE_CHANNEL_CAPACITY)
}

/// Maps chain events to redemption records
pub struct RedemptionListener {
    store: Arc<dyn RedemptionStore>,
    /// Configured chains by name
    chains: HashMap<String, ChainKind>,
}

impl RedemptionListener {
    pub fn new(
        store: Arc<dyn RedemptionStore>,
        chains: impl IntoIterator<Item = (String, ChainKind)>,
    ) -> Self {
        Self {
            store,
            chains: chains.into_iter().collect(),
        }
    }

    /// Record a redemption request observed on `chain_name`
    ///
    /// Only store failures are errors; bad events are skipped.
    pub async fn on_redemption_event(
        &self,
        raw: &Value,
        chain_name: &str,
    ) -> Result<IntakeOutcome, ListenerError> {
        let Some(kind) = self.chains.get(chain_name).copied() else {
            warn!(chain = %chain_name, "Ignoring event from unconfigured chain");
            return Ok(IntakeOutcome::Skipped(format!("unknown chain: {}", chain_name)));
        };

        let event = match adapt_event(kind, raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(chain = %chain_name, kind = %kind, error = %e, "Skipping malformed redemption event");
                return Ok(IntakeOutcome::Skipped(e.to_string()));
            }
        };

        let record = Redemption::new(chain_name, event);
        let id = record.id.clone();

        match self.store.create(&record).await? {
            CreateOutcome::Created => {
                info!(
                    redemption_id = %id,
                    chain = %chain_name,
                    amount = %record.event.amount,
                    "Redemption request recorded"
                );
                log_redemption_event(
                    EventCategory::Intake,
                    "redemption_observed",
                    &id,
                    chain_name,
                    record.status,
                    None,
                    None,
                );
                Ok(IntakeOutcome::Created(id))
            }
            CreateOutcome::AlreadyExists => {
                warn!(redemption_id = %id, chain = %chain_name, "Duplicate redemption event ignored");
                Ok(IntakeOutcome::Duplicate(id))
            }
        }
    }

    /// Consume events until every sender is dropped or `shutdown` changes
    ///
    /// On shutdown the channel is closed to new events and whatever is
    /// already buffered is still recorded before returning.
    pub async fn run_intake(
        &self,
        mut rx: mpsc::Receiver<RawRedemptionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> IntakeStats {
        let mut stats = IntakeStats::default();
        let mut draining = false;
        info!(chains = self.chains.len(), "Redemption intake started");

        loop {
            tokio::select! {
                raw = rx.recv() => {
                    let Some(raw) = raw else { break };
                    let result = self.on_redemption_event(&raw.payload, &raw.chain_name).await;
                    if let Err(e) = &result {
                        error!(chain = %raw.chain_name, error = %e, "Failed to record redemption event");
                    }
                    stats.record(&result);
                    debug!(%stats, "Intake progress");
                }
                _ = shutdown.changed(), if !draining => {
                    rx.close();
                    draining = true;
                    debug!("Intake draining buffered events");
                }
            }
        }

        info!(%stats, "Redemption intake stopped");
        stats
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{MemoryRedemptionStore, StorageResult};
    use crate::types::redemption::RedemptionStatus;
    use async_trait::async_trait;
    use serde_json::json;

    /// EVM-shaped event as emitted by the L2 redeemer contract
    pub(crate) fn evm_event(tx_hash: &str) -> Value {
        json!({
            "transactionHash": tx_hash,
            "args": {
                "walletPubKeyHash": "0x8db50eb52063ea9d98b3eac91489a90f738986f6",
                "mainUtxo": {
                    "txHash": "0xf8eaf242a55ea15e602f9f990e33f67f99dfbe25d1802bbde63cc1caabf99668",
                    "txOutputIndex": 1,
                    "txOutputValue": "1473114"
                },
                "redeemerOutputScript": "0x160014e6f9d74726b19b75f16fe1e9feaec048aa4fa1d0",
                "amount": "10000000000000000"
            }
        })
    }

    fn listener(store: Arc<dyn RedemptionStore>) -> RedemptionListener {
        RedemptionListener::new(
            store,
            [
                ("ArbitrumMainnet".to_string(), ChainKind::Evm),
                ("Solana".to_string(), ChainKind::Solana),
            ],
        )
    }

    #[tokio::test]
    async fn test_new_event_creates_pending_record() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let listener = listener(store.clone());

        let outcome = listener
            .on_redemption_event(&evm_event("0xAAA"), "ArbitrumMainnet")
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Created("0xaaa".to_string()));

        let record = store.get_by_id("0xaaa").await.unwrap().unwrap();
        assert_eq!(record.status, RedemptionStatus::Pending);
        assert_eq!(record.chain_name, "ArbitrumMainnet");
        assert_eq!(record.version, 0);
    }

    #[tokio::test]
    async fn test_duplicate_event_is_idempotent() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let listener = listener(store.clone());

        listener
            .on_redemption_event(&evm_event("0xaaa"), "ArbitrumMainnet")
            .await
            .unwrap();
        let before = store.get_by_id("0xaaa").await.unwrap().unwrap();

        let outcome = listener
            .on_redemption_event(&evm_event("0xaaa"), "ArbitrumMainnet")
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Duplicate("0xaaa".to_string()));

        let after = store.get_by_id("0xaaa").await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_bad_events_are_skipped() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let listener = listener(store.clone());

        let outcome = listener
            .on_redemption_event(&evm_event("0xaaa"), "Polygon")
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Skipped(_)));

        let outcome = listener
            .on_redemption_event(&json!({"transactionHash": "0xbbb"}), "ArbitrumMainnet")
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Skipped(_)));

        assert!(store.is_empty().await);
    }

    pub(crate) struct UnavailableStore;

    #[async_trait]
    impl RedemptionStore for UnavailableStore {
        async fn create(&self, _record: &Redemption) -> StorageResult<CreateOutcome> {
            Err(StorageError::Connection("database is locked".to_string()))
        }
        async fn update(&self, _record: &Redemption, _expected: u64) -> StorageResult<u64> {
            Err(StorageError::Connection("database is locked".to_string()))
        }
        async fn get_by_id(&self, _id: &str) -> StorageResult<Option<Redemption>> {
            Err(StorageError::Connection("database is locked".to_string()))
        }
        async fn get_by_status(
            &self,
            _status: RedemptionStatus,
            _chain_name: Option<&str>,
        ) -> StorageResult<Vec<Redemption>> {
            Err(StorageError::Connection("database is locked".to_string()))
        }
        async fn delete(&self, _id: &str) -> StorageResult<bool> {
            Err(StorageError::Connection("database is locked".to_string()))
        }
        async fn count_by_status(
            &self,
            _chain_name: Option<&str>,
        ) -> StorageResult<HashMap<RedemptionStatus, u64>> {
            Err(StorageError::Connection("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let listener = listener(Arc::new(UnavailableStore));

        let result = listener
            .on_redemption_event(&evm_event("0xaaa"), "ArbitrumMainnet")
            .await;
        assert!(matches!(result, Err(ListenerError::Storage(_))));
    }

    #[tokio::test]
    async fn test_run_intake_drains_channel() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let listener = listener(store.clone());
        let (tx, rx) = intake_channel();

        for payload in [evm_event("0x01"), evm_event("0x02"), evm_event("0x01")] {
            tx.send(RawRedemptionEvent {
                chain_name: "ArbitrumMainnet".to_string(),
                payload,
            })
            .await
            .unwrap();
        }
        tx.send(RawRedemptionEvent {
            chain_name: "Solana".to_string(),
            payload: json!({"signature": "abc"}),
        })
        .await
        .unwrap();
        drop(tx);

        let (_stop, shutdown) = watch::channel(false);
        let stats = listener.run_intake(rx, shutdown).await;
        assert_eq!(
            stats,
            IntakeStats {
                created: 2,
                duplicates: 1,
                skipped: 1,
                errors: 0
            }
        );
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffered_events() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let listener = listener(store.clone());
        let (tx, rx) = intake_channel();

        for payload in [evm_event("0x01"), evm_event("0x02"), evm_event("0x03")] {
            tx.send(RawRedemptionEvent {
                chain_name: "ArbitrumMainnet".to_string(),
                payload,
            })
            .await
            .unwrap();
        }

        // Sender stays alive; shutdown alone ends the run
        let (stop, shutdown) = watch::channel(false);
        stop.send_replace(true);
        let stats = listener.run_intake(rx, shutdown).await;

        assert_eq!(stats.created, 3);
        assert_eq!(store.len().await, 3);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_run_intake_survives_store_errors() {
        let listener = listener(Arc::new(UnavailableStore));
        let (tx, rx) = intake_channel();

        for hash in ["0x01", "0x02"] {
            tx.send(RawRedemptionEvent {
                chain_name: "ArbitrumMainnet".to_string(),
                payload: evm_event(hash),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let (_stop, shutdown) = watch::channel(false);
        let stats = listener.run_intake(rx, shutdown).await;
        assert_eq!(stats.errors, 2);
    }
}

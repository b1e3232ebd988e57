//! Redemption Lifecycle Coordinator
//!
//! Drives redemptions through the state machine in two batches:
//!
//! - `process_pending_redemptions`: `pending` / `fetch_failed` records get
//!   their attestation fetched
//! - `process_fetched_redemptions`: `fetched` / `submit_failed` records get
//!   settled on L1
//!
//! Every write is conditional on the version that was read. Before an
//! external call the record is claimed with a lease, so overlapping batches
//! (another tick, another process) never call out twice for one redemption.
//! A record's failure is written to the record and never aborts the batch.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::common::logging::{log_redemption_event, EventCategory};
use crate::redemption::attestation::{AttestationFetcher, AttestationOutcome};
use crate::redemption::policy::RetryPolicy;
use crate::redemption::settlement::SettlementSubmitter;
use crate::storage::{RedemptionStore, StorageError};
use crate::types::redemption::{
    now_secs, Redemption, RedemptionStats, RedemptionStatus, TransitionError,
};

/// Statuses read by the attestation batch
const PENDING_BATCH: [RedemptionStatus; 2] =
    [RedemptionStatus::Pending, RedemptionStatus::FetchFailed];

/// Statuses read by the settlement batch
const FETCHED_BATCH: [RedemptionStatus; 2] =
    [RedemptionStatus::Fetched, RedemptionStatus::SubmitFailed];

/// Counts for one batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Advanced to the next phase
    pub succeeded: usize,
    /// Recorded a failure (retryable or terminal) or could not be written
    pub failed: usize,
    /// Left as is: leased, backing off, not yet attested or lost a race
    pub skipped: usize,
}

impl ProcessSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn has_activity(&self) -> bool {
        self.succeeded > 0 || self.failed > 0
    }

    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Advanced => self.succeeded += 1,
            RecordOutcome::Failed => self.failed += 1,
            RecordOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

impl std::ops::AddAssign for ProcessSummary {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl std::fmt::Display for ProcessSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "succeeded: {}, failed: {}, skipped: {}",
            self.succeeded, self.failed, self.skipped
        )
    }
}

/// Coordinator errors
///
/// Only a failure to read a batch escapes; per-record problems are counted.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    Leased,
    Backoff,
    NotYetAvailable,
    VersionConflict,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Leased => "leased",
            SkipReason::Backoff => "backoff",
            SkipReason::NotYetAvailable => "not_yet_available",
            SkipReason::VersionConflict => "version_conflict",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Advanced,
    Failed,
    Skipped(SkipReason),
}

/// Failure while handling a single record
#[derive(Debug, thiserror::Error)]
enum RecordError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Owns the redemption state machine
pub struct RedemptionCoordinator {
    store: Arc<dyn RedemptionStore>,
    fetcher: Arc<dyn AttestationFetcher>,
    submitter: Arc<dyn SettlementSubmitter>,
    policy: RetryPolicy,
}

impl RedemptionCoordinator {
    pub fn new(
        store: Arc<dyn RedemptionStore>,
        fetcher: Arc<dyn AttestationFetcher>,
        submitter: Arc<dyn SettlementSubmitter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            submitter,
            policy,
        }
    }

    // =========================================================================
    // Attestation batch
    // =========================================================================

    /// Fetch attestations for pending and fetch-failed redemptions
    pub async fn process_pending_redemptions(
        &self,
        chain_name: Option<&str>,
    ) -> Result<ProcessSummary, CoordinatorError> {
        let batch = self.load_batch(&PENDING_BATCH, chain_name).await?;
        let mut summary = ProcessSummary::default();

        for record in batch {
            let id = record.id.clone();
            match self.process_pending_record(record).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(redemption_id = %id, error = %e, "Failed to process pending redemption");
                    summary.failed += 1;
                }
            }
        }

        if summary.total() > 0 {
            info!(chain = ?chain_name, %summary, "Attestation batch finished");
        }
        Ok(summary)
    }

    async fn process_pending_record(&self, record: Redemption) -> Result<RecordOutcome, RecordError> {
        let now = now_secs();

        if let Some(skip) = self.gate(&record, now) {
            return Ok(RecordOutcome::Skipped(skip));
        }

        if self.policy.is_exhausted(&record) {
            let mut next = record.clone();
            next.mark_failed(format!(
                "attestation retry budget exhausted after {} attempts: {}",
                record.retry_count,
                record.error.as_deref().unwrap_or("unknown error")
            ))?;
            return self.commit(next, record.version, RecordOutcome::Failed).await;
        }

        let Some(mut claimed) = self
            .claim(&record, self.policy.fetch_lease_until(now))
            .await?
        else {
            return Ok(RecordOutcome::Skipped(SkipReason::VersionConflict));
        };
        let version = claimed.version;

        debug!(redemption_id = %claimed.id, version, "Fetching attestation");
        let result = timeout(
            self.policy.fetch_timeout,
            self.fetcher.fetch(&claimed.event.source_tx_hash),
        )
        .await;

        let outcome = match result {
            Ok(Ok(AttestationOutcome::Available(payload))) => {
                claimed.mark_fetched(payload)?;
                RecordOutcome::Advanced
            }
            Ok(Ok(AttestationOutcome::NotYetAvailable)) => {
                if self.policy.attestation_overdue(&claimed, now) {
                    claimed.mark_fetch_failed(format!(
                        "attestation still unavailable {}s after the request",
                        now.saturating_sub(claimed.dates.created_at)
                    ))?;
                    RecordOutcome::Failed
                } else {
                    claimed.release();
                    RecordOutcome::Skipped(SkipReason::NotYetAvailable)
                }
            }
            Ok(Ok(AttestationOutcome::PermanentFailure(reason))) => {
                claimed.mark_failed(format!("attestation permanently unavailable: {}", reason))?;
                RecordOutcome::Failed
            }
            Ok(Err(e)) => {
                claimed.mark_fetch_failed(e.to_string())?;
                RecordOutcome::Failed
            }
            Err(_) => {
                claimed.mark_fetch_failed(format!(
                    "attestation fetch timed out after {:?}",
                    self.policy.fetch_timeout
                ))?;
                RecordOutcome::Failed
            }
        };

        self.commit(claimed, version, outcome).await
    }

    // =========================================================================
    // Settlement batch
    // =========================================================================

    /// Submit settlements for fetched and submit-failed redemptions
    pub async fn process_fetched_redemptions(
        &self,
        chain_name: Option<&str>,
    ) -> Result<ProcessSummary, CoordinatorError> {
        let batch = self.load_batch(&FETCHED_BATCH, chain_name).await?;
        let mut summary = ProcessSummary::default();

        for record in batch {
            let id = record.id.clone();
            match self.process_fetched_record(record).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(redemption_id = %id, error = %e, "Failed to process fetched redemption");
                    summary.failed += 1;
                }
            }
        }

        if summary.total() > 0 {
            info!(chain = ?chain_name, %summary, "Settlement batch finished");
        }
        Ok(summary)
    }

    async fn process_fetched_record(&self, record: Redemption) -> Result<RecordOutcome, RecordError> {
        let now = now_secs();

        if let Some(skip) = self.gate(&record, now) {
            return Ok(RecordOutcome::Skipped(skip));
        }

        if self.policy.is_exhausted(&record) {
            let mut next = record.clone();
            next.mark_failed(format!(
                "settlement retry budget exhausted after {} attempts: {}",
                record.retry_count,
                record.error.as_deref().unwrap_or("unknown error")
            ))?;
            return self.commit(next, record.version, RecordOutcome::Failed).await;
        }

        let Some(payload) = record.attestation_payload.clone() else {
            let mut next = record.clone();
            next.mark_failed("fetched redemption has no attestation payload")?;
            return self.commit(next, record.version, RecordOutcome::Failed).await;
        };

        let Some(mut claimed) = self
            .claim(&record, self.policy.submit_lease_until(now))
            .await?
        else {
            return Ok(RecordOutcome::Skipped(SkipReason::VersionConflict));
        };
        let version = claimed.version;

        debug!(redemption_id = %claimed.id, version, "Submitting settlement");
        let result = timeout(
            self.policy.submit_timeout,
            self.submitter.submit(&payload, &claimed.event),
        )
        .await;

        let outcome = match result {
            Ok(Ok(tx_hash)) => {
                claimed.mark_completed(tx_hash)?;
                RecordOutcome::Advanced
            }
            Ok(Err(e)) if e.is_permanent() => {
                claimed.mark_failed(format!("settlement failed permanently: {}", e))?;
                RecordOutcome::Failed
            }
            Ok(Err(e)) => {
                claimed.mark_submit_failed(e.to_string())?;
                RecordOutcome::Failed
            }
            Err(_) => {
                claimed.mark_submit_failed(format!(
                    "settlement submission timed out after {:?}",
                    self.policy.submit_timeout
                ))?;
                RecordOutcome::Failed
            }
        };

        self.commit(claimed, version, outcome).await
    }

    // =========================================================================
    // Read-only surface
    // =========================================================================

    pub async fn get_redemption(&self, id: &str) -> Result<Option<Redemption>, CoordinatorError> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// Records in one status, oldest first
    pub async fn list_redemptions(
        &self,
        status: RedemptionStatus,
        chain_name: Option<&str>,
    ) -> Result<Vec<Redemption>, CoordinatorError> {
        Ok(self.store.get_by_status(status, chain_name).await?)
    }

    pub async fn stats(&self, chain_name: Option<&str>) -> Result<RedemptionStats, CoordinatorError> {
        let counts = self.store.count_by_status(chain_name).await?;
        Ok(RedemptionStats::from_counts(&counts))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load_batch(
        &self,
        statuses: &[RedemptionStatus],
        chain_name: Option<&str>,
    ) -> Result<Vec<Redemption>, StorageError> {
        let mut batch = Vec::new();
        for status in statuses {
            batch.extend(self.store.get_by_status(*status, chain_name).await?);
        }
        Ok(batch)
    }

    /// Reasons to leave a record alone this round
    fn gate(&self, record: &Redemption, now: u64) -> Option<SkipReason> {
        if record.is_leased(now) {
            debug!(redemption_id = %record.id, "Record is held by another worker");
            return Some(SkipReason::Leased);
        }
        if self.policy.is_exhausted(record) {
            return None;
        }
        if !record.backoff_elapsed(self.policy.retry_backoff_secs, now) {
            return Some(SkipReason::Backoff);
        }
        None
    }

    /// Take the lease; `None` when another worker moved the record first
    async fn claim(
        &self,
        record: &Redemption,
        lease_until: u64,
    ) -> Result<Option<Redemption>, StorageError> {
        let mut claimed = record.clone();
        claimed.claim(lease_until);

        match self.store.update(&claimed, record.version).await {
            Ok(version) => {
                claimed.version = version;
                Ok(Some(claimed))
            }
            Err(StorageError::VersionConflict { .. }) => {
                debug!(
                    redemption_id = %record.id,
                    version = record.version,
                    "Lost claim race, skipping"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the result of an attempt
    async fn commit(
        &self,
        record: Redemption,
        expected_version: u64,
        outcome: RecordOutcome,
    ) -> Result<RecordOutcome, RecordError> {
        match self.store.update(&record, expected_version).await {
            Ok(version) => {
                self.report(&record, version, outcome);
                Ok(outcome)
            }
            Err(StorageError::VersionConflict { .. }) => {
                if record.status == RedemptionStatus::Completed {
                    // The L1 transaction exists even though this write lost
                    warn!(
                        redemption_id = %record.id,
                        settlement_tx_hash = ?record.settlement_tx_hash,
                        "Settlement submitted but record was advanced by another worker"
                    );
                } else {
                    debug!(redemption_id = %record.id, expected_version, "Version conflict, skipping");
                }
                Ok(RecordOutcome::Skipped(SkipReason::VersionConflict))
            }
            Err(e) => {
                if let Some(tx_hash) = &record.settlement_tx_hash {
                    error!(
                        redemption_id = %record.id,
                        settlement_tx_hash = %tx_hash,
                        "Settlement submitted but could not be recorded"
                    );
                }
                Err(e.into())
            }
        }
    }

    fn report(&self, record: &Redemption, version: u64, outcome: RecordOutcome) {
        match (outcome, record.status) {
            (RecordOutcome::Skipped(reason), _) => {
                debug!(redemption_id = %record.id, version, %reason, "Redemption skipped");
            }
            (_, RedemptionStatus::Fetched) => {
                info!(redemption_id = %record.id, chain = %record.chain_name, version, "Attestation fetched");
                log_redemption_event(
                    EventCategory::Attestation,
                    "attestation_fetched",
                    &record.id,
                    &record.chain_name,
                    record.status,
                    None,
                    None,
                );
            }
            (_, RedemptionStatus::Completed) => {
                info!(
                    redemption_id = %record.id,
                    chain = %record.chain_name,
                    settlement_tx_hash = ?record.settlement_tx_hash,
                    "Redemption completed"
                );
                log_redemption_event(
                    EventCategory::Settlement,
                    "redemption_completed",
                    &record.id,
                    &record.chain_name,
                    record.status,
                    record.settlement_tx_hash.as_deref(),
                    None,
                );
            }
            (_, RedemptionStatus::Failed) => {
                log_redemption_event(
                    EventCategory::Error,
                    "redemption_failed",
                    &record.id,
                    &record.chain_name,
                    record.status,
                    None,
                    record.error.as_deref(),
                );
            }
            (_, status) => {
                warn!(
                    redemption_id = %record.id,
                    chain = %record.chain_name,
                    %status,
                    retry_count = record.retry_count,
                    error = ?record.error,
                    "Redemption attempt failed, will retry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redemption::adapters::ChainKind;
    use crate::redemption::attestation::{AttestationError, MockAttestationFetcher};
    use crate::redemption::listener::tests::{evm_event, UnavailableStore};
    use crate::redemption::listener::{IntakeOutcome, RedemptionListener};
    use crate::redemption::settlement::{MockSettlementSubmitter, SettlementError};
    use crate::storage::{CreateOutcome, MemoryRedemptionStore, StorageResult};
    use crate::types::redemption::tests::sample_event;
    use crate::types::redemption::AttestationState;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CHAIN: &str = "ArbitrumMainnet";

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            retry_backoff_secs: 0,
            ..Default::default()
        }
    }

    fn coordinator(
        store: Arc<dyn RedemptionStore>,
        fetcher: impl AttestationFetcher + 'static,
        submitter: impl SettlementSubmitter + 'static,
        policy: RetryPolicy,
    ) -> RedemptionCoordinator {
        RedemptionCoordinator::new(store, Arc::new(fetcher), Arc::new(submitter), policy)
    }

    fn fetcher_returning(payload: Vec<u8>) -> MockAttestationFetcher {
        let mut fetcher = MockAttestationFetcher::new();
        fetcher
            .expect_fetch()
            .returning(move |_| Ok(AttestationOutcome::Available(payload.clone())));
        fetcher
    }

    fn idle_submitter() -> MockSettlementSubmitter {
        let mut submitter = MockSettlementSubmitter::new();
        submitter.expect_submit().never();
        submitter
    }

    async fn seed(store: &MemoryRedemptionStore, id: &str) -> Redemption {
        let record = Redemption::new(CHAIN, sample_event(id));
        store.create(&record).await.unwrap();
        record
    }

    async fn seed_fetched(store: &MemoryRedemptionStore, id: &str) -> Redemption {
        let mut record = Redemption::new(CHAIN, sample_event(id));
        record.mark_fetched(vec![0xde, 0xad]).unwrap();
        store.create(&record).await.unwrap();
        record
    }

    async fn load(store: &MemoryRedemptionStore, id: &str) -> Redemption {
        store.get_by_id(id).await.unwrap().unwrap()
    }

    fn assert_payload_invariant(record: &Redemption) {
        assert_eq!(
            record.attestation_payload.is_some(),
            record.attestation_state == AttestationState::Fetched,
            "payload/state mismatch for {}: {:?}",
            record.id,
            record.status
        );
        if matches!(
            record.status,
            RedemptionStatus::Fetched | RedemptionStatus::SubmitFailed | RedemptionStatus::Completed
        ) {
            assert!(record.attestation_payload.is_some());
        }
    }

    #[tokio::test]
    async fn test_end_to_end_arbitrum_redemption() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let listener = RedemptionListener::new(store.clone(), [(CHAIN.to_string(), ChainKind::Evm)]);
        let source_tx = format!("0x{}", "aa".repeat(32));

        let outcome = listener
            .on_redemption_event(&evm_event(&source_tx), CHAIN)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Created(source_tx.clone()));

        let mut fetcher = MockAttestationFetcher::new();
        let expected_tx = source_tx.clone();
        fetcher
            .expect_fetch()
            .withf(move |hash| hash == expected_tx)
            .times(1)
            .returning(|_| Ok(AttestationOutcome::Available(vec![0xde, 0xad])));

        let mut submitter = MockSettlementSubmitter::new();
        submitter
            .expect_submit()
            .withf(|payload, event| payload == [0xde, 0xad] && event.amount == 10_000_000_000_000_000)
            .times(1)
            .returning(|_, _| Ok("0xbeef".to_string()));

        let coordinator = coordinator(store.clone(), fetcher, submitter, test_policy());

        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        let record = load(&store, &source_tx).await;
        assert_eq!(record.status, RedemptionStatus::Fetched);
        assert_eq!(record.attestation_payload, Some(vec![0xde, 0xad]));
        assert!(record.dates.attestation_fetched_at.is_some());
        assert!(record.lease_expires_at.is_none());

        let summary = coordinator.process_fetched_redemptions(None).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        let record = load(&store, &source_tx).await;
        assert_eq!(record.status, RedemptionStatus::Completed);
        assert_eq!(record.settlement_tx_hash.as_deref(), Some("0xbeef"));
        assert!(record.dates.completed_at.is_some());
        assert!(record.error.is_none());
        // claim + result write per phase
        assert_eq!(record.version, 4);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_is_isolated() {
        let store = Arc::new(MemoryRedemptionStore::new());
        for id in ["0x01", "0x02", "0x03", "0x04", "0x05"] {
            seed(&store, id).await;
        }

        let mut fetcher = MockAttestationFetcher::new();
        fetcher.expect_fetch().times(5).returning(|hash| {
            if hash == "0x03" {
                Err(AttestationError::UnexpectedStatus {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(AttestationOutcome::Available(vec![1]))
            }
        });

        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), test_policy());
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();

        assert_eq!(
            summary,
            ProcessSummary {
                succeeded: 4,
                failed: 1,
                skipped: 0
            }
        );

        let failed = load(&store, "0x03").await;
        assert_eq!(failed.status, RedemptionStatus::FetchFailed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.error.as_deref().unwrap_or_default().contains("503"));
        assert_payload_invariant(&failed);

        for id in ["0x01", "0x02", "0x04", "0x05"] {
            assert_eq!(load(&store, id).await.status, RedemptionStatus::Fetched);
        }
    }

    #[tokio::test]
    async fn test_permanent_attestation_failure_is_terminal() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed(&store, "0x01").await;

        let mut fetcher = MockAttestationFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(AttestationOutcome::PermanentFailure("not a wormhole transfer".to_string())));

        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), test_policy());

        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.failed, 1);

        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::Failed);
        assert!(record.error.as_deref().unwrap_or_default().contains("not a wormhole transfer"));
        assert!(record.attestation_payload.is_none());
        assert_payload_invariant(&record);

        // Later batches leave it alone; the mock would panic on a second call
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.total(), 0);
        let summary = coordinator.process_fetched_redemptions(None).await.unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed(&store, "0x01").await;

        let mut fetcher = MockAttestationFetcher::new();
        fetcher.expect_fetch().times(3).returning(|_| {
            Err(AttestationError::ParseError("garbled".to_string()))
        });

        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), test_policy());

        // First failure plus max_retries (2) retries
        for attempt in 1..=3 {
            let summary = coordinator.process_pending_redemptions(None).await.unwrap();
            assert_eq!(summary.failed, 1);
            let record = load(&store, "0x01").await;
            assert_eq!(record.status, RedemptionStatus::FetchFailed);
            assert_eq!(record.retry_count, attempt);
        }

        // Budget exhausted: failed without another fetch
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.failed, 1);
        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::Failed);
        assert!(record.error.as_deref().unwrap_or_default().contains("budget exhausted"));
    }

    #[tokio::test]
    async fn test_backoff_defers_retry() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed(&store, "0x01").await;

        let mut fetcher = MockAttestationFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Err(AttestationError::ParseError("garbled".to_string())));

        let policy = RetryPolicy {
            retry_backoff_secs: 3_600,
            ..Default::default()
        };
        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), policy);

        coordinator.process_pending_redemptions(None).await.unwrap();
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(load(&store, "0x01").await.retry_count, 1);
    }

    #[tokio::test]
    async fn test_not_yet_available_keeps_state() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let seeded = seed(&store, "0x01").await;

        let mut fetcher = MockAttestationFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(AttestationOutcome::NotYetAvailable));

        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), test_policy());
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.skipped, 1);

        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.lease_expires_at.is_none());
        assert!(record.dates.last_activity_at >= seeded.dates.last_activity_at);
        assert!(record.version > seeded.version);
    }

    #[tokio::test]
    async fn test_overdue_attestation_counts_as_failure() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let mut record = Redemption::new(CHAIN, sample_event("0x01"));
        record.dates.created_at -= 7_200;
        store.create(&record).await.unwrap();

        let mut fetcher = MockAttestationFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Ok(AttestationOutcome::NotYetAvailable));

        let policy = RetryPolicy {
            attestation_deadline_secs: 3_600,
            ..test_policy()
        };
        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), policy);
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.failed, 1);

        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::FetchFailed);
        assert!(record.error.as_deref().unwrap_or_default().contains("still unavailable"));
    }

    struct SlowFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl SlowFetcher {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl AttestationFetcher for SlowFetcher {
        async fn fetch(&self, _source_tx_hash: &str) -> Result<AttestationOutcome, AttestationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(AttestationOutcome::Available(vec![0xde, 0xad]))
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_retryable() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed(&store, "0x01").await;

        let policy = RetryPolicy {
            fetch_timeout: Duration::from_millis(20),
            ..test_policy()
        };
        let coordinator = coordinator(
            store.clone(),
            SlowFetcher::new(Duration::from_secs(5)),
            idle_submitter(),
            policy,
        );

        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.failed, 1);

        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::FetchFailed);
        assert!(record.error.as_deref().unwrap_or_default().contains("timed out"));
        assert!(record.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_batches_fetch_once() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed(&store, "0x01").await;

        let fetcher = Arc::new(SlowFetcher::new(Duration::from_millis(50)));
        let first = RedemptionCoordinator::new(
            store.clone(),
            fetcher.clone(),
            Arc::new(idle_submitter()),
            test_policy(),
        );
        let second = RedemptionCoordinator::new(
            store.clone(),
            fetcher.clone(),
            Arc::new(idle_submitter()),
            test_policy(),
        );

        let (a, b) = tokio::join!(
            first.process_pending_redemptions(None),
            second.process_pending_redemptions(None)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.succeeded + b.succeeded, 1);
        assert_eq!(a.skipped + b.skipped, 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::Fetched);
        assert_eq!(record.version, 2);
    }

    /// Bumps the stored version right before the first write, as a
    /// concurrent worker would
    struct RacingStore {
        inner: MemoryRedemptionStore,
        raced: AtomicUsize,
    }

    #[async_trait]
    impl RedemptionStore for RacingStore {
        async fn create(&self, record: &Redemption) -> StorageResult<CreateOutcome> {
            self.inner.create(record).await
        }

        async fn update(&self, record: &Redemption, expected_version: u64) -> StorageResult<u64> {
            if self.raced.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut current = self.inner.get_by_id(&record.id).await?.ok_or_else(|| {
                    StorageError::NotFound(record.id.clone())
                })?;
                current.touch();
                self.inner.update(&current, current.version).await?;
            }
            self.inner.update(record, expected_version).await
        }

        async fn get_by_id(&self, id: &str) -> StorageResult<Option<Redemption>> {
            self.inner.get_by_id(id).await
        }

        async fn get_by_status(
            &self,
            status: RedemptionStatus,
            chain_name: Option<&str>,
        ) -> StorageResult<Vec<Redemption>> {
            self.inner.get_by_status(status, chain_name).await
        }

        async fn delete(&self, id: &str) -> StorageResult<bool> {
            self.inner.delete(id).await
        }

        async fn count_by_status(
            &self,
            chain_name: Option<&str>,
        ) -> StorageResult<HashMap<RedemptionStatus, u64>> {
            self.inner.count_by_status(chain_name).await
        }
    }

    #[tokio::test]
    async fn test_version_conflict_skips_without_external_call() {
        let inner = MemoryRedemptionStore::new();
        seed(&inner, "0x01").await;
        let store = Arc::new(RacingStore {
            inner: inner.clone(),
            raced: AtomicUsize::new(0),
        });

        let mut fetcher = MockAttestationFetcher::new();
        fetcher.expect_fetch().never();

        let coordinator = coordinator(store, fetcher, idle_submitter(), test_policy());
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();

        assert_eq!(
            summary,
            ProcessSummary {
                succeeded: 0,
                failed: 0,
                skipped: 1
            }
        );
        let record = load(&inner, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::Pending);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_leased_record_is_skipped() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let mut record = Redemption::new(CHAIN, sample_event("0x01"));
        record.claim(now_secs() + 600);
        store.create(&record).await.unwrap();

        let mut fetcher = MockAttestationFetcher::new();
        fetcher.expect_fetch().never();

        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), test_policy());
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(load(&store, "0x01").await.version, 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let mut record = Redemption::new(CHAIN, sample_event("0x01"));
        record.claim(now_secs().saturating_sub(1));
        store.create(&record).await.unwrap();

        let coordinator = coordinator(
            store.clone(),
            fetcher_returning(vec![7]),
            idle_submitter(),
            test_policy(),
        );
        let summary = coordinator.process_pending_redemptions(None).await.unwrap();
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_settlement_retry_then_success() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed_fetched(&store, "0x01").await;

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut submitter = MockSettlementSubmitter::new();
        submitter.expect_submit().times(2).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SettlementError::Rejected("nonce too low".to_string()))
            } else {
                Ok("0xbeef".to_string())
            }
        });

        let mut fetcher = MockAttestationFetcher::new();
        fetcher.expect_fetch().never();
        let coordinator = coordinator(store.clone(), fetcher, submitter, test_policy());

        let summary = coordinator.process_fetched_redemptions(None).await.unwrap();
        assert_eq!(summary.failed, 1);
        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::SubmitFailed);
        assert_eq!(record.error.as_deref(), Some("Submission rejected: nonce too low"));
        assert_payload_invariant(&record);

        let summary = coordinator.process_fetched_redemptions(None).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::Completed);
        assert_eq!(record.retry_count, 0);
        assert!(record.error.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settlement_revert_is_terminal() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed_fetched(&store, "0x01").await;

        let mut submitter = MockSettlementSubmitter::new();
        submitter
            .expect_submit()
            .times(1)
            .returning(|_, _| Err(SettlementError::Reverted("Redemption request already exists".to_string())));

        let mut fetcher = MockAttestationFetcher::new();
        fetcher.expect_fetch().never();
        let coordinator = coordinator(store.clone(), fetcher, submitter, test_policy());

        let summary = coordinator.process_fetched_redemptions(None).await.unwrap();
        assert_eq!(summary.failed, 1);

        let record = load(&store, "0x01").await;
        assert_eq!(record.status, RedemptionStatus::Failed);
        assert!(record.error.as_deref().unwrap_or_default().contains("already exists"));
        // Failed after the fetch phase keeps its attestation
        assert_eq!(record.attestation_payload, Some(vec![0xde, 0xad]));
        assert_payload_invariant(&record);

        let summary = coordinator.process_fetched_redemptions(None).await.unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[tokio::test]
    async fn test_chain_filter_limits_batch() {
        let store = Arc::new(MemoryRedemptionStore::new());
        seed(&store, "0x01").await;
        store
            .create(&Redemption::new("BaseMainnet", sample_event("0x02")))
            .await
            .unwrap();

        let mut fetcher = MockAttestationFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|hash| hash == "0x02")
            .times(1)
            .returning(|_| Ok(AttestationOutcome::Available(vec![1])));

        let coordinator = coordinator(store.clone(), fetcher, idle_submitter(), test_policy());
        let summary = coordinator
            .process_pending_redemptions(Some("BaseMainnet"))
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(load(&store, "0x01").await.status, RedemptionStatus::Pending);
    }

    #[tokio::test]
    async fn test_batch_read_failure_propagates() {
        let coordinator = coordinator(
            Arc::new(UnavailableStore),
            MockAttestationFetcher::new(),
            MockSettlementSubmitter::new(),
            test_policy(),
        );

        let result = coordinator.process_pending_redemptions(None).await;
        assert!(matches!(result, Err(CoordinatorError::Storage(_))));
        let result = coordinator.process_fetched_redemptions(None).await;
        assert!(matches!(result, Err(CoordinatorError::Storage(_))));
    }

    /// Scripted collaborators cycling through every outcome
    struct ScriptedFetcher(AtomicUsize);

    #[async_trait]
    impl AttestationFetcher for ScriptedFetcher {
        async fn fetch(&self, _source_tx_hash: &str) -> Result<AttestationOutcome, AttestationError> {
            match self.0.fetch_add(1, Ordering::SeqCst) % 4 {
                0 => Ok(AttestationOutcome::NotYetAvailable),
                1 => Err(AttestationError::ParseError("flaky".to_string())),
                2 => Ok(AttestationOutcome::Available(vec![0xab])),
                _ => Ok(AttestationOutcome::PermanentFailure("gone".to_string())),
            }
        }
    }

    struct ScriptedSubmitter(AtomicUsize);

    #[async_trait]
    impl SettlementSubmitter for ScriptedSubmitter {
        async fn submit(
            &self,
            _attestation: &[u8],
            _event: &crate::types::redemption::RedemptionEvent,
        ) -> Result<String, SettlementError> {
            match self.0.fetch_add(1, Ordering::SeqCst) % 3 {
                0 => Err(SettlementError::Rejected("busy".to_string())),
                1 => Ok("0xbeef".to_string()),
                _ => Err(SettlementError::Reverted("bad proof".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_status_only_moves_forward() {
        let store = Arc::new(MemoryRedemptionStore::new());
        let ids: Vec<String> = (0..8).map(|i| format!("0x{:02x}", i)).collect();
        for id in &ids {
            seed(&store, id).await;
        }

        let coordinator = coordinator(
            store.clone(),
            ScriptedFetcher(AtomicUsize::new(0)),
            ScriptedSubmitter(AtomicUsize::new(0)),
            test_policy(),
        );

        let mut previous: HashMap<String, Redemption> = HashMap::new();
        for _ in 0..12 {
            coordinator.process_pending_redemptions(None).await.unwrap();
            coordinator.process_fetched_redemptions(None).await.unwrap();

            for id in &ids {
                let record = load(&store, id).await;
                assert_payload_invariant(&record);
                if let Some(before) = previous.get(id) {
                    assert!(record.status.rank() >= before.status.rank());
                    assert!(record.version >= before.version);
                    if before.status.is_terminal() {
                        assert_eq!(record.status, before.status);
                    }
                }
                previous.insert(id.clone(), record);
            }
        }

        for record in previous.values() {
            assert!(record.status.is_terminal(), "{} stuck in {}", record.id, record.status);
        }
    }
}

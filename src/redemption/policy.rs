//! Retry & Termination Policy
//!
//! Count-based: a retryable failure state whose `retry_count` exceeds
//! `max_retries` becomes terminal on the next batch. Failed records wait
//! `retry_backoff_secs` after their last activity before they are re-attempted.

use std::time::Duration;

use crate::types::redemption::{Redemption, RedemptionStatus};

/// Extra lease time on top of the call timeout
pub const DEFAULT_LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Retry, timeout and lease settings for the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure of a phase
    pub max_retries: u32,
    /// Minimum seconds between a failure and the next attempt
    pub retry_backoff_secs: u64,
    /// Seconds after intake past which "not yet available" counts as a failure
    pub attestation_deadline_secs: u64,
    /// Bound on a single attestation fetch
    pub fetch_timeout: Duration,
    /// Bound on a single settlement submission
    pub submit_timeout: Duration,
    pub lease_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_secs: 60,
            attestation_deadline_secs: 24 * 60 * 60,
            fetch_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(120),
            lease_margin: DEFAULT_LEASE_MARGIN,
        }
    }
}

impl RetryPolicy {
    /// Whether a retryable-failed record has used up its budget
    pub fn is_exhausted(&self, record: &Redemption) -> bool {
        record.status.is_retryable_failure() && record.retry_count > self.max_retries
    }

    /// Whether a pending record has waited too long for its attestation
    pub fn attestation_overdue(&self, record: &Redemption, now: u64) -> bool {
        matches!(
            record.status,
            RedemptionStatus::Pending | RedemptionStatus::FetchFailed
        ) && now >= record
            .dates
            .created_at
            .saturating_add(self.attestation_deadline_secs)
    }

    /// Lease expiry for a fetch attempt starting at `now`
    pub fn fetch_lease_until(&self, now: u64) -> u64 {
        now + lease_secs(self.fetch_timeout + self.lease_margin)
    }

    /// Lease expiry for a submission attempt starting at `now`
    pub fn submit_lease_until(&self, now: u64) -> u64 {
        now + lease_secs(self.submit_timeout + self.lease_margin)
    }
}

fn lease_secs(duration: Duration) -> u64 {
    // Round up so sub-second timeouts still hold a lease
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

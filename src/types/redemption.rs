//! Redemption Types
//!
//! The redemption record tracked by the relayer and its lifecycle:
//!
//! ```text
//! pending → fetched → completed
//!    ↓         ↓
//! fetch_failed  submit_failed   (retryable, until the budget runs out)
//!    ↓         ↓
//!  failed    failed             (terminal)
//! ```

use serde::{Deserialize, Serialize};

/// Maximum number of entries kept in a record's diagnostic trail
pub const MAX_LOG_ENTRIES: usize = 50;

/// Current unix time in seconds
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Lifecycle phase of a redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    /// Created by the listener, waiting for the attestation
    Pending,
    /// Attestation fetch failed, eligible for retry
    FetchFailed,
    /// Attestation stored, waiting for settlement
    Fetched,
    /// Settlement submission failed, eligible for retry
    SubmitFailed,
    /// Settled on L1
    Completed,
    /// Gave up, needs an operator
    Failed,
}

impl RedemptionStatus {
    pub const ALL: [RedemptionStatus; 6] = [
        Self::Pending,
        Self::FetchFailed,
        Self::Fetched,
        Self::SubmitFailed,
        Self::Completed,
        Self::Failed,
    ];

    /// Terminal states never move again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Retryable failure states
    pub fn is_retryable_failure(&self) -> bool {
        matches!(self, Self::FetchFailed | Self::SubmitFailed)
    }

    /// Position in the lifecycle. Never decreases for a given record.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending | Self::FetchFailed => 0,
            Self::Fetched | Self::SubmitFailed => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether `next` is an edge of the transition graph
    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        use RedemptionStatus::*;

        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Pending, Fetched) | (Pending, FetchFailed) => true,
            (FetchFailed, Fetched) | (FetchFailed, FetchFailed) => true,
            (Fetched, Completed) | (Fetched, SubmitFailed) => true,
            (SubmitFailed, Completed) | (SubmitFailed, SubmitFailed) => true,
            _ => false,
        }
    }
}

impl Default for RedemptionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::FetchFailed => "fetch_failed",
            Self::Fetched => "fetched",
            Self::SubmitFailed => "submit_failed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RedemptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fetch_failed" => Ok(Self::FetchFailed),
            "fetched" => Ok(Self::Fetched),
            "submit_failed" => Ok(Self::SubmitFailed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

/// Outcome of the last attestation fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationState {
    Pending,
    Fetched,
    FetchFailed,
}

impl Default for AttestationState {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for AttestationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Fetched => "fetched",
            Self::FetchFailed => "fetch_failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AttestationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fetched" => Ok(Self::Fetched),
            "fetch_failed" => Ok(Self::FetchFailed),
            _ => Err(format!("unknown attestation state: {}", s)),
        }
    }
}

/// Main UTXO of the wallet handling the redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainUtxo {
    /// Bitcoin transaction hash (hex, 0x-prefixed)
    pub tx_hash: String,
    /// Output index
    pub tx_output_index: u32,
    /// Output value in satoshis
    pub tx_output_value: u64,
}

/// Snapshot of the on-chain redemption request. Never mutated after intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    /// 20-byte wallet public key hash (hex, 0x-prefixed)
    pub wallet_pub_key_hash: String,
    pub main_utxo: MainUtxo,
    /// Length-prefixed Bitcoin output script of the redeemer (hex, 0x-prefixed)
    pub redeemer_output_script: String,
    /// Requested amount in tBTC base units (1e18 per BTC)
    pub amount: u128,
    /// Transaction that emitted the request on the destination chain
    pub source_tx_hash: String,
}

/// Lifecycle timestamps (unix seconds)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionDates {
    pub created_at: u64,
    pub attestation_fetched_at: Option<u64>,
    pub settlement_submitted_at: Option<u64>,
    pub completed_at: Option<u64>,
    /// Updated on every persisted change
    pub last_activity_at: u64,
}

/// One line of a record's diagnostic trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: u64,
    pub message: String,
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RedemptionStatus,
    pub to: RedemptionStatus,
}

/// A redemption tracked from L2 request to L1 settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    /// Canonical source transaction hash
    pub id: String,
    /// Destination chain that emitted the request
    pub chain_name: String,
    pub event: RedemptionEvent,
    /// Signed VAA bytes
    #[serde(with = "opt_hex")]
    pub attestation_payload: Option<Vec<u8>>,
    pub attestation_state: AttestationState,
    pub settlement_tx_hash: Option<String>,
    pub status: RedemptionStatus,
    pub error: Option<String>,
    /// Failed attempts in the current phase
    pub retry_count: u32,
    /// Set while a worker holds the record for an external call
    pub lease_expires_at: Option<u64>,
    pub version: u64,
    pub dates: RedemptionDates,
    pub logs: Vec<LogEntry>,
}

impl Redemption {
    /// Create a new pending redemption for an observed event
    pub fn new(chain_name: impl Into<String>, event: RedemptionEvent) -> Self {
        let now = now_secs();

        let mut record = Self {
            id: event.source_tx_hash.clone(),
            chain_name: chain_name.into(),
            event,
            attestation_payload: None,
            attestation_state: AttestationState::Pending,
            settlement_tx_hash: None,
            status: RedemptionStatus::Pending,
            error: None,
            retry_count: 0,
            lease_expires_at: None,
            version: 0,
            dates: RedemptionDates {
                created_at: now,
                last_activity_at: now,
                ..Default::default()
            },
            logs: Vec::new(),
        };
        record.append_log("redemption request observed");
        record
    }

    /// Whether the record has passed the attestation phase
    pub fn attestation_complete(&self) -> bool {
        self.attestation_state == AttestationState::Fetched
    }

    /// Whether another worker currently holds the record
    pub fn is_leased(&self, now: u64) -> bool {
        self.lease_expires_at.map_or(false, |until| until > now)
    }

    /// Whether a failed record may be attempted again at `now`
    pub fn backoff_elapsed(&self, backoff_secs: u64, now: u64) -> bool {
        !self.status.is_retryable_failure()
            || now >= self.dates.last_activity_at.saturating_add(backoff_secs)
    }

    /// Take the record for an external call until `lease_until`
    pub fn claim(&mut self, lease_until: u64) {
        self.lease_expires_at = Some(lease_until);
        self.touch();
    }

    /// Give the record back without changing its phase
    pub fn release(&mut self) {
        self.lease_expires_at = None;
        self.touch();
    }

    /// Store the attestation and advance to fetched
    pub fn mark_fetched(&mut self, payload: Vec<u8>) -> Result<(), TransitionError> {
        self.transition(RedemptionStatus::Fetched)?;
        self.attestation_payload = Some(payload);
        self.attestation_state = AttestationState::Fetched;
        self.dates.attestation_fetched_at = Some(self.dates.last_activity_at);
        self.error = None;
        self.retry_count = 0;
        self.append_log("attestation fetched");
        Ok(())
    }

    /// Record a retryable attestation failure
    pub fn mark_fetch_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        let error = error.into();
        self.transition(RedemptionStatus::FetchFailed)?;
        self.attestation_state = AttestationState::FetchFailed;
        self.retry_count += 1;
        self.append_log(format!("attestation fetch failed (attempt {}): {}", self.retry_count, error));
        self.error = Some(error);
        Ok(())
    }

    /// Store the settlement transaction and complete
    pub fn mark_completed(&mut self, settlement_tx_hash: String) -> Result<(), TransitionError> {
        self.transition(RedemptionStatus::Completed)?;
        let now = self.dates.last_activity_at;
        self.append_log(format!("settlement submitted: {}", settlement_tx_hash));
        self.settlement_tx_hash = Some(settlement_tx_hash);
        self.dates.settlement_submitted_at = Some(now);
        self.dates.completed_at = Some(now);
        self.error = None;
        self.retry_count = 0;
        Ok(())
    }

    /// Record a retryable settlement failure
    pub fn mark_submit_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        let error = error.into();
        self.transition(RedemptionStatus::SubmitFailed)?;
        self.retry_count += 1;
        self.append_log(format!("settlement failed (attempt {}): {}", self.retry_count, error));
        self.error = Some(error);
        Ok(())
    }

    /// Terminal failure; the error is kept for operators
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        let error = error.into();
        self.transition(RedemptionStatus::Failed)?;
        if self.attestation_state != AttestationState::Fetched {
            self.attestation_state = AttestationState::FetchFailed;
        }
        self.append_log(format!("failed: {}", error));
        self.error = Some(error);
        Ok(())
    }

    /// Append to the diagnostic trail, dropping the oldest entries past the cap
    pub fn append_log(&mut self, message: impl Into<String>) {
        self.logs.push(LogEntry {
            at: now_secs(),
            message: message.into(),
        });
        if self.logs.len() > MAX_LOG_ENTRIES {
            let excess = self.logs.len() - MAX_LOG_ENTRIES;
            self.logs.drain(..excess);
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.dates.last_activity_at = now_secs();
    }

    fn transition(&mut self, next: RedemptionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.lease_expires_at = None;
        self.touch();
        Ok(())
    }
}

/// Redemption counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionStats {
    pub total: u64,
    pub pending: u64,
    pub fetch_failed: u64,
    pub fetched: u64,
    pub submit_failed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl RedemptionStats {
    /// Build from per-status counts as returned by the store
    pub fn from_counts(counts: &std::collections::HashMap<RedemptionStatus, u64>) -> Self {
        let get = |status| counts.get(&status).copied().unwrap_or(0);

        Self {
            total: counts.values().sum(),
            pending: get(RedemptionStatus::Pending),
            fetch_failed: get(RedemptionStatus::FetchFailed),
            fetched: get(RedemptionStatus::Fetched),
            submit_failed: get(RedemptionStatus::SubmitFailed),
            completed: get(RedemptionStatus::Completed),
            failed: get(RedemptionStatus::Failed),
        }
    }
}

impl std::fmt::Display for RedemptionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Redemptions: {} total | {} pending | {} fetch_failed | {} fetched | {} submit_failed | {} completed | {} failed",
            self.total,
            self.pending,
            self.fetch_failed,
            self.fetched,
            self.submit_failed,
            self.completed,
            self.failed
        )
    }
}

/// Serde helper storing optional bytes as a 0x-prefixed hex string
mod opt_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&format!("0x{}", hex::encode(b))),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let value: Option<String> = Option::deserialize(d)?;
        value
            .map(|s| hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom))
            .transpose()
    }
}

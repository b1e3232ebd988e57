//! Relayer Service
//!
//! Runs one coordinator per configured chain on a fixed interval and feeds
//! chain events from the intake channel through the listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn, Instrument};

use crate::common::config::{ChainConfig, RelayerConfig};
use crate::common::error::RelayerError;
use crate::common::logging::generate_correlation_id;
use crate::redemption::attestation::{AttestationFetcher, WormholescanFetcher};
use crate::redemption::coordinator::{CoordinatorError, ProcessSummary, RedemptionCoordinator};
use crate::redemption::listener::{intake_channel, RawRedemptionEvent, RedemptionListener};
use crate::redemption::policy::RetryPolicy;
use crate::redemption::settlement::{SettlementSubmitter, SignerServiceSubmitter};
use crate::storage::{RedemptionStore, SqliteRedemptionStore};
use crate::types::redemption::{Redemption, RedemptionStats, RedemptionStatus};

/// How long `run` waits for buffered intake events on shutdown
const INTAKE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinator scoped to one destination chain
struct ChainCoordinator {
    chain_name: String,
    coordinator: RedemptionCoordinator,
}

/// Relayer service
pub struct RelayerService {
    store: Arc<dyn RedemptionStore>,

    /// One per configured chain
    coordinators: Vec<ChainCoordinator>,

    listener: Arc<RedemptionListener>,

    intake_tx: mpsc::Sender<RawRedemptionEvent>,

    /// Taken by `run`
    intake_rx: Mutex<Option<mpsc::Receiver<RawRedemptionEvent>>>,

    poll_interval: Duration,

    /// Running flag
    running: Arc<RwLock<bool>>,
}

impl RelayerService {
    /// Wire a service from explicit collaborators
    pub fn new(
        chains: &[ChainConfig],
        store: Arc<dyn RedemptionStore>,
        fetcher: Arc<dyn AttestationFetcher>,
        submitter: Arc<dyn SettlementSubmitter>,
        policy: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        let coordinators = chains
            .iter()
            .map(|chain| ChainCoordinator {
                chain_name: chain.name.clone(),
                coordinator: RedemptionCoordinator::new(
                    store.clone(),
                    fetcher.clone(),
                    submitter.clone(),
                    policy.clone(),
                ),
            })
            .collect();

        let listener = Arc::new(RedemptionListener::new(
            store.clone(),
            chains.iter().map(|c| (c.name.clone(), c.kind)),
        ));
        let (intake_tx, intake_rx) = intake_channel();

        Self {
            store,
            coordinators,
            listener,
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            poll_interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Build the production service: SQLite store, Wormholescan, signer service
    pub fn from_config(config: &RelayerConfig) -> Result<Self, RelayerError> {
        let store = Arc::new(SqliteRedemptionStore::new(&config.db_path)?);
        let fetcher = Arc::new(WormholescanFetcher::new(&config.wormholescan_url));
        let submitter = Arc::new(SignerServiceSubmitter::new(&config.signer_url));

        Ok(Self::new(
            &config.chains,
            store,
            fetcher,
            submitter,
            config.retry_policy(),
            config.poll_interval(),
        ))
    }

    /// Sender for chain subscriptions
    pub fn intake_sender(&self) -> mpsc::Sender<RawRedemptionEvent> {
        self.intake_tx.clone()
    }

    pub fn listener(&self) -> Arc<RedemptionListener> {
        self.listener.clone()
    }

    /// Names of the configured chains
    pub fn chains(&self) -> Vec<&str> {
        self.coordinators.iter().map(|c| c.chain_name.as_str()).collect()
    }

    /// Run both batches for every chain once
    pub async fn tick(&self) -> TickResult {
        let tick_id = generate_correlation_id();
        let span = tracing::info_span!("tick", tick_id = %tick_id);

        async {
            let mut result = TickResult::default();

            for chain in &self.coordinators {
                let name = chain.chain_name.as_str();

                match chain.coordinator.process_pending_redemptions(Some(name)).await {
                    Ok(summary) => result.attestations += summary,
                    Err(e) => result.record_failure(name, "attestation", e),
                }

                match chain.coordinator.process_fetched_redemptions(Some(name)).await {
                    Ok(summary) => result.settlements += summary,
                    Err(e) => result.record_failure(name, "settlement", e),
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    /// Run the service loop
    pub async fn run(&self) -> Result<(), RelayerError> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let intake = match self.intake_rx.lock().await.take() {
            Some(rx) => {
                let listener = self.listener.clone();
                Some(tokio::spawn(async move { listener.run_intake(rx, shutdown_rx).await }))
            }
            None => {
                warn!("Intake channel already consumed, running batches only");
                None
            }
        };

        info!(
            chains = ?self.chains(),
            interval_secs = self.poll_interval.as_secs(),
            "Relayer service started"
        );

        loop {
            {
                let running = self.running.read().await;
                if !*running {
                    break;
                }
            }

            let result = self.tick().await;
            if result.fatal_batches > 0 {
                error!(%result, "Tick finished with non-retryable batch failures");
            } else if result.failed_batches > 0 {
                warn!(%result, "Tick finished with failed batches");
            } else if result.has_activity() {
                info!(%result, "Tick finished");
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        shutdown_tx.send_replace(true);
        if let Some(mut handle) = intake {
            match tokio::time::timeout(INTAKE_DRAIN_TIMEOUT, &mut handle).await {
                Ok(Ok(stats)) => info!(%stats, "Intake drained"),
                Ok(Err(e)) => error!(error = %e, "Intake task failed"),
                Err(_) => {
                    warn!(
                        timeout_secs = INTAKE_DRAIN_TIMEOUT.as_secs(),
                        "Intake did not drain in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        info!("Relayer service stopped");
        Ok(())
    }

    /// Stop the service
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Counts by status, optionally for one chain
    pub async fn stats(&self, chain_name: Option<&str>) -> Result<RedemptionStats, RelayerError> {
        let counts = self.store.count_by_status(chain_name).await?;
        Ok(RedemptionStats::from_counts(&counts))
    }

    pub async fn get_redemption(&self, id: &str) -> Result<Option<Redemption>, RelayerError> {
        Ok(self.store.get_by_id(id).await?)
    }

    pub async fn list_redemptions(
        &self,
        status: RedemptionStatus,
        chain_name: Option<&str>,
    ) -> Result<Vec<Redemption>, RelayerError> {
        Ok(self.store.get_by_status(status, chain_name).await?)
    }
}

/// Result of a service tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickResult {
    pub attestations: ProcessSummary,
    pub settlements: ProcessSummary,
    /// Batches whose records could not be read
    pub failed_batches: usize,
    /// Subset of `failed_batches` that another tick will not fix
    pub fatal_batches: usize,
}

impl TickResult {
    pub fn has_activity(&self) -> bool {
        self.attestations.has_activity() || self.settlements.has_activity()
    }

    fn record_failure(&mut self, chain: &str, batch: &str, err: CoordinatorError) {
        let err = RelayerError::from(err);
        self.failed_batches += 1;

        if err.is_retryable() {
            warn!(chain = %chain, batch, error = %err, "Batch read failed, retrying next tick");
        } else {
            self.fatal_batches += 1;
            error!(chain = %chain, batch, code = err.error_code(), error = %err, "Batch read failed");
        }
    }
}

impl std::fmt::Display for TickResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attestations: [{}], settlements: [{}], failed batches: {} ({} fatal)",
            self.attestations, self.settlements, self.failed_batches, self.fatal_batches
        )
    }
}

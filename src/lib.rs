//! tBTC Redemption Relayer
//!
//! Relays tBTC redemptions requested on destination chains (EVM L2s, Sei,
//! Solana, Sui, StarkNet) to Ethereum L1.
//!
//! ## Components
//!
//! 1. **Listener** - Records redemption requests from chain events
//! 2. **Coordinator** - Fetches attestations and submits settlements
//! 3. **Store** - Durable records with optimistic version checks
//! 4. **Service** - Per-chain scheduling loop and intake channel
//!
//! Chain subscriptions, the Wormhole guardians and the L1 signer are
//! external; the relayer talks to them through traits.

pub mod common;
pub mod redemption;
pub mod storage;
pub mod types;

// Top-level access to configuration and logging
pub use common::{config, logging};

// Re-exports: Errors
pub use common::error::{RelayerError, Result};

// Re-exports: Configuration
pub use common::config::{ChainConfig, ConfigError, Network, RelayerConfig};

// Re-exports: Redemption pipeline
pub use redemption::{
    AttestationFetcher, AttestationOutcome, ChainKind, IntakeOutcome, ProcessSummary,
    RedemptionCoordinator, RedemptionListener, RelayerService, RetryPolicy, SettlementSubmitter,
    TickResult,
};

// Re-exports: Storage
pub use storage::{
    CreateOutcome, MemoryRedemptionStore, RedemptionStore, SqliteRedemptionStore, StorageError,
};

// Re-exports: Types
pub use types::{Redemption, RedemptionEvent, RedemptionStats, RedemptionStatus};

//! Redemption Relaying
//!
//! Carries tBTC redemption requests made on destination chains through to
//! settlement on L1.
//!
//! # Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    REDEMPTION FLOW                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  1. User requests a redemption on a destination chain           │
//! │     └── Emits: RedemptionRequested                              │
//! │                                                                 │
//! │  2. Listener records the request                                │
//! │     └── Adapter: chain payload → RedemptionEvent                │
//! │     └── Store: create (idempotent on source tx hash)            │
//! │                                                                 │
//! │  3. Coordinator fetches the attestation                         │
//! │     └── Via: Wormholescan (signed VAA)                          │
//! │     └── pending → fetched                                       │
//! │                                                                 │
//! │  4. Coordinator submits the settlement                          │
//! │     └── Via: signer service → L1 redeemer                       │
//! │     └── fetched → completed                                     │
//! │                                                                 │
//! │  Failures retry with backoff until the budget runs out,         │
//! │  then the record is parked as failed for an operator.           │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tbtc_relayer::config::RelayerConfig;
//! use tbtc_relayer::redemption::RelayerService;
//!
//! #[tokio::main]
//! async fn main() -> tbtc_relayer::Result<()> {
//!     let config = RelayerConfig::from_env()?;
//!     let service = RelayerService::from_config(&config)?;
//!
//!     // Chain subscriptions push raw events here
//!     let intake = service.intake_sender();
//!
//!     service.run().await
//! }
//! ```

pub mod adapters;
pub mod attestation;
pub mod coordinator;
pub mod listener;
pub mod policy;
pub mod service;
pub mod settlement;

// Re-exports
pub use adapters::{adapt_event, AdapterError, ChainKind};
pub use attestation::{AttestationError, AttestationFetcher, AttestationOutcome, WormholescanFetcher};
pub use coordinator::{CoordinatorError, ProcessSummary, RedemptionCoordinator};
pub use listener::{
    intake_channel, IntakeOutcome, IntakeStats, ListenerError, RawRedemptionEvent,
    RedemptionListener,
};
pub use policy::RetryPolicy;
pub use service::{RelayerService, TickResult};
pub use settlement::{SettlementError, SettlementSubmitter, SignerServiceSubmitter};

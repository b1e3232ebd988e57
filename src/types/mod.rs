//! Shared Types Module
//!
//! Data types shared across the relayer.

pub mod redemption;
pub mod units;

// Re-exports for convenience
pub use redemption::{
    now_secs, AttestationState, LogEntry, MainUtxo, Redemption, RedemptionDates, RedemptionEvent,
    RedemptionStats, RedemptionStatus, TransitionError, MAX_LOG_ENTRIES,
};
pub use units::{parse_amount, sats_to_btc_string, sats_to_display, tbtc_to_sats, SATS_PER_BTC};

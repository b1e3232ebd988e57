//! Settlement Submitter
//!
//! Finalizes a redemption on L1 by handing the signed VAA and the event
//! snapshot to an external signing service, which calls
//! `requestRedemption(walletPubKeyHash, mainUtxo, encodedVm)` on the L1
//! redeemer contract and reports the transaction hash.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::types::redemption::{MainUtxo, RedemptionEvent};

/// Settlement failure
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The transaction reverted deterministically; retrying cannot help
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SettlementError {
    /// Whether the failure is final for this redemption
    pub fn is_permanent(&self) -> bool {
        matches!(self, SettlementError::Reverted(_))
    }
}

/// Submits the finalizing L1 transaction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementSubmitter: Send + Sync {
    /// Returns the settlement transaction hash
    async fn submit(
        &self,
        attestation: &[u8],
        event: &RedemptionEvent,
    ) -> Result<String, SettlementError>;
}

/// Client for the external signing service
#[derive(Debug, Clone)]
pub struct SignerServiceSubmitter {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    /// 0x-prefixed VAA bytes
    encoded_vm: String,
    wallet_pub_key_hash: &'a str,
    main_utxo: &'a MainUtxo,
    redeemer_output_script: &'a str,
    /// Decimal string; JSON numbers cannot carry u128
    amount: String,
    source_tx_hash: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    tx_hash: Option<String>,
    error: Option<String>,
    #[serde(default)]
    reverted: bool,
}

impl SignerServiceSubmitter {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SettlementSubmitter for SignerServiceSubmitter {
    async fn submit(
        &self,
        attestation: &[u8],
        event: &RedemptionEvent,
    ) -> Result<String, SettlementError> {
        let url = format!("{}/submit", self.base_url);
        let request = SubmitRequest {
            encoded_vm: format!("0x{}", hex::encode(attestation)),
            wallet_pub_key_hash: &event.wallet_pub_key_hash,
            main_utxo: &event.main_utxo,
            redeemer_output_script: &event.redeemer_output_script,
            amount: event.amount.to_string(),
            source_tx_hash: &event.source_tx_hash,
        };

        let resp = self.client.post(&url).json(&request).send().await?;
        let success = resp.status().is_success();
        let body = resp.text().await?;

        interpret_response(success, &body)
    }
}

/// Map a signing service response to a transaction hash or failure
fn interpret_response(success: bool, body: &str) -> Result<String, SettlementError> {
    let parsed: SubmitResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if !success => return Err(SettlementError::Rejected(body.trim().to_string())),
        Err(e) => return Err(SettlementError::InvalidResponse(e.to_string())),
    };

    if parsed.reverted {
        let reason = parsed.error.unwrap_or_else(|| "execution reverted".to_string());
        return Err(SettlementError::Reverted(reason));
    }

    if let Some(error) = parsed.error {
        return Err(SettlementError::Rejected(error));
    }

    match parsed.tx_hash {
        Some(tx_hash) if success && !tx_hash.is_empty() => Ok(tx_hash),
        _ if !success => Err(SettlementError::Rejected(body.trim().to_string())),
        _ => Err(SettlementError::InvalidResponse(
            "missing tx_hash".to_string(),
        )),
    }
}

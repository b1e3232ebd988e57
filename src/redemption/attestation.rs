//! Attestation Fetcher
//!
//! Looks up the Wormhole VAA that attests a redemption request emitted on a
//! destination chain. The default implementation talks to the Wormholescan API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// Wormholescan API endpoints
pub const MAINNET_URL: &str = "https://api.wormholescan.io";
pub const TESTNET_URL: &str = "https://api.testnet.wormholescan.io";

/// Result of an attestation lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationOutcome {
    /// Signed attestation bytes
    Available(Vec<u8>),
    /// Guardians have not signed yet
    NotYetAvailable,
    /// The attestation will never exist for this transaction
    PermanentFailure(String),
}

/// Transient attestation lookup failure
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unexpected response ({status}): {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Source of attestations, keyed by source transaction hash
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttestationFetcher: Send + Sync {
    /// `Err` is transient; permanent failures are an `Ok` outcome
    async fn fetch(&self, source_tx_hash: &str) -> Result<AttestationOutcome, AttestationError>;
}

/// Wormholescan HTTP client
#[derive(Debug, Clone)]
pub struct WormholescanFetcher {
    client: Client,
    base_url: String,
}

impl WormholescanFetcher {
    /// Create a new client with custom URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn operations_url(&self, source_tx_hash: &str) -> String {
        format!(
            "{}/api/v1/operations?txHash={}",
            self.base_url, source_tx_hash
        )
    }
}

#[async_trait]
impl AttestationFetcher for WormholescanFetcher {
    async fn fetch(&self, source_tx_hash: &str) -> Result<AttestationOutcome, AttestationError> {
        let url = self.operations_url(source_tx_hash);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        let body = resp.text().await?;

        interpret_response(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct OperationsResponse {
    #[serde(default)]
    operations: Vec<Operation>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    vaa: Option<VaaInfo>,
}

#[derive(Debug, Deserialize)]
struct VaaInfo {
    raw: Option<String>,
}

/// Map an operations lookup response to an outcome
fn interpret_response(
    status: StatusCode,
    body: &str,
) -> Result<AttestationOutcome, AttestationError> {
    match status {
        StatusCode::NOT_FOUND => return Ok(AttestationOutcome::NotYetAvailable),
        StatusCode::BAD_REQUEST => {
            return Ok(AttestationOutcome::PermanentFailure(format!(
                "lookup rejected: {}",
                body.trim()
            )))
        }
        s if !s.is_success() => {
            return Err(AttestationError::UnexpectedStatus {
                status: s.as_u16(),
                body: body.to_string(),
            })
        }
        _ => {}
    }

    let parsed: OperationsResponse =
        serde_json::from_str(body).map_err(|e| AttestationError::ParseError(e.to_string()))?;

    let raw = parsed
        .operations
        .into_iter()
        .filter_map(|op| op.vaa.and_then(|vaa| vaa.raw))
        .find(|raw| !raw.is_empty());

    match raw {
        Some(raw) => {
            let bytes = STANDARD
                .decode(raw.as_bytes())
                .map_err(|e| AttestationError::ParseError(format!("invalid VAA encoding: {}", e)))?;
            Ok(AttestationOutcome::Available(bytes))
        }
        None => Ok(AttestationOutcome::NotYetAvailable),
    }
}

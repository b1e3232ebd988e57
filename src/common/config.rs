//! Environment-based Configuration for the tBTC Relayer
//!
//! Values come from environment variables (a `.env` file is loaded first when
//! present). Secrets never live in this crate; signing happens in the
//! external signer service.
//!
//! # Environment Variables
//!
//! ## Network
//! - `RELAYER_NETWORK` - "mainnet", "testnet", or "devnet" (default: "testnet")
//! - `RELAYER_CHAINS` - comma-separated `name:kind` list, kind one of
//!   evm, sei, solana, sui, starknet
//!   (default: "ArbitrumSepolia:evm,BaseSepolia:evm")
//!
//! ## Endpoints
//! - `RELAYER_WORMHOLESCAN_URL` - attestation API (default per network)
//! - `RELAYER_SIGNER_URL` - settlement signer service (required on mainnet)
//! - `RELAYER_DB_PATH` - SQLite file (default: "data/redemptions.db")
//!
//! ## Scheduling and Retries
//! - `RELAYER_POLL_INTERVAL_SECS` - seconds between ticks (default: 60)
//! - `RELAYER_MAX_RETRIES` - retries per phase before giving up (default: 5)
//! - `RELAYER_RETRY_BACKOFF_SECS` - wait after a failure (default: 60)
//! - `RELAYER_ATTESTATION_DEADLINE_SECS` - wait for guardians (default: 86400)
//! - `RELAYER_FETCH_TIMEOUT_SECS` / `RELAYER_SUBMIT_TIMEOUT_SECS` (default: 30 / 120)
//!
//! ## Logging
//! - `RELAYER_LOG_LEVEL` - debug, info, warn, error (default: "info")
//! - `RELAYER_LOG_JSON` - "1" for JSON lines (default: on for mainnet)

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::redemption::adapters::ChainKind;
use crate::redemption::attestation;
use crate::redemption::policy::RetryPolicy;

const DEFAULT_CHAINS: &str = "ArbitrumSepolia:evm,BaseSepolia:evm";
const DEFAULT_DB_PATH: &str = "data/redemptions.db";
const DEFAULT_SIGNER_URL: &str = "http://127.0.0.1:8090";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("network mismatch: expected {0}, got {1}")]
    NetworkMismatch(String, String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "devnet" | "dev" => Ok(Network::Devnet),
            _ => Err(ConfigError::InvalidValue(
                "RELAYER_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Get default Wormholescan API for this network
    pub fn default_wormholescan_url(&self) -> &'static str {
        match self {
            Network::Mainnet => attestation::MAINNET_URL,
            Network::Testnet | Network::Devnet => attestation::TESTNET_URL,
        }
    }
}

/// A destination chain the relayer serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Name stored on every record, e.g. "ArbitrumMainnet"
    pub name: String,
    pub kind: ChainKind,
}

impl FromStr for ChainConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidValue("RELAYER_CHAINS".to_string(), reason);

        let (name, kind) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid(format!("expected name:kind, got {}", s)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid(format!("empty chain name in {}", s)));
        }

        Ok(Self {
            name: name.to_string(),
            kind: kind.trim().parse().map_err(invalid)?,
        })
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub network: Network,
    pub chains: Vec<ChainConfig>,
    pub db_path: String,
    pub wormholescan_url: String,
    pub signer_url: String,
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub attestation_deadline_secs: u64,
    pub fetch_timeout_secs: u64,
    pub submit_timeout_secs: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl RelayerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let network: Network = lookup("RELAYER_NETWORK")
            .unwrap_or_else(|| "testnet".to_string())
            .parse()?;

        let chains = parse_chains(&lookup("RELAYER_CHAINS").unwrap_or_else(|| DEFAULT_CHAINS.to_string()))?;

        let db_path = lookup("RELAYER_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let wormholescan_url = lookup("RELAYER_WORMHOLESCAN_URL")
            .unwrap_or_else(|| network.default_wormholescan_url().to_string());

        // Signer (required outside test networks)
        let signer_url = match lookup("RELAYER_SIGNER_URL") {
            Some(url) => url,
            None if network == Network::Mainnet => {
                return Err(ConfigError::MissingEnvVar("RELAYER_SIGNER_URL".to_string()))
            }
            None => DEFAULT_SIGNER_URL.to_string(),
        };

        let defaults = RetryPolicy::default();

        let poll_interval_secs = parse_var(&lookup, "RELAYER_POLL_INTERVAL_SECS", 60)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAYER_POLL_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let max_retries = parse_var(&lookup, "RELAYER_MAX_RETRIES", defaults.max_retries)?;
        let retry_backoff_secs =
            parse_var(&lookup, "RELAYER_RETRY_BACKOFF_SECS", defaults.retry_backoff_secs)?;
        let attestation_deadline_secs = parse_var(
            &lookup,
            "RELAYER_ATTESTATION_DEADLINE_SECS",
            defaults.attestation_deadline_secs,
        )?;
        let fetch_timeout_secs = parse_var(
            &lookup,
            "RELAYER_FETCH_TIMEOUT_SECS",
            defaults.fetch_timeout.as_secs(),
        )?;
        let submit_timeout_secs = parse_var(
            &lookup,
            "RELAYER_SUBMIT_TIMEOUT_SECS",
            defaults.submit_timeout.as_secs(),
        )?;

        let log_level = lookup("RELAYER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = lookup("RELAYER_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(network == Network::Mainnet);

        Ok(Self {
            network,
            chains,
            db_path,
            wormholescan_url,
            signer_url,
            poll_interval_secs,
            max_retries,
            retry_backoff_secs,
            attestation_deadline_secs,
            fetch_timeout_secs,
            submit_timeout_secs,
            log_level,
            log_json,
        })
    }

    /// Coordinator policy for these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_backoff_secs: self.retry_backoff_secs,
            attestation_deadline_secs: self.attestation_deadline_secs,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Look up a configured chain by name
    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.name == name)
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.network != Network::Mainnet {
            return Err(ConfigError::NetworkMismatch(
                "mainnet".to_string(),
                format!("{:?}", self.network),
            ));
        }

        if !self.signer_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "RELAYER_SIGNER_URL".to_string(),
                "must use https on mainnet".to_string(),
            ));
        }

        Ok(())
    }

    /// Checks required before the daemon starts; production rules apply on mainnet
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        if self.network == Network::Mainnet {
            self.validate_for_production()?;
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== tBTC Relayer Configuration ===");
        println!("Network: {:?}", self.network);
        println!(
            "Chains: {}",
            self.chains
                .iter()
                .map(|c| format!("{} ({})", c.name, c.kind))
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("Database: {}", self.db_path);
        println!("Wormholescan: {}", self.wormholescan_url);
        println!("Signer: {}", self.signer_url);
        println!("Poll Interval: {}s", self.poll_interval_secs);
        println!(
            "Retries: {} (backoff {}s, attestation deadline {}s)",
            self.max_retries, self.retry_backoff_secs, self.attestation_deadline_secs
        );
        println!(
            "Timeouts: fetch {}s, submit {}s",
            self.fetch_timeout_secs, self.submit_timeout_secs
        );
        println!("Log Level: {} (json: {})", self.log_level, self.log_json);
        println!("==================================");
    }
}

/// Parse a `name:kind` list, rejecting duplicate names
fn parse_chains(value: &str) -> Result<Vec<ChainConfig>, ConfigError> {
    let mut chains: Vec<ChainConfig> = Vec::new();

    for entry in value.split(',').filter(|e| !e.trim().is_empty()) {
        let chain: ChainConfig = entry.parse()?;
        if chains.iter().any(|c| c.name == chain.name) {
            return Err(ConfigError::InvalidValue(
                "RELAYER_CHAINS".to_string(),
                format!("duplicate chain: {}", chain.name),
            ));
        }
        chains.push(chain);
    }

    if chains.is_empty() {
        return Err(ConfigError::InvalidValue(
            "RELAYER_CHAINS".to_string(),
            "no chains configured".to_string(),
        ));
    }

    Ok(chains)
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("not a valid number: {}", value))
        }),
        None => Ok(default),
    }
}

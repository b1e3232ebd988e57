//! tBTC Relayer - Daemon and Operator CLI
//!
//! Run modes:
//!   relayer run [--interval <secs>]          - Start the relayer loop
//!   relayer tick                             - Run both batches once
//!   relayer status [--chain <name>]          - Counts by status
//!   relayer show <id>                        - Print one redemption
//!   relayer list <status> [--chain <name>]   - List redemptions in a status
//!   relayer ingest <chain> <event.json>      - Feed one raw event

use std::env;
use std::sync::Arc;

use tbtc_relayer::config::RelayerConfig;
use tbtc_relayer::logging;
use tbtc_relayer::types::{sats_to_display, tbtc_to_sats};
use tbtc_relayer::{IntakeOutcome, Redemption, RedemptionStatus, RelayerError, RelayerService};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || matches!(args[1].as_str(), "help" | "--help" | "-h") {
        print_usage();
        return;
    }

    if let Err(e) = dispatch(&args[1], &args[2..]).await {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

async fn dispatch(command: &str, args: &[String]) -> Result<(), RelayerError> {
    let mut config = RelayerConfig::from_env()?;
    logging::init_from_config(&config)?;

    match command {
        "run" => {
            if let Some(interval) = flag_value(args, "--interval") {
                config.poll_interval_secs = interval
                    .parse()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| RelayerError::validation(format!("invalid interval: {}", interval)))?;
            }
            run_service(&config).await
        }
        "tick" => run_tick(&config).await,
        "status" => show_status(&config, flag_value(args, "--chain")).await,
        "show" => {
            let id = positional(args, 0, "redemption id")?;
            show_redemption(&config, id).await
        }
        "list" => {
            let status: RedemptionStatus = positional(args, 0, "status")?
                .parse()
                .map_err(RelayerError::validation)?;
            list_redemptions(&config, status, flag_value(args, "--chain")).await
        }
        "ingest" => {
            let chain = positional(args, 0, "chain name")?;
            let path = positional(args, 1, "event file")?;
            ingest_event(&config, chain, path).await
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("tBTC Relayer - Redemption relaying to L1");
    println!();
    println!("Usage:");
    println!("  relayer run [--interval <secs>]          Start the relayer loop");
    println!("  relayer tick                             Run both batches once");
    println!("  relayer status [--chain <name>]          Show counts by status");
    println!("  relayer show <id>                        Show one redemption");
    println!("  relayer list <status> [--chain <name>]   List redemptions in a status");
    println!("  relayer ingest <chain> <event.json>      Record one raw chain event");
    println!();
    println!("Statuses: pending, fetch_failed, fetched, submit_failed, completed, failed");
    println!();
    println!("Environment Variables:");
    println!("  RELAYER_NETWORK           mainnet, testnet or devnet (default: testnet)");
    println!("  RELAYER_CHAINS            name:kind list (default: ArbitrumSepolia:evm,BaseSepolia:evm)");
    println!("  RELAYER_DB_PATH           SQLite file (default: data/redemptions.db)");
    println!("  RELAYER_WORMHOLESCAN_URL  Attestation API");
    println!("  RELAYER_SIGNER_URL        Settlement signer service (required on mainnet)");
    println!("  RELAYER_LOG_LEVEL         Logging level (default: info)");
}

/// Value following `flag`, if present
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Nth argument that is neither a flag nor a flag's value
fn positional<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str, RelayerError> {
    let mut values = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i].starts_with("--") {
            i += 2;
        } else {
            values.push(args[i].as_str());
            i += 1;
        }
    }

    values
        .get(index)
        .copied()
        .ok_or_else(|| RelayerError::validation(format!("missing {}", what)))
}

async fn run_service(config: &RelayerConfig) -> Result<(), RelayerError> {
    config.validate_for_run()?;
    config.print_summary();
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let service = Arc::new(RelayerService::from_config(config)?);

    let stopper = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            stopper.stop().await;
        }
    });

    service.run().await
}

async fn run_tick(config: &RelayerConfig) -> Result<(), RelayerError> {
    let service = RelayerService::from_config(config)?;
    let result = service.tick().await;

    println!("{}", result);
    if result.failed_batches > 0 {
        return Err(RelayerError::validation(format!(
            "{} batch(es) could not be read",
            result.failed_batches
        )));
    }
    Ok(())
}

async fn show_status(config: &RelayerConfig, chain: Option<&str>) -> Result<(), RelayerError> {
    let service = RelayerService::from_config(config)?;
    let stats = service.stats(chain).await?;

    println!("=== Redemption Status ({}) ===", chain.unwrap_or("all chains"));
    println!("{}", stats);
    Ok(())
}

async fn show_redemption(config: &RelayerConfig, id: &str) -> Result<(), RelayerError> {
    let service = RelayerService::from_config(config)?;
    let record = service
        .get_redemption(id)
        .await?
        .ok_or_else(|| RelayerError::not_found(id))?;

    print_redemption(&record);
    println!();
    println!("Log:");
    for entry in &record.logs {
        println!("  [{}] {}", entry.at, entry.message);
    }
    Ok(())
}

async fn list_redemptions(
    config: &RelayerConfig,
    status: RedemptionStatus,
    chain: Option<&str>,
) -> Result<(), RelayerError> {
    let service = RelayerService::from_config(config)?;
    let records = service.list_redemptions(status, chain).await?;

    println!("{} redemption(s) in {}", records.len(), status);
    for record in &records {
        println!();
        print_redemption(record);
    }
    Ok(())
}

async fn ingest_event(config: &RelayerConfig, chain: &str, path: &str) -> Result<(), RelayerError> {
    let chain = config
        .chain(chain)
        .map(|c| c.name.as_str())
        .ok_or_else(|| RelayerError::validation(format!("chain {} is not configured", chain)))?;

    let raw = std::fs::read_to_string(path)?;
    let payload: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| RelayerError::validation(format!("{}: {}", path, e)))?;

    let service = RelayerService::from_config(config)?;
    match service.listener().on_redemption_event(&payload, chain).await? {
        IntakeOutcome::Created(id) => println!("Recorded redemption {}", id),
        IntakeOutcome::Duplicate(id) => println!("Redemption {} already recorded", id),
        IntakeOutcome::Skipped(reason) => {
            return Err(RelayerError::validation(format!("event skipped: {}", reason)))
        }
    }
    Ok(())
}

fn print_redemption(record: &Redemption) {
    println!("ID:          {}", record.id);
    println!("Chain:       {}", record.chain_name);
    println!("Status:      {} (version {})", record.status, record.version);
    println!(
        "Amount:      {} ({} tBTC units)",
        sats_to_display(tbtc_to_sats(record.event.amount)),
        record.event.amount
    );
    println!("Wallet PKH:  {}", record.event.wallet_pub_key_hash);
    println!("Attestation: {}", record.attestation_state);
    if let Some(tx) = &record.settlement_tx_hash {
        println!("Settlement:  {}", tx);
    }
    if record.retry_count > 0 {
        println!("Retries:     {}", record.retry_count);
    }
    if let Some(err) = &record.error {
        println!("Error:       {}", err);
    }
}

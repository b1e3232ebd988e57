//! Unit Conversion Utilities
//!
//! tBTC is an 18-decimal token while Bitcoin amounts are in satoshis.

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// tBTC base units per satoshi (1e18 / 1e8)
pub const TBTC_UNITS_PER_SAT: u128 = 10_000_000_000;

/// Convert a tBTC amount to satoshis, truncating dust below one satoshi
pub fn tbtc_to_sats(amount: u128) -> u64 {
    u64::try_from(amount / TBTC_UNITS_PER_SAT).unwrap_or(u64::MAX)
}

/// Convert satoshis to BTC string (e.g., "0.00100000")
pub fn sats_to_btc_string(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Convert satoshis to human-readable string
/// e.g., 100000 -> "100,000 sats (0.00100000 BTC)"
pub fn sats_to_display(sats: u64) -> String {
    format!("{} sats ({} BTC)", format_with_commas(sats), sats_to_btc_string(sats))
}

/// Format number with thousands separators
fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Parse a token amount from a decimal or 0x-hex string
pub fn parse_amount(s: &str) -> Option<u128> {
    let s = s.trim().replace('_', "");
    match s.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

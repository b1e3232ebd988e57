//! Chain Event Adapters
//!
//! Every destination chain reports `RedemptionRequested` in its own shape.
//! Adapters map those loosely typed payloads to a `RedemptionEvent`:
//!
//! | kind       | tx hash                | fields        | naming     |
//! |------------|------------------------|---------------|------------|
//! | `evm`      | `transactionHash`      | `args`        | camelCase  |
//! | `sei`      | `transactionHash`      | `args`        | camelCase  |
//! | `solana`   | `signature`            | `data`        | snake_case |
//! | `sui`      | `id.txDigest`          | `parsedJson`  | snake_case |
//! | `starknet` | `transaction_hash`     | `event`       | snake_case |
//!
//! Byte fields may be hex strings or arrays of bytes; integers may be JSON
//! numbers or decimal/hex strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::redemption::{MainUtxo, RedemptionEvent};
use crate::types::units::parse_amount;

/// Event format family of a destination chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Evm,
    Sei,
    Solana,
    Sui,
    StarkNet,
}

impl std::fmt::Display for ChainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainKind::Evm => "evm",
            ChainKind::Sei => "sei",
            ChainKind::Solana => "solana",
            ChainKind::Sui => "sui",
            ChainKind::StarkNet => "starknet",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ChainKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "evm" => Ok(ChainKind::Evm),
            "sei" => Ok(ChainKind::Sei),
            "solana" => Ok(ChainKind::Solana),
            "sui" => Ok(ChainKind::Sui),
            "starknet" => Ok(ChainKind::StarkNet),
            _ => Err(format!("unknown chain kind: {}", s)),
        }
    }
}

/// Malformed chain event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl AdapterError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        AdapterError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

struct Layout {
    tx_hash_path: &'static [&'static str],
    fields_key: &'static str,
    camel_case: bool,
}

impl ChainKind {
    fn layout(&self) -> Layout {
        match self {
            ChainKind::Evm | ChainKind::Sei => Layout {
                tx_hash_path: &["transactionHash"],
                fields_key: "args",
                camel_case: true,
            },
            ChainKind::Solana => Layout {
                tx_hash_path: &["signature"],
                fields_key: "data",
                camel_case: false,
            },
            ChainKind::Sui => Layout {
                tx_hash_path: &["id", "txDigest"],
                fields_key: "parsedJson",
                camel_case: false,
            },
            ChainKind::StarkNet => Layout {
                tx_hash_path: &["transaction_hash"],
                fields_key: "event",
                camel_case: false,
            },
        }
    }

    /// Hex-hash chains are normalized to lowercase; base58 ids are kept as is
    ///
    /// StarkNet hashes are field elements and arrive with or without zero
    /// padding, so leading zeros are dropped there.
    fn normalize_tx_hash(&self, raw: &str) -> Result<String, AdapterError> {
        match self {
            ChainKind::Evm | ChainKind::Sei | ChainKind::StarkNet => {
                let digits = raw.trim_start_matches("0x").trim_start_matches("0X");
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(AdapterError::invalid("tx_hash", "not a hex hash"));
                }
                let digits = digits.to_lowercase();
                if *self == ChainKind::StarkNet {
                    let trimmed = digits.trim_start_matches('0');
                    return Ok(format!("0x{}", if trimmed.is_empty() { "0" } else { trimmed }));
                }
                Ok(format!("0x{}", digits))
            }
            ChainKind::Solana | ChainKind::Sui => Ok(raw.to_string()),
        }
    }
}

/// Map a raw chain event to the typed snapshot
pub fn adapt_event(kind: ChainKind, raw: &Value) -> Result<RedemptionEvent, AdapterError> {
    let layout = kind.layout();

    let tx_hash = layout
        .tx_hash_path
        .iter()
        .try_fold(raw, |value, key| value.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterError::MissingField(layout.tx_hash_path.join(".")))?;
    let source_tx_hash = kind.normalize_tx_hash(tx_hash)?;

    let fields = raw
        .get(layout.fields_key)
        .filter(|v| v.is_object())
        .ok_or_else(|| AdapterError::MissingField(layout.fields_key.to_string()))?;
    let key = |camel: &'static str, snake: &'static str| if layout.camel_case { camel } else { snake };

    let wallet_pub_key_hash = bytes_field(
        field(fields, key("walletPubKeyHash", "wallet_pub_key_hash"))?,
        "wallet_pub_key_hash",
        Some(20),
    )?;

    let utxo = field(fields, key("mainUtxo", "main_utxo"))?;
    let main_utxo = MainUtxo {
        tx_hash: bytes_field(field(utxo, key("txHash", "tx_hash"))?, "main_utxo.tx_hash", Some(32))?,
        tx_output_index: u32::try_from(int_field(
            field(utxo, key("txOutputIndex", "tx_output_index"))?,
            "main_utxo.tx_output_index",
        )?)
        .map_err(|_| AdapterError::invalid("main_utxo.tx_output_index", "out of range"))?,
        tx_output_value: u64::try_from(int_field(
            field(utxo, key("txOutputValue", "tx_output_value"))?,
            "main_utxo.tx_output_value",
        )?)
        .map_err(|_| AdapterError::invalid("main_utxo.tx_output_value", "out of range"))?,
    };

    let redeemer_output_script = bytes_field(
        field(fields, key("redeemerOutputScript", "redeemer_output_script"))?,
        "redeemer_output_script",
        None,
    )?;

    let amount = int_field(field(fields, "amount")?, "amount")?;
    if amount == 0 {
        return Err(AdapterError::invalid("amount", "must be positive"));
    }

    Ok(RedemptionEvent {
        wallet_pub_key_hash,
        main_utxo,
        redeemer_output_script,
        amount,
        source_tx_hash,
    })
}

fn field<'a>(object: &'a Value, name: &str) -> Result<&'a Value, AdapterError> {
    object
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| AdapterError::MissingField(name.to_string()))
}

/// Hex string or byte array, returned as 0x-prefixed lowercase hex
fn bytes_field(value: &Value, name: &str, expected_len: Option<usize>) -> Result<String, AdapterError> {
    let bytes = match value {
        Value::String(s) => hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| AdapterError::invalid(name, e.to_string()))?,
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| AdapterError::invalid(name, "array element is not a byte"))
            })
            .collect::<Result<Vec<u8>, _>>()?,
        _ => return Err(AdapterError::invalid(name, "expected hex string or byte array")),
    };

    if bytes.is_empty() {
        return Err(AdapterError::invalid(name, "empty"));
    }
    if let Some(len) = expected_len {
        if bytes.len() != len {
            return Err(AdapterError::invalid(
                name,
                format!("expected {} bytes, got {}", len, bytes.len()),
            ));
        }
    }

    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Numbers wider than u64 are read from their exact literal
fn int_field(value: &Value, name: &str) -> Result<u128, AdapterError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .or_else(|| n.to_string().parse::<u128>().ok())
            .ok_or_else(|| AdapterError::invalid(name, "not a non-negative integer")),
        Value::String(s) => {
            parse_amount(s).ok_or_else(|| AdapterError::invalid(name, "not an integer string"))
        }
        _ => Err(AdapterError::invalid(name, "expected number or string")),
    }
}

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Canonical, validated representation of a raw chain transaction.
///
/// Built once by the normalizer and never mutated afterwards; downstream
/// stages only ever borrow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub chain_id: u64,
    pub transaction_hash: String,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    /// Amount in wei as a base-10 string without leading zeros.
    pub value: String,
    /// Unix seconds; `0` when the source did not provide one.
    pub timestamp: i64,
    pub block_number: u64,
    pub method_id: Option<String>,
    pub method_name: Option<String>,
    pub parameters: Option<Vec<DecodedParam>>,
    /// Raw call data, lower-cased.
    pub input: Option<String>,
    pub is_contract_creation: bool,
    pub is_batch_operation: bool,
}

impl NormalizedEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            chain_id: self.chain_id,
            transaction_hash: self.transaction_hash.clone(),
        }
    }

    /// True when the transaction carries call data or matched a known selector.
    pub fn is_contract_call(&self) -> bool {
        self.method_id.is_some()
            || self
                .input
                .as_deref()
                .is_some_and(|input| input.len() > 2 && input != "0x")
    }

    pub fn kind(&self) -> EventKind {
        if self.is_batch_operation {
            EventKind::BatchOperation
        } else if self.is_contract_call() || self.is_contract_creation {
            EventKind::ContractInteraction
        } else {
            EventKind::Transfer
        }
    }
}

/// Identity of a normalized event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub chain_id: u64,
    pub transaction_hash: String,
}

/// Coarse event classification used for notification subscriptions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Transfer,
    ContractInteraction,
    BatchOperation,
}

/// A single ABI-decoded call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedParam {
    pub name: String,
    pub kind: String,
    pub value: String,
}

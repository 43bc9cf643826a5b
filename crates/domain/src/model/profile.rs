use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Reputation snapshot for a single address, as served by the profile API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressProfile {
    pub address: String,
    /// Upstream risk estimate in [0, 1].
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub category: AddressCategory,
    #[serde(default)]
    pub transaction_count: u64,
    /// Lifetime volume in wei (base-10 string).
    #[serde(default = "zero_value")]
    pub total_value: String,
    #[serde(default)]
    pub first_seen: Option<i64>,
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub related_addresses: Vec<String>,
}

fn zero_value() -> String {
    "0".to_string()
}

impl AddressProfile {
    /// Profile for an address the upstream knows nothing about.
    pub fn unknown(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            risk_score: 0.0,
            tags: BTreeSet::new(),
            category: AddressCategory::Unknown,
            transaction_count: 0,
            total_value: zero_value(),
            first_seen: None,
            last_seen: None,
            related_addresses: Vec::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_related_to(&self, address: &str) -> bool {
        self.related_addresses
            .iter()
            .any(|related| related.eq_ignore_ascii_case(address))
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddressCategory {
    Wallet,
    Contract,
    Exchange,
    Mixer,
    Scam,
    #[default]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_sparse_payload() {
        let profile: AddressProfile = serde_json::from_str(
            r#"{"address":"0xabc","riskScore":0.4,"tags":["exchange_funding"],"category":"exchange"}"#,
        )
        .expect("profile parses");

        assert_eq!(profile.category, AddressCategory::Exchange);
        assert!(profile.has_tag("exchange_funding"));
        assert_eq!(profile.total_value, "0");
        assert_eq!(profile.transaction_count, 0);
    }

    #[test]
    fn related_lookup_ignores_case() {
        let mut profile = AddressProfile::unknown("0xabc");
        profile.related_addresses.push("0xDEF".into());
        assert!(profile.is_related_to("0xdef"));
        assert!(!profile.is_related_to("0x123"));
    }
}

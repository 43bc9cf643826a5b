use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::config::RiskThresholds;

/// Discrete risk bucket derived from a continuous score. Ordered from least
/// to most severe so levels can be compared directly.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Buckets `score` against ascending thresholds. A score equal to a
    /// threshold lands in the higher level.
    pub fn from_score(score: f64, thresholds: &RiskThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn action(self) -> RiskAction {
        match self {
            RiskLevel::Low => RiskAction::None,
            RiskLevel::Medium => RiskAction::Monitor,
            RiskLevel::High => RiskAction::Alert,
            RiskLevel::Critical => RiskAction::Block,
        }
    }
}

/// Operational response suggested for a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskAction {
    None,
    Monitor,
    Alert,
    Block,
}

/// One scored signal that contributed to an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFeature {
    pub description: String,
    pub score: f64,
}

/// Output of the risk analyzer for one event. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub score: f64,
    pub level: RiskLevel,
    /// Signal tags in the order they fired; duplicates are kept.
    pub factors: Vec<String>,
    pub features: Vec<RiskFeature>,
    pub action: RiskAction,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl RiskAnalysis {
    pub fn has_factor(&self, factor: &str) -> bool {
        self.factors.iter().any(|f| f == factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn ties_round_up() {
        let thresholds = RiskThresholds::default();
        assert_eq!(RiskLevel::from_score(0.0, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.4, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.7, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.9, &thresholds), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(1.0, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn level_is_monotonic_in_score() {
        let thresholds = RiskThresholds::default();
        let mut previous = RiskLevel::Low;
        for step in 0..=1000 {
            let level = RiskLevel::from_score(step as f64 / 1000.0, &thresholds);
            assert!(level >= previous, "level dropped at step {step}");
            previous = level;
        }
    }

    #[test]
    fn parses_and_prints_levels() {
        assert_eq!(RiskLevel::from_str("critical").unwrap(), RiskLevel::Critical);
        assert_eq!(RiskLevel::High.to_string(), "HIGH");
        assert_eq!(RiskLevel::iter().count(), 4);
        assert_eq!(RiskLevel::Medium.action(), RiskAction::Monitor);
    }
}

use std::{collections::HashSet, sync::RwLock};

use fastbloom::AtomicBloomFilter;
use thiserror::Error;

use crate::model::canonical_address;

/// Membership set of addresses known to be risky (mixers, scams, sanctioned
/// wallets). A bloom filter answers most negative lookups without touching
/// the exact set; positives are always confirmed against it, so `contains`
/// never reports a false positive.
#[derive(Debug)]
pub struct RiskAddressSet {
    filter: AtomicBloomFilter,
    exact: RwLock<HashSet<String>>,
}

impl RiskAddressSet {
    pub const DEFAULT_EXPECTED_ITEMS: u64 = 10_000;
    pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

    pub fn new(expected_items: u64, false_positive_rate: f64) -> Result<Self, RiskSetError> {
        if expected_items == 0 {
            return Err(RiskSetError::InvalidEntries);
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(RiskSetError::InvalidFalsePositiveRate(false_positive_rate));
        }
        let filter = AtomicBloomFilter::with_false_pos(false_positive_rate)
            .seed(&0_u128)
            .expected_items(expected_items as usize);
        Ok(Self {
            filter,
            exact: RwLock::new(HashSet::new()),
        })
    }

    /// Builds a set sized for the defaults and seeded with `addresses`.
    pub fn from_addresses<I, S>(addresses: I) -> Result<Self, RiskSetError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = Self::new(
            Self::DEFAULT_EXPECTED_ITEMS,
            Self::DEFAULT_FALSE_POSITIVE_RATE,
        )?;
        for address in addresses {
            set.insert(address.as_ref());
        }
        Ok(set)
    }

    pub fn insert(&self, address: &str) {
        let canonical = canonical_address(address);
        if canonical.is_empty() {
            return;
        }
        self.filter.insert(canonical.as_str());
        self.exact
            .write()
            .expect("rwlock poisoned")
            .insert(canonical);
    }

    pub fn contains(&self, address: &str) -> bool {
        let canonical = canonical_address(address);
        if !self.filter.contains(canonical.as_str()) {
            return false;
        }
        self.exact
            .read()
            .expect("rwlock poisoned")
            .contains(&canonical)
    }

    pub fn len(&self) -> usize {
        self.exact.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RiskSetError {
    #[error("expected_items must be greater than zero")]
    InvalidEntries,
    #[error("false positive rate must be in (0,1): {0}")]
    InvalidFalsePositiveRate(f64),
}

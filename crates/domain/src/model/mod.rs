//! Data structures shared by the pipeline stages, the replay scheduler and
//! the storage adapters.

mod event;
mod job;
mod profile;
mod risk;

pub use event::*;
pub use job::*;
pub use profile::*;
pub use risk::*;

use thiserror::Error;

/// Length (in hex characters, without the `0x` prefix) of an account address.
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Errors emitted when an address fails the `0x` + 40 hex contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressFormatError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must be exactly {ADDRESS_HEX_LENGTH} hex characters after 0x")]
    WrongLength,
    #[error("address contains non-hex characters")]
    NonHex,
}

/// Validates that the supplied address matches the `0x` + 40 hex-character contract.
pub fn validate_address(address: &str) -> Result<(), AddressFormatError> {
    let Some(body) = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    else {
        return Err(AddressFormatError::MissingPrefix);
    };

    if body.len() != ADDRESS_HEX_LENGTH {
        return Err(AddressFormatError::WrongLength);
    }

    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressFormatError::NonHex);
    }

    Ok(())
}

/// Lower-cases an address so equality checks are case-insensitive.
pub fn canonical_address(address: &str) -> String {
    let mut owned = address.trim().to_owned();
    owned.make_ascii_lowercase();
    owned
}

/// Parses a non-negative base-10 amount in wei. Values wider than `u128`
/// saturate; anything that is not a plain digit string yields `None`.
pub fn parse_wei(value: &str) -> Option<u128> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(value.parse::<u128>().unwrap_or(u128::MAX))
}

/// Converts whole ether into wei.
pub const fn ether(amount: u128) -> u128 {
    amount * 1_000_000_000_000_000_000
}

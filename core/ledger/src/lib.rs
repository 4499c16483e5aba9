//! Ledger/contract adapter: the only two chain interactions the negotiation
//! core needs.

pub mod address;
pub mod client;
pub mod mock;

use alloy::primitives::U256;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::str::FromStr;
use std::time::Duration;

pub use address::{Address, AddressParseError};
pub use client::{EthClient, EthClientConfig};
pub use mock::MockLedger;

pub type TxHash = String;

/// Token amounts use 18 fraction digits.
pub const TOKEN_DECIMALS: usize = 18;

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Contract call [{method}] failed: {error}")]
    Contract {
        method: String,
        error: alloy::contract::Error,
    },
    #[error("Ethereum node didn't answer [{method}] within {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("Invalid amount: {0}")]
    Amount(String),
}

/// Arguments of the attestation contract's `attest` call.
#[derive(Clone, Debug, PartialEq)]
pub struct AttestationTx {
    pub attester: Address,
    pub subject: Address,
    pub requester: Address,
    pub reward: BigDecimal,
    pub requester_sig: Vec<u8>,
    pub data_hash: [u8; 32],
    pub request_nonce: [u8; 32],
    pub subject_sig: Vec<u8>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Tokens the address holds in the escrow marketplace, in whole tokens.
    async fn escrow_balance(&self, address: &Address) -> Result<BigDecimal, LedgerError>;

    async fn submit_attestation(&self, tx: &AttestationTx) -> Result<TxHash, LedgerError>;
}

fn one_token() -> BigDecimal {
    BigDecimal::from(1_000_000_000_000_000_000u64)
}

/// Converts a token amount to base units. Fails on negative amounts and on
/// more than 18 fraction digits.
pub fn to_base_units(amount: &BigDecimal) -> Result<U256, LedgerError> {
    let scaled = amount.clone() * one_token();
    if !scaled.is_integer() {
        return Err(LedgerError::Amount(format!(
            "{} has more than {} fraction digits",
            amount, TOKEN_DECIMALS
        )));
    }
    U256::from_str(&scaled.with_scale(0).to_string())
        .map_err(|e| LedgerError::Amount(format!("{}: {}", amount, e)))
}

/// Converts base units into whole tokens.
pub fn from_base_units(value: U256) -> Result<BigDecimal, LedgerError> {
    let units = BigDecimal::from_str(&value.to_string())
        .map_err(|e| LedgerError::Amount(format!("{}: {}", value, e)))?;
    Ok(units / one_token())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_units_round_trip_whole_tokens() {
        let ten = BigDecimal::from(10);
        let units = to_base_units(&ten).unwrap();
        assert_eq!(units, U256::from(10_000_000_000_000_000_000u128));
        assert_eq!(from_base_units(units).unwrap(), ten);
    }

    #[test]
    fn test_to_base_units_rejects_sub_wei_amounts() {
        let too_precise = BigDecimal::from_str("0.0000000000000000001").unwrap();
        assert!(to_base_units(&too_precise).is_err());
        assert!(to_base_units(&BigDecimal::from(-1)).is_err());
    }

    #[test]
    fn test_from_base_units_keeps_fractions() {
        assert_eq!(
            from_base_units(U256::from(1_500_000_000_000_000_000u128)).unwrap(),
            BigDecimal::from_str("1.5").unwrap()
        );
        assert_eq!(from_base_units(U256::ZERO).unwrap(), BigDecimal::from(0));
    }
}

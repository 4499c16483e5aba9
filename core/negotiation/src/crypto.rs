//! Signing and topic derivation.
//!
//! Session ids are signed as Ethereum personal messages; the resulting
//! 65-byte signature is carried as `0x`-prefixed hex in `r || s || v` order
//! with `v` in 27/28. Payment authorizations are EIP-712 typed data.

use alloy::primitives::{eip191_hash_message, keccak256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use bigdecimal::BigDecimal;
use ethsign::{SecretKey, Signature};
use rand::Rng;
use std::convert::TryFrom;
use std::fmt;

use attest_ledger::{to_base_units, Address, LedgerError};
use attest_whisper::Topic;

mod typed {
    alloy::sol! {
        struct PayTokens {
            address sender;
            address receiver;
            uint256 amount;
            bytes32 nonce;
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("Invalid signature '{0}'")]
    InvalidSignature(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Signer recovery failed: {0}")]
    Recovery(String),
    #[error("Invalid 32-byte hex value '{0}'")]
    InvalidBytes32(String),
    #[error("Invalid amount: {0}")]
    Amount(String),
}

impl From<LedgerError> for CryptoError {
    fn from(e: LedgerError) -> Self {
        CryptoError::Amount(e.to_string())
    }
}

/// Private key of one of the daemon's roles, with its derived address.
#[derive(Clone)]
pub struct Wallet {
    secret: SecretKey,
    address: Address,
}

impl Wallet {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        let secret =
            SecretKey::from_raw(raw).map_err(|e| CryptoError::InvalidKey(format!("{:?}", e)))?;
        let address = Address::from_bytes(*secret.public().address());
        Ok(Wallet { secret, address })
    }

    pub fn from_hex(key: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(key.trim().trim_start_matches("0x"))
            .map_err(|_| CryptoError::InvalidKey("not a hex string".to_string()))?;
        Self::from_bytes(&raw)
    }

    pub fn random() -> Self {
        loop {
            // A random scalar is out of the curve order range with negligible probability.
            if let Ok(wallet) = Self::from_bytes(&rand::thread_rng().gen::<[u8; 32]>()) {
                return wallet;
            }
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<String, CryptoError> {
        let signature = self
            .secret
            .sign(digest)
            .map_err(|e| CryptoError::Signing(format!("{:?}", e)))?;
        Ok(signature_to_hex(&signature))
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish()
    }
}

fn signature_to_hex(signature: &Signature) -> String {
    let mut bytes = Vec::with_capacity(65);
    bytes.extend_from_slice(&signature.r);
    bytes.extend_from_slice(&signature.s);
    bytes.push(signature.v + 27);
    format!("0x{}", hex::encode(bytes))
}

pub fn decode_signature(signature: &str) -> Result<Vec<u8>, CryptoError> {
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|_| CryptoError::InvalidSignature(signature.to_string()))?;
    if bytes.len() != 65 {
        return Err(CryptoError::InvalidSignature(signature.to_string()));
    }
    Ok(bytes)
}

fn signature_from_hex(signature: &str) -> Result<Signature, CryptoError> {
    let bytes = decode_signature(signature)?;
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..64]);
    let v = match bytes[64] {
        v @ 0..=1 => v,
        v @ 27..=28 => v - 27,
        _ => return Err(CryptoError::InvalidSignature(signature.to_string())),
    };
    Ok(Signature { v, r, s })
}

fn recover_digest(digest: &[u8; 32], signature: &str) -> Result<Address, CryptoError> {
    let public = signature_from_hex(signature)?
        .recover(digest)
        .map_err(|e| CryptoError::Recovery(format!("{:?}", e)))?;
    Ok(Address::from_bytes(*public.address()))
}

pub fn parse_bytes32(value: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|_| CryptoError::InvalidBytes32(value.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| CryptoError::InvalidBytes32(value.to_string()))
}

pub fn random_bytes32() -> [u8; 32] {
    rand::thread_rng().gen()
}

/// Fresh negotiation-step session id.
pub fn new_session() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// First 4 bytes of keccak256 over the UTF-8 string.
pub fn to_topic(s: &str) -> Topic {
    let hash = keccak256(s.as_bytes());
    Topic::from_bytes([hash[0], hash[1], hash[2], hash[3]])
}

pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    eip191_hash_message(message).0
}

pub fn sign_session_id(wallet: &Wallet, session: &str) -> Result<String, CryptoError> {
    wallet.sign_digest(&hash_personal_message(session.as_bytes()))
}

pub fn recover_session_signer(session: &str, signature: &str) -> Result<Address, CryptoError> {
    recover_digest(&hash_personal_message(session.as_bytes()), signature)
}

/// EIP-712 domain of the token escrow contract.
#[derive(Clone, Debug, PartialEq)]
pub struct EscrowDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl EscrowDomain {
    fn eip712(&self) -> Eip712Domain {
        Eip712Domain::new(
            Some(self.name.clone().into()),
            Some(self.version.clone().into()),
            Some(U256::from(self.chain_id)),
            Some(self.verifying_contract.into()),
            None,
        )
    }
}

/// Requester's authorization for the escrow to release `amount` tokens
/// to the attester.
#[derive(Clone, Debug, PartialEq)]
pub struct PayTokens {
    pub sender: Address,
    pub receiver: Address,
    pub amount: BigDecimal,
    pub nonce: [u8; 32],
}

impl PayTokens {
    fn typed(&self) -> Result<typed::PayTokens, CryptoError> {
        Ok(typed::PayTokens {
            sender: self.sender.into(),
            receiver: self.receiver.into(),
            amount: to_base_units(&self.amount)?,
            nonce: self.nonce.into(),
        })
    }
}

pub fn payment_authorization_digest(
    domain: &EscrowDomain,
    pay: &PayTokens,
) -> Result<[u8; 32], CryptoError> {
    Ok(pay.typed()?.eip712_signing_hash(&domain.eip712()).0)
}

pub fn sign_payment_authorization(
    wallet: &Wallet,
    domain: &EscrowDomain,
    pay: &PayTokens,
) -> Result<String, CryptoError> {
    wallet.sign_digest(&payment_authorization_digest(domain, pay)?)
}

pub fn recover_payment_signer(
    domain: &EscrowDomain,
    pay: &PayTokens,
    signature: &str,
) -> Result<Address, CryptoError> {
    recover_digest(&payment_authorization_digest(domain, pay)?, signature)
}

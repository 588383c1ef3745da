//! A wallet is an ECDSA P-256 key pair plus the Base58Check address derived
//! from its public key: version byte 0x00, RIPEMD-160(SHA-256(pubkey)), and a
//! four-byte double-SHA-256 checksum.

use crate::crypto::{
    base58_decode, base58_encode, new_key_pair, public_key_from_pkcs8, ripemd160_digest,
    sha256_digest,
};
use crate::error::{CoinError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

#[derive(Clone, Serialize, Deserialize)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> WalletAddress {
        let pub_key_hash = hash_pub_key(self.public_key.as_slice());
        WalletAddress(convert_address(pub_key_hash.as_slice()))
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

/// A Base58Check address that has already passed checksum validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Validates the checksum and version layout before accepting the string.
    pub fn validate(address: &str) -> Result<WalletAddress> {
        if validate_address(address)? {
            Ok(WalletAddress(address.to_string()))
        } else {
            Err(CoinError::InvalidAddress(address.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for WalletAddress {
    type Err = CoinError;

    fn from_str(s: &str) -> Result<WalletAddress> {
        WalletAddress::validate(s)
    }
}

/// RIPEMD-160 over SHA-256 of the raw public key bytes.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// Recomputes the checksum of a decoded address and compares it with the
/// trailing four bytes.
pub fn validate_address(address: &str) -> Result<bool> {
    let payload = base58_decode(address)?;
    if payload.len() <= ADDRESS_CHECK_SUM_LEN + 1 {
        return Ok(false);
    }
    let actual_checksum = &payload[payload.len() - ADDRESS_CHECK_SUM_LEN..];
    let versioned_payload = &payload[..payload.len() - ADDRESS_CHECK_SUM_LEN];
    let target_checksum = checksum(versioned_payload);
    Ok(actual_checksum.eq(target_checksum.as_slice()))
}

/// Builds the Base58Check address for a 20-byte public key hash.
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = Vec::with_capacity(1 + pub_key_hash.len() + ADDRESS_CHECK_SUM_LEN);
    payload.push(VERSION);
    payload.extend_from_slice(pub_key_hash);
    let checksum = checksum(payload.as_slice());
    payload.extend_from_slice(checksum.as_slice());
    base58_encode(payload.as_slice())
}

/// Strips the version byte and checksum from a validated address, leaving the
/// 20-byte public key hash the address locks to.
pub fn pub_key_hash_from_address(address: &WalletAddress) -> Result<Vec<u8>> {
    let payload = base58_decode(address.as_str())?;
    Ok(payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec())
}

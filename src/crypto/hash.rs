//! Hash and codec primitives shared by the whole crate: SHA-256 for ids and
//! proof of work, RIPEMD-160 for address derivation, Base58 for the address
//! wire format.

use crate::error::{CoinError, Result};
use ring::digest::{Context, SHA256};
use ripemd::{Digest, Ripemd160};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, the granularity block timestamps use.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs() as i64
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| CoinError::AddressDecoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_encoding::HEXLOWER;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256_digest(b"abc");
        assert_eq!(
            HEXLOWER.encode(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn ripemd160_known_vector() {
        let digest = ripemd160_digest(b"abc");
        assert_eq!(
            HEXLOWER.encode(&digest),
            "8eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
        );
    }

    #[test]
    fn base58_round_trip() {
        let data = vec![0x00, 0x01, 0x02, 0xff, 0xfe];
        let encoded = base58_encode(&data);
        let decoded = base58_decode(&encoded).expect("decode failed");
        assert_eq!(data, decoded);
    }

    #[test]
    fn base58_rejects_forbidden_alphabet() {
        assert!(base58_decode("0OIl").is_err());
    }
}

//! ECDSA P-256 key handling on top of `ring`.
//!
//! Private keys live as PKCS#8 documents. Public keys travel as the raw
//! 64-byte X || Y coordinate concatenation with no leading tag byte; the
//! uncompressed-point tag ring expects is stripped on export and re-attached
//! for verification.

use crate::error::{CoinError, Result};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};

const UNCOMPRESSED_POINT_TAG: u8 = 0x04;
const PUBLIC_KEY_LEN: usize = 64;

/// Generates a fresh P-256 key pair, returned as a PKCS#8 document.
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| CoinError::WalletKey(e.to_string()))?;
    Ok(pkcs8.as_ref().to_vec())
}

/// Derives the 64-byte X || Y public key from a PKCS#8 private key.
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| CoinError::WalletKey(e.to_string()))?;
    let uncompressed = key_pair.public_key().as_ref();
    Ok(uncompressed[1..].to_vec())
}

/// Signs `message` with the ECDSA P-256 SHA-256 fixed scheme; the returned
/// signature is the 64-byte r || s concatenation.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| CoinError::WalletKey(e.to_string()))?;
    key_pair
        .sign(&rng, message)
        .map(|signature| signature.as_ref().to_vec())
        .map_err(|e| CoinError::WalletKey(e.to_string()))
}

/// Verifies an r || s signature against a 64-byte X || Y public key.
/// Malformed keys and signatures verify as false rather than erroring.
pub fn ecdsa_p256_sha256_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    if public_key.len() != PUBLIC_KEY_LEN {
        return false;
    }
    let mut uncompressed = Vec::with_capacity(1 + PUBLIC_KEY_LEN);
    uncompressed.push(UNCOMPRESSED_POINT_TAG);
    uncompressed.extend_from_slice(public_key);
    let peer_public_key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, uncompressed);
    peer_public_key.verify(message, signature).is_ok()
}

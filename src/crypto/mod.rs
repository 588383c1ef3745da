pub mod hash;
pub mod keypair;

pub use hash::{base58_decode, base58_encode, current_timestamp, ripemd160_digest, sha256_digest};
pub use keypair::{ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_verify, new_key_pair, public_key_from_pkcs8};

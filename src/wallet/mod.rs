pub mod wallet;
pub mod wallets;

pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet,
    WalletAddress, ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::Wallets;

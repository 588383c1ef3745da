//! On-disk wallet collection: a bincode-encoded map from address to key
//! material, loaded at startup when present and rewritten atomically on every
//! new wallet.

use super::wallet::{Wallet, WalletAddress};
use crate::error::{CoinError, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    file_path: PathBuf,
}

impl Wallets {
    pub fn load(file_path: impl AsRef<Path>) -> Result<Wallets> {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
            file_path: file_path.as_ref().to_path_buf(),
        };
        wallets.load_from_file()?;
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<WalletAddress> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.as_str().to_string(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &WalletAddress) -> Option<&Wallet> {
        self.wallets.get(address.as_str())
    }

    fn load_from_file(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            return Ok(());
        }
        let bytes =
            fs::read(&self.file_path).map_err(|e| CoinError::WalletFile(e.to_string()))?;
        let (wallets, _) =
            bincode::serde::decode_from_slice(bytes.as_slice(), bincode::config::standard())
                .map_err(|e| CoinError::WalletFile(e.to_string()))?;
        self.wallets = wallets;
        Ok(())
    }

    /// Writes to a sibling temp file and renames it over the target, so a
    /// crash mid-write never truncates existing key material.
    fn save_to_file(&self) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(&self.wallets, bincode::config::standard())
            .map_err(|e| CoinError::WalletFile(e.to_string()))?;

        let tmp_path = self.file_path.with_extension("dat.tmp");
        let mut file =
            fs::File::create(&tmp_path).map_err(|e| CoinError::WalletFile(e.to_string()))?;
        file.write_all(bytes.as_slice())
            .map_err(|e| CoinError::WalletFile(e.to_string()))?;
        file.sync_all()
            .map_err(|e| CoinError::WalletFile(e.to_string()))?;
        fs::rename(&tmp_path, &self.file_path).map_err(|e| CoinError::WalletFile(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_reload_wallets() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("wallet_test.dat");

        let first_address = {
            let mut wallets = Wallets::load(&path).expect("failed to load wallets");
            wallets.create_wallet().expect("failed to create wallet")
        };

        let wallets = Wallets::load(&path).expect("failed to reload wallets");
        assert_eq!(wallets.get_addresses(), vec![first_address.as_str().to_string()]);

        let wallet = wallets
            .get_wallet(&first_address)
            .expect("wallet should be present after reload");
        assert_eq!(wallet.get_address(), first_address);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let wallets =
            Wallets::load(dir.path().join("absent.dat")).expect("failed to load wallets");
        assert!(wallets.get_addresses().is_empty());
    }

    #[test]
    fn multiple_wallets_persist() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("wallet_test.dat");

        let mut wallets = Wallets::load(&path).expect("failed to load wallets");
        let a = wallets.create_wallet().expect("failed to create wallet");
        let b = wallets.create_wallet().expect("failed to create wallet");
        assert_ne!(a, b);

        let reloaded = Wallets::load(&path).expect("failed to reload wallets");
        assert_eq!(reloaded.get_addresses().len(), 2);
    }
}

use crate::crypto::{ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_verify, sha256_digest};
use crate::error::{CoinError, Result};
use crate::store::UTXOSet;
use crate::wallet::{hash_pub_key, pub_key_hash_from_address, Wallet, WalletAddress};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fixed reward minted to the coinbase recipient of every block.
pub const SUBSIDY: i64 = 10;

/// Sentinel output index carried by the single input of a coinbase
/// transaction, which spends nothing.
const COINBASE_VOUT: i64 = -1;

#[derive(Clone, Serialize, Deserialize)]
pub struct TXInput {
    /// Id of the transaction whose output this input spends; empty for
    /// coinbase.
    txid: Vec<u8>,
    /// Index into that transaction's outputs, or -1 for coinbase.
    vout: i64,
    /// r || s signature over the signing digest; empty until signed.
    signature: Vec<u8>,
    /// Raw X || Y public key of the spender, or arbitrary data bytes for
    /// coinbase.
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_input_tx_id_hex(&self) -> String {
        HEXLOWER.encode(self.txid.as_slice())
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    /// Whether this input was created by the owner of `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        let locking_hash = hash_pub_key(self.pub_key.as_slice());
        locking_hash.eq(pub_key_hash)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TXOutput {
    value: i64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: i64, address: &WalletAddress) -> Result<TXOutput> {
        let pub_key_hash = pub_key_hash_from_address(address)?;
        Ok(TXOutput {
            value,
            pub_key_hash,
        })
    }

    pub fn get_value(&self) -> i64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// A UTXO-model transaction. `id` is the SHA-256 of the canonical
/// serialization with `id` cleared, so it is stable under reserialization.
#[derive(Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Mints the block subsidy to `to`. Empty `data` defaults to a
    /// human-readable tag naming the recipient.
    pub fn new_coinbase_tx(to: &WalletAddress, data: &str) -> Result<Transaction> {
        let data = if data.is_empty() {
            format!("Reward to '{}'", to)
        } else {
            data.to_string()
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: data.into_bytes(),
        };
        let tx_output = TXOutput::new(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![tx_output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds, signs and ids a transfer from `wallet` to `to`, selecting
    /// spendable outputs greedily and returning change to the sender. Fails
    /// with `InsufficientFunds` when the wallet cannot cover `amount`.
    pub async fn new_utxo_transaction(
        wallet: &Wallet,
        to: &WalletAddress,
        amount: i64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        let from = wallet.get_address();
        let pub_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) = utxo_set
            .find_spendable_outputs(pub_key_hash.as_slice(), amount)
            .await?;
        if accumulated < amount {
            return Err(CoinError::InsufficientFunds {
                accumulated,
                requested: amount,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER
                .decode(txid_hex.as_bytes())
                .map_err(|e| CoinError::Store(format!("corrupt utxo index key: {}", e)))?;
            for out in outs {
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout: out as i64,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, &from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())
            .await?;
        Ok(tx)
    }

    /// A copy with every input's signature and public key cleared, the
    /// starting point of the signing preimage.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// The digest signed for input `idx`: the hash of the trimmed copy with
    /// that input's `pub_key` replaced by the referenced output's public key
    /// hash. Pure; the transaction itself is never mutated.
    pub fn signing_digest(&self, idx: usize, prev_pub_key_hash: &[u8]) -> Result<Vec<u8>> {
        let mut tx_copy = self.trimmed_copy();
        tx_copy.vin[idx].pub_key = prev_pub_key_hash.to_vec();
        tx_copy.hash()
    }

    /// Resolves the output spent by input `idx` through the supplied map of
    /// referenced transactions.
    fn referenced_output<'a>(
        &self,
        idx: usize,
        prev_txs: &'a HashMap<String, Transaction>,
    ) -> Result<&'a TXOutput> {
        let vin = &self.vin[idx];
        let txid_hex = vin.get_input_tx_id_hex();
        let prev_tx = prev_txs
            .get(txid_hex.as_str())
            .ok_or_else(|| CoinError::DanglingReference(txid_hex.clone()))?;
        usize::try_from(vin.get_vout())
            .ok()
            .and_then(|out_idx| prev_tx.vout.get(out_idx))
            .ok_or(CoinError::DanglingReference(txid_hex))
    }

    /// Signs every input with the PKCS#8 private key. `prev_txs` maps
    /// hex(txid) to each referenced transaction; a missing entry fails with
    /// `DanglingReference`. Coinbase signing is a no-op.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        for idx in 0..self.vin.len() {
            let prev_pub_key_hash = self.referenced_output(idx, prev_txs)?.pub_key_hash.clone();
            let digest = self.signing_digest(idx, prev_pub_key_hash.as_slice())?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, digest.as_slice())?;
        }
        Ok(())
    }

    /// Verifies every input signature against the same digest the signer
    /// committed to. Coinbase transactions verify unconditionally.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_output = self.referenced_output(idx, prev_txs)?;
            let digest = self.signing_digest(idx, prev_output.get_pub_key_hash())?;
            if !ecdsa_p256_sha256_verify(
                vin.get_pub_key(),
                vin.get_signature(),
                digest.as_slice(),
            ) {
                return Err(CoinError::BadSignature);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_parts(id: Vec<u8>, vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Transaction {
        Transaction { id, vin, vout }
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_bytes(&self) -> Vec<u8> {
        self.id.clone()
    }

    pub fn get_tx_id_hex(&self) -> String {
        HEXLOWER.encode(self.id.as_slice())
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoinError::TransactionSerialization(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CoinError::TransactionDeserialization(e.to_string()))
            .map(|(tx, _)| tx)
    }
}

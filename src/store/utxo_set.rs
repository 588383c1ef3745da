//! The UTXO set: a derived sled tree mapping txid to the ordered list of its
//! still-unspent outputs. Rebuilt from scratch by `reindex` and kept in sync
//! incrementally by `update`; the two must always agree.

use super::chain::Blockchain;
use crate::core::{Block, TXOutput};
use crate::error::{CoinError, Result};
use data_encoding::HEXLOWER;
use sled::Tree;
use std::collections::HashMap;
use tracing::debug;

const UTXO_TREE: &str = "utxoset";

pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        Ok(self.blockchain.get_db().open_tree(UTXO_TREE)?)
    }

    fn decode_outputs(bytes: &[u8]) -> Result<Vec<TXOutput>> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CoinError::TransactionDeserialization(e.to_string()))
            .map(|(outs, _)| outs)
    }

    fn encode_outputs(outs: &[TXOutput]) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(outs, bincode::config::standard())
            .map_err(|e| CoinError::TransactionSerialization(e.to_string()))
    }

    /// Drops the index and rebuilds it with a full chain scan.
    pub async fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        utxo_tree.clear()?;

        let utxo_map = self.blockchain.find_utxo().await?;
        debug!("reindexing {} transactions with unspent outputs", utxo_map.len());
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER
                .decode(txid_hex.as_bytes())
                .map_err(|e| CoinError::Store(format!("corrupt txid key: {}", e)))?;
            utxo_tree.insert(txid.as_slice(), Self::encode_outputs(outs.as_slice())?)?;
        }
        Ok(())
    }

    /// Applies one block incrementally: every input of a non-coinbase
    /// transaction removes the referenced output (deleting the record when
    /// it empties, never re-writing a zero-length list), and every
    /// transaction's outputs enter the index fresh.
    pub async fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let outs_bytes = utxo_tree.get(vin.get_txid())?.ok_or_else(|| {
                        CoinError::NotFound(format!(
                            "spent output of transaction {}",
                            vin.get_input_tx_id_hex()
                        ))
                    })?;
                    let outs = Self::decode_outputs(outs_bytes.as_ref())?;
                    let updated_outs: Vec<TXOutput> = outs
                        .into_iter()
                        .enumerate()
                        .filter(|(idx, _)| *idx as i64 != vin.get_vout())
                        .map(|(_, out)| out)
                        .collect();

                    if updated_outs.is_empty() {
                        utxo_tree.remove(vin.get_txid())?;
                    } else {
                        utxo_tree.insert(
                            vin.get_txid(),
                            Self::encode_outputs(updated_outs.as_slice())?,
                        )?;
                    }
                }
            }
            utxo_tree.insert(tx.get_id(), Self::encode_outputs(tx.get_vout())?)?;
        }
        Ok(())
    }

    /// Every unspent output locked to `pub_key_hash`; the basis of balance
    /// queries.
    pub async fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let utxo_tree = self.utxo_tree()?;
        let mut utxos = vec![];
        for item in utxo_tree.iter() {
            let (_, outs_bytes) = item?;
            for out in Self::decode_outputs(outs_bytes.as_ref())? {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out);
                }
            }
        }
        Ok(utxos)
    }

    /// Greedily accumulates outputs locked to `pub_key_hash` until the sum
    /// reaches `amount`. Returns the accumulated value and the selected
    /// output indices keyed by hex txid; the cursor order of the store fixes
    /// the selection.
    pub async fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: i64,
    ) -> Result<(i64, HashMap<String, Vec<usize>>)> {
        let utxo_tree = self.utxo_tree()?;
        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0;

        'scan: for item in utxo_tree.iter() {
            let (txid, outs_bytes) = item?;
            let txid_hex = HEXLOWER.encode(txid.as_ref());
            for (out_idx, out) in Self::decode_outputs(outs_bytes.as_ref())?
                .iter()
                .enumerate()
            {
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated += out.get_value();
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(out_idx);
                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// Number of transactions with at least one unspent output.
    pub async fn count_transactions(&self) -> Result<usize> {
        let utxo_tree = self.utxo_tree()?;
        Ok(utxo_tree.iter().count())
    }

    /// Raw index contents keyed by hex txid, for consistency checks.
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Result<HashMap<String, Vec<u8>>> {
        let utxo_tree = self.utxo_tree()?;
        let mut snapshot = HashMap::new();
        for item in utxo_tree.iter() {
            let (txid, outs_bytes) = item?;
            snapshot.insert(HEXLOWER.encode(txid.as_ref()), outs_bytes.to_vec());
        }
        Ok(snapshot)
    }
}

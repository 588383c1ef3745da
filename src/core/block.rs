use super::merkle::merkle_root;
use super::proof_of_work::{CancelFlag, ProofOfWork};
use super::transaction::Transaction;
use crate::crypto::current_timestamp;
use crate::error::{CoinError, Result};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    timestamp: i64,
    prev_block_hash: Vec<u8>,
    hash: Vec<u8>,
    nonce: i64,
    height: usize,
}

/// A block: proof-of-work header plus the ordered transaction list it
/// commits to through the Merkle root. The genesis block is the only one
/// with an empty `prev_block_hash`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Assembles a block and mines it. Fails with `MiningInterrupted` when
    /// the cancel flag trips before a solution is found.
    pub fn new_block(
        prev_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        cancel: &CancelFlag,
    ) -> Result<Block> {
        let header = BlockHeader {
            timestamp: current_timestamp(),
            prev_block_hash,
            hash: vec![],
            nonce: 0,
            height,
        };
        let mut block = Block {
            header,
            transactions: transactions.to_vec(),
        };
        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let (nonce, hash) = pow.run(cancel)?;
        block.header.nonce = nonce;
        block.header.hash = hash;
        Ok(block)
    }

    pub fn generate_genesis_block(coinbase: &Transaction, cancel: &CancelFlag) -> Result<Block> {
        let transactions = vec![coinbase.clone()];
        Block::new_block(vec![], transactions.as_slice(), 0, cancel)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CoinError::BlockDeserialization(e.to_string()))
            .map(|(block, _)| block)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoinError::BlockSerialization(e.to_string()))
    }

    /// Merkle root over the canonical serialization of every transaction.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let mut serialized = Vec::with_capacity(self.transactions.len());
        for transaction in &self.transactions {
            serialized.push(transaction.serialize()?);
        }
        Ok(merkle_root(serialized.as_slice()))
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_block_hash(&self) -> &[u8] {
        self.header.prev_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.header.hash.as_slice()
    }

    pub fn get_hash_bytes(&self) -> Vec<u8> {
        self.header.hash.clone()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(self.header.hash.as_slice())
    }

    pub fn get_timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn get_nonce(&self) -> i64 {
        self.header.nonce
    }

    pub fn get_height(&self) -> usize {
        self.header.height
    }

    #[cfg(test)]
    pub(crate) fn tamper_nonce_for_tests(&mut self) {
        self.header.nonce ^= 1;
    }
}

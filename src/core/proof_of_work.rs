use super::block::Block;
use crate::crypto::sha256_digest;
use crate::error::{CoinError, Result};
use data_encoding::HEXLOWER;
use num_bigint::{BigInt, Sign};
use once_cell::sync::Lazy;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_TARGET_BITS: u32 = 24;

const MAX_NONCE: i64 = i64::MAX;

/// How many nonces are tried between cancellation checks.
const CANCEL_POLL_INTERVAL: i64 = 1 << 16;

/// Difficulty is fixed for the lifetime of a deployment. The environment
/// override exists so tests can mine at a trivial difficulty.
static TARGET_BITS: Lazy<u32> = Lazy::new(|| {
    env::var("TARGET_BITS")
        .ok()
        .and_then(|bits| bits.parse().ok())
        .unwrap_or(DEFAULT_TARGET_BITS)
});

/// Cooperative cancellation handle shared between the node's shutdown path
/// and in-flight mining loops.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct ProofOfWork {
    block: Block,
    target: BigInt,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block) -> ProofOfWork {
        // The block hash, read as a big-endian 256-bit integer, must be
        // strictly below 1 << (256 - TARGET_BITS).
        let target = BigInt::from(1) << (256 - *TARGET_BITS) as usize;
        ProofOfWork { block, target }
    }

    /// Header preimage: prev hash, Merkle root of the serialized
    /// transactions, then timestamp, target bits and nonce as big-endian
    /// integers. Mining and validation must build the same bytes.
    fn prepare_data(&self, nonce: i64) -> Result<Vec<u8>> {
        let transactions_root = self.block.hash_transactions()?;
        let mut data_bytes = vec![];
        data_bytes.extend_from_slice(self.block.get_prev_block_hash());
        data_bytes.extend_from_slice(transactions_root.as_slice());
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(TARGET_BITS.to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        Ok(data_bytes)
    }

    /// Searches the nonce space from zero until the hash satisfies the
    /// target. Polls `cancel` at a coarse interval so shutdown does not wait
    /// on a full solution.
    pub fn run(&self, cancel: &CancelFlag) -> Result<(i64, Vec<u8>)> {
        let mut nonce = 0;
        debug!("mining block at height {}", self.block.get_height());
        while nonce < MAX_NONCE {
            if nonce % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(CoinError::MiningInterrupted(
                    "shutdown requested".to_string(),
                ));
            }
            let data = self.prepare_data(nonce)?;
            let hash = sha256_digest(data.as_slice());
            let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

            if hash_int < self.target {
                debug!("found hash {}", HEXLOWER.encode(hash.as_slice()));
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(CoinError::MiningInterrupted(
            "nonce space exhausted".to_string(),
        ))
    }

    /// Recomputes the hash from the stored nonce and tests it against the
    /// target.
    pub fn validate(&self) -> Result<bool> {
        let data = self.prepare_data(self.block.get_nonce())?;
        let hash = sha256_digest(data.as_slice());
        if hash != self.block.get_hash() {
            return Ok(false);
        }
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());
        Ok(hash_int < self.target)
    }
}

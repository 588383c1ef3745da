//! The persistent block index: a sled tree mapping block hash to serialized
//! block, with the special key `l` naming the current tip. All cross-key
//! consistency (block insert plus tip move) happens inside one sled
//! transaction.

use crate::core::proof_of_work::{CancelFlag, ProofOfWork};
use crate::core::{Block, Transaction};
use crate::error::{CoinError, Result};
use crate::wallet::WalletAddress;
use data_encoding::HEXLOWER;
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

const TIP_BLOCK_HASH_KEY: &str = "l";
const BLOCKS_TREE: &str = "blocks";

const GENESIS_COINBASE_DATA: &str = "Hello, World!";

/// Handle to the chain store. Cloning shares the underlying database; the
/// cached tip hash is shared as well. An empty tip means the store holds no
/// blocks yet (a fresh node waiting to sync).
#[derive(Clone)]
pub struct Blockchain {
    db: Db,
    tip_hash: Arc<RwLock<Vec<u8>>>,
}

impl Blockchain {
    /// Opens the store at `data_dir`, creating and mining the genesis block
    /// (a single coinbase to `genesis_address`) when the store is empty.
    pub async fn create(
        data_dir: impl AsRef<Path>,
        genesis_address: &WalletAddress,
    ) -> Result<Blockchain> {
        let db = sled::open(data_dir)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        let tip_hash = match blocks_tree.get(TIP_BLOCK_HASH_KEY)? {
            Some(tip) => tip.to_vec(),
            None => {
                let coinbase_tx =
                    Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA)?;
                let block = Block::generate_genesis_block(&coinbase_tx, &CancelFlag::new())?;
                Self::update_blocks_tree(&blocks_tree, &block)?;
                info!("genesis block {} mined", block.get_hash_hex());
                block.get_hash_bytes()
            }
        };
        Ok(Blockchain {
            db,
            tip_hash: Arc::new(RwLock::new(tip_hash)),
        })
    }

    /// Opens an existing store; fails with `NotFound` when no chain has been
    /// created at `data_dir`.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Blockchain> {
        let db = sled::open(data_dir)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;
        let tip_hash = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| CoinError::NotFound("no existing blockchain found".to_string()))?
            .to_vec();
        Ok(Blockchain {
            db,
            tip_hash: Arc::new(RwLock::new(tip_hash)),
        })
    }

    /// Opens the store allowing an empty chain, for nodes that start with
    /// nothing and sync from peers. The tip stays empty until the first
    /// block arrives.
    pub async fn open_or_empty(data_dir: impl AsRef<Path>) -> Result<Blockchain> {
        let db = sled::open(data_dir)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;
        let tip_hash = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)?
            .map(|tip| tip.to_vec())
            .unwrap_or_default();
        Ok(Blockchain {
            db,
            tip_hash: Arc::new(RwLock::new(tip_hash)),
        })
    }

    /// Inserts a block and points `l` at it, atomically.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_hash = block.get_hash_bytes();
        let block_bytes = block.serialize()?;
        let result: TransactionResult<(), ()> = blocks_tree.transaction(|tx_db| {
            tx_db.insert(block_hash.as_slice(), block_bytes.as_slice())?;
            tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash.as_slice())?;
            Ok(())
        });
        result.map_err(|e| CoinError::Store(format!("{:?}", e)))
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub async fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash.read().await.clone()
    }

    async fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self.tip_hash.write().await;
        *tip_hash = new_tip_hash.to_vec();
    }

    /// Verifies every transaction, then mines a block on top of the current
    /// tip and persists it. Fails with `InvalidTransaction` before any
    /// mining work happens.
    pub async fn mine_block(
        &self,
        transactions: &[Transaction],
        cancel: &CancelFlag,
    ) -> Result<Block> {
        for transaction in transactions {
            self.verify_transaction(transaction).await.map_err(|e| {
                CoinError::InvalidTransaction(format!("{}: {}", transaction.get_tx_id_hex(), e))
            })?;
        }

        let tip_hash = self.get_tip_hash().await;
        if tip_hash.is_empty() {
            return Err(CoinError::NotFound(
                "cannot mine on an empty chain".to_string(),
            ));
        }
        let best_height = self.get_best_height().await?;

        let block = Block::new_block(tip_hash, transactions, best_height + 1, cancel)?;

        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        Self::update_blocks_tree(&blocks_tree, &block)?;
        self.set_tip_hash(block.get_hash()).await;
        Ok(block)
    }

    /// Stores a block received from a peer. Re-adding a known block is a
    /// no-op; the tip moves only when the new height strictly exceeds the
    /// current tip's (first seen wins on ties). Blocks failing the
    /// proof-of-work predicate are rejected.
    pub async fn add_block(&self, block: &Block) -> Result<()> {
        let pow = ProofOfWork::new_proof_of_work(block.clone());
        if !pow.validate()? {
            return Err(CoinError::InvalidBlock(format!(
                "proof of work check failed for {}",
                block.get_hash_hex()
            )));
        }

        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        let block_hash = block.get_hash_bytes();
        let block_bytes = block.serialize()?;
        let block_height = block.get_height();

        let result: TransactionResult<bool, ()> = blocks_tree.transaction(|tx_db| {
            if tx_db.get(block_hash.as_slice())?.is_some() {
                return Ok(false);
            }
            tx_db.insert(block_hash.as_slice(), block_bytes.as_slice())?;

            let tip_updated = match tx_db.get(TIP_BLOCK_HASH_KEY)? {
                Some(tip_hash) => {
                    let tip_bytes = tx_db
                        .get(tip_hash)?
                        .ok_or(ConflictableTransactionError::Abort(()))?;
                    let tip_block = Block::deserialize(tip_bytes.as_ref())
                        .map_err(|_| ConflictableTransactionError::Abort(()))?;
                    if block_height > tip_block.get_height() {
                        tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash.as_slice())?;
                        true
                    } else {
                        false
                    }
                }
                None => {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash.as_slice())?;
                    true
                }
            };
            Ok(tip_updated)
        });
        let tip_updated = result.map_err(|e| CoinError::Store(format!("{:?}", e)))?;
        if tip_updated {
            self.set_tip_hash(block_hash.as_slice()).await;
        }
        Ok(())
    }

    /// Height of the tip block; zero for an empty chain.
    pub async fn get_best_height(&self) -> Result<usize> {
        let tip_hash = self.get_tip_hash().await;
        if tip_hash.is_empty() {
            return Ok(0);
        }
        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        let tip_bytes = blocks_tree
            .get(tip_hash.as_slice())?
            .ok_or_else(|| CoinError::Store("tip hash names a missing block".to_string()))?;
        let tip_block = Block::deserialize(tip_bytes.as_ref())?;
        Ok(tip_block.get_height())
    }

    pub async fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        match blocks_tree.get(block_hash)? {
            Some(block_bytes) => Ok(Some(Block::deserialize(block_bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// All block hashes from tip back to genesis, tip first.
    pub async fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut iterator = self.iterator().await?;
        let mut hashes = vec![];
        while let Some(block) = iterator.next()? {
            hashes.push(block.get_hash_bytes());
        }
        Ok(hashes)
    }

    /// Linear scan from the tip backward; the first match wins.
    pub async fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        let mut iterator = self.iterator().await?;
        while let Some(block) = iterator.next()? {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Ok(transaction.clone());
                }
            }
        }
        Err(CoinError::NotFound(format!(
            "transaction {}",
            HEXLOWER.encode(txid)
        )))
    }

    /// Resolves every transaction referenced by `tx`'s inputs, keyed by hex
    /// txid. A reference to an unknown transaction is dangling.
    async fn resolve_prev_txs(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let txid_hex = vin.get_input_tx_id_hex();
            if prev_txs.contains_key(txid_hex.as_str()) {
                continue;
            }
            let prev_tx = self
                .find_transaction(vin.get_txid())
                .await
                .map_err(|_| CoinError::DanglingReference(txid_hex.clone()))?;
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub async fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.resolve_prev_txs(tx).await?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub async fn verify_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.resolve_prev_txs(tx).await?;
        tx.verify(&prev_txs)
    }

    /// Recomputes the full UTXO mapping by walking the chain from the tip to
    /// genesis. An output is unspent unless some later-visited input (i.e. a
    /// younger transaction) consumed it; inputs always reference earlier
    /// transactions, so the spent set is complete by the time a transaction
    /// is visited.
    pub async fn find_utxo(&self) -> Result<HashMap<String, Vec<crate::core::TXOutput>>> {
        let mut utxo: HashMap<String, Vec<crate::core::TXOutput>> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<i64>> = HashMap::new();

        let mut iterator = self.iterator().await?;
        while let Some(block) = iterator.next()? {
            for tx in block.get_transactions() {
                let txid_hex = tx.get_tx_id_hex();
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    let spent = spent_txos
                        .get(txid_hex.as_str())
                        .is_some_and(|outs| outs.contains(&(idx as i64)));
                    if spent {
                        continue;
                    }
                    utxo.entry(txid_hex.clone()).or_default().push(out.clone());
                }
                if tx.is_coinbase() {
                    continue;
                }
                for vin in tx.get_vin() {
                    spent_txos
                        .entry(vin.get_input_tx_id_hex())
                        .or_default()
                        .push(vin.get_vout());
                }
            }
        }
        Ok(utxo)
    }

    /// A restartable cursor from the tip back to genesis.
    pub async fn iterator(&self) -> Result<BlockchainIterator> {
        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        Ok(BlockchainIterator {
            blocks_tree,
            current_hash: self.get_tip_hash().await,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Cursor over stored blocks, tip to genesis. Exhausted once the genesis
/// block (empty previous hash) has been yielded.
pub struct BlockchainIterator {
    blocks_tree: Tree,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    pub fn next(&mut self) -> Result<Option<Block>> {
        if self.current_hash.is_empty() {
            return Ok(None);
        }
        let block_bytes = self
            .blocks_tree
            .get(self.current_hash.as_slice())?
            .ok_or_else(|| CoinError::Store("chain cursor hit a missing block".to_string()))?;
        let block = Block::deserialize(block_bytes.as_ref())?;
        self.current_hash = block.get_prev_block_hash().to_vec();
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SUBSIDY;
    use crate::wallet::Wallet;

    fn set_test_difficulty() {
        unsafe {
            std::env::set_var("TARGET_BITS", "8");
        }
    }

    fn test_wallet() -> Wallet {
        Wallet::new().expect("failed to create wallet")
    }

    async fn test_blockchain() -> (Blockchain, Wallet, tempfile::TempDir) {
        set_test_difficulty();
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let wallet = test_wallet();
        let blockchain = Blockchain::create(dir.path(), &wallet.get_address())
            .await
            .expect("failed to create blockchain");
        (blockchain, wallet, dir)
    }

    #[tokio::test]
    async fn genesis_creation() {
        let (blockchain, _, _dir) = test_blockchain().await;

        assert_eq!(blockchain.get_best_height().await.expect("height"), 0);

        let tip_hash = blockchain.get_tip_hash().await;
        let genesis = blockchain
            .get_block(tip_hash.as_slice())
            .await
            .expect("get block")
            .expect("genesis should exist");
        assert_eq!(genesis.get_height(), 0);
        assert!(genesis.get_prev_block_hash().is_empty());
        assert!(genesis.get_transactions()[0].is_coinbase());
    }

    #[tokio::test]
    async fn create_is_idempotent_and_open_persists() {
        set_test_difficulty();
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let wallet = test_wallet();

        let tip = {
            let blockchain = Blockchain::create(dir.path(), &wallet.get_address())
                .await
                .expect("create failed");
            blockchain.get_tip_hash().await
        };

        // a second create must load, not re-mine, the genesis
        let reopened = Blockchain::create(dir.path(), &wallet.get_address())
            .await
            .expect("re-create failed");
        assert_eq!(reopened.get_tip_hash().await, tip);

        drop(reopened);
        let opened = Blockchain::open(dir.path()).await.expect("open failed");
        assert_eq!(opened.get_tip_hash().await, tip);
    }

    #[tokio::test]
    async fn open_missing_chain_fails() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        assert!(matches!(
            Blockchain::open(dir.path()).await,
            Err(CoinError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mine_block_advances_tip() {
        let (blockchain, wallet, _dir) = test_blockchain().await;

        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "")
            .expect("failed to create coinbase");
        let block = blockchain
            .mine_block(&[coinbase], &CancelFlag::new())
            .await
            .expect("failed to mine");

        assert_eq!(block.get_height(), 1);
        assert_eq!(blockchain.get_best_height().await.expect("height"), 1);
        assert_eq!(blockchain.get_tip_hash().await, block.get_hash_bytes());
    }

    #[tokio::test]
    async fn add_block_is_idempotent_and_ties_keep_first_tip() {
        let (blockchain, wallet, _dir) = test_blockchain().await;
        let genesis_hash = blockchain.get_tip_hash().await;

        // a sibling block at the same height as the current tip
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "sibling")
            .expect("failed to create coinbase");
        let sibling = Block::new_block(genesis_hash.clone(), &[coinbase], 0, &CancelFlag::new())
            .expect("failed to mine sibling");

        blockchain.add_block(&sibling).await.expect("add failed");
        // height tie: first seen (the genesis) stays tip
        assert_eq!(blockchain.get_tip_hash().await, genesis_hash);

        // re-adding the same block changes nothing
        blockchain.add_block(&sibling).await.expect("re-add failed");
        assert_eq!(blockchain.get_tip_hash().await, genesis_hash);

        // a strictly higher block moves the tip
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "higher")
            .expect("failed to create coinbase");
        let higher = Block::new_block(genesis_hash, &[coinbase], 1, &CancelFlag::new())
            .expect("failed to mine block");
        blockchain.add_block(&higher).await.expect("add failed");
        assert_eq!(blockchain.get_tip_hash().await, higher.get_hash_bytes());
    }

    #[tokio::test]
    async fn add_block_rejects_bad_proof_of_work() {
        let (blockchain, wallet, _dir) = test_blockchain().await;
        let genesis_hash = blockchain.get_tip_hash().await;

        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "")
            .expect("failed to create coinbase");
        let mut block = Block::new_block(genesis_hash.clone(), &[coinbase], 1, &CancelFlag::new())
            .expect("failed to mine block");

        block.tamper_nonce_for_tests();
        assert!(matches!(
            blockchain.add_block(&block).await,
            Err(CoinError::InvalidBlock(_))
        ));
        assert_eq!(blockchain.get_tip_hash().await, genesis_hash);
    }

    #[tokio::test]
    async fn empty_chain_syncs_from_first_block() {
        set_test_difficulty();
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let blockchain = Blockchain::open_or_empty(dir.path())
            .await
            .expect("open_or_empty failed");
        assert_eq!(blockchain.get_best_height().await.expect("height"), 0);

        // blocks arrive tip-first during sync; the highest one arrives first
        let wallet = test_wallet();
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "")
            .expect("failed to create coinbase");
        let genesis = Block::generate_genesis_block(&coinbase, &CancelFlag::new())
            .expect("failed to mine genesis");
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "second")
            .expect("failed to create coinbase");
        let second = Block::new_block(genesis.get_hash_bytes(), &[coinbase], 1, &CancelFlag::new())
            .expect("failed to mine block");

        blockchain.add_block(&second).await.expect("add failed");
        assert_eq!(blockchain.get_tip_hash().await, second.get_hash_bytes());
        blockchain.add_block(&genesis).await.expect("add failed");

        assert_eq!(blockchain.get_best_height().await.expect("height"), 1);
        let hashes = blockchain.get_block_hashes().await.expect("hashes");
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], second.get_hash_bytes());
    }

    #[tokio::test]
    async fn find_transaction_scans_to_genesis() {
        let (blockchain, wallet, _dir) = test_blockchain().await;

        let tip_hash = blockchain.get_tip_hash().await;
        let genesis = blockchain
            .get_block(tip_hash.as_slice())
            .await
            .expect("get block")
            .expect("genesis should exist");
        let genesis_tx = &genesis.get_transactions()[0];

        let found = blockchain
            .find_transaction(genesis_tx.get_id())
            .await
            .expect("should find genesis coinbase");
        assert_eq!(found.get_id(), genesis_tx.get_id());

        let missing = blockchain.find_transaction(&[0u8; 32]).await;
        assert!(matches!(missing, Err(CoinError::NotFound(_))));

        let _ = wallet;
    }

    #[tokio::test]
    async fn mine_block_refuses_invalid_transaction() {
        let (blockchain, wallet, _dir) = test_blockchain().await;

        // a non-coinbase input referencing a transaction the chain never saw
        let bogus_input = crate::core::TXInput::new(&[9u8; 32], 0);
        let output = crate::core::TXOutput::new(1, &wallet.get_address()).expect("output failed");
        let tx = Transaction::from_parts(vec![7u8; 32], vec![bogus_input], vec![output]);

        let result = blockchain.mine_block(&[tx], &CancelFlag::new()).await;
        assert!(matches!(result, Err(CoinError::InvalidTransaction(_))));
        assert_eq!(blockchain.get_best_height().await.expect("height"), 0);
    }

    #[tokio::test]
    async fn balance_invariant_over_mined_chain() {
        let (blockchain, wallet, _dir) = test_blockchain().await;

        for tag in ["a", "b", "c"] {
            let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), tag)
                .expect("failed to create coinbase");
            blockchain
                .mine_block(&[coinbase], &CancelFlag::new())
                .await
                .expect("failed to mine");
        }

        let utxo = blockchain.find_utxo().await.expect("find_utxo failed");
        let total: i64 = utxo
            .values()
            .flat_map(|outs| outs.iter().map(|out| out.get_value()))
            .sum();
        let height = blockchain.get_best_height().await.expect("height");
        assert_eq!(total, SUBSIDY * (height as i64 + 1));
    }
}

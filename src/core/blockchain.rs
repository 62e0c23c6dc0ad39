// The ledger: every block lives in sled under its hash, and the reserved key
// "l" points at the tip. The chainstate tree next to it is owned by UTXOSet.

use crate::core::{Block, ProofOfWork, PrevTransactions, TXOutputs, Transaction};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{abort, ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

pub const TIP_BLOCK_HASH_KEY: &str = "l";
pub const BLOCKS_TREE: &str = "blocks";

/// Coinbase payload of the first block of every new chain.
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

#[derive(Clone)]
pub struct Blockchain {
    db: Db,
    // Held for reading while the UTXO index is scanned and for writing while
    // it is rebuilt or updated, so readers never see half an update.
    chainstate_lock: Arc<RwLock<()>>,
}

impl Blockchain {
    /// Mines a genesis block paying `coinbase_tx` and stores it as the tip
    /// of a brand new chain at `db_path`.
    pub fn create_genesis(db_path: impl AsRef<Path>, coinbase_tx: &Transaction) -> Result<Blockchain> {
        if !coinbase_tx.is_coinbase() {
            return Err(BlockchainError::InvalidBlock(
                "Genesis block needs a coinbase transaction".to_string(),
            ));
        }
        let blockchain = Self::open_db(db_path.as_ref())?;
        if Self::read_tip(&blockchain.blocks_tree()?)?.is_some() {
            return Err(BlockchainError::Database(format!(
                "Blockchain already exists at {}",
                db_path.as_ref().display()
            )));
        }

        info!("Creating genesis block");
        let genesis = Block::generate_genesis_block(coinbase_tx)?;
        blockchain.store_genesis(&genesis)?;
        Ok(blockchain)
    }

    /// Starts a new chain at `db_path` from an already mined genesis block,
    /// for example one received from a peer.
    pub fn with_genesis_block(db_path: impl AsRef<Path>, genesis: &Block) -> Result<Blockchain> {
        if !genesis.is_genesis() || genesis.get_height() != 0 {
            return Err(BlockchainError::InvalidBlock(
                "Not a genesis block".to_string(),
            ));
        }
        if !ProofOfWork::validate(genesis) {
            return Err(BlockchainError::InvalidBlock(
                "Genesis block fails proof-of-work".to_string(),
            ));
        }
        let blockchain = Self::open_db(db_path.as_ref())?;
        blockchain.store_genesis(genesis)?;
        Ok(blockchain)
    }

    /// Opens an existing chain.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Blockchain> {
        let blockchain = Self::open_db(db_path.as_ref())?;
        if Self::read_tip(&blockchain.blocks_tree()?)?.is_none() {
            return Err(BlockchainError::Database(
                "No existing blockchain found. Create one first.".to_string(),
            ));
        }
        Ok(blockchain)
    }

    fn open_db(path: &Path) -> Result<Blockchain> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        Ok(Blockchain {
            db,
            chainstate_lock: Arc::new(RwLock::new(())),
        })
    }

    fn store_genesis(&self, genesis: &Block) -> Result<()> {
        let block_data = genesis.serialize()?;
        self.blocks_tree()?.transaction(
            |tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
                if tx_db.get(TIP_BLOCK_HASH_KEY)?.is_some() {
                    return abort(BlockchainError::Database(
                        "Blockchain already exists".to_string(),
                    ));
                }
                tx_db.insert(genesis.get_hash(), block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, genesis.get_hash())?;
                Ok(())
            },
        )?;
        info!("Stored genesis block {}", HEXLOWER.encode(genesis.get_hash()));
        Ok(())
    }

    fn read_tip(blocks_tree: &Tree) -> Result<Option<Vec<u8>>> {
        Ok(blocks_tree.get(TIP_BLOCK_HASH_KEY)?.map(|tip| tip.to_vec()))
    }

    pub(crate) fn blocks_tree(&self) -> Result<Tree> {
        self.db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub(crate) fn chainstate_lock(&self) -> &RwLock<()> {
        &self.chainstate_lock
    }

    pub fn get_tip_hash(&self) -> Result<Vec<u8>> {
        Self::read_tip(&self.blocks_tree()?)?
            .ok_or_else(|| BlockchainError::Database("Tip hash not found".to_string()))
    }

    /// Verifies `transactions`, mines them into a block on top of the tip
    /// and stores it.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        for transaction in transactions {
            if !self.verify_transaction(transaction)? {
                return Err(BlockchainError::Transaction(format!(
                    "Invalid transaction {}",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
        }

        let tip_hash = self.get_tip_hash()?;
        let next_height = self.get_block(&tip_hash)?.get_height() + 1;
        info!(
            "Mining block at height {next_height} with {} transactions",
            transactions.len()
        );

        let block = Block::new_block(tip_hash, transactions, next_height)?;
        self.add_block(&block)?;
        Ok(block)
    }

    /// Stores `block`. The tip moves to it only when its height exceeds the
    /// current tip's height. Proof-of-work and parent linkage are the
    /// caller's concern.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let blocks_tree = self.blocks_tree()?;
        let block_data = block.serialize()?;

        let tip_moved = blocks_tree.transaction(
            |tx_db| -> ConflictableTransactionResult<bool, BlockchainError> {
                if tx_db.get(block.get_hash())?.is_some() {
                    return Ok(false);
                }
                tx_db.insert(block.get_hash(), block_data.as_slice())?;

                let advance = match tx_db.get(TIP_BLOCK_HASH_KEY)? {
                    None => true,
                    Some(tip_hash) => match tx_db.get(&tip_hash)? {
                        None => true,
                        Some(tip_bytes) => {
                            let tip_block = Block::deserialize(tip_bytes.as_ref())
                                .map_err(ConflictableTransactionError::Abort)?;
                            block.get_height() > tip_block.get_height()
                        }
                    },
                };
                if advance {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                }
                Ok(advance)
            },
        )?;

        debug!(
            "Added block {} at height {} (tip moved: {tip_moved})",
            HEXLOWER.encode(block.get_hash()),
            block.get_height()
        );
        Ok(())
    }

    pub fn iterator(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator::new(
            self.get_tip_hash()?,
            self.blocks_tree()?,
        ))
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip_hash = self.get_tip_hash()?;
        Ok(self.get_block(&tip_hash)?.get_height())
    }

    /// Hashes of every block from the tip back to genesis.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut blocks = vec![];
        for block in self.iterator()? {
            blocks.push(block?.get_hash_bytes());
        }
        Ok(blocks)
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Block> {
        let block_bytes = self
            .blocks_tree()?
            .get(block_hash)?
            .ok_or_else(|| BlockchainError::BlockNotFound(HEXLOWER.encode(block_hash)))?;
        Block::deserialize(block_bytes.as_ref())
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator()? {
            for transaction in block?.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Ok(transaction.clone());
                }
            }
        }
        Err(BlockchainError::TransactionNotFound(HEXLOWER.encode(txid)))
    }

    /// Every unspent output on the chain, keyed by hex transaction id.
    ///
    /// Spends and outputs are gathered in one pass and matched at the end, so
    /// an output consumed anywhere in the chain is excluded regardless of the
    /// order the two transactions are met in.
    pub fn find_utxo(&self) -> Result<HashMap<String, TXOutputs>> {
        let mut utxo: HashMap<String, TXOutputs> = HashMap::new();
        let mut spent_txos: HashSet<(String, usize)> = HashSet::new();

        for block in self.iterator()? {
            for tx in block?.get_transactions() {
                utxo.insert(
                    HEXLOWER.encode(tx.get_id()),
                    TXOutputs::from_transaction(tx),
                );
                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(idx) = txin.output_index() {
                        spent_txos.insert((HEXLOWER.encode(txin.get_txid()), idx));
                    }
                }
            }
        }

        for (txid_hex, idx) in spent_txos {
            if let Some(outs) = utxo.get_mut(&txid_hex) {
                outs.remove(idx);
            }
        }
        utxo.retain(|_, outs| !outs.is_empty());
        Ok(utxo)
    }

    // Chain lookup for every transaction referenced by `tx`'s inputs
    fn prev_transactions(&self, tx: &Transaction) -> Result<PrevTransactions> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if prev_txs.contains_key(&txid_hex) {
                continue;
            }
            let prev_tx = self.find_transaction(vin.get_txid()).map_err(|e| match e {
                BlockchainError::TransactionNotFound(id) => {
                    BlockchainError::PreviousTransactionUnknown(id)
                }
                other => other,
            })?;
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.prev_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }
}

/// Walks the chain from the tip back to genesis, one stored block at a time.
pub struct BlockchainIterator {
    blocks_tree: Tree,
    current_hash: Option<Vec<u8>>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks_tree: Tree) -> BlockchainIterator {
        BlockchainIterator {
            blocks_tree,
            current_hash: Some(tip_hash),
        }
    }

    fn load(&self, hash: &[u8]) -> Result<Block> {
        let data = self
            .blocks_tree
            .get(hash)?
            .ok_or_else(|| BlockchainError::BlockNotFound(HEXLOWER.encode(hash)))?;
        Block::deserialize(data.as_ref())
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        match self.load(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.get_pre_block_hash().to_vec());
                }
                Some(Ok(block))
            }
            // a broken link ends the walk after reporting it
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_chain() -> (TempDir, Blockchain) {
        let dir = TempDir::new().unwrap();
        let coinbase =
            Transaction::new_coinbase_tx(&[1u8; 20], GENESIS_COINBASE_DATA.as_bytes()).unwrap();
        let chain = Blockchain::create_genesis(dir.path().join("db"), &coinbase).unwrap();
        (dir, chain)
    }

    fn reward(tag: &[u8]) -> Transaction {
        Transaction::new_coinbase_tx(&[2u8; 20], tag).unwrap()
    }

    #[test]
    fn test_create_genesis_sets_tip() {
        let (_dir, chain) = new_chain();
        assert_eq!(chain.get_best_height().unwrap(), 0);

        let genesis = chain.get_block(&chain.get_tip_hash().unwrap()).unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(chain.get_block_hashes().unwrap().len(), 1);
    }

    #[test]
    fn test_create_genesis_twice_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let first = Blockchain::create_genesis(&path, &reward(b"a")).unwrap();
        drop(first);
        assert!(Blockchain::create_genesis(&path, &reward(b"b")).is_err());
    }

    #[test]
    fn test_open_without_chain_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Blockchain::open(dir.path().join("empty")).is_err());
    }

    #[test]
    fn test_mine_block_extends_tip() {
        let (_dir, chain) = new_chain();
        let block = chain.mine_block(&[reward(b"one")]).unwrap();

        assert_eq!(block.get_height(), 1);
        assert_eq!(chain.get_tip_hash().unwrap(), block.get_hash());
        let hashes = chain.get_block_hashes().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], block.get_hash());
    }

    #[test]
    fn test_add_block_is_idempotent() {
        let (_dir, chain) = new_chain();
        let block = chain.mine_block(&[reward(b"one")]).unwrap();

        chain.add_block(&block).unwrap();
        chain.add_block(&block).unwrap();
        assert_eq!(chain.get_best_height().unwrap(), 1);
        assert_eq!(chain.get_block_hashes().unwrap().len(), 2);
    }

    #[test]
    fn test_tip_follows_height_only() {
        let (_dir, chain) = new_chain();
        let genesis_hash = chain.get_tip_hash().unwrap();
        let main = chain.mine_block(&[reward(b"main")]).unwrap();

        // same height as the tip: stored but not the tip
        let side = Block::new_block(genesis_hash, &[reward(b"side")], 1).unwrap();
        chain.add_block(&side).unwrap();
        assert_eq!(chain.get_tip_hash().unwrap(), main.get_hash());
        assert_eq!(chain.get_block(side.get_hash()).unwrap(), side);

        // a higher block on the side branch takes over
        let side2 = Block::new_block(side.get_hash_bytes(), &[reward(b"side2")], 2).unwrap();
        chain.add_block(&side2).unwrap();
        assert_eq!(chain.get_tip_hash().unwrap(), side2.get_hash());
    }

    #[test]
    fn test_iterator_stops_at_genesis() {
        let (_dir, chain) = new_chain();
        chain.mine_block(&[reward(b"one")]).unwrap();
        chain.mine_block(&[reward(b"two")]).unwrap();

        let heights: Vec<usize> = chain
            .iterator()
            .unwrap()
            .map(|b| b.unwrap().get_height())
            .collect();
        assert_eq!(heights, vec![2, 1, 0]);
    }

    #[test]
    fn test_lookups_report_not_found() {
        let (_dir, chain) = new_chain();
        assert!(matches!(
            chain.get_block(&[7u8; 32]),
            Err(BlockchainError::BlockNotFound(_))
        ));
        assert!(matches!(
            chain.find_transaction(&[7u8; 32]),
            Err(BlockchainError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_reopen_keeps_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let tip = {
            let chain = Blockchain::create_genesis(&path, &reward(b"g")).unwrap();
            chain.mine_block(&[reward(b"one")]).unwrap();
            chain.get_db().flush().unwrap();
            chain.get_tip_hash().unwrap()
        };
        let chain = Blockchain::open(&path).unwrap();
        assert_eq!(chain.get_tip_hash().unwrap(), tip);
        assert_eq!(chain.get_best_height().unwrap(), 1);
    }
}

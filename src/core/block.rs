use crate::core::{ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    transactions: Vec<Transaction>,
    pre_block_hash: Vec<u8>, // empty only for genesis
    hash: Vec<u8>,
    nonce: i64,
    height: usize,
}

impl Block {
    /// Assembles a block on top of `pre_block_hash` and mines it.
    pub fn new_block(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            transactions: transactions.to_vec(),
            pre_block_hash,
            hash: vec![],
            nonce: 0,
            height,
        };

        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block)?.run()?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Mined block {} at height {height} (nonce {nonce})",
            HEXLOWER.encode(&block.hash)
        );

        Ok(block)
    }

    pub fn generate_genesis_block(transaction: &Transaction) -> Result<Block> {
        Block::new_block(vec![], std::slice::from_ref(transaction), 0)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_bytes(&self) -> Vec<u8> {
        self.hash.clone()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coinbase(tag: &[u8]) -> Transaction {
        Transaction::new_coinbase_tx(&[2u8; 20], tag).unwrap()
    }

    fn sample_block() -> Block {
        Block::new_block(vec![0xab; 32], &[coinbase(b"one"), coinbase(b"two")], 3).unwrap()
    }

    #[test]
    fn test_empty_block_rejected() {
        assert!(Block::new_block(vec![], &[], 0).is_err());
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::generate_genesis_block(&coinbase(b"genesis")).unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.get_height(), 0);
        assert!(ProofOfWork::validate(&genesis));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let block = sample_block();
        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert!(ProofOfWork::validate(&decoded));

        let genesis = Block::generate_genesis_block(&coinbase(b"g")).unwrap();
        let decoded = Block::deserialize(&genesis.serialize().unwrap()).unwrap();
        assert!(decoded.get_pre_block_hash().is_empty());
    }

    #[test]
    fn test_flipped_nonce_invalidates() {
        let mut block = sample_block();
        block.nonce ^= 1;
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_flipped_timestamp_invalidates() {
        let mut block = sample_block();
        block.timestamp ^= 1 << 3;
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_flipped_prev_hash_invalidates() {
        let mut block = sample_block();
        block.pre_block_hash[31] ^= 0x80;
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_stored_hash_must_match_header() {
        let mut block = sample_block();
        let other = Block::new_block(vec![0xcd; 32], &[coinbase(b"other")], 3).unwrap();
        assert!(ProofOfWork::validate(&other));
        assert_ne!(block.hash, other.hash);

        // a hash that meets the target but belongs to another header
        block.hash = other.hash.clone();
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_changed_transaction_invalidates() {
        let mut block = sample_block();
        block.transactions.swap(0, 1);
        assert!(!ProofOfWork::validate(&block));

        let mut block = sample_block();
        block.transactions[1] = coinbase(b"twp");
        assert!(!ProofOfWork::validate(&block));
    }
}

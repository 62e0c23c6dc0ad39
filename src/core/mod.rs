//! Core ledger functionality
//!
//! Blocks, transactions, the Merkle digest, proof-of-work and the sled-backed
//! chain of blocks.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, GENESIS_COINBASE_DATA};
pub use merkle::MerkleTree;
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{
    PrevTransactions, TXInput, TXOutput, TXOutputs, Transaction, COINBASE_VOUT, SUBSIDY,
};

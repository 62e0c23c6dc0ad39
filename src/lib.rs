//! # utxo-chain - a minimal UTXO ledger node
//!
//! A single node keeps an append-only chain of proof-of-work blocks in sled,
//! derives the set of unspent outputs from it, signs and verifies transfers
//! with ECDSA P-256, and syncs blocks and transactions with its peers.
//!
//! ## Layout
//! - `core/`: blocks, transactions, the Merkle digest, proof-of-work and the chain itself
//! - `storage/`: the UTXO index, the mempool and the block download queue
//! - `network/`: wire framing, known peers and the connection-per-message server
//! - `wallet/`: key pairs, base58check addresses and the per-node wallet file
//! - `config/`: node settings from defaults, TOML and the environment
//! - `utils/`: hashing, signing and the binary codec
//! - `cli/`: command-line arguments for the `utxo-chain` binary
//!
//! ## Known limitations
//! - The tip is the highest block seen; there is no cumulative-work fork choice.
//! - Received blocks are checked for proof-of-work only. Their transactions
//!   are not checked against the UTXO index until the next mining attempt.
//! - Peers are not authenticated and inventory lists are unbounded.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleTree, ProofOfWork, TXInput, TXOutput, TXOutputs,
    Transaction, GENESIS_COINBASE_DATA, SUBSIDY, TARGET_BITS,
};
pub use error::{BlockchainError, Result};
pub use network::{send_tx, Node, Nodes, OpType, Package, Server};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};

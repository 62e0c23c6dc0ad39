//! Derived and in-memory state
//!
//! The UTXO index kept next to the chain, the pool of pending transactions
//! and the queue of blocks still being downloaded from a peer.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::{UTXOSet, UTXO_TREE};

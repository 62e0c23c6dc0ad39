use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Pending transactions waiting to be mined. ( K -> txid_hex, V => Transaction )
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Transaction>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Transaction>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, txid: &str) -> Option<Transaction> {
        self.read().get(txid).cloned()
    }

    /// Inserts `tx` keyed by its id, replacing an entry with the same id.
    pub fn add(&self, tx: Transaction) {
        self.write().insert(HEXLOWER.encode(tx.get_id()), tx);
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.read().contains_key(txid)
    }

    pub fn remove(&self, txid: &str) -> Option<Transaction> {
        self.write().remove(txid)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        self.read().values().cloned().collect()
    }
}

/// Hashes still to be requested during a block download, in order.
pub struct BlockInTransit {
    inner: RwLock<VecDeque<Vec<u8>>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: RwLock::new(VecDeque::new()),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Vec<u8>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the queue with `blocks` and takes the first entry off it, in
    /// one step.
    pub fn replace_and_pop_first(&self, blocks: &[Vec<u8>]) -> Option<Vec<u8>> {
        let mut inner = self.write();
        *inner = blocks.iter().cloned().collect();
        inner.pop_front()
    }

    pub fn pop_front(&self) -> Option<Vec<u8>> {
        self.write().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

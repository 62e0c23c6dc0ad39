use crate::core::{Block, Blockchain, TXOutput, TXOutputs, Transaction};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Batch, Tree};
use std::collections::HashMap;
use std::sync::PoisonError;

pub const UTXO_TREE: &str = "chainstate";

/// Index of unspent outputs derived from the chain
///
/// Lives in the `chainstate` tree of the chain's database: transaction id ->
/// encoded [`TXOutputs`]. Scans hold the chain's chainstate read lock;
/// `reindex` and `update` hold its write lock and commit in one atomic step.
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
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    /// First-fit selection of outputs locked to `pub_key_hash`, stopping once
    /// `amount` is reached. The caller checks the returned total.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let _guard = self
            .blockchain
            .chainstate_lock()
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0;
        for item in self.utxo_tree()?.iter() {
            let (k, v) = item?;
            let txid_hex = HEXLOWER.encode(k.as_ref());
            let outs = TXOutputs::deserialize(v.as_ref())?;

            for (idx, out) in outs.iter() {
                if out.is_locked_with_key(pub_key_hash) && accumulated < amount {
                    accumulated += out.get_value();
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(idx);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// Every unspent output locked to `pub_key_hash`.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let _guard = self
            .blockchain
            .chainstate_lock()
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut utxos = vec![];
        for item in self.utxo_tree()?.iter() {
            let (_, v) = item?;
            let outs = TXOutputs::deserialize(v.as_ref())?;
            utxos.extend(
                outs.iter()
                    .filter(|(_, out)| out.is_locked_with_key(pub_key_hash))
                    .map(|(_, out)| out.clone()),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /// Unspent outputs left for one transaction, if any.
    pub fn get_outputs(&self, txid: &[u8]) -> Result<Option<TXOutputs>> {
        let _guard = self
            .blockchain
            .chainstate_lock()
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        self.utxo_tree()?
            .get(txid)?
            .map(|bytes| TXOutputs::deserialize(bytes.as_ref()))
            .transpose()
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let _guard = self
            .blockchain
            .chainstate_lock()
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut counter = 0;
        for item in self.utxo_tree()?.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Rebuilds the index from a full chain scan.
    pub fn reindex(&self) -> Result<()> {
        let _guard = self
            .blockchain
            .chainstate_lock()
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let utxo_tree = self.utxo_tree()?;
        let utxo_map = self.blockchain.find_utxo()?;

        let mut batch = Batch::default();
        for key in utxo_tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Serialization(format!("Failed to decode transaction ID: {e}"))
            })?;
            batch.insert(txid, outs.serialize()?);
        }
        utxo_tree.apply_batch(batch)?;

        info!(
            "Reindexed UTXO set: {} transactions with unspent outputs",
            utxo_map.len()
        );
        Ok(())
    }

    /// Applies one newly accepted block to the index.
    ///
    /// Spent outputs are removed before the transaction's own outputs are
    /// added. Inputs whose output is already gone are skipped, so applying
    /// the same block twice leaves the index unchanged.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self
            .blockchain
            .chainstate_lock()
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        self.utxo_tree()?.transaction(
            |tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
                for tx in block.get_transactions() {
                    if !tx.is_coinbase() {
                        for vin in tx.get_vin() {
                            let Some(idx) = vin.output_index() else {
                                continue;
                            };
                            let Some(outs_bytes) = tx_db.get(vin.get_txid())? else {
                                continue;
                            };
                            let mut outs = TXOutputs::deserialize(outs_bytes.as_ref())
                                .map_err(ConflictableTransactionError::Abort)?;
                            if outs.remove(idx).is_none() {
                                continue;
                            }

                            if outs.is_empty() {
                                tx_db.remove(vin.get_txid())?;
                            } else {
                                let bytes = outs
                                    .serialize()
                                    .map_err(ConflictableTransactionError::Abort)?;
                                tx_db.insert(vin.get_txid(), bytes)?;
                            }
                        }
                    }

                    let new_outputs = TXOutputs::from_transaction(tx)
                        .serialize()
                        .map_err(ConflictableTransactionError::Abort)?;
                    tx_db.insert(tx.get_id(), new_outputs)?;
                }
                Ok(())
            },
        )?;

        debug!(
            "Applied block {} to UTXO set",
            HEXLOWER.encode(block.get_hash())
        );
        Ok(())
    }

    /// Signature check plus a check that every input still points at an
    /// unspent output in this index.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        for vin in tx.get_vin() {
            let Some(idx) = vin.output_index() else {
                return Ok(false);
            };
            match self.get_outputs(vin.get_txid())? {
                Some(outs) if outs.contains(idx) => {}
                _ => return Ok(false),
            }
        }
        self.blockchain.verify_transaction(tx)
    }
}

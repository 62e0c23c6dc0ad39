//! Shared fixtures for unit tests

use crate::core::{Blockchain, TXInput, TXOutput, Transaction, GENESIS_COINBASE_DATA};
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::wallet::{hash_pub_key, Wallet};
use tempfile::TempDir;

/// A chain in a temporary directory whose genesis reward belongs to `owner`.
pub struct TestChain {
    pub dir: TempDir,
    pub blockchain: Blockchain,
    pub owner: Wallet,
}

impl TestChain {
    pub fn new() -> Result<TestChain> {
        let dir = tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))?;
        let owner = Wallet::new()?;
        let coinbase = Transaction::new_coinbase_tx(
            &hash_pub_key(owner.get_public_key()),
            GENESIS_COINBASE_DATA.as_bytes(),
        )?;
        let blockchain = Blockchain::create_genesis(dir.path().join("chain"), &coinbase)?;
        UTXOSet::new(blockchain.clone()).reindex()?;
        Ok(TestChain {
            dir,
            blockchain,
            owner,
        })
    }

    pub fn utxo_set(&self) -> UTXOSet {
        UTXOSet::new(self.blockchain.clone())
    }

    /// The genesis coinbase transaction.
    pub fn genesis_coinbase(&self) -> Result<Transaction> {
        let genesis = self.blockchain.get_block(&self.blockchain.get_tip_hash()?)?;
        genesis
            .get_transactions()
            .first()
            .cloned()
            .ok_or_else(|| BlockchainError::InvalidBlock("Empty genesis block".to_string()))
    }
}

/// Spends output `vout` of `prev` entirely to `to`, signed by `signer`
/// through the chain lookup.
pub fn spend_output(
    blockchain: &Blockchain,
    signer: &Wallet,
    prev: &Transaction,
    vout: usize,
    to: &[u8],
) -> Result<Transaction> {
    let value = prev
        .get_vout()
        .get(vout)
        .map(TXOutput::get_value)
        .ok_or_else(|| BlockchainError::Transaction(format!("No output {vout}")))?;
    let mut tx = Transaction::build(
        vec![TXInput::new(prev.get_id(), vout as i64, signer.get_public_key())],
        vec![TXOutput::new(value, to)?],
    )?;
    blockchain.sign_transaction(&mut tx, signer.get_pkcs8())?;
    Ok(tx)
}

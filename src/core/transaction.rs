// Transactions follow the UTXO model: each one consumes outputs of earlier
// transactions and creates new outputs locked to a recipient's key hash.
// Inputs are signed per position over a trimmed copy of the transaction.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    public_key_from_pkcs8, serialize, sha256_digest,
};
use crate::wallet::{hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Reward paid by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Output index carried by the single coinbase input.
pub const COINBASE_VOUT: i64 = -1;

/// Previous transactions keyed by hex-encoded id, used to sign and verify inputs.
pub type PrevTransactions = HashMap<String, Transaction>;

// One input: "spend output #vout of transaction txid"
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,      // id of the transaction holding the spent output
    vout: i64,          // index of that output, -1 for coinbase
    signature: Vec<u8>, // r || s, filled in by `Transaction::sign`
    pub_key: Vec<u8>,   // X || Y of the spender
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output position, `None` for the coinbase marker.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    /// Checks whether this input was created by the owner of `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

// One output: "pay `value` to whoever can sign for `pub_key_hash`"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, pub_key_hash: &[u8]) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::Transaction(
                "Transaction value must be positive".to_string(),
            ));
        }
        if pub_key_hash.is_empty() {
            return Err(BlockchainError::Transaction(
                "Output must be locked to a key hash".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// Unspent outputs of one transaction keyed by their original output index.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutputs {
    outputs: BTreeMap<usize, TXOutput>,
}

impl TXOutputs {
    pub fn new() -> TXOutputs {
        TXOutputs::default()
    }

    /// Every output of `tx`, as freshly created.
    pub fn from_transaction(tx: &Transaction) -> TXOutputs {
        TXOutputs {
            outputs: tx.get_vout().iter().cloned().enumerate().collect(),
        }
    }

    pub fn insert(&mut self, index: usize, output: TXOutput) {
        self.outputs.insert(index, output);
    }

    pub fn remove(&mut self, index: usize) -> Option<TXOutput> {
        self.outputs.remove(&index)
    }

    pub fn get(&self, index: usize) -> Option<&TXOutput> {
        self.outputs.get(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.outputs.contains_key(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TXOutput)> {
        self.outputs.iter().map(|(idx, out)| (*idx, out))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<TXOutputs> {
        deserialize(bytes)
    }
}

// A transfer of value; `id` is the hash of the transaction with `id` cleared
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Builds the reward transaction of a block.
    ///
    /// `data` ends up in the coinbase input so two coinbases paying the same
    /// recipient still get different ids; an empty `data` is replaced by a
    /// random UUID.
    pub fn new_coinbase_tx(to: &[u8], data: &[u8]) -> Result<Transaction> {
        let payload = if data.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            data.to_vec()
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: payload,
            pub_key: vec![],
        };
        let txout = TXOutput::new(SUBSIDY, to)?;
        Self::build(vec![tx_input], vec![txout])
    }

    /// Assembles a transaction and computes its id.
    pub fn build(inputs: Vec<TXInput>, outputs: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Creates and signs a payment of `amount` from `wallet` to `to`,
    /// returning any excess to the wallet as a change output.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &[u8],
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        let public_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Transaction(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                let vout = i64::try_from(out).map_err(|_| {
                    BlockchainError::Transaction(format!("Output index {out} out of range"))
                })?;
                inputs.push(TXInput::new(&txid, vout, wallet.get_public_key()));
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, public_key_hash.as_slice())?);
        }

        let mut tx = Self::build(inputs, outputs)?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// Copy with every input's signature and public key cleared.
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout(), &[]))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Signs every input with the PKCS#8 key `pkcs8`.
    ///
    /// Coinbase transactions are left untouched. Every referenced transaction
    /// must be present in `prev_txs`, and every input must name the signer's
    /// public key and spend an output locked to it.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &PrevTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.ensure_prev_known(prev_txs)?;
        let signer_key = public_key_from_pkcs8(pkcs8)?;

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let locking_hash = match Self::previous_output(&self.vin[idx], prev_txs)? {
                Some(out) => out.get_pub_key_hash().to_vec(),
                None => {
                    return Err(BlockchainError::Transaction(format!(
                        "Input {idx} references a missing output"
                    )))
                }
            };
            let vin = &self.vin[idx];
            if vin.get_pub_key() != signer_key.as_slice() || !vin.uses_key(&locking_hash) {
                return Err(BlockchainError::Transaction(format!(
                    "Input {idx} is not spendable with the signing key"
                )));
            }
            let digest = tx_copy.input_digest(idx, locking_hash)?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        }
        Ok(())
    }

    /// Checks that every input's key owns the output it spends and that its
    /// signature holds. Coinbase transactions always pass.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        self.ensure_prev_known(prev_txs)?;

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let locking_hash = match Self::previous_output(vin, prev_txs)? {
                Some(out) => out.get_pub_key_hash().to_vec(),
                None => return Ok(false),
            };
            if !vin.uses_key(&locking_hash) {
                return Ok(false);
            }
            let digest = tx_copy.input_digest(idx, locking_hash)?;
            if !ecdsa_p256_sha256_sign_verify(vin.get_pub_key(), vin.get_signature(), &digest) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // Digest of this trimmed copy with only input `idx` carrying `locking_hash`.
    // The slot is cleared again before returning.
    fn input_digest(&mut self, idx: usize, locking_hash: Vec<u8>) -> Result<Vec<u8>> {
        self.vin[idx].signature = vec![];
        self.vin[idx].pub_key = locking_hash;
        let digest = self.hash();
        self.vin[idx].pub_key = vec![];
        digest
    }

    fn ensure_prev_known(&self, prev_txs: &PrevTransactions) -> Result<()> {
        for vin in &self.vin {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if !prev_txs.contains_key(&txid_hex) {
                return Err(BlockchainError::PreviousTransactionUnknown(txid_hex));
            }
        }
        Ok(())
    }

    fn previous_output<'a>(
        vin: &TXInput,
        prev_txs: &'a PrevTransactions,
    ) -> Result<Option<&'a TXOutput>> {
        let txid_hex = HEXLOWER.encode(vin.get_txid());
        let prev_tx = prev_txs
            .get(&txid_hex)
            .ok_or(BlockchainError::PreviousTransactionUnknown(txid_hex))?;
        Ok(vin.output_index().and_then(|idx| prev_tx.vout.get(idx)))
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the encoded transaction with `id` cleared.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_bytes(&self) -> Vec<u8> {
        self.id.clone()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", HEXLOWER.encode(&self.id))?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "     Input {i}:")?;
            writeln!(f, "       TXID:      {}", HEXLOWER.encode(input.get_txid()))?;
            writeln!(f, "       Out:       {}", input.get_vout())?;
            writeln!(f, "       Signature: {}", HEXLOWER.encode(input.get_signature()))?;
            writeln!(f, "       PubKey:    {}", HEXLOWER.encode(input.get_pub_key()))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.get_value())?;
            writeln!(
                f,
                "       Script: {}",
                HEXLOWER.encode(output.get_pub_key_hash())
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl Transaction {
    /// Signs input `idx` as if it spent an output locked to `locking_hash`,
    /// skipping every ownership check.
    pub(crate) fn sign_input_unchecked(
        &mut self,
        idx: usize,
        pkcs8: &[u8],
        locking_hash: &[u8],
    ) -> Result<()> {
        let digest = self.trimmed_copy().input_digest(idx, locking_hash.to_vec())?;
        self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        Ok(())
    }
}

use crate::core::{Block, MerkleTree};
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, error};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Leading zero bits a block hash needs; target = 2^(256 - TARGET_BITS).
pub const TARGET_BITS: u32 = 16;

const MAX_NONCE: i64 = i64::MAX;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigInt,
    merkle_root: Vec<u8>,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        let merkle_root = MerkleTree::new(block.get_transactions())?
            .root_hash()
            .to_vec();
        Ok(ProofOfWork {
            block,
            target,
            merkle_root,
        })
    }

    /// Recomputes the header hash with the block's stored nonce. It must equal
    /// the stored hash and be below the target.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block) {
            Ok(pow) => pow,
            Err(e) => {
                error!("Cannot validate block {}: {e}", HEXLOWER.encode(block.get_hash()));
                return false;
            }
        };
        let hash = sha256_digest(&pow.prepare_data(block.get_nonce()));
        hash.as_slice() == block.get_hash() && pow.meets_target(&hash)
    }

    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash());
        data_bytes.extend(&self.merkle_root);
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(TARGET_BITS.to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Searches nonces from zero upward and returns the first one whose
    /// header hash is below the target, together with that hash.
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        debug!("Mining block at height {}", self.block.get_height());
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            let hash = sha256_digest(&self.prepare_data(nonce));
            if self.meets_target(&hash) {
                debug!("Found nonce {nonce}: {}", HEXLOWER.encode(&hash));
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::Mining(format!(
            "Nonce space exhausted for block at height {}",
            self.block.get_height()
        )))
    }
}

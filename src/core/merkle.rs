use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;

/// Merkle tree over the serialized transactions of one block
///
/// Leaves are the SHA-256 of each encoded transaction. Whenever a level has
/// an odd number of nodes its last node is paired with itself, so a single
/// transaction yields `H(H(tx) || H(tx))`. The tree is built on demand and
/// never stored.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: MerkleNode,
    leaf_count: usize,
}

#[derive(Debug, Clone)]
struct MerkleNode {
    hash: Vec<u8>,
    left: Option<Box<MerkleNode>>,
    right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(data: &[u8]) -> MerkleNode {
        MerkleNode {
            hash: sha256_digest(data),
            left: None,
            right: None,
        }
    }

    fn branch(left: MerkleNode, right: MerkleNode) -> MerkleNode {
        let mut combined = Vec::with_capacity(left.hash.len() + right.hash.len());
        combined.extend_from_slice(&left.hash);
        combined.extend_from_slice(&right.hash);
        MerkleNode {
            hash: sha256_digest(&combined),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    fn depth(&self) -> usize {
        match (&self.left, &self.right) {
            (Some(left), Some(right)) => 1 + left.depth().max(right.depth()),
            _ => 0,
        }
    }
}

impl MerkleTree {
    /// Builds the tree for a block's transactions, in block order.
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let serialized = transactions
            .iter()
            .map(Transaction::serialize)
            .collect::<Result<Vec<_>>>()?;
        Self::from_data(&serialized)
    }

    /// Builds the tree over raw leaf data.
    pub fn from_data(data: &[Vec<u8>]) -> Result<Self> {
        if data.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let mut level: Vec<MerkleNode> = data.iter().map(|d| MerkleNode::leaf(d)).collect();
        loop {
            if level.len() % 2 != 0 {
                if let Some(last) = level.last().cloned() {
                    level.push(last);
                }
            }

            let mut next = Vec::with_capacity(level.len() / 2);
            let mut nodes = level.into_iter();
            while let (Some(left), Some(right)) = (nodes.next(), nodes.next()) {
                next.push(MerkleNode::branch(left, right));
            }
            level = next;

            if level.len() == 1 {
                break;
            }
        }

        let root = level.pop().ok_or_else(|| {
            BlockchainError::InvalidBlock("Merkle tree construction produced no root".to_string())
        })?;
        Ok(MerkleTree {
            root,
            leaf_count: data.len(),
        })
    }

    pub fn root_hash(&self) -> &[u8] {
        &self.root.hash
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of levels above the leaves.
    pub fn depth(&self) -> usize {
        self.root.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(items: &[&[u8]]) -> Vec<Vec<u8>> {
        items.iter().map(|i| i.to_vec()).collect()
    }

    fn join(a: &[u8], b: &[u8]) -> Vec<u8> {
        let mut out = a.to_vec();
        out.extend_from_slice(b);
        sha256_digest(&out)
    }

    #[test]
    fn test_single_leaf_is_paired_with_itself() {
        let tree = MerkleTree::from_data(&leaves(&[b"tx"])).unwrap();
        let h = sha256_digest(b"tx");
        assert_eq!(tree.root_hash(), join(&h, &h).as_slice());
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let tree = MerkleTree::from_data(&leaves(&[b"a", b"b", b"c"])).unwrap();
        let (a, b, c) = (sha256_digest(b"a"), sha256_digest(b"b"), sha256_digest(b"c"));
        let expected = join(&join(&a, &b), &join(&c, &c));
        assert_eq!(tree.root_hash(), expected.as_slice());
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_duplication_applies_at_upper_levels() {
        // 5 leaves -> 3 pairs -> odd again at the second level
        let tree = MerkleTree::from_data(&leaves(&[b"1", b"2", b"3", b"4", b"5"])).unwrap();
        let h: Vec<Vec<u8>> = [b"1", b"2", b"3", b"4", b"5"]
            .iter()
            .map(|d| sha256_digest(*d))
            .collect();
        let l1 = [join(&h[0], &h[1]), join(&h[2], &h[3]), join(&h[4], &h[4])];
        let l2 = [join(&l1[0], &l1[1]), join(&l1[2], &l1[2])];
        assert_eq!(tree.root_hash(), join(&l2[0], &l2[1]).as_slice());
    }

    #[test]
    fn test_order_sensitive_and_deterministic() {
        let forward = MerkleTree::from_data(&leaves(&[b"a", b"b", b"c", b"d"])).unwrap();
        let again = MerkleTree::from_data(&leaves(&[b"a", b"b", b"c", b"d"])).unwrap();
        let swapped = MerkleTree::from_data(&leaves(&[b"b", b"a", b"c", b"d"])).unwrap();

        assert_eq!(forward.root_hash(), again.root_hash());
        assert_ne!(forward.root_hash(), swapped.root_hash());
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(MerkleTree::from_data(&[]).is_err());
        assert!(MerkleTree::new(&[]).is_err());
    }

    #[test]
    fn test_transactions_hash_their_encoding() {
        let a = Transaction::new_coinbase_tx(&[1u8; 20], b"a").unwrap();
        let b = Transaction::new_coinbase_tx(&[1u8; 20], b"b").unwrap();

        let tree = MerkleTree::new(&[a.clone(), b.clone()]).unwrap();
        let raw =
            MerkleTree::from_data(&[a.serialize().unwrap(), b.serialize().unwrap()]).unwrap();
        assert_eq!(tree.root_hash(), raw.root_hash());

        let reversed = MerkleTree::new(&[b, a]).unwrap();
        assert_ne!(tree.root_hash(), reversed.root_hash());
    }
}

//! Error handling for the ledger node
//!
//! Every fallible operation in the crate returns [`Result`]. Storage,
//! codec and I/O failures are converted into [`BlockchainError`] so callers
//! can propagate them with `?`.

use std::fmt;

/// Result type alias for blockchain operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Error types for ledger, index, signing and protocol operations
#[derive(Debug, Clone)]
pub enum BlockchainError {
    /// sled failures, missing trees, a chain without a tip
    Database(String),
    /// Key generation, signing or a malformed key
    Crypto(String),
    /// Peer unreachable, bind failure, bad frame
    Network(String),
    /// Malformed or unverifiable transaction
    Transaction(String),
    /// Wallet file could not be read or written
    Wallet(String),
    /// Bad config file or setting
    Config(String),
    /// bincode or JSON codec failure
    Serialization(String),
    /// Filesystem or socket I/O failure
    Io(String),
    /// Address fails the base58check test
    InvalidAddress(String),
    /// The sender's spendable outputs do not cover the amount
    InsufficientFunds { required: u64, available: u64 },
    /// Block fails proof-of-work or genesis checks
    InvalidBlock(String),
    /// Nonce search ended without meeting the target
    Mining(String),
    /// No block stored under the given hash (hex)
    BlockNotFound(String),
    /// No transaction with the given id (hex) in the chain
    TransactionNotFound(String),
    /// An input references a transaction the lookup cannot resolve (hex id)
    PreviousTransactionUnknown(String),
    /// A peer sent a command identifier this node does not speak
    UnknownCommand(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::BlockNotFound(hash) => write!(f, "Block not found: {hash}"),
            BlockchainError::TransactionNotFound(id) => {
                write!(f, "Transaction not found: {id}")
            }
            BlockchainError::PreviousTransactionUnknown(id) => {
                write!(f, "Previous transaction unknown: {id}")
            }
            BlockchainError::UnknownCommand(cmd) => write!(f, "Unknown command: {cmd}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => {
                BlockchainError::Database(e.to_string())
            }
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

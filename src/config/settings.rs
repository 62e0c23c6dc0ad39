use crate::error::{BlockchainError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const NODE_ID_KEY: &str = "NODE_ID";
const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const BOOTSTRAP_NODE_KEY: &str = "BOOTSTRAP_NODE";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const DATA_DIR_KEY: &str = "DATA_DIR";

const DEFAULT_NODE_ID: &str = "3000";
const DEFAULT_BOOTSTRAP_NODE: &str = "localhost:3000";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MEMPOOL_THRESHOLD: usize = 2;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Settings of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub node_id: String,
    /// Address this node listens on and announces to peers.
    pub node_addr: String,
    /// First entry of the known-peer set; also the relay node.
    pub bootstrap_addr: String,
    /// Reward address for blocks mined here; `None` disables mining.
    pub mining_addr: Option<String>,
    pub data_dir: PathBuf,
    /// Pending transactions needed before a mining attempt.
    pub mempool_threshold: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

// Shape of the optional TOML file; every key may be left out.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    node_id: Option<String>,
    node_addr: Option<String>,
    bootstrap_addr: Option<String>,
    mining_addr: Option<String>,
    data_dir: Option<PathBuf>,
    mempool_threshold: Option<usize>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_node(DEFAULT_NODE_ID)
    }
}

impl Config {
    /// Defaults for the node with the given id, listening on `localhost:<id>`.
    pub fn for_node(node_id: &str) -> Config {
        Config {
            node_id: node_id.to_string(),
            node_addr: format!("localhost:{node_id}"),
            bootstrap_addr: DEFAULT_BOOTSTRAP_NODE.to_string(),
            mining_addr: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            mempool_threshold: DEFAULT_MEMPOOL_THRESHOLD,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }

    /// Defaults, then the TOML file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let file = match path {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                toml::from_str::<FileConfig>(&text).map_err(|e| {
                    BlockchainError::Config(format!("Invalid config file {}: {e}", path.display()))
                })?
            }
            None => FileConfig::default(),
        };
        let mut config = Config::from_file(file);
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: FileConfig) -> Config {
        let node_id = file.node_id.unwrap_or_else(|| DEFAULT_NODE_ID.to_string());
        let mut config = Config::for_node(&node_id);
        if let Some(addr) = file.node_addr {
            config.node_addr = addr;
        }
        if let Some(addr) = file.bootstrap_addr {
            config.bootstrap_addr = addr;
        }
        config.mining_addr = file.mining_addr;
        if let Some(dir) = file.data_dir {
            config.data_dir = dir;
        }
        if let Some(threshold) = file.mempool_threshold {
            config.mempool_threshold = threshold;
        }
        if let Some(ms) = file.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.read_timeout_ms {
            config.read_timeout = Duration::from_millis(ms);
        }
        config
    }

    // A NODE_ID without NODE_ADDRESS also moves the listen address.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(node_id) = lookup(NODE_ID_KEY) {
            if self.node_addr == format!("localhost:{}", self.node_id) {
                self.node_addr = format!("localhost:{node_id}");
            }
            self.node_id = node_id;
        }
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            self.node_addr = addr;
        }
        if let Some(addr) = lookup(BOOTSTRAP_NODE_KEY) {
            self.bootstrap_addr = addr;
        }
        if let Some(addr) = lookup(MINING_ADDRESS_KEY) {
            self.mining_addr = Some(addr);
        }
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(BlockchainError::Config("Node id must not be empty".to_string()));
        }
        if self.mempool_threshold == 0 {
            return Err(BlockchainError::Config(
                "Mempool threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_miner(&self) -> bool {
        self.mining_addr.is_some()
    }

    pub fn is_bootstrap(&self) -> bool {
        self.node_addr == self.bootstrap_addr
    }

    /// `<data>/node_<id>`
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("node_{}", self.node_id))
    }

    /// `<data>/wallet_<id>.dat`
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.dat", self.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node_addr, "localhost:3000");
        assert_eq!(config.bootstrap_addr, "localhost:3000");
        assert!(config.is_bootstrap());
        assert!(!config.is_miner());
        assert_eq!(config.mempool_threshold, 2);
        assert_eq!(config.db_path(), PathBuf::from("data").join("node_3000"));
        assert_eq!(
            config.wallet_path(),
            PathBuf::from("data").join("wallet_3000.dat")
        );
    }

    #[test]
    fn test_node_id_moves_default_address() {
        let mut config = Config::default();
        config.apply_env(env_of(&[("NODE_ID", "3001"), ("MINING_ADDRESS", "1abc")]));
        assert_eq!(config.node_addr, "localhost:3001");
        assert_eq!(config.mining_addr.as_deref(), Some("1abc"));
        assert!(!config.is_bootstrap());
    }

    #[test]
    fn test_explicit_address_wins() {
        let mut config = Config::default();
        config.apply_env(env_of(&[
            ("NODE_ID", "3002"),
            ("NODE_ADDRESS", "10.0.0.2:4000"),
        ]));
        assert_eq!(config.node_addr, "10.0.0.2:4000");
        assert_eq!(config.db_path(), PathBuf::from("data").join("node_3002"));
    }

    #[test]
    fn test_toml_file() {
        let file: FileConfig = toml::from_str(
            r#"
            node_id = "4000"
            bootstrap_addr = "seed:3000"
            mempool_threshold = 5
            read_timeout_ms = 100
            "#,
        )
        .unwrap();
        let config = Config::from_file(file);
        assert_eq!(config.node_addr, "localhost:4000");
        assert_eq!(config.bootstrap_addr, "seed:3000");
        assert_eq!(config.mempool_threshold, 5);
        assert_eq!(config.read_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<FileConfig>("mystery = 1").is_err());
    }
}

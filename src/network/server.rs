use crate::config::Config;
use crate::core::{Block, Blockchain, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::message::{OpType, Package, NODE_VERSION};
use crate::network::Nodes;
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use crate::wallet::address_to_pub_key_hash;
use data_encoding::HEXLOWER;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Mutable state shared by every connection handler of one node.
#[derive(Default)]
pub struct NodeState {
    known_nodes: Nodes,
    blocks_in_transit: BlockInTransit,
    mempool: MemoryPool,
    // one mining loop at a time
    mining_lock: Mutex<()>,
}

/// A ledger node speaking the sync protocol
///
/// Every inbound connection carries exactly one framed message and is served
/// on its own thread. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Server {
    config: Arc<Config>,
    blockchain: Blockchain,
    state: Arc<NodeState>,
}

impl Server {
    /// The known-peer set starts out holding the bootstrap node.
    pub fn new(config: Config, blockchain: Blockchain) -> Server {
        let state = NodeState::default();
        state.known_nodes.add_node(&config.bootstrap_addr);
        Server {
            config: Arc::new(config),
            blockchain,
            state: Arc::new(state),
        }
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn known_nodes(&self) -> &Nodes {
        &self.state.known_nodes
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.state.mempool
    }

    pub fn blocks_in_transit(&self) -> &BlockInTransit {
        &self.state.blocks_in_transit
    }

    /// Binds, announces and serves until the listener fails.
    pub fn start(&self) -> Result<()> {
        let listener = self.listen()?;
        self.announce()?;
        self.serve(listener);
        Ok(())
    }

    pub fn listen(&self) -> Result<TcpListener> {
        let addr = self.config.node_addr.as_str();
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!("Server listening on {addr}");
        Ok(listener)
    }

    /// Non-bootstrap nodes introduce themselves to the bootstrap node.
    pub fn announce(&self) -> Result<()> {
        if self.config.is_bootstrap() {
            return Ok(());
        }
        let best_height = self.blockchain.get_best_height()?;
        self.send_version(&self.config.bootstrap_addr, best_height)
    }

    /// Accepts connections and hands each one to a new thread.
    pub fn serve(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || server.handle_connection(stream));
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }
    }

    fn handle_connection(&self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());

        let mut frame = vec![];
        let read = stream
            .set_read_timeout(Some(self.config.read_timeout))
            .and_then(|_| stream.read_to_end(&mut frame));
        if let Err(e) = read {
            error!("Failed to read request from {peer}: {e}");
            return;
        }

        let pkg = match Package::decode(&frame) {
            Ok(pkg) => pkg,
            Err(BlockchainError::UnknownCommand(cmd)) => {
                warn!("Unknown command {cmd} from {peer}, dropping connection");
                return;
            }
            Err(e) => {
                error!("Malformed request from {peer}: {e}");
                return;
            }
        };

        info!("Received {} command from {peer}", pkg.command());
        if let Err(e) = self.process_message(pkg) {
            error!("Error processing message from {peer}: {e}");
        }
        let _ = stream.shutdown(Shutdown::Both);
    }

    /// Runs the handler for one decoded message.
    pub fn process_message(&self, pkg: Package) -> Result<()> {
        match pkg {
            Package::Addr { addr_list } => self.handle_addr(&addr_list),
            Package::Block { addr_from, block } => self.handle_block(&addr_from, &block),
            Package::GetBlocks { addr_from } => self.handle_get_blocks(&addr_from),
            Package::GetData {
                addr_from,
                op_type,
                id,
            } => self.handle_get_data(&addr_from, op_type, &id),
            Package::Inv {
                addr_from,
                op_type,
                items,
            } => self.handle_inv(&addr_from, op_type, &items),
            Package::Tx {
                addr_from,
                transaction,
            } => self.handle_tx(&addr_from, &transaction),
            Package::Version {
                addr_from,
                version: _,
                best_height,
            } => self.handle_version(&addr_from, best_height),
        }
    }

    fn handle_addr(&self, addr_list: &[String]) -> Result<()> {
        for addr in addr_list {
            if addr != &self.config.node_addr && self.state.known_nodes.add_node(addr) {
                info!("Learned about peer {addr}");
            }
        }
        info!("There are {} known nodes now", self.state.known_nodes.len());
        for node in self.state.known_nodes.get_nodes() {
            if node.get_addr() != self.config.node_addr {
                self.send_get_blocks(node.get_addr())?;
            }
        }
        Ok(())
    }

    fn handle_block(&self, addr_from: &str, block_bytes: &[u8]) -> Result<()> {
        let block = Block::deserialize(block_bytes)?;
        if ProofOfWork::validate(&block) {
            self.blockchain.add_block(&block)?;
            info!(
                "Added block {} at height {}",
                HEXLOWER.encode(block.get_hash()),
                block.get_height()
            );
        } else {
            warn!(
                "Rejected block {} from {addr_from}: invalid proof-of-work",
                HEXLOWER.encode(block.get_hash())
            );
        }

        match self.state.blocks_in_transit.pop_front() {
            Some(next_hash) => self.send_get_data(addr_from, OpType::Block, &next_hash),
            None => UTXOSet::new(self.blockchain.clone()).reindex(),
        }
    }

    fn handle_get_blocks(&self, addr_from: &str) -> Result<()> {
        let blocks = self.blockchain.get_block_hashes()?;
        self.send_inv(addr_from, OpType::Block, &blocks)
    }

    fn handle_get_data(&self, addr_from: &str, op_type: OpType, id: &[u8]) -> Result<()> {
        match op_type {
            OpType::Block => match self.blockchain.get_block(id) {
                Ok(block) => self.send_block(addr_from, &block),
                Err(BlockchainError::BlockNotFound(hash)) => {
                    debug!("Requested block {hash} not found");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            OpType::Tx => {
                let txid_hex = HEXLOWER.encode(id);
                match self.state.mempool.get(&txid_hex) {
                    Some(tx) => self.send_tx(addr_from, &tx),
                    None => {
                        debug!("Requested transaction {txid_hex} not in mempool");
                        Ok(())
                    }
                }
            }
        }
    }

    fn handle_inv(&self, addr_from: &str, op_type: OpType, items: &[Vec<u8>]) -> Result<()> {
        info!(
            "Received inventory with {} {op_type:?} items from {addr_from}",
            items.len()
        );
        match op_type {
            OpType::Block => {
                if let Some(block_hash) = self.state.blocks_in_transit.replace_and_pop_first(items)
                {
                    self.send_get_data(addr_from, OpType::Block, &block_hash)?;
                }
            }
            OpType::Tx => {
                if let Some(txid) = items.first() {
                    if !self.state.mempool.contains(&HEXLOWER.encode(txid)) {
                        self.send_get_data(addr_from, OpType::Tx, txid)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Puts the transaction in the mempool, then either relays it or, on a
    /// mining node with enough pending transactions, mines.
    pub fn handle_tx(&self, addr_from: &str, tx_bytes: &[u8]) -> Result<()> {
        let tx = Transaction::deserialize(tx_bytes)?;
        let txid = tx.get_id_bytes();
        self.state.mempool.add(tx);
        debug!("Mempool holds {} transactions", self.state.mempool.len());

        if self.is_relay() {
            for node in self.state.known_nodes.get_nodes() {
                let addr = node.get_addr();
                if addr != self.config.node_addr && addr != addr_from {
                    if let Err(e) = self.send_inv(addr, OpType::Tx, std::slice::from_ref(&txid)) {
                        warn!("Failed to relay transaction to {addr}: {e}");
                    }
                }
            }
        } else if self.config.is_miner()
            && self.state.mempool.len() >= self.config.mempool_threshold
        {
            self.mine_pending()?;
        }
        Ok(())
    }

    fn is_relay(&self) -> bool {
        self.state
            .known_nodes
            .first()
            .is_some_and(|node| node.get_addr() == self.config.node_addr)
    }

    /// Mines blocks out of the mempool until it is empty or holds only
    /// transactions that fail verification.
    pub fn mine_pending(&self) -> Result<()> {
        let _guard = self
            .state
            .mining_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mining_addr = self.config.mining_addr.as_deref().ok_or_else(|| {
            BlockchainError::Config("Mining address not configured".to_string())
        })?;
        let reward_hash = address_to_pub_key_hash(mining_addr)?;
        let utxo_set = UTXOSet::new(self.blockchain.clone());

        while !self.state.mempool.is_empty() {
            let txs = self.select_valid_transactions(&utxo_set);
            if txs.is_empty() {
                info!("All pending transactions are invalid, waiting for new ones");
                return Ok(());
            }

            let mut block_txs = txs.clone();
            block_txs.push(Transaction::new_coinbase_tx(&reward_hash, &[])?);
            let new_block = self.blockchain.mine_block(&block_txs)?;
            utxo_set.reindex()?;
            info!(
                "New block {} is mined with {} transactions",
                HEXLOWER.encode(new_block.get_hash()),
                block_txs.len()
            );

            for node in self.state.known_nodes.get_nodes() {
                let addr = node.get_addr();
                if addr != self.config.node_addr {
                    if let Err(e) = self.send_inv(addr, OpType::Block, &[new_block.get_hash_bytes()]) {
                        warn!("Failed to announce block to {addr}: {e}");
                    }
                }
            }

            for tx in &txs {
                self.state.mempool.remove(&HEXLOWER.encode(tx.get_id()));
            }
        }
        Ok(())
    }

    // Pending transactions that verify against the current index. Of two
    // transactions spending the same output only the first is kept.
    fn select_valid_transactions(&self, utxo_set: &UTXOSet) -> Vec<Transaction> {
        let mut spent: HashSet<(Vec<u8>, i64)> = HashSet::new();
        let mut selected = vec![];
        for tx in self.state.mempool.get_all() {
            let txid_hex = HEXLOWER.encode(tx.get_id());
            match utxo_set.verify_transaction(&tx) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Transaction {txid_hex} failed verification");
                    continue;
                }
                Err(e) => {
                    warn!("Transaction {txid_hex} cannot be verified: {e}");
                    continue;
                }
            }
            let inputs: Vec<(Vec<u8>, i64)> = tx
                .get_vin()
                .iter()
                .map(|vin| (vin.get_txid().to_vec(), vin.get_vout()))
                .collect();
            if inputs.iter().any(|input| spent.contains(input)) {
                warn!("Transaction {txid_hex} conflicts with another pending transaction");
                continue;
            }
            spent.extend(inputs);
            selected.push(tx);
        }
        selected
    }

    fn handle_version(&self, addr_from: &str, best_height: usize) -> Result<()> {
        info!("Version message from {addr_from}, best_height={best_height}");
        let local_best_height = self.blockchain.get_best_height()?;
        if local_best_height < best_height {
            self.send_get_blocks(addr_from)?;
        } else if local_best_height > best_height {
            self.send_version(addr_from, local_best_height)?;
        }

        if self.state.known_nodes.add_node(addr_from) {
            info!("Added {addr_from} to known nodes");
        }
        Ok(())
    }

    pub fn send_version(&self, addr: &str, best_height: usize) -> Result<()> {
        self.send_data(
            addr,
            &Package::Version {
                addr_from: self.config.node_addr.clone(),
                version: NODE_VERSION,
                best_height,
            },
        )
    }

    fn send_get_blocks(&self, addr: &str) -> Result<()> {
        self.send_data(
            addr,
            &Package::GetBlocks {
                addr_from: self.config.node_addr.clone(),
            },
        )
    }

    fn send_get_data(&self, addr: &str, op_type: OpType, id: &[u8]) -> Result<()> {
        self.send_data(
            addr,
            &Package::GetData {
                addr_from: self.config.node_addr.clone(),
                op_type,
                id: id.to_vec(),
            },
        )
    }

    fn send_inv(&self, addr: &str, op_type: OpType, items: &[Vec<u8>]) -> Result<()> {
        self.send_data(
            addr,
            &Package::Inv {
                addr_from: self.config.node_addr.clone(),
                op_type,
                items: items.to_vec(),
            },
        )
    }

    fn send_block(&self, addr: &str, block: &Block) -> Result<()> {
        self.send_data(
            addr,
            &Package::Block {
                addr_from: self.config.node_addr.clone(),
                block: block.serialize()?,
            },
        )
    }

    pub fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<()> {
        self.send_data(addr, &tx_package(&self.config, tx)?)
    }

    // An unreachable peer is dropped from the known set; that is not an error.
    fn send_data(&self, addr: &str, pkg: &Package) -> Result<()> {
        debug!("Sending {} to {addr}", pkg.command());
        let frame = pkg.encode()?;
        let stream = match connect(addr, self.config.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("{addr} is not available, removing it from known nodes: {e}");
                self.state.known_nodes.evict_node(addr);
                return Ok(());
            }
        };
        write_frame(stream, &frame, self.config.connect_timeout)
    }
}

/// Sends one transaction to `addr` without running a node, as the CLI does.
pub fn send_tx(config: &Config, addr: &str, tx: &Transaction) -> Result<()> {
    let frame = tx_package(config, tx)?.encode()?;
    let stream = connect(addr, config.connect_timeout)?;
    write_frame(stream, &frame, config.connect_timeout)?;
    info!(
        "Sent transaction {} to {addr}",
        HEXLOWER.encode(tx.get_id())
    );
    Ok(())
}

fn tx_package(config: &Config, tx: &Transaction) -> Result<Package> {
    Ok(Package::Tx {
        addr_from: config.node_addr.clone(),
        transaction: tx.serialize()?,
    })
}

fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let mut last_err = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(BlockchainError::Network(match last_err {
        Some(e) => format!("Failed to connect to {addr}: {e}"),
        None => format!("No socket address for {addr}"),
    }))
}

// The write half is closed after the frame so the peer's read ends.
fn write_frame(mut stream: TcpStream, frame: &[u8], timeout: Duration) -> Result<()> {
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(frame)?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)?;
    Ok(())
}

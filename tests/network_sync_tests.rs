//! Network sync tests
//!
//! Real nodes on loopback sockets, each with its own database.

use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::tempdir;
use utxo_chain::{
    hash_pub_key, send_tx, Blockchain, Config, Server, Transaction, UTXOSet, Wallet,
    GENESIS_COINBASE_DATA,
};

const SYNC_TIMEOUT: Duration = Duration::from_secs(60);

fn bind_loopback() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn node_config(node_id: &str, node_addr: &str, bootstrap_addr: &str) -> Config {
    let mut config = Config::for_node(node_id);
    config.node_addr = node_addr.to_string();
    config.bootstrap_addr = bootstrap_addr.to_string();
    config.connect_timeout = Duration::from_secs(2);
    config.read_timeout = Duration::from_secs(10);
    config
}

fn run_node(server: &Server, listener: TcpListener) {
    let server = server.clone();
    thread::spawn(move || server.serve(listener));
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < SYNC_TIMEOUT {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn test_lagging_node_catches_up() {
    let dir = tempdir().unwrap();
    let owner = Wallet::new().unwrap();
    let owner_hash = hash_pub_key(owner.get_public_key());

    // node A: genesis plus five mined blocks
    let genesis_tx =
        Transaction::new_coinbase_tx(&owner_hash, GENESIS_COINBASE_DATA.as_bytes()).unwrap();
    let chain_a = Blockchain::create_genesis(dir.path().join("node_a"), &genesis_tx).unwrap();
    let mut mined = vec![];
    for _ in 0..5 {
        let coinbase = Transaction::new_coinbase_tx(&owner_hash, &[]).unwrap();
        mined.push(chain_a.mine_block(&[coinbase]).unwrap());
    }
    UTXOSet::new(chain_a.clone()).reindex().unwrap();
    assert_eq!(chain_a.get_best_height().unwrap(), 5);

    // node B: the same genesis and the first two blocks
    let genesis = chain_a
        .get_block(chain_a.get_block_hashes().unwrap().last().unwrap())
        .unwrap();
    let chain_b = Blockchain::with_genesis_block(dir.path().join("node_b"), &genesis).unwrap();
    chain_b.add_block(&mined[0]).unwrap();
    chain_b.add_block(&mined[1]).unwrap();
    assert_eq!(chain_b.get_best_height().unwrap(), 2);

    let (listener_a, addr_a) = bind_loopback();
    let (listener_b, addr_b) = bind_loopback();
    let server_a = Server::new(node_config("a", &addr_a, &addr_a), chain_a.clone());
    let server_b = Server::new(node_config("b", &addr_b, &addr_a), chain_b.clone());
    run_node(&server_a, listener_a);
    run_node(&server_b, listener_b);

    server_b.announce().unwrap();

    let utxo_b = UTXOSet::new(chain_b.clone());
    let synced = wait_until(|| {
        chain_b.get_best_height().unwrap() == 5 && utxo_b.count_transactions().unwrap() == 6
    });
    assert!(synced, "node B did not catch up with node A");

    assert_eq!(
        chain_b.get_tip_hash().unwrap(),
        chain_a.get_tip_hash().unwrap()
    );
    assert_eq!(
        chain_b.get_block_hashes().unwrap(),
        chain_a.get_block_hashes().unwrap()
    );
    assert_eq!(utxo_b.get_balance(&owner_hash).unwrap(), 60);

    // A learned about B from its version message
    assert!(server_a.known_nodes().node_is_known(&addr_b));
}

#[test]
fn test_miner_mines_submitted_transaction() {
    let dir = tempdir().unwrap();
    let x = Wallet::new().unwrap();
    let y = Wallet::new().unwrap();
    let miner = Wallet::new().unwrap();
    let x_hash = hash_pub_key(x.get_public_key());
    let y_hash = hash_pub_key(y.get_public_key());

    let genesis_tx =
        Transaction::new_coinbase_tx(&x_hash, GENESIS_COINBASE_DATA.as_bytes()).unwrap();
    let chain = Blockchain::create_genesis(dir.path().join("miner"), &genesis_tx).unwrap();
    let utxo_set = UTXOSet::new(chain.clone());
    utxo_set.reindex().unwrap();

    // the bootstrap node is gone; the miner works alone
    let (gone, gone_addr) = bind_loopback();
    drop(gone);
    let (listener, miner_addr) = bind_loopback();
    let mut config = node_config("miner", &miner_addr, &gone_addr);
    config.mining_addr = Some(miner.get_address());
    config.mempool_threshold = 1;
    let server = Server::new(config, chain.clone());
    run_node(&server, listener);

    let tx = Transaction::new_utxo_transaction(&x, &y_hash, 4, &utxo_set).unwrap();
    let client = node_config("client", "127.0.0.1:0", &miner_addr);
    send_tx(&client, &miner_addr, &tx).unwrap();

    let miner_hash = hash_pub_key(miner.get_public_key());
    let mined = wait_until(|| {
        chain.get_best_height().unwrap() == 1 && utxo_set.get_balance(&miner_hash).unwrap() == 10
    });
    assert!(mined, "miner did not mine the submitted transaction");

    assert_eq!(utxo_set.get_balance(&x_hash).unwrap(), 6);
    assert_eq!(utxo_set.get_balance(&y_hash).unwrap(), 4);
    assert!(wait_until(|| server.mempool().is_empty()));
}

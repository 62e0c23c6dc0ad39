// Entry point for the node and wallet CLI
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, LevelFilter};
use std::process;
use utxo_chain::{
    address_to_pub_key_hash, send_tx, validate_address, Blockchain, Command, Config, Opt,
    ProofOfWork, Server, Transaction, UTXOSet, Wallets, GENESIS_COINBASE_DATA,
};

fn main() {
    // Info by default, RUST_LOG still wins
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn parse_address(address: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if !validate_address(address) {
        return Err(format!("Invalid address: {address}").into());
    }
    Ok(address_to_pub_key_hash(address)?)
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(opt.config.as_deref())?;

    match opt.command {
        Command::Createblockchain { address } => {
            let pub_key_hash = parse_address(&address)?;
            let coinbase_tx =
                Transaction::new_coinbase_tx(&pub_key_hash, GENESIS_COINBASE_DATA.as_bytes())?;
            let blockchain = Blockchain::create_genesis(config.db_path(), &coinbase_tx)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(config.wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = parse_address(&address)?;
            let blockchain = Blockchain::open(config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(config.wallet_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            let from_hash = parse_address(&from)?;
            let to_hash = parse_address(&to)?;

            let wallets = Wallets::load(config.wallet_path())?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No wallet for {from} on this node"))?;

            let blockchain = Blockchain::open(config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction =
                Transaction::new_utxo_transaction(wallet, &to_hash, amount, &utxo_set)?;

            if mine {
                let coinbase_tx = Transaction::new_coinbase_tx(&from_hash, &[])?;
                let block = blockchain.mine_block(&[coinbase_tx, transaction])?;
                utxo_set.update(&block)?;
            } else {
                send_tx(&config, &config.bootstrap_addr, &transaction)?;
            }
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = Blockchain::open(config.db_path())?;
            for block in blockchain.iterator()? {
                let block = block?;
                println!(
                    "============ Block {} ============",
                    HEXLOWER.encode(block.get_hash())
                );
                println!("Height: {}", block.get_height());
                println!("Prev. block: {}", HEXLOWER.encode(block.get_pre_block_hash()));
                println!("PoW: {}", ProofOfWork::validate(&block));
                for tx in block.get_transactions() {
                    print!("{tx}");
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = Blockchain::open(config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            if let Some(addr) = miner {
                parse_address(&addr)?;
                println!("Mining is on. Address to receive rewards: {addr}");
                config.mining_addr = Some(addr);
            } else if let Some(addr) = &config.mining_addr {
                parse_address(addr)?;
            }

            info!("Starting node {}", config.node_id);
            let blockchain = Blockchain::open(config.db_path()).map_err(|e| {
                format!(
                    "No blockchain found for node {} ({e}). Use 'createblockchain' first or copy a genesis database.",
                    config.node_id
                )
            })?;
            let server = Server::new(config, blockchain);
            server.start().map_err(|e| format!("Server error: {e}"))?
        }
    }
    Ok(())
}

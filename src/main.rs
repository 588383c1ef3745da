use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use data_encoding::HEXLOWER;
use tinycoin::network::operations::submit_transaction;
use tinycoin::{
    convert_address, hash_pub_key, pub_key_hash_from_address, Blockchain, CancelFlag, CoinError,
    NodeContext, Result, Server, Transaction, UTXOSet, WalletAddress, Wallets, CENTRAL_NODE,
    GLOBAL_CONFIG,
};
use tracing::info;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
};

#[derive(Debug, Parser)]
#[command(name = "tinycoin", about = "A minimal peer-to-peer proof-of-work cryptocurrency node")]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        name = "createblockchain",
        about = "Create a new blockchain and mine its genesis block"
    )]
    CreateBlockchain {
        #[arg(long, help = "The address the genesis subsidy is paid to")]
        address: WalletAddress,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    CreateWallet,
    #[command(name = "getbalance", about = "Get the balance of an address")]
    GetBalance {
        #[arg(long, help = "The wallet address to query")]
        address: WalletAddress,
    },
    #[command(name = "listaddresses", about = "Print every local wallet address")]
    ListAddresses,
    #[command(name = "printchain", about = "Print all blocks, tip first")]
    PrintChain,
    #[command(name = "reindexutxo", about = "Rebuild the UTXO index from the chain")]
    ReindexUtxo,
    #[command(name = "send", about = "Transfer coins between addresses")]
    Send {
        #[arg(long, help = "Source wallet address")]
        from: WalletAddress,
        #[arg(long, help = "Destination wallet address")]
        to: WalletAddress,
        #[arg(long, help = "Amount to send")]
        amount: i64,
        #[arg(long, help = "Mine the transfer immediately on this node")]
        mine: bool,
    },
    #[command(name = "startnode", about = "Start a node")]
    StartNode {
        #[arg(long, help = "Enable mining and send rewards to this address")]
        miner: Option<WalletAddress>,
    },
}

fn initialize_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .init();
}

async fn create_blockchain(address: WalletAddress) -> Result<()> {
    let blockchain = Blockchain::create(GLOBAL_CONFIG.get_data_dir(), &address).await?;
    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().await?;
    println!("Done!");
    Ok(())
}

fn create_wallet() -> Result<()> {
    let mut wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
    let address = wallets.create_wallet()?;
    println!("Your new address: {}", address);
    Ok(())
}

fn list_addresses() -> Result<()> {
    let wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
    for address in wallets.get_addresses() {
        println!("{}", address);
    }
    Ok(())
}

async fn get_balance(address: WalletAddress) -> Result<()> {
    let blockchain = Blockchain::open(GLOBAL_CONFIG.get_data_dir()).await?;
    let utxo_set = UTXOSet::new(blockchain);
    let pub_key_hash = pub_key_hash_from_address(&address)?;
    let balance: i64 = utxo_set
        .find_utxo(pub_key_hash.as_slice())
        .await?
        .iter()
        .map(|out| out.get_value())
        .sum();
    println!("Balance of {}: {}", address, balance);
    Ok(())
}

async fn send(from: WalletAddress, to: WalletAddress, amount: i64, mine: bool) -> Result<()> {
    let blockchain = Blockchain::open(GLOBAL_CONFIG.get_data_dir()).await?;
    let utxo_set = UTXOSet::new(blockchain.clone());
    let wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
    let wallet = wallets
        .get_wallet(&from)
        .ok_or_else(|| CoinError::NotFound(format!("wallet for address {}", from)))?;

    let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set).await?;
    if mine {
        let coinbase_tx = Transaction::new_coinbase_tx(&from, "")?;
        let block = blockchain
            .mine_block(&[transaction, coinbase_tx], &CancelFlag::new())
            .await?;
        utxo_set.update(&block).await?;
    } else {
        submit_transaction(CENTRAL_NODE, GLOBAL_CONFIG.get_node_addr(), &transaction).await?;
    }
    println!("Success!");
    Ok(())
}

fn print_transaction(tx: &Transaction) {
    println!("- Transaction {}", tx.get_tx_id_hex());
    if !tx.is_coinbase() {
        for input in tx.get_vin() {
            let address = convert_address(hash_pub_key(input.get_pub_key()).as_slice());
            println!(
                "-- Input txid = {}, vout = {}, from = {}",
                input.get_input_tx_id_hex(),
                input.get_vout(),
                address
            );
        }
    }
    for output in tx.get_vout() {
        let address = convert_address(output.get_pub_key_hash());
        println!("-- Output value = {}, to = {}", output.get_value(), address);
    }
}

async fn print_chain() -> Result<()> {
    let blockchain = Blockchain::open(GLOBAL_CONFIG.get_data_dir()).await?;
    let mut iterator = blockchain.iterator().await?;
    while let Some(block) = iterator.next()? {
        println!("Pre block hash: {}", HEXLOWER.encode(block.get_prev_block_hash()));
        println!("Cur block hash: {}", block.get_hash_hex());
        println!("Cur block timestamp: {}", block.get_timestamp());
        println!("Height: {}", block.get_height());
        for tx in block.get_transactions() {
            print_transaction(tx);
        }
        println!();
    }
    Ok(())
}

async fn reindex_utxo() -> Result<()> {
    let blockchain = Blockchain::open(GLOBAL_CONFIG.get_data_dir()).await?;
    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().await?;
    let count = utxo_set.count_transactions().await?;
    println!("Done! There are {} transactions in the UTXO set.", count);
    Ok(())
}

async fn start_node(miner: Option<WalletAddress>) -> Result<()> {
    let data_dir = GLOBAL_CONFIG.get_data_dir();
    let blockchain = match Blockchain::open(&data_dir).await {
        Ok(blockchain) => blockchain,
        Err(CoinError::NotFound(_)) => {
            info!("no local chain yet, starting empty and syncing from the network");
            Blockchain::open_or_empty(&data_dir).await?
        }
        Err(e) => return Err(e),
    };
    if let Some(mining_address) = &miner {
        println!("Mining is on. Address to receive rewards: {}", mining_address);
    }
    let node = NodeContext::new(blockchain, GLOBAL_CONFIG.get_node_addr(), miner);
    Server::new(node).run().await
}

async fn process_command(command: Command) -> Result<()> {
    match command {
        Command::CreateBlockchain { address } => create_blockchain(address).await,
        Command::CreateWallet => create_wallet(),
        Command::GetBalance { address } => get_balance(address).await,
        Command::ListAddresses => list_addresses(),
        Command::PrintChain => print_chain().await,
        Command::ReindexUtxo => reindex_utxo().await,
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => send(from, to, amount, mine).await,
        Command::StartNode { miner } => start_node(miner).await,
    }
}

#[tokio::main]
async fn main() {
    initialize_logging();

    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = e.print();
                std::process::exit(0);
            }
            _ => {
                let _ = e.print();
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = process_command(opt.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }
}

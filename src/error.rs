use std::net::SocketAddr;
use thiserror::Error;

#[derive(Clone, Error, Debug)]
pub enum CoinError {
    // Consensus errors
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("not enough funds: accumulated {accumulated}, requested {requested}")]
    InsufficientFunds { accumulated: i64, requested: i64 },
    #[error("referenced transaction {0} not found")]
    DanglingReference(String),
    #[error("bad signature")]
    BadSignature,
    #[error("mining interrupted: {0}")]
    MiningInterrupted(String),

    #[error("not found: {0}")]
    NotFound(String),

    // Persistence errors
    #[error("store error: {0}")]
    Store(String),
    #[error("block serialization error: {0}")]
    BlockSerialization(String),
    #[error("block deserialization error: {0}")]
    BlockDeserialization(String),
    #[error("transaction serialization error: {0}")]
    TransactionSerialization(String),
    #[error("transaction deserialization error: {0}")]
    TransactionDeserialization(String),

    // Network errors
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("peer {0} is unreachable")]
    PeerUnreachable(SocketAddr),
    #[error("network error: {0}")]
    Network(String),

    // Wallet errors
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("address decoding error: {0}")]
    AddressDecoding(String),
    #[error("wallet key error: {0}")]
    WalletKey(String),
    #[error("wallet file error: {0}")]
    WalletFile(String),
}

impl From<sled::Error> for CoinError {
    fn from(err: sled::Error) -> Self {
        CoinError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoinError>;

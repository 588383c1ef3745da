//! Wire format. Every TCP connection carries exactly one message: a 12-byte
//! ASCII command, right-padded with NUL, followed by the bincode payload of
//! that command's record. The command field alone decides how the payload is
//! decoded.

use crate::error::{CoinError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub const COMMAND_LENGTH: usize = 12;

pub const NODE_VERSION: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    Block,
    Tx,
}

/// One protocol message, command plus payload record.
#[derive(Debug)]
pub enum Package {
    Version {
        addr_from: SocketAddr,
        version: usize,
        best_height: usize,
    },
    Addr {
        addr_list: Vec<SocketAddr>,
    },
    GetBlocks {
        addr_from: SocketAddr,
    },
    Inv {
        addr_from: SocketAddr,
        op_type: OpType,
        items: Vec<Vec<u8>>,
    },
    GetData {
        addr_from: SocketAddr,
        op_type: OpType,
        id: Vec<u8>,
    },
    Block {
        addr_from: SocketAddr,
        block: Vec<u8>,
    },
    Tx {
        addr_from: SocketAddr,
        transaction: Vec<u8>,
    },
}

impl Package {
    pub fn command(&self) -> &'static str {
        match self {
            Package::Version { .. } => "version",
            Package::Addr { .. } => "addr",
            Package::GetBlocks { .. } => "getblocks",
            Package::Inv { .. } => "inv",
            Package::GetData { .. } => "getdata",
            Package::Block { .. } => "block",
            Package::Tx { .. } => "tx",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Package::Version {
                addr_from,
                version,
                best_height,
            } => encode(&(addr_from, version, best_height))?,
            Package::Addr { addr_list } => encode(addr_list)?,
            Package::GetBlocks { addr_from } => encode(addr_from)?,
            Package::Inv {
                addr_from,
                op_type,
                items,
            } => encode(&(addr_from, op_type, items))?,
            Package::GetData {
                addr_from,
                op_type,
                id,
            } => encode(&(addr_from, op_type, id))?,
            Package::Block { addr_from, block } => encode(&(addr_from, block))?,
            Package::Tx {
                addr_from,
                transaction,
            } => encode(&(addr_from, transaction))?,
        };
        let mut bytes = command_to_bytes(self.command()).to_vec();
        bytes.extend(payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Package> {
        if bytes.len() < COMMAND_LENGTH {
            return Err(CoinError::Protocol(format!(
                "message of {} bytes is shorter than the command field",
                bytes.len()
            )));
        }
        let command = bytes_to_command(&bytes[..COMMAND_LENGTH])?;
        let payload = &bytes[COMMAND_LENGTH..];
        match command.as_str() {
            "version" => {
                let (addr_from, version, best_height) = decode(payload)?;
                Ok(Package::Version {
                    addr_from,
                    version,
                    best_height,
                })
            }
            "addr" => {
                let addr_list = decode(payload)?;
                Ok(Package::Addr { addr_list })
            }
            "getblocks" => {
                let addr_from = decode(payload)?;
                Ok(Package::GetBlocks { addr_from })
            }
            "inv" => {
                let (addr_from, op_type, items) = decode(payload)?;
                Ok(Package::Inv {
                    addr_from,
                    op_type,
                    items,
                })
            }
            "getdata" => {
                let (addr_from, op_type, id) = decode(payload)?;
                Ok(Package::GetData {
                    addr_from,
                    op_type,
                    id,
                })
            }
            "block" => {
                let (addr_from, block) = decode(payload)?;
                Ok(Package::Block { addr_from, block })
            }
            "tx" => {
                let (addr_from, transaction) = decode(payload)?;
                Ok(Package::Tx {
                    addr_from,
                    transaction,
                })
            }
            unknown => Err(CoinError::Protocol(format!("unknown command {:?}", unknown))),
        }
    }
}

fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    debug_assert!(command.len() <= COMMAND_LENGTH);
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let trimmed: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0x00).collect();
    String::from_utf8(trimmed)
        .ok()
        .filter(|command| command.is_ascii())
        .ok_or_else(|| CoinError::Protocol("command field is not ASCII".to_string()))
}

fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| CoinError::Protocol(e.to_string()))
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| CoinError::Protocol(format!("malformed payload: {}", e)))
        .map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn addr() -> SocketAddr {
        SocketAddr::from_str("127.0.0.1:3000").expect("parse failed")
    }

    #[test]
    fn command_field_is_nul_padded_ascii() {
        let pkg = Package::Version {
            addr_from: addr(),
            version: NODE_VERSION,
            best_height: 7,
        };
        let bytes = pkg.to_bytes().expect("encode failed");

        assert_eq!(&bytes[..7], b"version");
        assert_eq!(&bytes[7..COMMAND_LENGTH], &[0u8; 5]);
    }

    #[test]
    fn round_trip_every_command() {
        let packages = vec![
            Package::Version {
                addr_from: addr(),
                version: NODE_VERSION,
                best_height: 42,
            },
            Package::Addr {
                addr_list: vec![addr()],
            },
            Package::GetBlocks { addr_from: addr() },
            Package::Inv {
                addr_from: addr(),
                op_type: OpType::Block,
                items: vec![vec![1u8; 32], vec![2u8; 32]],
            },
            Package::GetData {
                addr_from: addr(),
                op_type: OpType::Tx,
                id: vec![3u8; 32],
            },
            Package::Block {
                addr_from: addr(),
                block: vec![9, 8, 7],
            },
            Package::Tx {
                addr_from: addr(),
                transaction: vec![4, 5, 6],
            },
        ];

        for pkg in packages {
            let bytes = pkg.to_bytes().expect("encode failed");
            let decoded = Package::from_bytes(bytes.as_slice()).expect("decode failed");
            assert_eq!(decoded.command(), pkg.command());
            assert_eq!(
                decoded.to_bytes().expect("re-encode failed"),
                bytes,
                "{} does not round-trip",
                pkg.command()
            );
        }
    }

    #[test]
    fn unknown_command_is_a_protocol_error() {
        let mut bytes = [0u8; COMMAND_LENGTH].to_vec();
        bytes[..5].copy_from_slice(b"bogus");
        assert!(matches!(
            Package::from_bytes(bytes.as_slice()),
            Err(CoinError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_message_is_a_protocol_error() {
        assert!(matches!(
            Package::from_bytes(b"ver"),
            Err(CoinError::Protocol(_))
        ));

        // valid command, payload cut short
        let pkg = Package::Block {
            addr_from: addr(),
            block: vec![1u8; 64],
        };
        let bytes = pkg.to_bytes().expect("encode failed");
        assert!(matches!(
            Package::from_bytes(&bytes[..bytes.len() - 10]),
            Err(CoinError::Protocol(_))
        ));
    }
}

pub mod message;
pub mod operations;
pub mod server;

pub use message::{OpType, Package, COMMAND_LENGTH, NODE_VERSION};
pub use server::{Server, CENTRAL_NODE};

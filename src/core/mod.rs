pub mod block;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use merkle::merkle_root;
pub use proof_of_work::{CancelFlag, ProofOfWork};
pub use transaction::{TXInput, TXOutput, Transaction, SUBSIDY};

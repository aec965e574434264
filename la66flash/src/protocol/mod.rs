//! Protocol implementations.

pub mod at;
pub mod xmodem;

// Re-export common types
pub use at::{AtResponse, AtSession, AtStatus};
pub use xmodem::{
    Block, TransferResult, TransferState, XmodemConfig, XmodemSender, checksum,
};

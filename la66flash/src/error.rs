//! Error types for la66flash.

use std::io;
use thiserror::Error;

/// Result type for la66flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for la66flash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No usable serial device was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// The background reader stopped; the port is gone or was closed.
    #[error("Serial link closed")]
    LinkClosed,

    /// Gateway EUI could not be parsed.
    #[error("Invalid gateway EUI '{0}': expected 16 hex characters")]
    InvalidEui(String),

    /// An AT command step failed.
    #[error("{step} failed: {reason}")]
    AtCommand {
        /// Command that failed, e.g. `AT+SAVE`.
        step: String,
        /// What went wrong.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// XModem transfer error.
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

/// Terminal failure reasons of an XModem transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The bootloader never answered the `C` probe within the handshake window.
    #[error("handshake timeout: no 'C' or NAK from bootloader")]
    HandshakeTimeout,

    /// A block was not acknowledged within the retry budget.
    #[error("block {sequence} not acknowledged after {attempts} attempts")]
    BlockRetriesExhausted {
        /// Sequence number of the failing block.
        sequence: u8,
        /// Number of transmissions made.
        attempts: u32,
    },

    /// The receiver sent CAN.
    #[error("transfer cancelled by receiver{}", at_block(.sequence))]
    Cancelled {
        /// Sequence number of the block in flight; `None` outside the data phase.
        sequence: Option<u8>,
    },

    /// The firmware source failed while reading (not end of data).
    #[error("firmware read error: {0}")]
    SourceRead(#[source] io::Error),

    /// All data was delivered but the final EOT was never acknowledged.
    #[error("data delivered, but EOT was never acknowledged")]
    FinalAckUnconfirmed,

    /// The serial link itself failed.
    #[error("serial link error: {0}")]
    Link(#[source] io::Error),
}

#[allow(clippy::ref_option)]
fn at_block(sequence: &Option<u8>) -> String {
    sequence.map_or_else(String::new, |seq| format!(" at block {seq}"))
}

impl TransferError {
    /// Whether this error still means the payload was fully sent.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::FinalAckUnconfirmed)
    }
}

impl From<Error> for TransferError {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => Self::Link(e),
            Error::Transfer(e) => e,
            other => Self::Link(io::Error::other(other.to_string())),
        }
    }
}

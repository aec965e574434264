//! XModem (checksum variant) sender for the LA66 bootloader.
//!
//! ## Protocol Overview
//!
//! Data is sent in 128-byte blocks, each guarded by an 8-bit sum:
//!
//! ```text
//! Block format:
//! +-----+-----+------+--------------+----------+
//! | SOH | SEQ | ~SEQ |  DATA (128)  | CHECKSUM |
//! +-----+-----+------+--------------+----------+
//! | 1   | 1   | 1    |     128      |    1     |
//! +-----+-----+------+--------------+----------+
//! ```
//!
//! The sender opens with a burst of `C` (CRC mode request). The LA66
//! bootloader answers `C` or `NAK` but in both cases only validates the
//! plain checksum, so blocks are always framed in checksum mode.
//!
//! ## Session flow
//!
//! ```text
//! sender                      bootloader
//!   | --- C C C C ------------->  |   handshake (repeated, 10 s window)
//!   | <-------------- C / NAK --- |
//!   | --- SOH 01 FE data sum -->  |   block 1
//!   | <-------------------- ACK - |
//!   |            ...              |
//!   | --- EOT ----------------->  |   end of transmission
//!   | <-------------------- ACK - |
//! ```

mod block;
mod handshake;
mod sender;

use std::time::Duration;

pub use block::{AttemptOutcome, BlockTransmitter, RetryReason};
pub use handshake::{Handshake, HandshakeState, ProbeReply};
pub use sender::{TransferResult, TransferState, XmodemSender};

/// XModem control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
    /// Filler for the unused tail of the last block (CP/M EOF).
    pub const PAD: u8 = 0x1A;
}

/// Payload bytes per block.
pub const BLOCK_SIZE: usize = 128;

/// Bytes on the wire per block: header (3) + payload + checksum (1).
pub const PACKET_SIZE: usize = 3 + BLOCK_SIZE + 1;

/// Timing and retry settings of a transfer.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// Total time to keep probing for the bootloader.
    pub handshake_window: Duration,
    /// Wait for a reply after each probe burst.
    pub probe_timeout: Duration,
    /// Number of `C` bytes per probe burst.
    pub probe_burst: usize,
    /// Wait for the reply to a data block.
    pub block_timeout: Duration,
    /// Transmissions per block before giving up.
    pub max_retries: u32,
    /// Wait for the reply to EOT.
    pub eot_timeout: Duration,
    /// EOT transmissions before giving up.
    pub eot_retries: u32,
    /// Pause between unanswered EOTs.
    pub eot_retry_delay: Duration,
    /// Quiet period that ends a buffer flush.
    pub flush_timeout: Duration,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            handshake_window: Duration::from_secs(10),
            probe_timeout: Duration::from_millis(1500),
            probe_burst: 4,
            block_timeout: Duration::from_secs(5),
            max_retries: 10,
            eot_timeout: Duration::from_secs(5),
            eot_retries: 10,
            eot_retry_delay: Duration::from_millis(500),
            flush_timeout: Duration::from_millis(100),
        }
    }
}

/// 8-bit checksum: sum of all bytes, modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// One data block, padded to [`BLOCK_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    sequence: u8,
    payload: [u8; BLOCK_SIZE],
    data_len: usize,
}

impl Block {
    /// Build a block from up to [`BLOCK_SIZE`] bytes of data.
    ///
    /// Short chunks are padded with [`control::PAD`]. Anything beyond
    /// `BLOCK_SIZE` is ignored.
    pub fn new(sequence: u8, chunk: &[u8]) -> Self {
        let data_len = chunk.len().min(BLOCK_SIZE);
        let mut payload = [control::PAD; BLOCK_SIZE];
        payload[..data_len].copy_from_slice(&chunk[..data_len]);

        Self {
            sequence,
            payload,
            data_len,
        }
    }

    /// Block sequence number.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// The full, padded payload.
    pub fn payload(&self) -> &[u8; BLOCK_SIZE] {
        &self.payload
    }

    /// Number of real (unpadded) data bytes.
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Checksum over the padded payload.
    pub fn checksum(&self) -> u8 {
        checksum(&self.payload)
    }

    /// Serialize to the wire format.
    pub fn to_packet(&self) -> [u8; PACKET_SIZE] {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = control::SOH;
        packet[1] = self.sequence;
        packet[2] = !self.sequence;
        packet[3..3 + BLOCK_SIZE].copy_from_slice(&self.payload);
        packet[PACKET_SIZE - 1] = self.checksum();
        packet
    }
}

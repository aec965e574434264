//! Single-block send/acknowledge cycle.

use super::{Block, XmodemConfig, control};
use crate::error::TransferError;
use crate::port::{Port, Reader};
use log::{debug, trace};
use std::fmt;

/// Why an attempt has to be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Receiver rejected the block.
    Nak,
    /// Receiver answered with something that is not a control reply.
    Unexpected(u8),
    /// No answer before the block timeout.
    Timeout,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nak => write!(f, "NAK received"),
            Self::Unexpected(b) => write!(f, "unexpected response 0x{b:02X}"),
            Self::Timeout => write!(f, "timeout waiting for ACK"),
        }
    }
}

/// Result of one transmission of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// `ACK` received.
    Acknowledged,
    /// Send the same block again.
    Retry(RetryReason),
    /// `CAN` received; stop everything.
    Cancelled,
}

/// Sends blocks over a port and interprets the replies.
pub struct BlockTransmitter<'a, P: Port + ?Sized> {
    port: &'a mut P,
    reader: &'a mut Reader,
    config: &'a XmodemConfig,
}

impl<'a, P: Port + ?Sized> BlockTransmitter<'a, P> {
    /// Borrow the port, its reader and the timing settings.
    pub fn new(port: &'a mut P, reader: &'a mut Reader, config: &'a XmodemConfig) -> Self {
        Self {
            port,
            reader,
            config,
        }
    }

    /// Transmit `packet` once and classify the reply.
    ///
    /// Stray input is flushed before a retry is reported, so a reply that
    /// arrives after the timeout can't be taken for the answer to the next
    /// transmission.
    pub fn attempt(&mut self, packet: &[u8]) -> Result<AttemptOutcome, TransferError> {
        self.port.write_all_bytes(packet)?;

        let outcome = match self.reader.read_byte(self.config.block_timeout)? {
            Some(control::ACK) => return Ok(AttemptOutcome::Acknowledged),
            Some(control::CAN) => return Ok(AttemptOutcome::Cancelled),
            Some(control::NAK) => AttemptOutcome::Retry(RetryReason::Nak),
            Some(other) => AttemptOutcome::Retry(RetryReason::Unexpected(other)),
            None => AttemptOutcome::Retry(RetryReason::Timeout),
        };

        self.reader.flush(self.config.flush_timeout)?;
        Ok(outcome)
    }

    /// Send `block` until it is acknowledged.
    ///
    /// Returns the number of real data bytes the receiver accepted.
    pub fn send(&mut self, block: &Block) -> Result<usize, TransferError> {
        let packet = block.to_packet();
        let sequence = block.sequence();

        for attempt in 1..=self.config.max_retries {
            trace!("Sending block {sequence} (attempt {attempt})");

            match self.attempt(&packet)? {
                AttemptOutcome::Acknowledged => {
                    trace!("Block {sequence} ACKed");
                    return Ok(block.data_len());
                },
                AttemptOutcome::Cancelled => {
                    debug!("Receiver cancelled during block {sequence}");
                    return Err(TransferError::Cancelled {
                        sequence: Some(sequence),
                    });
                },
                AttemptOutcome::Retry(reason) => {
                    debug!(
                        "Block {sequence}: {reason}, retrying ({attempt}/{})",
                        self.config.max_retries
                    );
                },
            }
        }

        Err(TransferError::BlockRetriesExhausted {
            sequence,
            attempts: self.config.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockLink, Reply};
    use crate::protocol::xmodem::test_support::fast_config;

    fn send(link: &mut MockLink, block: &Block) -> Result<usize, TransferError> {
        let mut reader = Reader::for_port(&*link).unwrap();
        let config = fast_config();
        BlockTransmitter::new(link, &mut reader, &config).send(block)
    }

    #[test]
    fn test_ack_returns_real_length() {
        let mut link = MockLink::new([Reply::now(&[control::ACK])]);
        let block = Block::new(1, &[0x55; 10]);

        assert_eq!(send(&mut link, &block).unwrap(), 10);
        assert_eq!(link.writes(), vec![block.to_packet().to_vec()]);
    }

    #[test]
    fn test_nak_resends_identical_packet_once() {
        let mut link = MockLink::new([Reply::now(&[control::NAK]), Reply::now(&[control::ACK])]);
        let block = Block::new(7, &[0x01; 128]);

        assert_eq!(send(&mut link, &block).unwrap(), 128);
        let writes = link.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], writes[1]);
        assert_eq!(writes[1][1], 7);
    }

    #[test]
    fn test_unexpected_byte_flushes_junk_and_retries() {
        // Garbage plus trailing noise; the noise must not be read as the
        // reply to the retransmission.
        let mut link = MockLink::new([
            Reply::now(&[b'x', control::NAK, control::NAK]),
            Reply::now(&[control::ACK]),
        ]);
        let block = Block::new(1, &[0x02; 5]);

        assert_eq!(send(&mut link, &block).unwrap(), 5);
        assert_eq!(link.writes().len(), 2);
    }

    #[test]
    fn test_timeout_retries_then_exhausts() {
        let mut link = MockLink::new([]);
        let block = Block::new(9, &[0x03; 128]);

        let err = send(&mut link, &block).unwrap_err();
        assert!(matches!(
            err,
            TransferError::BlockRetriesExhausted {
                sequence: 9,
                attempts: 3
            }
        ));
        assert_eq!(link.writes().len(), 3);
    }

    #[test]
    fn test_cancel_stops_without_further_writes() {
        let mut link = MockLink::new([Reply::now(&[control::NAK]), Reply::now(&[control::CAN])]);
        let block = Block::new(4, &[0x04; 128]);

        let err = send(&mut link, &block).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Cancelled { sequence: Some(4) }
        ));
        assert_eq!(link.writes().len(), 2);
    }

    #[test]
    fn test_late_reply_to_timed_out_attempt_is_not_reused() {
        // Attempt 1: NAK arrives 150 ms later, after the 100 ms block timeout.
        // Attempt 2: immediate ACK. Without the flush the stale NAK would be
        // read as the answer to attempt 2 and force a third transmission.
        let mut link = MockLink::new([
            Reply::after(std::time::Duration::from_millis(150), &[control::NAK]),
            Reply::now(&[control::ACK]),
        ]);
        let mut reader = Reader::for_port(&link).unwrap();
        let mut config = fast_config();
        config.flush_timeout = std::time::Duration::from_millis(100);
        let block = Block::new(1, &[0x10; 128]);

        let mut tx = BlockTransmitter::new(&mut link, &mut reader, &config);
        assert_eq!(
            tx.attempt(&block.to_packet()).unwrap(),
            AttemptOutcome::Retry(RetryReason::Timeout)
        );
        assert_eq!(
            tx.attempt(&block.to_packet()).unwrap(),
            AttemptOutcome::Acknowledged
        );
        assert_eq!(link.writes().len(), 2);
    }
}

//! Transfer orchestration: handshake, data blocks, EOT.

use super::{
    BLOCK_SIZE, Block, BlockTransmitter, Handshake, ProbeReply, XmodemConfig, control,
};
use crate::error::{Result, TransferError};
use crate::port::{Port, Reader};
use log::{debug, info, warn};
use std::io::{self, Read};
use std::thread;

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Nothing sent yet.
    Idle,
    /// Probing for the bootloader.
    Handshaking,
    /// Streaming data blocks.
    SendingBlocks,
    /// EOT sent, waiting for ACK.
    AwaitingFinalAck,
    /// All data delivered.
    Complete,
    /// Stopped before all data was delivered.
    Failed,
}

impl TransferState {
    /// Whether the transfer has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Outcome of [`XmodemSender::send`].
#[derive(Debug)]
pub struct TransferResult {
    /// Real (unpadded) data bytes acknowledged by the receiver.
    pub bytes_sent: usize,
    /// Data blocks acknowledged by the receiver.
    pub blocks_sent: usize,
    /// Final state, always terminal.
    pub state: TransferState,
    /// Reply to the handshake probe, if one arrived.
    pub probe_reply: Option<ProbeReply>,
    /// Failure reason, or the `FinalAckUnconfirmed` warning.
    pub error: Option<TransferError>,
}

impl TransferResult {
    /// True when the payload was fully delivered, even if EOT went unconfirmed.
    pub fn is_success(&self) -> bool {
        self.state == TransferState::Complete
    }

    /// Convert into a plain `Result`, treating the EOT warning as success.
    pub fn into_result(self) -> std::result::Result<usize, TransferError> {
        match self.error {
            Some(err) if !err.is_warning() => Err(err),
            _ => Ok(self.bytes_sent),
        }
    }
}

#[derive(Default)]
struct Tally {
    bytes: usize,
    blocks: usize,
    probe_reply: Option<ProbeReply>,
}

/// XModem sender.
///
/// Owns the port for the duration of the transfer. Reads are served by a
/// [`Reader`] started on a clone of the port's read handle.
pub struct XmodemSender<P: Port> {
    port: P,
    reader: Reader,
    config: XmodemConfig,
    state: TransferState,
}

impl<P: Port> XmodemSender<P> {
    /// Create a sender with the default bootloader timing.
    pub fn new(port: P) -> Result<Self> {
        Self::with_config(port, XmodemConfig::default())
    }

    /// Create a sender with custom timing.
    pub fn with_config(port: P, config: XmodemConfig) -> Result<Self> {
        let reader = Reader::for_port(&port)?;
        Ok(Self {
            port,
            reader,
            config,
            state: TransferState::Idle,
        })
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Timing settings in use.
    pub fn config(&self) -> &XmodemConfig {
        &self.config
    }

    /// Consume the sender and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Discard whatever the device printed so far.
    pub fn flush_input(&mut self) -> Result<usize> {
        self.port.clear_buffers()?;
        self.reader.flush(self.config.flush_timeout)
    }

    /// Upload everything `source` yields.
    ///
    /// `progress` is called with the running byte count after every
    /// acknowledged block. Each call starts a fresh session at block 1.
    pub fn send<R, F>(&mut self, mut source: R, mut progress: F) -> TransferResult
    where
        R: Read,
        F: FnMut(usize),
    {
        self.state = TransferState::Idle;
        let mut tally = Tally::default();

        let outcome = self.run(&mut source, &mut progress, &mut tally);

        let error = outcome.err();
        self.state = match &error {
            None => TransferState::Complete,
            Some(err) if err.is_warning() => TransferState::Complete,
            Some(_) => TransferState::Failed,
        };
        debug_assert!(self.state.is_terminal());

        match &error {
            None => info!("Transfer complete: {} bytes", tally.bytes),
            Some(err) if err.is_warning() => warn!("{err}"),
            Some(err) => warn!("Transfer failed after {} bytes: {err}", tally.bytes),
        }

        TransferResult {
            bytes_sent: tally.bytes,
            blocks_sent: tally.blocks,
            state: self.state,
            probe_reply: tally.probe_reply,
            error,
        }
    }

    fn run<R: Read>(
        &mut self,
        source: &mut R,
        progress: &mut dyn FnMut(usize),
        tally: &mut Tally,
    ) -> std::result::Result<(), TransferError> {
        self.state = TransferState::Handshaking;
        let reply = Handshake::new().run(&mut self.port, &mut self.reader, &self.config)?;
        tally.probe_reply = Some(reply);
        // Extra probe answers must not be taken as the reply to block 1.
        self.reader.flush(self.config.flush_timeout)?;

        self.state = TransferState::SendingBlocks;
        let mut chunk = [0u8; BLOCK_SIZE];
        let mut sequence: u8 = 1;

        loop {
            let n = read_chunk(source, &mut chunk).map_err(TransferError::SourceRead)?;
            if n == 0 {
                break;
            }

            let block = Block::new(sequence, &chunk[..n]);
            let accepted = BlockTransmitter::new(&mut self.port, &mut self.reader, &self.config)
                .send(&block)?;

            tally.bytes += accepted;
            tally.blocks += 1;
            debug!("Block {sequence} sent, total bytes: {}", tally.bytes);
            progress(tally.bytes);

            sequence = sequence.wrapping_add(1);
        }

        self.finish()
    }

    fn finish(&mut self) -> std::result::Result<(), TransferError> {
        self.state = TransferState::AwaitingFinalAck;
        debug!("Sending EOT");

        for attempt in 1..=self.config.eot_retries {
            self.port.write_all_bytes(&[control::EOT])?;

            match self.reader.read_byte(self.config.eot_timeout)? {
                Some(control::ACK) => {
                    debug!("EOT ACKed");
                    return Ok(());
                },
                Some(control::CAN) => {
                    return Err(TransferError::Cancelled { sequence: None });
                },
                Some(other) => debug!("EOT answered with 0x{other:02X} ({attempt})"),
                None => debug!("No answer to EOT ({attempt})"),
            }

            if attempt < self.config.eot_retries {
                thread::sleep(self.config.eot_retry_delay);
            }
        }

        Err(TransferError::FinalAckUnconfirmed)
    }
}

/// Fill `buf` from `source`; a short count only at end of data.
fn read_chunk<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

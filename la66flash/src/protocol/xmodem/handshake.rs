//! Opening handshake: probe with `C` until the bootloader answers.

use super::{XmodemConfig, control};
use crate::error::TransferError;
use crate::port::{Port, Reader};
use log::{debug, info, trace};
use std::time::Instant;

/// What the bootloader answered to the probe.
///
/// Either reply means the receiver is listening. Framing stays in checksum
/// mode regardless, since the LA66 bootloader only validates the sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReply {
    /// `C`: receiver asked for CRC mode.
    Crc,
    /// `NAK`: receiver asked for checksum mode.
    Checksum,
}

impl ProbeReply {
    /// The byte that was received.
    pub fn byte(self) -> u8 {
        match self {
            Self::Crc => control::C,
            Self::Checksum => control::NAK,
        }
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Not started.
    Idle,
    /// Sending probe bursts.
    Probing,
    /// Receiver answered.
    Negotiated(ProbeReply),
    /// Window expired without an answer.
    TimedOut,
    /// Receiver sent CAN.
    Cancelled,
}

/// Handshake negotiator.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    probes: u32,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Create an idle negotiator.
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            probes: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Number of probe bursts written so far.
    pub fn probes(&self) -> u32 {
        self.probes
    }

    /// Probe until the receiver answers or the window closes.
    pub fn run<P: Port + ?Sized>(
        &mut self,
        port: &mut P,
        reader: &mut Reader,
        config: &XmodemConfig,
    ) -> Result<ProbeReply, TransferError> {
        debug!("Starting handshake (sending 'C')...");
        self.state = HandshakeState::Probing;

        let burst = vec![control::C; config.probe_burst];
        let start = Instant::now();

        while start.elapsed() < config.handshake_window {
            port.write_all_bytes(&burst)?;
            self.probes += 1;

            let remaining = config
                .handshake_window
                .saturating_sub(start.elapsed());
            let probe_deadline = Instant::now() + config.probe_timeout.min(remaining);

            // Noise does not earn a new burst; wait out this probe first.
            while let Some(wait) = probe_deadline.checked_duration_since(Instant::now()) {
                let reply = match reader.read_byte(wait)? {
                    Some(control::C) => ProbeReply::Crc,
                    Some(control::NAK) => ProbeReply::Checksum,
                    Some(control::CAN) => {
                        self.state = HandshakeState::Cancelled;
                        return Err(TransferError::Cancelled { sequence: None });
                    },
                    Some(other) => {
                        trace!("Ignoring 0x{other:02X} during handshake");
                        continue;
                    },
                    None => break,
                };

                info!(
                    "Handshake successful, receiver ready (0x{:02X})",
                    reply.byte()
                );
                self.state = HandshakeState::Negotiated(reply);
                return Ok(reply);
            }
        }

        debug!("No answer after {} probe(s)", self.probes);
        self.state = HandshakeState::TimedOut;
        Err(TransferError::HandshakeTimeout)
    }
}

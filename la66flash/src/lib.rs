//! # la66flash
//!
//! A library for flashing and configuring Dragino LA66 LoRa modules.
//!
//! This crate provides the core functionality for talking to an LA66 over a
//! serial port, including:
//!
//! - XModem (checksum) firmware upload to the LA66 bootloader
//! - AT command sessions, including the switch to LoRa P2P mode
//! - Forwarding module output to a LoRaWAN server as Semtech UDP packets
//! - Serial port discovery
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use la66flash::{NativePort, SerialConfig, XmodemSender};
//! use std::fs::File;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 9600))?;
//!     let mut sender = XmodemSender::new(port)?;
//!
//!     let firmware = File::open("LA66_firmware.bin")?;
//!     let result = sender.send(firmware, |sent| println!("{sent} bytes"));
//!     println!("{} bytes delivered", result.into_result()?);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod gateway;
pub mod port;
pub mod protocol;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, detect_ports},
    error::{Error, Result, TransferError},
    gateway::{Forwarder, GatewayEui, push_data_packet},
    port::{Port, PortEnumerator, PortInfo, Reader, SerialConfig},
    protocol::at::{AtResponse, AtSession, AtStatus},
    protocol::xmodem::{
        Block, ProbeReply, TransferResult, TransferState, XmodemConfig, XmodemSender, checksum,
    },
};

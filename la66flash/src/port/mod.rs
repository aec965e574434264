//! Port abstraction for serial communication.
//!
//! Protocol code (XModem, AT commands, the gateway forwarder) only talks to
//! the [`Port`] trait, so it can be driven by a real serial port or by an
//! in-memory link in tests.
//!
//! ```text
//! +--------------------------------------+
//! |  Protocol Layer (xmodem, at, gateway)|
//! +------------------+-------------------+
//!                    |
//!          +---------+---------+
//!          |  Port + Reader    |  writes go straight to the port,
//!          +---------+---------+  reads come from a reader thread
//!                    |
//!          +---------+---------+
//!          | Native SerialPort |
//!          |   (serialport)    |
//!          +-------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use la66flash::port::{Port, SerialConfig};
//!
//! fn example<P: Port>(port: &mut P) -> la66flash::Result<()> {
//!     port.write_all_bytes(b"AT\r\n")?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;
pub mod reader;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Native read poll timeout.
    ///
    /// Reads on the port return `TimedOut` after this long; deadlines of the
    /// protocol layer are enforced by [`reader::Reader`], not by this value.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            timeout: Duration::from_millis(100),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the native poll timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the parity mode.
    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the number of stop bits.
    #[must_use]
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Duplex byte channel used by every protocol in this crate.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the native poll timeout.
    fn timeout(&self) -> Duration;

    /// Discard anything buffered by the driver in both directions.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Open a second handle that reads from the same device.
    ///
    /// The handle is moved into the background thread of
    /// [`reader::Reader`]. Its reads should return `TimedOut` periodically
    /// so the thread can notice shutdown.
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>>;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
pub use reader::{ReadOutcome, Reader};

#[cfg(test)]
pub(crate) mod mock;

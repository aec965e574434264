//! Serial port discovery and classification.
//!
//! The LA66 shield is usually reached through the USB serial bridge of the
//! board it sits on (an Arduino in passthrough mode) or a plain USB-UART
//! adapter, so ports are ranked by the bridge's USB VID/PID.

#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB bridge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Arduino board (native USB or 16U2 bridge).
    Arduino,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232 family.
    Ftdi,
    /// Anything else.
    Unknown,
}

/// VID, accepted PIDs (empty = any), kind.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x2341, &[], DeviceKind::Arduino),
    (0x2A03, &[], DeviceKind::Arduino),
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], DeviceKind::Ch340),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6014, 0x6015], DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(v, pids, _)| *v == vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arduino => "Arduino",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is one of the recognised bridges.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Lower is better during auto-selection.
    fn rank(self) -> u8 {
        match self {
            Self::Arduino => 0,
            Self::Ch340 | Self::Cp210x => 1,
            Self::Ftdi => 2,
            Self::Unknown => 3,
        }
    }
}

/// An enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Port path (e.g. "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified bridge.
    pub device: DeviceKind,
    /// USB Vendor ID.
    pub vid: Option<u16>,
    /// USB Product ID.
    pub pid: Option<u16>,
    /// Manufacturer string.
    pub manufacturer: Option<String>,
    /// Product string.
    pub product: Option<String>,
}

impl DetectedPort {
    /// A port with no USB metadata.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Whether the port sits behind a bridge the LA66 is normally wired to.
    pub fn is_likely_la66(&self) -> bool {
        self.device.is_known()
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        let device_info = if self.device.is_known() {
            format!(" [{}]", self.device.name())
        } else if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = self
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        format!("{}{device_info}{product_info}", self.name)
    }
}

/// Enumerate serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|info| {
            let mut detected = DetectedPort::plain(info.port_name);
            if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                detected.device = DeviceKind::from_vid_pid(usb.vid, usb.pid);
                detected.vid = Some(usb.vid);
                detected.pid = Some(usb.pid);
                detected.manufacturer = usb.manufacturer;
                detected.product = usb.product;
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, {:?})",
                    detected.name, usb.vid, usb.pid, detected.device
                );
            }
            detected
        })
        .collect()
}

/// Enumerate serial ports (no backend compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the best candidate from `ports`.
pub fn select_best(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    ports.iter().min_by_key(|p| p.device.rank())
}

//! Forward module output to a LoRaWAN network server.
//!
//! Each line the module prints is wrapped in a Semtech UDP `PUSH_DATA`
//! datagram and sent to the server. The token is static (zero), so the
//! server's `PUSH_ACK` replies are not tracked.
//!
//! ```text
//! +---------+-------+------+-------------+-----------+
//! | version | token | type | gateway EUI |  payload  |
//! +---------+-------+------+-------------+-----------+
//! |  0x02   | 00 00 | 0x00 |   8 bytes   |  N bytes  |
//! +---------+-------+------+-------------+-----------+
//! ```

use crate::error::{Error, Result};
use crate::port::Reader;
use log::{debug, info, warn};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

/// Protocol version of the Semtech packet forwarder.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// `PUSH_DATA` packet identifier.
pub const PUSH_DATA: u8 = 0x00;

/// Header length: version, token (2), identifier.
pub const HEADER_LEN: usize = 4;

/// How long `run` waits for a line before checking again.
const LINE_POLL: Duration = Duration::from_secs(1);

/// 64-bit gateway identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GatewayEui([u8; 8]);

impl GatewayEui {
    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw bytes, most significant first.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl FromStr for GatewayEui {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(trimmed, &mut bytes)
            .map_err(|_| Error::InvalidEui(trimmed.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for GatewayEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// Build a `PUSH_DATA` datagram around `payload`.
pub fn push_data_packet(payload: &[u8], eui: &GatewayEui) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + eui.0.len() + payload.len());
    packet.extend_from_slice(&[PROTOCOL_VERSION, 0x00, 0x00, PUSH_DATA]);
    packet.extend_from_slice(&eui.0);
    packet.extend_from_slice(payload);
    packet
}

/// UDP sender bound to one network server.
#[derive(Debug)]
pub struct Forwarder {
    socket: UdpSocket,
    eui: GatewayEui,
    server: SocketAddr,
}

impl Forwarder {
    /// Resolve `server` and connect a local UDP socket to it.
    pub fn connect<A: ToSocketAddrs>(server: A, eui: GatewayEui) -> Result<Self> {
        let server = server
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config("server address did not resolve".to_string()))?;

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(server)?;

        info!("Forwarding to {server} as gateway {eui}");
        Ok(Self {
            socket,
            eui,
            server,
        })
    }

    /// Resolved server address.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Gateway identity stamped on every packet.
    pub fn eui(&self) -> GatewayEui {
        self.eui
    }

    /// Send one payload; returns the datagram size.
    pub fn forward(&self, payload: &[u8]) -> Result<usize> {
        let packet = push_data_packet(payload, &self.eui);
        let n = self.socket.send(&packet)?;
        debug!("Sent {n} bytes to {}", self.server);
        Ok(n)
    }

    /// Forward every non-empty line from `reader`.
    ///
    /// Stops when the link closes or after `limit` packets. Returns the
    /// number of packets sent.
    pub fn run(&self, reader: &mut Reader, limit: Option<usize>) -> Result<usize> {
        let mut sent = 0;

        while limit.is_none_or(|max| sent < max) {
            let line = match reader.read_line(LINE_POLL) {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(Error::LinkClosed) => {
                    info!("Serial link closed, stopping bridge");
                    break;
                },
                Err(e) => return Err(e),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!("output: {line}");

            match self.forward(line.as_bytes()) {
                Ok(_) => sent += 1,
                // ICMP port unreachable from a previous datagram; keep going
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    warn!("Server refused packet: {e}");
                },
                Err(e) => return Err(e),
            }
        }

        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockLink;

    const EUI: GatewayEui = GatewayEui::new([0xB9, 0x4F, 0x8F, 0x10, 0xA7, 0xD1, 0x64, 0xC2]);

    fn server() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let n = socket.recv(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_parse_eui() {
        assert_eq!("B94F8F10A7D164C2".parse::<GatewayEui>().unwrap(), EUI);
        assert_eq!("b94f8f10a7d164c2".parse::<GatewayEui>().unwrap(), EUI);
        assert_eq!(EUI.to_string(), "B94F8F10A7D164C2");
    }

    #[test]
    fn test_parse_eui_rejects_bad_input() {
        for bad in ["", "B94F8F10A7D164", "B94F8F10A7D164C2FF", "Z94F8F10A7D164C2"] {
            assert!(
                matches!(bad.parse::<GatewayEui>(), Err(Error::InvalidEui(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_push_data_layout() {
        let packet = push_data_packet(b"{\"rxpk\":[]}", &EUI);
        assert_eq!(&packet[..4], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&packet[4..12], EUI.as_bytes());
        assert_eq!(&packet[12..], b"{\"rxpk\":[]}");
    }

    #[test]
    fn test_forward_sends_one_datagram() {
        let server = server();
        let forwarder = Forwarder::connect(server.local_addr().unwrap(), EUI).unwrap();

        let n = forwarder.forward(b"hello").unwrap();

        let packet = recv(&server);
        assert_eq!(n, packet.len());
        assert_eq!(packet, push_data_packet(b"hello", &EUI));
    }

    #[test]
    fn test_run_forwards_lines_until_link_closes() {
        let server = server();
        let forwarder = Forwarder::connect(server.local_addr().unwrap(), EUI).unwrap();

        let link = MockLink::new([]);
        link.push_inbound(b"first\r\n\r\nsecond\n");
        let mut reader = Reader::for_port(&link).unwrap();
        link.close_remote();

        let sent = forwarder.run(&mut reader, None).unwrap();

        assert_eq!(sent, 2);
        assert_eq!(&recv(&server)[12..], b"first");
        assert_eq!(&recv(&server)[12..], b"second");
    }

    #[test]
    fn test_run_stops_at_limit() {
        let server = server();
        let forwarder = Forwarder::connect(server.local_addr().unwrap(), EUI).unwrap();

        let link = MockLink::new([]);
        link.push_inbound(b"a\nb\nc\n");
        let mut reader = Reader::for_port(&link).unwrap();

        assert_eq!(forwarder.run(&mut reader, Some(2)).unwrap(), 2);
        assert_eq!(reader.read_line(Duration::from_millis(200)).unwrap().as_deref(), Some("c"));
    }
}

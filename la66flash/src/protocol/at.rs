//! Line-oriented AT command session for the LA66 firmware.
//!
//! Commands are terminated with `\r\n`. The module echoes zero or more lines
//! and usually ends with a status line that ends in `OK` or `ERROR`; some
//! commands (`ATZ`) reboot before answering, so a silent reply is not an
//! error by itself.

use crate::error::{Error, Result};
use crate::port::{Port, Reader};
use log::{debug, info, trace};
use std::thread;
use std::time::Duration;

/// Wait for each response line.
pub const LINE_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between consecutive commands.
pub const COMMAND_DELAY: Duration = Duration::from_millis(50);

/// Time the module needs to reboot after `ATZ`.
pub const REBOOT_DELAY: Duration = Duration::from_secs(3);

/// Final status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtStatus {
    /// A line ending in `OK` was received.
    Ok,
    /// A line ending in `ERROR` was received.
    Error,
    /// Lines stopped arriving before a status line.
    NoStatus,
}

/// Lines received in answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    /// Non-empty lines in arrival order, status line included.
    pub lines: Vec<String>,
    /// How the response ended.
    pub status: AtStatus,
}

impl AtResponse {
    /// `true` unless the module answered `ERROR`.
    pub fn is_ok(&self) -> bool {
        self.status != AtStatus::Error
    }

    /// All lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Classify a line as a status line.
fn status_of(line: &str) -> Option<AtStatus> {
    let line = line.trim();
    if line.ends_with("OK") {
        Some(AtStatus::Ok)
    } else if line.ends_with("ERROR") {
        Some(AtStatus::Error)
    } else {
        None
    }
}

/// AT command session over a port.
pub struct AtSession<P: Port> {
    port: P,
    reader: Reader,
    line_timeout: Duration,
    command_delay: Duration,
    reboot_delay: Duration,
}

impl<P: Port> AtSession<P> {
    /// Wrap `port` with the default timing.
    pub fn new(port: P) -> Result<Self> {
        let reader = Reader::for_port(&port)?;
        Ok(Self {
            port,
            reader,
            line_timeout: LINE_TIMEOUT,
            command_delay: COMMAND_DELAY,
            reboot_delay: REBOOT_DELAY,
        })
    }

    /// Override the per-line timeout.
    pub fn with_line_timeout(mut self, timeout: Duration) -> Self {
        self.line_timeout = timeout;
        self
    }

    /// Override the pause between commands.
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    /// Override the wait after `ATZ`.
    pub fn with_reboot_delay(mut self, delay: Duration) -> Self {
        self.reboot_delay = delay;
        self
    }

    /// Split the session back into its port and reader.
    ///
    /// Lines the module printed after the last response stay queued in the
    /// reader.
    pub fn into_parts(self) -> (P, Reader) {
        (self.port, self.reader)
    }

    /// Send `command` and collect the response.
    pub fn send(&mut self, command: &str) -> Result<AtResponse> {
        debug!("AT >> {command}");
        self.port.write_all_bytes(format!("{command}\r\n").as_bytes())?;

        let mut lines = Vec::new();
        let mut status = AtStatus::NoStatus;

        while let Some(line) = self.reader.read_line(self.line_timeout)? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            trace!("AT << {line}");

            let end = status_of(&line);
            lines.push(line);
            if let Some(s) = end {
                status = s;
                break;
            }
        }

        if lines.is_empty() {
            debug!("No response to {command}");
        }
        Ok(AtResponse { lines, status })
    }

    /// Send `command` and fail if the module answers `ERROR`.
    pub fn expect(&mut self, command: &str) -> Result<AtResponse> {
        let response = self.send(command).map_err(|e| Error::AtCommand {
            step: command.to_string(),
            reason: e.to_string(),
        })?;

        if !response.is_ok() {
            return Err(Error::AtCommand {
                step: command.to_string(),
                reason: format!("module answered '{}'", response.text()),
            });
        }
        Ok(response)
    }

    /// Put the module in LoRa P2P mode and persist it.
    ///
    /// Sends `AT+MODE=0`, `AT+SAVE`, `ATZ`, waits for the reboot, then checks
    /// the mode with `AT+MODE?`. Returns every step with its response.
    pub fn switch_to_p2p(&mut self) -> Result<Vec<(&'static str, AtResponse)>> {
        let mut steps = Vec::new();

        for command in ["AT+MODE=0", "AT+SAVE", "ATZ"] {
            let response = self.expect(command)?;
            info!("{command}: {}", summary(&response));
            steps.push((command, response));
            thread::sleep(self.command_delay);
        }

        info!(
            "Waiting {:?} for the module to reboot into P2P mode",
            self.reboot_delay
        );
        thread::sleep(self.reboot_delay);
        // Boot banner is not part of any response
        self.reader.flush(self.command_delay)?;

        let response = self.expect("AT+MODE?")?;
        info!("AT+MODE?: {}", summary(&response));
        steps.push(("AT+MODE?", response));

        Ok(steps)
    }
}

fn summary(response: &AtResponse) -> String {
    if response.lines.is_empty() {
        "no response".to_string()
    } else {
        response.lines.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockLink, Reply};

    fn session(script: impl IntoIterator<Item = Reply>) -> (MockLink, AtSession<MockLink>) {
        let link = MockLink::new(script);
        let session = AtSession::new(link.clone())
            .unwrap()
            .with_line_timeout(Duration::from_millis(60))
            .with_command_delay(Duration::from_millis(1))
            .with_reboot_delay(Duration::from_millis(10));
        (link, session)
    }

    #[test]
    fn test_status_of() {
        assert_eq!(status_of("OK"), Some(AtStatus::Ok));
        assert_eq!(status_of("  AT+MODE=0 OK "), Some(AtStatus::Ok));
        assert_eq!(status_of("AT_PARAM_ERROR"), Some(AtStatus::Error));
        assert_eq!(status_of("MODE=0"), None);
    }

    #[test]
    fn test_send_collects_until_status() {
        let (link, mut at) = session([Reply::now(b"\r\n+MODE: 0\r\nOK\r\nlate\r\n")]);

        let response = at.send("AT+MODE?").unwrap();

        assert_eq!(response.status, AtStatus::Ok);
        assert_eq!(response.lines, vec!["+MODE: 0", "OK"]);
        assert_eq!(link.writes(), vec![b"AT+MODE?\r\n".to_vec()]);
    }

    #[test]
    fn test_into_parts_keeps_unread_lines() {
        let (link, mut at) = session([Reply::now(b"OK\r\n+EVT: RX 1\r\n")]);
        assert!(at.send("AT").unwrap().is_ok());

        let (port, mut reader) = at.into_parts();
        assert_eq!(port.writes(), link.writes());
        assert_eq!(
            reader.read_line(Duration::from_millis(60)).unwrap().as_deref(),
            Some("+EVT: RX 1")
        );
    }

    #[test]
    fn test_send_reports_error_status() {
        let (_, mut at) = session([Reply::now(b"AT_ERROR\r\n")]);
        let response = at.send("AT+BOGUS").unwrap();
        assert_eq!(response.status, AtStatus::Error);
        assert!(!response.is_ok());
    }

    #[test]
    fn test_silence_is_empty_response() {
        let (_, mut at) = session([]);
        let response = at.send("ATZ").unwrap();
        assert!(response.lines.is_empty());
        assert_eq!(response.status, AtStatus::NoStatus);
        assert!(response.is_ok());
    }

    #[test]
    fn test_partial_response_without_status() {
        let (_, mut at) = session([Reply::now(b"LA66 v1.2\r\nbooting")]);
        let response = at.send("ATZ").unwrap();
        assert_eq!(response.lines, vec!["LA66 v1.2"]);
        assert_eq!(response.status, AtStatus::NoStatus);
    }

    #[test]
    fn test_expect_names_the_failing_step() {
        let (_, mut at) = session([Reply::now(b"ERROR\r\n")]);
        let err = at.expect("AT+SAVE").unwrap_err();
        assert!(err.to_string().starts_with("AT+SAVE failed"));
    }

    #[test]
    fn test_switch_to_p2p_sequence() {
        let (link, mut at) = session([
            Reply::now(b"OK\r\n"),
            Reply::now(b"OK\r\n"),
            Reply::now(b"OK\r\n"),
            Reply::now(b"+MODE: 0\r\nOK\r\n"),
        ]);

        let steps = at.switch_to_p2p().unwrap();

        let commands: Vec<_> = steps.iter().map(|(c, _)| *c).collect();
        assert_eq!(commands, vec!["AT+MODE=0", "AT+SAVE", "ATZ", "AT+MODE?"]);
        assert_eq!(steps[3].1.lines[0], "+MODE: 0");

        let writes: Vec<_> = link
            .writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect();
        assert_eq!(
            writes,
            vec!["AT+MODE=0\r\n", "AT+SAVE\r\n", "ATZ\r\n", "AT+MODE?\r\n"]
        );
    }

    #[test]
    fn test_switch_to_p2p_stops_at_failed_step() {
        let (link, mut at) = session([Reply::now(b"OK\r\n"), Reply::now(b"ERROR\r\n")]);

        let err = at.switch_to_p2p().unwrap_err();

        assert!(matches!(err, Error::AtCommand { ref step, .. } if step == "AT+SAVE"));
        assert_eq!(link.writes().len(), 2);
    }

    #[test]
    fn test_closed_link_is_a_step_failure() {
        let (link, mut at) = session([]);
        link.close_remote();
        let err = at.expect("AT").unwrap_err();
        assert!(err.to_string().contains("Serial link closed"));
    }
}

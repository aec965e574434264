//! Deadline-bounded reads over a blocking port.
//!
//! Serial handles only offer a blocking `read`. Instead of racing a fresh
//! thread against a timer for every read (which leaks the thread and loses
//! whatever it eventually reads), a single background thread owns a cloned
//! read handle for the whole session and pushes every chunk it receives into
//! a bounded queue. Callers wait on that queue with a deadline, so bytes are
//! always consumed in arrival order and nothing is silently discarded except
//! by an explicit [`Reader::flush`].
//!
//! ```text
//!  serial device --> reader thread --> sync_channel --> Reader::read_timeout
//!                    (blocking read)   (bounded, FIFO)  (recv_timeout)
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

/// Maximum number of chunks buffered between the thread and the consumer.
const QUEUE_DEPTH: usize = 64;

/// Size of a single read issued by the background thread.
const CHUNK_SIZE: usize = 256;

/// Result of a deadline-bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
    /// The deadline passed with nothing received.
    TimedOut,
}

enum Event {
    Data(Vec<u8>),
    Closed(Option<io::Error>),
}

/// Read side of a port, with deadlines.
pub struct Reader {
    rx: Receiver<Event>,
    pending: VecDeque<u8>,
    line: Vec<u8>,
    closed: bool,
    stop: Arc<AtomicBool>,
}

impl Reader {
    /// Start a reader on a clone of `port`'s read handle.
    pub fn for_port<P: Port + ?Sized>(port: &P) -> Result<Self> {
        Self::spawn(port.try_clone_reader()?)
    }

    /// Start a reader thread that owns `source`.
    pub fn spawn(source: Box<dyn Read + Send>) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        thread::Builder::new()
            .name("la66flash-reader".into())
            .spawn(move || pump(source, &tx, &thread_stop))?;

        Ok(Self {
            rx,
            pending: VecDeque::new(),
            line: Vec::new(),
            closed: false,
            stop,
        })
    }

    /// Wait up to `timeout` for at least one byte and copy what is available.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }
        if self.pending.is_empty() && !self.fill(timeout)? {
            return Ok(ReadOutcome::TimedOut);
        }

        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(ReadOutcome::Data(n))
    }

    /// Wait up to `timeout` for a single byte.
    pub fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_timeout(&mut byte, timeout)? {
            ReadOutcome::Data(1) => Ok(Some(byte[0])),
            _ => Ok(None),
        }
    }

    /// Discard inbound bytes until the line stays quiet for `quiet`.
    ///
    /// Returns the number of bytes thrown away.
    pub fn flush(&mut self, quiet: Duration) -> Result<usize> {
        let mut scratch = [0u8; 100];
        let mut discarded = 0;

        loop {
            match self.read_timeout(&mut scratch, quiet)? {
                ReadOutcome::Data(0) | ReadOutcome::TimedOut => break,
                ReadOutcome::Data(n) => discarded += n,
            }
        }
        discarded += self.line.len();
        self.line.clear();

        if discarded > 0 {
            debug!("Flushed {discarded} stray byte(s)");
        }
        Ok(discarded)
    }

    /// Read one `\n`-terminated line, waiting at most `timeout` in total.
    ///
    /// The terminator and a trailing `\r` are stripped. On timeout `None` is
    /// returned and any partial line is kept for the next call.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                self.line.extend(self.pending.drain(..=pos));
                let raw = std::mem::take(&mut self.line);
                let text = String::from_utf8_lossy(&raw);
                return Ok(Some(text.trim_end_matches(&['\r', '\n'][..]).to_string()));
            }
            self.line.extend(self.pending.drain(..));

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.fill(remaining)? {
                return Ok(None);
            }
        }
    }

    /// Pull one event from the thread into `pending`.
    ///
    /// Returns `false` on timeout.
    fn fill(&mut self, timeout: Duration) -> Result<bool> {
        if self.closed {
            return Err(Error::LinkClosed);
        }

        match self.rx.recv_timeout(timeout) {
            Ok(Event::Data(chunk)) => {
                trace!("RX {} byte(s): {:02X?}", chunk.len(), chunk);
                self.pending.extend(chunk);
                Ok(true)
            },
            Ok(Event::Closed(err)) => {
                self.closed = true;
                match err {
                    Some(e) => warn!("Serial reader stopped: {e}"),
                    None => debug!("Serial reader reached end of stream"),
                }
                Err(Error::LinkClosed)
            },
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Err(Error::LinkClosed)
            },
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        // The thread notices on its next poll timeout or failed send
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn pump(mut source: Box<dyn Read + Send>, tx: &SyncSender<Event>, stop: &AtomicBool) {
    let mut buf = [0u8; CHUNK_SIZE];

    while !stop.load(Ordering::Relaxed) {
        match source.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Event::Closed(None));
                return;
            },
            Ok(n) => {
                if tx.send(Event::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                let _ = tx.send(Event::Closed(Some(e)));
                return;
            },
        }
    }
    trace!("Serial reader thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockLink, Reply};

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_read_timeout_returns_available_bytes() {
        let link = MockLink::new([]);
        link.push_inbound(b"abc");
        let mut reader = Reader::for_port(&link).unwrap();

        let mut buf = [0u8; 8];
        let outcome = reader.read_timeout(&mut buf, SHORT).unwrap();
        assert_eq!(outcome, ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_read_timeout_on_silence() {
        let link = MockLink::new([]);
        let mut reader = Reader::for_port(&link).unwrap();

        let start = Instant::now();
        let outcome = reader.read_timeout(&mut [0u8; 4], SHORT).unwrap();
        assert_eq!(outcome, ReadOutcome::TimedOut);
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn test_bytes_keep_arrival_order_across_reads() {
        let link = MockLink::new([]);
        link.push_inbound(&[1, 2, 3, 4, 5]);
        let mut reader = Reader::for_port(&link).unwrap();

        let mut got = Vec::new();
        while let Some(b) = reader.read_byte(SHORT).unwrap() {
            got.push(b);
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_late_byte_is_not_lost_after_timeout() {
        let mut link = MockLink::new([Reply::after(Duration::from_millis(80), &[0x06])]);
        link.write_all_bytes(b"ping").unwrap();
        let mut reader = Reader::for_port(&link).unwrap();

        assert_eq!(reader.read_byte(Duration::from_millis(20)).unwrap(), None);
        assert_eq!(
            reader.read_byte(Duration::from_millis(500)).unwrap(),
            Some(0x06)
        );
    }

    #[test]
    fn test_flush_discards_late_reply_before_next_exchange() {
        // First exchange: the answer shows up after the caller gave up.
        // Second exchange: a fresh answer that must be the one observed.
        let mut link = MockLink::new([
            Reply::after(Duration::from_millis(60), &[0x15]),
            Reply::now(&[0x06]),
        ]);
        let mut reader = Reader::for_port(&link).unwrap();

        link.write_all_bytes(b"first").unwrap();
        assert_eq!(reader.read_byte(Duration::from_millis(30)).unwrap(), None);

        let discarded = reader.flush(Duration::from_millis(80)).unwrap();
        assert_eq!(discarded, 1);

        link.write_all_bytes(b"second").unwrap();
        assert_eq!(
            reader.read_byte(Duration::from_millis(200)).unwrap(),
            Some(0x06)
        );
    }

    #[test]
    fn test_read_line_strips_terminator_and_keeps_partial() {
        let link = MockLink::new([]);
        link.push_inbound(b"+MODE=0\r\nOK\r\npart");
        let mut reader = Reader::for_port(&link).unwrap();

        assert_eq!(reader.read_line(SHORT).unwrap().as_deref(), Some("+MODE=0"));
        assert_eq!(reader.read_line(SHORT).unwrap().as_deref(), Some("OK"));
        assert_eq!(reader.read_line(SHORT).unwrap(), None);

        link.push_inbound(b"ial\n");
        assert_eq!(reader.read_line(SHORT).unwrap().as_deref(), Some("partial"));
    }

    #[test]
    fn test_closed_link_is_reported() {
        let link = MockLink::new([]);
        let mut reader = Reader::for_port(&link).unwrap();
        link.close_remote();

        let err = reader.read_byte(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, Error::LinkClosed));
        // Sticky afterwards
        assert!(matches!(reader.read_byte(SHORT), Err(Error::LinkClosed)));
    }
}

//! In-memory scripted link used by unit tests.
//!
//! Every `write` consumes the next [`Reply`] from the script and schedules its
//! bytes to become readable after the reply's delay. Reads block for a short
//! poll period and then return `TimedOut`, like a real serial handle.

use crate::error::Result;
use crate::port::Port;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(5);

/// Scripted answer to one write.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    delay: Duration,
    bytes: Vec<u8>,
}

impl Reply {
    pub(crate) fn now(bytes: &[u8]) -> Self {
        Self::after(Duration::ZERO, bytes)
    }

    pub(crate) fn after(delay: Duration, bytes: &[u8]) -> Self {
        Self {
            delay,
            bytes: bytes.to_vec(),
        }
    }

    /// Consume a write without answering it.
    pub(crate) fn silence() -> Self {
        Self::now(&[])
    }
}

#[derive(Default)]
struct State {
    inbound: VecDeque<(Instant, u8)>,
    script: VecDeque<Reply>,
    writes: Vec<Vec<u8>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

/// Cloneable handle; all clones share the same line.
#[derive(Clone, Default)]
pub(crate) struct MockLink {
    shared: Arc<Shared>,
}

impl MockLink {
    pub(crate) fn new(script: impl IntoIterator<Item = Reply>) -> Self {
        let link = Self::default();
        link.shared.state.lock().unwrap().script = script.into_iter().collect();
        link
    }

    /// Make bytes readable right away, outside the script.
    pub(crate) fn push_inbound(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock().unwrap();
        let now = Instant::now();
        for &b in bytes {
            schedule(&mut state.inbound, now, b);
        }
        self.shared.ready.notify_all();
    }

    /// Every frame written so far, one entry per `write` call.
    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().unwrap().writes.clone()
    }

    /// Simulate the device disappearing.
    pub(crate) fn close_remote(&self) {
        self.shared.state.lock().unwrap().closed = true;
        self.shared.ready.notify_all();
    }
}

fn schedule(inbound: &mut VecDeque<(Instant, u8)>, at: Instant, byte: u8) {
    let pos = inbound
        .iter()
        .position(|(t, _)| *t > at)
        .unwrap_or(inbound.len());
    inbound.insert(pos, (at, byte));
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + POLL;
        let mut state = self.shared.state.lock().unwrap();

        loop {
            let now = Instant::now();
            let mut n = 0;
            while n < buf.len() {
                match state.inbound.front() {
                    Some((t, b)) if *t <= now => {
                        buf[n] = *b;
                        state.inbound.pop_front();
                        n += 1;
                    },
                    _ => break,
                }
            }
            if n > 0 {
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            if now >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }

            let wake = state
                .inbound
                .front()
                .map_or(deadline, |(t, _)| (*t).min(deadline));
            let wait = wake.saturating_duration_since(now).max(Duration::from_micros(100));
            state = self.shared.ready.wait_timeout(state, wait).unwrap().0;
        }
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        state.writes.push(buf.to_vec());

        if let Some(reply) = state.script.pop_front() {
            let at = Instant::now() + reply.delay;
            for b in reply.bytes {
                schedule(&mut state.inbound, at, b);
            }
            self.shared.ready.notify_all();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockLink {
    fn name(&self) -> &str {
        "mock"
    }

    fn baud_rate(&self) -> u32 {
        9600
    }

    fn timeout(&self) -> Duration {
        POLL
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.shared.state.lock().unwrap().inbound.clear();
        Ok(())
    }

    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.clone()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

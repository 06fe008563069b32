//! Line-oriented transport over the LA66 serial link.
//!
//! The LA66 talks in ASCII lines terminated by CR and/or LF, in no fixed
//! order. This module frames the byte stream into discrete lines, bounded by
//! the module's 236-byte buffer, and provides the drain and bounded-wait
//! primitives the protocol layers are built on.

use log::trace;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::*;
use crate::error::Result;

/// Byte-level access to the modem, plus control of its reset line.
///
/// `Box<dyn SerialPort>` implements this with the reset line mapped to DTR.
/// Test doubles provide a scripted in-memory implementation.
pub trait ModemPort: Read + Write {
    /// Drive the modem reset line. `false` holds the module in reset.
    fn set_reset(&mut self, level: bool) -> Result<()>;
}

impl ModemPort for Box<dyn SerialPort> {
    fn set_reset(&mut self, level: bool) -> Result<()> {
        // RESET is wired through the adapter's DTR line
        self.write_data_terminal_ready(level)?;
        Ok(())
    }
}

/// Frames the modem byte stream into lines.
pub struct LineTransport<P: ModemPort> {
    port: P,
}

impl<P: ModemPort> LineTransport<P> {
    pub fn new(port: P) -> Self {
        LineTransport { port }
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Fetch a single byte, `None` if nothing arrived within the port's
    /// per-character timeout.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll for the next complete line.
    ///
    /// Accumulates until CR or LF and returns the line without its
    /// terminator. Returns `None` when no data is pending, when the line is
    /// empty (the second half of a CRLF pair), when the stream stalls
    /// mid-line, or when [`MAX_LINE`] is reached without a terminator; the
    /// caller re-polls on its own schedule.
    pub fn poll_line(&mut self) -> Result<Option<String>> {
        let mut buf = [0u8; MAX_LINE];
        let mut len = 0;

        while len < MAX_LINE {
            let byte = match self.read_byte()? {
                Some(b) => b,
                None => return Ok(None),
            };

            if byte == b'\r' || byte == b'\n' {
                if len == 0 {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&buf[..len]).into_owned();
                trace!("line: {}", line);
                return Ok(Some(line));
            }

            buf[len] = byte;
            len += 1;
        }

        // terminator never arrived within the buffer bound
        Ok(None)
    }

    /// Drain any stale input, waiting in short bursts until the channel is
    /// quiet. A no-op when nothing is pending.
    pub fn clear(&mut self) -> Result<()> {
        while self.read_byte()?.is_some() {
            while self.read_byte()?.is_some() {}
            thread::sleep(CLEAR_QUIET);
        }
        Ok(())
    }

    /// Push bytes to the modem, blocking until transmission completes.
    pub fn write(&mut self, text: &str) -> Result<()> {
        self.port.write_all(text.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }
}

/// Bounded busy-wait helper shared by the protocol state machines.
///
/// Each `tick` sleeps one poll interval until the wall-clock budget runs
/// out; there is no scheduler to yield to.
pub(crate) struct Poller {
    deadline: Instant,
    interval: Duration,
}

impl Poller {
    pub fn new(budget: Duration, interval: Duration) -> Self {
        Poller {
            deadline: Instant::now() + budget,
            interval,
        }
    }

    /// Sleep one interval. Returns `false` once the budget is exhausted.
    pub fn tick(&mut self) -> bool {
        if Instant::now() >= self.deadline {
            return false;
        }
        thread::sleep(self.interval);
        true
    }
}

//! Scripted in-memory port for engine tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::Port;

/// A scripted serial port.
///
/// Reads are served from a pending byte queue; writes are recorded and can
/// trigger scripted replies, which models a device answering a command.
pub struct MockPort {
    pending: VecDeque<u8>,
    rules: Vec<(Vec<u8>, Vec<u8>)>,
    /// Every write issued against the port, in order.
    pub writes: Vec<Vec<u8>>,
    /// Number of break conditions asserted.
    pub break_count: usize,
    /// When set, `set_break` fails with a serial error.
    pub fail_break: bool,
    /// When set, every write fails.
    pub fail_writes: bool,
    timeout: Duration,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            rules: Vec::new(),
            writes: Vec::new(),
            break_count: 0,
            fail_break: false,
            fail_writes: false,
            timeout: Duration::from_millis(50),
        }
    }

    /// Queue unsolicited bytes for the next reads.
    pub fn push_pending(&mut self, bytes: &[u8]) {
        self.pending
            .extend(bytes.iter().copied());
    }

    /// When a write contains `trigger`, queue `reply` for reading.
    /// Each rule fires once, in registration order.
    pub fn on_write(&mut self, trigger: &[u8], reply: &[u8]) {
        self.rules
            .push((trigger.to_vec(), reply.to_vec()));
    }

    /// All written bytes concatenated, for assertions.
    pub fn written(&self) -> Vec<u8> {
        self.writes
            .iter()
            .flat_map(|w| w.iter().copied())
            .collect()
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self
            .pending
            .is_empty()
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no data",
            ));
        }
        let mut n = 0;
        while n < buf.len() {
            match self
                .pending
                .pop_front()
            {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                },
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.fail_writes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write failed",
            ));
        }
        self.writes
            .push(buf.to_vec());

        let mut fired = None;
        for (i, (trigger, _)) in self
            .rules
            .iter()
            .enumerate()
        {
            if buf
                .windows(trigger.len())
                .any(|w| w == trigger.as_slice())
            {
                fired = Some(i);
                break;
            }
        }
        if let Some(i) = fired {
            let (_, reply) = self
                .rules
                .remove(i);
            self.pending
                .extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(u32::try_from(self.pending.len()).unwrap_or(u32::MAX))
    }

    fn set_break(&mut self, asserted: bool) -> Result<()> {
        if self.fail_break {
            return Err(Error::Serial(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "break not supported",
            )));
        }
        if asserted {
            self.break_count += 1;
        }
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.pending
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Manual serial console primitives.
//!
//! Backs the interactive console command: a writer-side session plus a
//! cloned reader handle for a background read loop.

use std::io::Write as _;
use std::time::Duration;

use crate::error::Result;
use crate::interrupt::BREAK_HOLD;

/// A manual console session wrapping a serial port connection.
pub struct ConsoleSession {
    port: Box<dyn serialport::SerialPort>,
}

impl ConsoleSession {
    /// Open a console session on the specified port and baud rate.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;
        Ok(Self { port })
    }

    /// Create a cloned reader handle for a background read loop.
    pub fn try_clone_reader(&self) -> Result<Box<dyn serialport::SerialPort>> {
        Ok(self
            .port
            .try_clone()?)
    }

    /// Write raw bytes to the serial connection.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)?;
        Ok(())
    }

    /// Assert a break condition, hold it, and release it.
    pub fn send_break(&mut self) -> Result<()> {
        self.port
            .set_break()?;
        std::thread::sleep(BREAK_HOLD);
        self.port
            .clear_break()?;
        Ok(())
    }
}

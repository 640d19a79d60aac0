//! Expect engine: session buffer and pattern waiting.
//!
//! The reader accumulates cleaned console text into a rolling buffer and
//! waits for a pattern to appear anywhere in it. Device pagers are handled
//! below the pattern layer: a trailing "more" marker advances the pager and
//! clears the buffer, so a pager prompt can never satisfy an expect.

use std::io::Write;
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::is_cancel_requested;
use crate::port::Port;
use crate::transcript::{Utf8Accumulator, clean_console_text};

/// Rolling session buffer cap. Prompts appear at the end of output, so
/// only a recent window needs to stay matchable.
pub const MAX_BUFFER_BYTES: usize = 8 * 1024;

/// Default interval between port polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pagination markers emitted by device pagers, matched against the
/// trimmed tail of the buffer.
pub const PAGER_MARKERS: &[&str] = &[
    "-- MORE --",
    " --More-- ",
    "<--- More --->",
    "Press any key to continue",
];

/// Compile an expect pattern the way every wait site does: multi-line,
/// case-insensitive, matched anywhere in the buffer.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map_err(|e| Error::Definition(format!("invalid expect pattern '{pattern}': {e}")))
}

/// Rolling accumulator of cleaned console text.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    text: String,
}

impl SessionBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append cleaned text, discarding the stale prefix past the cap.
    pub fn push_str(&mut self, text: &str) {
        self.text
            .push_str(text);
        if self
            .text
            .len()
            > MAX_BUFFER_BYTES
        {
            let mut cut = self
                .text
                .len()
                - MAX_BUFFER_BYTES;
            while !self
                .text
                .is_char_boundary(cut)
            {
                cut += 1;
            }
            self.text
                .drain(..cut);
        }
    }

    /// Current buffer contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.text
            .clear();
    }

    /// Take the contents, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Whether the trimmed tail of the buffer is a pager prompt.
    #[must_use]
    pub fn ends_with_pager(&self) -> bool {
        let tail = self
            .text
            .trim_end();
        PAGER_MARKERS
            .iter()
            .any(|m| tail.ends_with(m.trim()))
    }
}

/// Polls a port, feeding cleaned text into the session buffer and echoing
/// it to the transcript as it arrives.
pub struct ExpectReader<'a, P: Port> {
    port: &'a mut P,
    buffer: &'a mut SessionBuffer,
    decoder: &'a mut Utf8Accumulator,
    transcript: &'a mut dyn Write,
    poll_interval: Duration,
}

impl<'a, P: Port> ExpectReader<'a, P> {
    /// Borrow the engine state for a wait.
    pub fn new(
        port: &'a mut P,
        buffer: &'a mut SessionBuffer,
        decoder: &'a mut Utf8Accumulator,
        transcript: &'a mut dyn Write,
    ) -> Self {
        Self {
            port,
            buffer,
            decoder,
            transcript,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval (tests run with a short one).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Read whatever the device has buffered, clean it, echo it to the
    /// transcript, and append it to the session buffer. Returns whether
    /// any text arrived.
    pub fn drain_available(&mut self) -> Result<bool> {
        let mut arrived = false;
        let mut chunk = [0u8; 512];
        while self
            .port
            .bytes_to_read()?
            > 0
        {
            let n = match self
                .port
                .read(&mut chunk)
            {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            };
            let text = self
                .decoder
                .push(&chunk[..n]);
            let cleaned = clean_console_text(&text);
            if !cleaned.is_empty() {
                self.transcript
                    .write_all(cleaned.as_bytes())?;
                self.transcript
                    .flush()?;
                self.buffer
                    .push_str(&cleaned);
                arrived = true;
            }
        }
        Ok(arrived)
    }

    /// Wait until `pattern` matches the session buffer or the deadline
    /// passes.
    ///
    /// Pager prompts are answered with a single space and the buffer is
    /// cleared, so paginated output keeps flowing without ever counting
    /// toward the match. Returns the buffer contents at match time.
    pub fn read_until(&mut self, pattern: &str, timeout: Duration) -> Result<String> {
        let regex = compile_pattern(pattern)?;
        let deadline = Instant::now() + timeout;

        loop {
            if is_cancel_requested() {
                return Err(Error::Cancelled);
            }

            self.drain_available()?;

            if self
                .buffer
                .ends_with_pager()
            {
                log::debug!("pager prompt on {}, advancing", self.port.name());
                self.port
                    .write_all_bytes(b" ")?;
                self.buffer
                    .clear();
            } else if regex.is_match(
                self.buffer
                    .as_str(),
            ) {
                log::debug!("matched '{pattern}' on {}", self.port.name());
                return Ok(self
                    .buffer
                    .as_str()
                    .to_string());
            }

            if Instant::now() >= deadline {
                return Err(Error::ExpectTimeout(pattern.to_string()));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPort;

    fn fast_wait(
        port: &mut MockPort,
        buffer: &mut SessionBuffer,
        pattern: &str,
        timeout_ms: u64,
    ) -> (Result<String>, String) {
        let mut decoder = Utf8Accumulator::new();
        let mut transcript: Vec<u8> = Vec::new();
        let result = ExpectReader::new(port, buffer, &mut decoder, &mut transcript)
            .with_poll_interval(Duration::from_millis(2))
            .read_until(pattern, Duration::from_millis(timeout_ms));
        (result, String::from_utf8_lossy(&transcript).into_owned())
    }

    #[test]
    fn test_matches_case_insensitively() {
        let mut port = MockPort::new();
        port.push_pending(b"Loading...\r\nSWITCH: ");
        let mut buffer = SessionBuffer::new();

        let (result, transcript) = fast_wait(&mut port, &mut buffer, "switch:", 200);
        let matched = result.unwrap();
        assert!(matched.contains("SWITCH:"));
        assert!(transcript.contains("SWITCH:"));
    }

    #[test]
    fn test_pager_prompt_never_matches() {
        let mut port = MockPort::new();
        port.push_pending(b"interface vlan 1\n -- MORE -- ");
        // the pager-advance space releases the rest of the listing
        port.on_write(b" ", b"\ninterface vlan 2\nswitch# ");
        let mut buffer = SessionBuffer::new();

        let (result, _) = fast_wait(&mut port, &mut buffer, "MORE", 300);
        // "MORE" only ever appears as the pager prompt, which is consumed;
        // the wait must time out rather than match it.
        assert!(matches!(result, Err(Error::ExpectTimeout(_))));
        assert_eq!(port.written(), b" ".to_vec());
    }

    #[test]
    fn test_pager_advance_then_match() {
        let mut port = MockPort::new();
        port.push_pending(b"config line 1\nPress any key to continue");
        port.on_write(b" ", b"\nconfig line 2\nswitch# ");
        let mut buffer = SessionBuffer::new();

        let (result, transcript) = fast_wait(&mut port, &mut buffer, "switch#", 300);
        let matched = result.unwrap();
        // buffer was cleared at the pager boundary
        assert!(!matched.contains("config line 1"));
        assert!(matched.contains("switch#"));
        // the transcript saw everything
        assert!(transcript.contains("config line 1"));
        assert!(transcript.contains("config line 2"));
    }

    #[test]
    fn test_timeout_names_pattern() {
        let mut port = MockPort::new();
        let mut buffer = SessionBuffer::new();
        let (result, _) = fast_wait(&mut port, &mut buffer, "never appears", 20);
        match result {
            Err(Error::ExpectTimeout(p)) => assert_eq!(p, "never appears"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_pattern_is_definition_error() {
        let mut port = MockPort::new();
        let mut buffer = SessionBuffer::new();
        let (result, _) = fast_wait(&mut port, &mut buffer, "[unclosed", 20);
        assert!(matches!(result, Err(Error::Definition(_))));
    }

    #[test]
    fn test_buffer_caps_at_limit() {
        let mut buffer = SessionBuffer::new();
        for _ in 0..100 {
            buffer.push_str(&"x".repeat(200));
        }
        buffer.push_str("switch: ");
        assert!(buffer.as_str().len() <= MAX_BUFFER_BYTES);
        assert!(
            buffer
                .as_str()
                .ends_with("switch: ")
        );
    }

    #[test]
    fn test_buffer_cap_respects_char_boundaries() {
        let mut buffer = SessionBuffer::new();
        buffer.push_str(&"你".repeat(MAX_BUFFER_BYTES / 3 + 10));
        assert!(buffer.as_str().len() <= MAX_BUFFER_BYTES);
        // must not panic on a split multi-byte char
        let _ = buffer
            .as_str()
            .chars()
            .count();
    }

    #[test]
    fn test_pager_markers_detected_at_tail_only() {
        let mut buffer = SessionBuffer::new();
        buffer.push_str("-- MORE -- was mentioned earlier\nswitch# ");
        assert!(!buffer.ends_with_pager());
        buffer.clear();
        buffer.push_str("listing...\n<--- More --->  \r\n");
        assert!(buffer.ends_with_pager());
    }

    #[test]
    fn test_utf8_split_across_reads() {
        let mut port = MockPort::new();
        let mut buffer = SessionBuffer::new();
        let mut decoder = Utf8Accumulator::new();
        let mut transcript: Vec<u8> = Vec::new();

        // '设' is 0xE8 0xAE 0xBE; split it across two drains
        port.push_pending(&[b'o', b'k', 0xE8, 0xAE]);
        {
            let mut reader =
                ExpectReader::new(&mut port, &mut buffer, &mut decoder, &mut transcript);
            reader
                .drain_available()
                .unwrap();
        }
        assert_eq!(buffer.as_str(), "ok");

        port.push_pending(&[0xBE, b'!']);
        {
            let mut reader =
                ExpectReader::new(&mut port, &mut buffer, &mut decoder, &mut transcript);
            reader
                .drain_available()
                .unwrap();
        }
        assert_eq!(buffer.as_str(), "ok设!");
    }
}

//! Interrupt injector: landing a keystroke in a narrow boot window.
//!
//! Boot interrupts only register during a short window early in the boot
//! sequence, so the payload is re-sent every poll cycle until the target
//! prompt appears. Devices treat repeated interrupts as idempotent.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::expect::{ExpectReader, SessionBuffer, compile_pattern, DEFAULT_POLL_INTERVAL};
use crate::is_cancel_requested;
use crate::port::Port;
use crate::transcript::Utf8Accumulator;

/// Reserved interrupt value requesting a break condition instead of keys.
pub const BREAK_TOKEN: &str = "__BREAK__";

/// How long a break condition is held on the line.
pub const BREAK_HOLD: Duration = Duration::from_millis(250);

/// Conventional interrupt bytes sent alongside a break: ETX, ESC, NUL.
/// Different boot loaders listen for different ones.
pub const INTERRUPT_BYTES: &[u8] = &[0x03, 0x1B, 0x00];

/// What an interrupt step actually puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptToken {
    /// Assert a break condition, then send the conventional bytes.
    BreakCondition,
    /// Send these characters verbatim.
    Keys(String),
}

impl InterruptToken {
    /// Interpret a workflow `interrupt` value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == BREAK_TOKEN {
            Self::BreakCondition
        } else {
            Self::Keys(value.to_string())
        }
    }
}

/// Repeatedly injects an interrupt payload until a prompt appears.
pub struct InterruptInjector<'a, P: Port> {
    port: &'a mut P,
    buffer: &'a mut SessionBuffer,
    decoder: &'a mut Utf8Accumulator,
    transcript: &'a mut dyn std::io::Write,
    poll_interval: Duration,
    break_hold: Duration,
}

impl<'a, P: Port> InterruptInjector<'a, P> {
    /// Borrow the engine state for an injection window.
    pub fn new(
        port: &'a mut P,
        buffer: &'a mut SessionBuffer,
        decoder: &'a mut Utf8Accumulator,
        transcript: &'a mut dyn std::io::Write,
    ) -> Self {
        Self {
            port,
            buffer,
            decoder,
            transcript,
            poll_interval: DEFAULT_POLL_INTERVAL,
            break_hold: BREAK_HOLD,
        }
    }

    /// Override the poll interval (tests run with a short one).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the break hold duration.
    #[must_use]
    pub fn with_break_hold(mut self, hold: Duration) -> Self {
        self.break_hold = hold;
        self
    }

    fn send_payload(&mut self, token: &InterruptToken, break_fallback: &mut bool) -> Result<()> {
        match token {
            InterruptToken::Keys(keys) => {
                self.port
                    .write_all_bytes(keys.as_bytes())?;
            },
            InterruptToken::BreakCondition => {
                if !*break_fallback {
                    match self
                        .port
                        .set_break(true)
                    {
                        Ok(()) => {
                            std::thread::sleep(self.break_hold);
                            self.port
                                .set_break(false)?;
                        },
                        Err(e) => {
                            log::warn!(
                                "break condition unsupported on {} ({e}), \
                                 falling back to interrupt bytes",
                                self.port
                                    .name()
                            );
                            *break_fallback = true;
                        },
                    }
                }
                self.port
                    .write_all_bytes(INTERRUPT_BYTES)?;
            },
        }
        Ok(())
    }

    /// Inject `token` every poll cycle until `pattern` matches the session
    /// buffer or the window closes.
    ///
    /// Unlike an ordinary expect wait, pager markers are treated as plain
    /// text here; nothing paginates during a boot interrupt.
    pub fn inject_until(
        &mut self,
        token: &InterruptToken,
        pattern: &str,
        timeout: Duration,
    ) -> Result<String> {
        let regex = compile_pattern(pattern)?;
        let deadline = Instant::now() + timeout;
        let mut break_fallback = false;

        loop {
            if is_cancel_requested() {
                return Err(Error::Cancelled);
            }

            self.send_payload(token, &mut break_fallback)?;

            ExpectReader::new(
                &mut *self.port,
                &mut *self.buffer,
                &mut *self.decoder,
                &mut *self.transcript,
            )
            .drain_available()?;

            if regex.is_match(
                self.buffer
                    .as_str(),
            ) {
                log::debug!("interrupt landed, matched '{pattern}'");
                return Ok(self
                    .buffer
                    .as_str()
                    .to_string());
            }

            if Instant::now() >= deadline {
                return Err(Error::InterruptTimeout(pattern.to_string()));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPort;

    fn inject(
        port: &mut MockPort,
        token: &InterruptToken,
        pattern: &str,
        timeout_ms: u64,
    ) -> Result<String> {
        let mut buffer = SessionBuffer::new();
        let mut decoder = Utf8Accumulator::new();
        let mut transcript: Vec<u8> = Vec::new();
        InterruptInjector::new(port, &mut buffer, &mut decoder, &mut transcript)
            .with_poll_interval(Duration::from_millis(2))
            .with_break_hold(Duration::from_millis(1))
            .inject_until(token, pattern, Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(InterruptToken::parse("__BREAK__"), InterruptToken::BreakCondition);
        assert_eq!(
            InterruptToken::parse("\x03"),
            InterruptToken::Keys("\x03".to_string())
        );
    }

    #[test]
    fn test_keys_resent_until_window_closes() {
        let mut port = MockPort::new();
        let token = InterruptToken::Keys("\x03".into());
        let result = inject(&mut port, &token, "loader>", 30);
        assert!(matches!(result, Err(Error::InterruptTimeout(_))));
        // the payload went out more than once
        assert!(port.writes.len() > 1, "writes: {:?}", port.writes);
        assert!(
            port.writes
                .iter()
                .all(|w| w == b"\x03")
        );
    }

    #[test]
    fn test_window_closes_at_the_configured_deadline() {
        let mut port = MockPort::new();
        let token = InterruptToken::Keys("\x03".into());

        let started = Instant::now();
        let result = inject(&mut port, &token, "loader>", 40);
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(Error::InterruptTimeout(_))));
        // the deadline is honored: never early, and within a few poll
        // cycles of the configured window
        assert!(
            elapsed >= Duration::from_millis(40),
            "gave up early: {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_millis(400),
            "kept injecting past the window: {elapsed:?}"
        );
    }

    #[test]
    fn test_keys_match_stops_injection() {
        let mut port = MockPort::new();
        port.on_write(b"\x03", b"\r\nswitch: ");
        let token = InterruptToken::Keys("\x03".into());
        let matched = inject(&mut port, &token, "switch:", 500).unwrap();
        assert!(matched.contains("switch:"));
    }

    #[test]
    fn test_break_asserts_line_and_sends_bytes() {
        let mut port = MockPort::new();
        port.on_write(INTERRUPT_BYTES, b"\r\nloader> ");
        let matched = inject(&mut port, &InterruptToken::BreakCondition, "loader>", 500).unwrap();
        assert!(matched.contains("loader>"));
        assert!(port.break_count >= 1);
        assert_eq!(port.writes[0], INTERRUPT_BYTES.to_vec());
    }

    #[test]
    fn test_break_falls_back_when_unsupported() {
        let mut port = MockPort::new();
        port.fail_break = true;
        port.on_write(INTERRUPT_BYTES, b"\r\nloader> ");
        let matched = inject(&mut port, &InterruptToken::BreakCondition, "loader>", 500).unwrap();
        assert!(matched.contains("loader>"));
        assert_eq!(port.break_count, 0);
        // interrupt bytes still went out despite the failed break
        assert_eq!(port.writes[0], INTERRUPT_BYTES.to_vec());
    }

    #[test]
    fn test_pager_marker_is_ordinary_text_here() {
        let mut port = MockPort::new();
        port.on_write(b"\x03", b"-- MORE --\r\nloader> ");
        let token = InterruptToken::Keys("\x03".into());
        let matched = inject(&mut port, &token, "loader>", 500).unwrap();
        // no pager handling: the marker stays in the matched buffer
        assert!(matched.contains("-- MORE --"));
    }
}

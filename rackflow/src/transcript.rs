//! Transcript text handling: incremental UTF-8 decoding and console cleanup.
//!
//! Device consoles deliver bytes, not characters; a multi-byte sequence can
//! straddle two reads, and vendor boot loaders emit plenty of garbage in
//! between. These helpers turn that stream into the cleaned text the expect
//! engine matches against and the transcript shows to operators.

/// Incremental lossy UTF-8 decoder.
///
/// Feed raw chunks as they arrive; an incomplete trailing sequence is
/// carried over to the next call instead of being mangled. Invalid bytes
/// emit the replacement char `�` and never stall the stream.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    carry: Vec<u8>,
}

impl Utf8Accumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, returning all complete characters.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.carry
            .extend_from_slice(chunk);

        let mut output = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(valid) => {
                    output.push_str(valid);
                    self.carry
                        .clear();
                    break;
                },
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if valid_up_to > 0 {
                        if let Ok(valid) = std::str::from_utf8(&self.carry[..valid_up_to]) {
                            output.push_str(valid);
                        }
                    }

                    match err.error_len() {
                        Some(invalid_len) => {
                            output.push('\u{FFFD}');
                            let drain_to = valid_up_to
                                .saturating_add(invalid_len)
                                .min(self.carry.len());
                            self.carry
                                .drain(..drain_to);
                        },
                        None => {
                            // Incomplete suffix: keep it for the next chunk.
                            if valid_up_to > 0 {
                                self.carry
                                    .drain(..valid_up_to);
                            }
                            break;
                        },
                    }
                },
            }
        }

        output
    }

    /// Flush any carried bytes as replacement chars (end of stream).
    pub fn finish(&mut self) -> String {
        if self
            .carry
            .is_empty()
        {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry
            .clear();
        out
    }
}

/// Filter non-printable control characters out of console output.
///
/// Keeps `\n`, `\t` and printable Unicode chars.
/// Converts carriage returns (`\r`) to newlines (`\n`).
/// Drops other control characters (ANSI escapes, bells, backspaces).
pub fn clean_console_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' => out.push('\n'),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

/// Format console output for a live terminal, with optional timestamps.
///
/// Newlines become `\r\n` for raw-mode terminals; with `timestamp` set,
/// each line start is prefixed with a dimmed `[HH:MM:SS.mmm]` marker.
pub fn format_console_output(text: &str, timestamp: bool, at_line_start: &mut bool) -> String {
    let normalized = text
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    if !timestamp {
        let mut out = String::with_capacity(normalized.len() * 2);
        for c in normalized.chars() {
            match c {
                '\n' => {
                    out.push_str("\r\n");
                    *at_line_start = true;
                },
                _ => {
                    out.push(c);
                    *at_line_start = false;
                },
            }
        }
        return out;
    }

    let mut out = String::with_capacity(normalized.len() + 128);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let total_secs = now.as_secs();
    let millis = now.subsec_millis();
    let hours = (total_secs / 3600) % 24;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;

    for c in normalized.chars() {
        match c {
            '\n' => {
                out.push_str("\r\n");
                *at_line_start = true;
            },
            _ => {
                if *at_line_start {
                    use std::fmt::Write;
                    let _ = write!(
                        out,
                        "\x1b[90m[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}]\x1b[0m "
                    );
                    *at_line_start = false;
                }
                out.push(c);
            },
        }
    }

    out
}

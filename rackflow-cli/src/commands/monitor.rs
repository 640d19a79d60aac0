//! Monitor command: a manual serial console.
//!
//! - Reader thread: serial → terminal (with optional timestamps)
//! - Main thread: keyboard (crossterm raw mode) → serial
//! - Ctrl+C: exit
//! - Ctrl+B: send a break condition
//! - Ctrl+T: toggle timestamp display

use anyhow::{Context, Result};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use std::io;
use std::io::{Read as _, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rackflow::{ConsoleSession, Utf8Accumulator, clean_console_text, format_console_output};

use crate::config::Config;
use crate::{Cli, resolve_baud, resolve_port, was_cancelled};

/// Bytes a non-modifier key puts on the wire, or `None` when the key is
/// not forwarded.
fn encode_key(code: KeyCode) -> Option<Vec<u8>> {
    match code {
        // Device consoles expect a bare carriage return for "enter".
        KeyCode::Enter => Some(b"\r".to_vec()),
        KeyCode::Backspace => Some(vec![0x08]),
        KeyCode::Tab => Some(vec![0x09]),
        KeyCode::Esc => Some(vec![0x1B]),
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            Some(
                c.encode_utf8(&mut buf)
                    .as_bytes()
                    .to_vec(),
            )
        },
        _ => None,
    }
}

pub(crate) fn cmd_monitor(cli: &Cli, config: &Config, timestamps: bool) -> Result<()> {
    let port_name = resolve_port(cli, config)?;
    let baud = resolve_baud(cli, config);

    eprintln!(
        "{} opening {} @ {baud}",
        style("📡").cyan(),
        style(&port_name).green()
    );
    eprintln!(
        "{}",
        style("Ctrl+C exit · Ctrl+B break · Ctrl+T timestamps").dim()
    );

    let session = ConsoleSession::open(&port_name, baud)
        .with_context(|| format!("Failed to open {port_name}"))?;
    let mut reader = session
        .try_clone_reader()
        .context("Failed to clone the serial reader handle")?;
    let mut writer = session;

    let running = Arc::new(AtomicBool::new(true));
    let running_reader = Arc::clone(&running);
    let show_timestamp = Arc::new(AtomicBool::new(timestamps));
    let show_timestamp_reader = Arc::clone(&show_timestamp);

    // Reader thread: serial → terminal
    let reader_handle = std::thread::spawn(move || {
        let mut buf = [0u8; 1024];
        let mut decoder = Utf8Accumulator::new();
        let mut at_line_start = true;

        while running_reader.load(Ordering::Relaxed) {
            match reader.read(&mut buf) {
                Ok(0) => {},
                Ok(n) => {
                    let text = clean_console_text(&decoder.push(&buf[..n]));
                    if !text.is_empty() {
                        let output = format_console_output(
                            &text,
                            show_timestamp_reader.load(Ordering::Relaxed),
                            &mut at_line_start,
                        );
                        eprint!("{output}");
                        io::stderr()
                            .flush()
                            .ok();
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {},
                Err(_) => break,
            }
        }
    });

    terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
    let _raw_guard = RawModeGuard;

    // Main thread: keyboard → serial
    while running.load(Ordering::Relaxed) {
        if was_cancelled() {
            running.store(false, Ordering::Relaxed);
            break;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent {
                code, modifiers, ..
            }) = event::read()?
            {
                match (code, modifiers) {
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                        running.store(false, Ordering::Relaxed);
                        break;
                    },
                    (KeyCode::Char('b'), KeyModifiers::CONTROL) => {
                        eprint!("\r\n{} break\r\n", style("⚡").yellow());
                        if let Err(e) = writer.send_break() {
                            eprint!(
                                "\r\n{} break failed: {e}\r\n",
                                style("⚠").yellow()
                            );
                        }
                    },
                    (KeyCode::Char('t'), KeyModifiers::CONTROL) => {
                        let current = show_timestamp.load(Ordering::Relaxed);
                        show_timestamp.store(!current, Ordering::Relaxed);
                        eprint!(
                            "\r\n{} timestamps {}\r\n",
                            style("⏱").cyan(),
                            if current { "off" } else { "on" }
                        );
                    },
                    (code, KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                        if let Some(bytes) = encode_key(code) {
                            let _ = writer.write_bytes(&bytes);
                        }
                    },
                    _ => {},
                }
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = reader_handle.join();
    eprintln!("\r\n{} console closed", style("👋").cyan());
    Ok(())
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

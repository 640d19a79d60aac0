//! # rackflow
//!
//! Unattended factory-reset automation for network-device serial consoles.
//!
//! This crate provides the core machinery for wiping managed switches over
//! their console ports, including:
//!
//! - JSON workflow definitions (vendor differences as data, not code)
//! - An expect-style step interpreter with device pager handling
//! - Boot-window interrupt injection (keystrokes or a break condition)
//! - A `STATUS_FLAG::` status protocol over stdout plus a raw transcript
//!   over stderr
//! - A process orchestrator running one engine per port with per-port
//!   event queues
//!
//! ## Example
//!
//! ```rust,no_run
//! use rackflow::{Interpreter, NativePort, WorkflowDefinition};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = WorkflowDefinition::from_file("templates/cisco-catalyst-2960x.json")?;
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 9600)?;
//!
//!     let mut interpreter = Interpreter::new(port, std::io::stderr());
//!     interpreter.run(&workflow, |status| {
//!         println!("{}", status.to_line());
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod expect;
pub mod interpreter;
pub mod interrupt;
pub mod monitor;
pub mod orchestrator;
pub mod port;
pub mod status;
pub mod transcript;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testutil;

static CANCEL_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global cancellation checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_cancel_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = CANCEL_CHECKER.set(Arc::new(checker));
}

/// Returns whether cancellation was requested by the embedding application.
#[must_use]
pub fn is_cancel_requested() -> bool {
    CANCEL_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_cancelled(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_CANCEL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_CANCEL_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_cancel_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
pub use {
    error::{Error, Result},
    expect::{ExpectReader, PAGER_MARKERS, SessionBuffer},
    interpreter::{Interpreter, RunState},
    interrupt::{BREAK_TOKEN, InterruptInjector, InterruptToken},
    monitor::ConsoleSession,
    orchestrator::{Orchestrator, SessionEvent},
    port::{DEFAULT_BAUD_RATE, NativePort, Port, SerialConfig},
    status::{STATUS_FLAG, StatusEvent},
    transcript::{Utf8Accumulator, clean_console_text, format_console_output},
    workflow::{Step, WorkflowDefinition},
};

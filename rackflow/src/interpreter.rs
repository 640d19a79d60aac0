//! Step interpreter: drives one workflow against one serial console.
//!
//! The interpreter walks the steps in order, emitting each step's status
//! event before touching the wire so operators watching the status board
//! always know what the device is waiting on. There are no per-step
//! retries; a procedure that needs a second attempt expresses it as
//! additional steps in the workflow document.

use std::io::Write;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::expect::{DEFAULT_POLL_INTERVAL, ExpectReader, SessionBuffer};
use crate::interrupt::{BREAK_HOLD, InterruptInjector, InterruptToken};
use crate::is_cancel_requested;
use crate::port::Port;
use crate::status::StatusEvent;
use crate::transcript::Utf8Accumulator;
use crate::workflow::{Step, WorkflowDefinition};

/// Settling delay after a command with no expect pattern.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Observable interpreter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Nothing loaded yet.
    #[default]
    Idle,
    /// Validating the workflow document.
    Loading,
    /// Preparing the serial connection.
    Connecting,
    /// Executing the step at this index.
    Running(usize),
    /// Every step completed.
    Succeeded,
    /// A step failed; the run stopped.
    Failed,
}

/// Executes a workflow against a port, reporting progress through a
/// status sink and echoing raw console text to a transcript writer.
pub struct Interpreter<P: Port, W: Write> {
    port: P,
    transcript: W,
    buffer: SessionBuffer,
    decoder: Utf8Accumulator,
    poll_interval: Duration,
    settle: Duration,
    break_hold: Duration,
    state: RunState,
}

impl<P: Port, W: Write> Interpreter<P, W> {
    /// Create an interpreter over an open port.
    pub fn new(port: P, transcript: W) -> Self {
        Self {
            port,
            transcript,
            buffer: SessionBuffer::new(),
            decoder: Utf8Accumulator::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle: DEFAULT_SETTLE,
            break_hold: BREAK_HOLD,
            state: RunState::Idle,
        }
    }

    /// Override the port poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the post-command settling delay.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Override the break hold duration.
    #[must_use]
    pub fn with_break_hold(mut self, hold: Duration) -> Self {
        self.break_hold = hold;
        self
    }

    /// Current interpreter state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run the workflow to completion.
    ///
    /// Every status event (including the terminal success/failure event)
    /// goes through `sink`. The error behind a failure is also returned.
    pub fn run<F>(&mut self, workflow: &WorkflowDefinition, mut sink: F) -> Result<()>
    where
        F: FnMut(&StatusEvent),
    {
        match self.run_steps(workflow, &mut sink) {
            Ok(()) => {
                self.state = RunState::Succeeded;
                log::info!("workflow '{}' finished on {}", workflow.name, self.port.name());
                sink(&StatusEvent::succeeded());
                Ok(())
            },
            Err(e) => {
                self.state = RunState::Failed;
                log::error!("workflow '{}' failed on {}: {e}", workflow.name, self.port.name());
                sink(&StatusEvent::failed());
                Err(e)
            },
        }
    }

    fn run_steps<F>(&mut self, workflow: &WorkflowDefinition, sink: &mut F) -> Result<()>
    where
        F: FnMut(&StatusEvent),
    {
        self.state = RunState::Loading;
        for warning in workflow.validate()? {
            log::warn!("{warning}");
        }

        self.state = RunState::Connecting;
        self.port
            .clear_buffers()?;
        self.buffer
            .clear();

        for (i, step) in workflow
            .steps
            .iter()
            .enumerate()
        {
            if is_cancel_requested() {
                return Err(Error::Cancelled);
            }
            if step.is_noop() {
                log::warn!("skipping placeholder step '{}'", step.name);
                continue;
            }

            self.state = RunState::Running(i);
            log::info!(
                "step {}/{}: {}",
                i + 1,
                workflow
                    .steps
                    .len(),
                step.name
            );
            sink(&StatusEvent::step(step.label(), step.require_physical_interact));

            self.execute_step(step)?;
            self.buffer
                .clear();
        }

        Ok(())
    }

    fn execute_step(&mut self, step: &Step) -> Result<()> {
        let deadline = step.deadline();

        if let Some(interrupt) = step
            .interrupt
            .as_deref()
        {
            let pattern = step
                .expect
                .as_deref()
                .ok_or_else(|| {
                    Error::Definition(format!("step '{}' has no expect pattern", step.name))
                })?;
            let token = InterruptToken::parse(interrupt);
            InterruptInjector::new(
                &mut self.port,
                &mut self.buffer,
                &mut self.decoder,
                &mut self.transcript,
            )
            .with_poll_interval(self.poll_interval)
            .with_break_hold(self.break_hold)
            .inject_until(&token, pattern, deadline)?;
            return Ok(());
        }

        if let Some(command) = step
            .command
            .as_deref()
        {
            let mut payload = command.to_string();
            payload.push('\r');
            self.port
                .write_all_bytes(payload.as_bytes())
                .map_err(|e| Error::Transmission(format!("step '{}': {e}", step.name)))?;
        }

        if let Some(pattern) = step
            .expect
            .as_deref()
        {
            ExpectReader::new(
                &mut self.port,
                &mut self.buffer,
                &mut self.decoder,
                &mut self.transcript,
            )
            .with_poll_interval(self.poll_interval)
            .read_until(pattern, deadline)?;
        } else {
            // Fire-and-forget command: give the device a moment to accept
            // it before the next step.
            std::thread::sleep(self.settle);
        }

        Ok(())
    }
}

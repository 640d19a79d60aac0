//! Process orchestrator: one engine child per serial port.
//!
//! Each port gets its own engine process, so a wedged serial read on one
//! device can never stall the others. The orchestrator owns the process
//! lifecycle and republishes everything a child reports as a per-port
//! event queue: status events parsed from stdout, transcript text from
//! stderr, and a terminal `Done` event when the child exits.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::status::StatusEvent;
use crate::transcript::Utf8Accumulator;

/// How often the supervisor checks a finished child for its exit status.
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Something a supervised engine produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The engine's process id, reported once at spawn.
    Pid(u32),
    /// A status event parsed from the engine's stdout.
    Status(StatusEvent),
    /// Transcript text from the engine's stderr, delivered as it arrives.
    Output(String),
    /// Orchestrator bookkeeping and anomalous (unprefixed) stdout.
    Info(String),
    /// The engine exited. Always the final event for a session.
    Done {
        /// Whether the exit status was zero.
        success: bool,
        /// The exit code, when the platform reports one.
        exit_code: Option<i32>,
    },
}

struct DeviceSession {
    child: Arc<Mutex<Child>>,
    pid: u32,
    rx: Receiver<SessionEvent>,
    last_status: Option<StatusEvent>,
    running: bool,
    supervisor: Option<JoinHandle<()>>,
}

/// Supervises one engine process per port id.
#[derive(Default)]
pub struct Orchestrator {
    sessions: HashMap<String, DeviceSession>,
}

impl Orchestrator {
    /// Create an empty orchestrator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an engine for `port_id` and start supervising it.
    ///
    /// Returns the child's pid. Fails while a session exists for the port;
    /// a finished session is removed once its `Done` event has been polled,
    /// which frees the port for a restart without losing queued events.
    pub fn start(&mut self, port_id: &str, mut command: Command) -> Result<u32> {
        if self
            .sessions
            .contains_key(port_id)
        {
            return Err(Error::Process(format!(
                "a session is already running for {port_id}"
            )));
        }

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn engine for {port_id}: {e}")))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("engine stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Process("engine stderr was not captured".to_string()))?;

        let (tx, rx) = channel();
        let _ = tx.send(SessionEvent::Info(format!(
            "Started reset on {port_id} (pid {pid})"
        )));
        let _ = tx.send(SessionEvent::Pid(pid));

        let child = Arc::new(Mutex::new(child));
        let supervisor = spawn_supervisor(port_id.to_string(), Arc::clone(&child), stdout, stderr, tx);

        self.sessions
            .insert(
                port_id.to_string(),
                DeviceSession {
                    child,
                    pid,
                    rx,
                    last_status: None,
                    running: true,
                    supervisor: Some(supervisor),
                },
            );

        log::info!("started engine for {port_id} (pid {pid})");
        Ok(pid)
    }

    /// Drain every queued event for `port_id` without blocking.
    ///
    /// Events are handed out exactly once, in order. After the session's
    /// `Done` event has been returned the session is removed.
    pub fn poll(&mut self, port_id: &str) -> Vec<SessionEvent> {
        let Some(session) = self
            .sessions
            .get_mut(port_id)
        else {
            return Vec::new();
        };

        let mut events = Vec::new();
        loop {
            match session
                .rx
                .try_recv()
            {
                Ok(event) => {
                    match &event {
                        SessionEvent::Status(status) => {
                            session.last_status = Some(status.clone());
                        },
                        SessionEvent::Done { .. } => {
                            session.running = false;
                        },
                        _ => {},
                    }
                    events.push(event);
                },
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        if !session.running {
            if let Some(handle) = session
                .supervisor
                .take()
            {
                let _ = handle.join();
            }
            self.sessions
                .remove(port_id);
        }

        events
    }

    /// Kill the engine for `port_id`.
    ///
    /// The supervisor observes the exit and produces the session's failure
    /// status and `Done` event through the normal queue.
    pub fn cancel(&mut self, port_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get(port_id)
            .ok_or_else(|| Error::Process(format!("no session for {port_id}")))?;

        log::info!("cancelling session for {port_id} (pid {})", session.pid);
        let mut child = session
            .child
            .lock()
            .map_err(|_| Error::Process("session handle poisoned".to_string()))?;
        if child
            .try_wait()?
            .is_none()
        {
            child.kill()?;
        }
        Ok(())
    }

    /// Cancel every active session.
    pub fn cancel_all(&mut self) {
        let ports = self.ports();
        for port in ports {
            if let Err(e) = self.cancel(&port) {
                log::warn!("cancel failed for {port}: {e}");
            }
        }
    }

    /// Port ids with a live session.
    #[must_use]
    pub fn ports(&self) -> Vec<String> {
        self.sessions
            .keys()
            .cloned()
            .collect()
    }

    /// Whether a session exists and has not yet delivered `Done`.
    #[must_use]
    pub fn running(&self, port_id: &str) -> bool {
        self.sessions
            .get(port_id)
            .is_some_and(|s| s.running)
    }

    /// The most recent status event seen for `port_id`.
    #[must_use]
    pub fn last_status(&self, port_id: &str) -> Option<&StatusEvent> {
        self.sessions
            .get(port_id)
            .and_then(|s| {
                s.last_status
                    .as_ref()
            })
    }
}

fn spawn_supervisor(
    port_id: String,
    child: Arc<Mutex<Child>>,
    stdout: impl Read + Send + 'static,
    stderr: impl Read + Send + 'static,
    tx: Sender<SessionEvent>,
) -> JoinHandle<()> {
    let transcript_tx = tx.clone();
    // Transcript bytes are forwarded as soon as read() returns them; no
    // line buffering, so a bare prompt with no newline still shows up.
    let transcript = std::thread::spawn(move || {
        let mut stderr = stderr;
        let mut decoder = Utf8Accumulator::new();
        let mut chunk = [0u8; 256];
        loop {
            match stderr.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = decoder.push(&chunk[..n]);
                    if !text.is_empty() {
                        let _ = transcript_tx.send(SessionEvent::Output(text));
                    }
                },
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = transcript_tx.send(SessionEvent::Output(rest));
        }
    });

    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            match StatusEvent::parse_line(&line) {
                Some(status) => {
                    let _ = tx.send(SessionEvent::Status(status));
                },
                None => {
                    if !line
                        .trim()
                        .is_empty()
                    {
                        let _ = tx.send(SessionEvent::Info(format!("[{port_id}] {line}")));
                    }
                },
            }
        }

        let _ = transcript.join();

        // Reap without holding the lock, so cancel() can get in to kill.
        let exit = loop {
            let waited = child
                .lock()
                .ok()
                .and_then(|mut c| {
                    c.try_wait()
                        .ok()
                });
            match waited {
                Some(Some(status)) => break status,
                Some(None) => std::thread::sleep(REAP_INTERVAL),
                None => {
                    std::thread::sleep(REAP_INTERVAL);
                },
            }
        };

        let success = exit.success();
        let exit_code = exit.code();
        let _ = tx.send(SessionEvent::Info(format!(
            "Engine for {port_id} exited ({exit})"
        )));
        // The engine normally reports its own terminal status; this one
        // covers children that died without printing it.
        let _ = tx.send(SessionEvent::Status(if success {
            StatusEvent::succeeded()
        } else {
            StatusEvent::failed()
        }));
        let _ = tx.send(SessionEvent::Done { success, exit_code });
    })
}

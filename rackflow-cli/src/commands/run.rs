//! Run command: the single-device engine process.
//!
//! Stream contract: stdout carries only `STATUS_FLAG::` lines, stderr
//! carries the raw console transcript (and, via env_logger, engine
//! diagnostics). The hub supervises this process and splits the streams
//! back apart.

use anyhow::{Context, Result};
use log::info;
use std::io::Write as _;
use std::path::Path;

use rackflow::{Interpreter, NativePort, SerialConfig, StatusEvent, WorkflowDefinition};

use crate::config::Config;
use crate::{Cli, resolve_baud, resolve_port};

/// Emit one status event on stdout, flushed so a supervising process sees
/// it immediately.
fn emit(event: &StatusEvent) {
    println!("{}", event.to_line());
    let _ = std::io::stdout().flush();
}

pub(crate) fn cmd_run(cli: &Cli, config: &Config, workflow_path: &Path) -> Result<()> {
    // A failure before the interpreter even starts still owes the status
    // channel its fatal event.
    let workflow = match WorkflowDefinition::from_file(workflow_path) {
        Ok(workflow) => workflow,
        Err(e) => {
            emit(&StatusEvent::failed());
            return Err(e)
                .with_context(|| format!("Failed to load workflow {}", workflow_path.display()));
        },
    };

    let port_name = match resolve_port(cli, config) {
        Ok(name) => name,
        Err(e) => {
            emit(&StatusEvent::failed());
            return Err(e);
        },
    };
    let baud = resolve_baud(cli, config);

    info!("running '{}' on {port_name} @ {baud}", workflow.name);

    let port = match NativePort::open(&SerialConfig::new(&port_name, baud)) {
        Ok(port) => port,
        Err(e) => {
            emit(&StatusEvent::failed());
            return Err(e).with_context(|| format!("Failed to open {port_name}"));
        },
    };

    let mut interpreter = Interpreter::new(port, std::io::stderr());
    if let Some(poll) = config
        .engine
        .poll_interval()
    {
        interpreter = interpreter.with_poll_interval(poll);
    }
    if let Some(settle) = config
        .engine
        .settle()
    {
        interpreter = interpreter.with_settle(settle);
    }

    // The interpreter emits every status event itself, including the
    // terminal one.
    interpreter
        .run(&workflow, |event| emit(event))
        .with_context(|| format!("Workflow '{}' failed on {port_name}", workflow.name))?;

    Ok(())
}

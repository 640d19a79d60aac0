//! Hub command: drive a bench of devices in parallel.
//!
//! One engine child per port, supervised through the library orchestrator;
//! an indicatif spinner per port shows each device's latest status. Ctrl-C
//! cancels every session and waits a bounded grace period for the engines
//! to wind down.

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use rackflow::{Orchestrator, SessionEvent, StatusEvent, WorkflowDefinition};

use crate::config::Config;
use crate::{Cli, resolve_baud, was_cancelled};

/// How long cancelled engines get to deliver their `Done` events.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Board refresh / orchestrator poll interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Render a status event for the per-port spinner.
fn status_message(status: &StatusEvent) -> String {
    if status.complete {
        style(&status.text)
            .green()
            .to_string()
    } else if status.is_failure() {
        style(&status.text)
            .red()
            .bold()
            .to_string()
    } else if status.interactive {
        format!(
            "{} {}",
            style("⚠").yellow(),
            style(&status.text).yellow()
        )
    } else {
        status
            .text
            .clone()
    }
}

pub(crate) fn cmd_hub(
    cli: &Cli,
    config: &Config,
    workflow_path: &Path,
    ports: &[String],
    yes: bool,
) -> Result<()> {
    // Fail fast on a bad document before any engine spawns.
    let workflow = WorkflowDefinition::from_file(workflow_path)
        .with_context(|| format!("Failed to load workflow {}", workflow_path.display()))?;
    let warnings = workflow
        .validate()
        .context("Workflow failed validation")?;
    for warning in &warnings {
        warn!("{warning}");
    }

    if !yes && !cli.non_interactive {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Run '{}' on {} port(s)? This erases device configuration",
                workflow.name,
                ports.len()
            ))
            .default(false)
            .interact()
            .context("Confirmation prompt failed")?;
        if !confirmed {
            bail!("Aborted by user");
        }
    }

    let exe = std::env::current_exe().context("Could not locate the rackflow executable")?;
    let baud = resolve_baud(cli, config);

    let mut orchestrator = Orchestrator::new();
    for port in ports {
        let mut command = Command::new(&exe);
        command
            .arg("--port")
            .arg(port)
            .arg("--baud")
            .arg(baud.to_string())
            .arg("run")
            .arg(workflow_path);
        if let Some(ref config_path) = cli.config_path {
            command
                .arg("--config")
                .arg(config_path);
        }
        orchestrator.start(port, command)?;
    }

    let multi = MultiProgress::new();
    let spinner_style = ProgressStyle::with_template("{spinner:.green} {prefix:<16} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bars: Vec<(String, ProgressBar)> = ports
        .iter()
        .map(|port| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(spinner_style.clone());
            bar.set_prefix(port.clone());
            bar.set_message("starting engine");
            bar.enable_steady_tick(Duration::from_millis(100));
            (port.clone(), bar)
        })
        .collect();

    let mut finished: HashSet<String> = HashSet::new();
    let mut failed: Vec<String> = Vec::new();
    let mut cancel_deadline: Option<Instant> = None;

    while finished.len() < ports.len() {
        if was_cancelled() && cancel_deadline.is_none() {
            let _ = multi.println(format!(
                "{} cancelling {} session(s)...",
                style("✗").red(),
                ports.len() - finished.len()
            ));
            orchestrator.cancel_all();
            cancel_deadline = Some(Instant::now() + CANCEL_GRACE);
        }

        for (port, bar) in &bars {
            if finished.contains(port) {
                continue;
            }
            for event in orchestrator.poll(port) {
                match event {
                    SessionEvent::Pid(pid) => {
                        debug!("{port}: engine pid {pid}");
                    },
                    SessionEvent::Status(status) => {
                        bar.set_message(status_message(&status));
                    },
                    SessionEvent::Output(text) => {
                        // Transcripts stay off the board; rerun with `run`
                        // on one port to watch a console live.
                        debug!("{port}: {}", text.trim_end());
                    },
                    SessionEvent::Info(message) => {
                        let _ = multi.println(format!("{} {message}", style("·").dim()));
                    },
                    SessionEvent::Done { success, exit_code } => {
                        finished.insert(port.clone());
                        if success {
                            bar.finish_with_message(
                                style("Successfully Finished")
                                    .green()
                                    .to_string(),
                            );
                        } else {
                            failed.push(port.clone());
                            bar.finish_with_message(
                                style(format!(
                                    "Fatally Failed (exit {})",
                                    exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
                                ))
                                .red()
                                .bold()
                                .to_string(),
                            );
                        }
                    },
                }
            }
        }

        if let Some(deadline) = cancel_deadline {
            if Instant::now() >= deadline {
                warn!(
                    "{} session(s) did not wind down within the grace period",
                    ports.len() - finished.len()
                );
                break;
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    if was_cancelled() {
        bail!("Cancelled");
    }
    if !failed.is_empty() {
        bail!("{} port(s) failed: {}", failed.len(), failed.join(", "));
    }

    eprintln!(
        "{} all {} port(s) finished successfully",
        style("✓")
            .green()
            .bold(),
        ports.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_success_is_plain_green() {
        console::set_colors_enabled(false);
        let msg = status_message(&StatusEvent::succeeded());
        assert_eq!(msg, "Successfully Finished");
    }

    #[test]
    fn test_status_message_failure() {
        console::set_colors_enabled(false);
        let msg = status_message(&StatusEvent::failed());
        assert_eq!(msg, "Fatally Failed");
    }

    #[test]
    fn test_status_message_interactive_gets_warning_marker() {
        console::set_colors_enabled(false);
        let msg = status_message(&StatusEvent::step("Hold the MODE button", true));
        assert!(msg.contains('⚠'));
        assert!(msg.contains("Hold the MODE button"));
    }

    #[test]
    fn test_status_message_ordinary_step_is_verbatim() {
        console::set_colors_enabled(false);
        let msg = status_message(&StatusEvent::step("Erasing configuration", false));
        assert_eq!(msg, "Erasing configuration");
    }
}

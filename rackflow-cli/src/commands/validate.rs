//! Validate command: check a workflow document without touching hardware.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use rackflow::{Step, WorkflowDefinition};

/// A short word describing what a step does on the wire.
fn step_kind(step: &Step) -> &'static str {
    if step
        .interrupt
        .is_some()
    {
        "interrupt"
    } else if step
        .command
        .is_some()
        && step
            .expect
            .is_some()
    {
        "command+expect"
    } else if step
        .command
        .is_some()
    {
        "command"
    } else if step
        .expect
        .is_some()
    {
        "expect"
    } else {
        "no-op"
    }
}

pub(crate) fn cmd_validate(workflow_path: &Path, json: bool) -> Result<()> {
    let result = WorkflowDefinition::from_file(workflow_path).and_then(|workflow| {
        workflow
            .validate()
            .map(|warnings| (workflow, warnings))
    });

    if json {
        let report = match &result {
            Ok((workflow, warnings)) => serde_json::json!({
                "valid": true,
                "name": workflow.name,
                "steps": workflow.steps.len(),
                "warnings": warnings,
            }),
            Err(e) => serde_json::json!({
                "valid": false,
                "error": e.to_string(),
            }),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        let _ = result
            .with_context(|| format!("{} is not a valid workflow", workflow_path.display()))?;
        return Ok(());
    }

    let (workflow, warnings) = result
        .with_context(|| format!("{} is not a valid workflow", workflow_path.display()))?;

    eprintln!(
        "{} {}",
        style("✓")
            .green()
            .bold(),
        style(&workflow.name).bold()
    );
    if let Some(ref description) = workflow.description {
        eprintln!("  {}", style(description).dim());
    }
    eprintln!();

    for (i, step) in workflow
        .steps
        .iter()
        .enumerate()
    {
        eprintln!(
            "  [{:2}] {:<32} {:<16} {:>6.1}s{}",
            i + 1,
            step.name,
            style(step_kind(step)).cyan(),
            step.deadline()
                .as_secs_f64(),
            if step.require_physical_interact {
                format!("  {}", style("physical").yellow())
            } else {
                String::new()
            }
        );
    }

    if !warnings.is_empty() {
        eprintln!();
        for warning in &warnings {
            eprintln!("  {} {warning}", style("⚠").yellow());
        }
    }

    eprintln!(
        "\n{} valid: {} step(s), {} warning(s)",
        style("✓").green(),
        workflow
            .steps
            .len(),
        warnings.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str) -> Step {
        Step {
            name: name.to_string(),
            status: None,
            command: None,
            interrupt: None,
            expect: None,
            timeout: None,
            require_physical_interact: false,
            is_completed: false,
        }
    }

    #[test]
    fn test_step_kind_interrupt_wins() {
        let mut s = step("break");
        s.interrupt = Some("__BREAK__".into());
        s.command = Some("ignored".into());
        s.expect = Some("switch:".into());
        assert_eq!(step_kind(&s), "interrupt");
    }

    #[test]
    fn test_step_kind_command_and_expect() {
        let mut s = step("init");
        s.command = Some("flash_init".into());
        s.expect = Some("switch:".into());
        assert_eq!(step_kind(&s), "command+expect");
    }

    #[test]
    fn test_step_kind_bare_variants() {
        let mut s = step("fire and forget");
        s.command = Some("reset".into());
        assert_eq!(step_kind(&s), "command");

        let mut s = step("wait");
        s.expect = Some("loader>".into());
        assert_eq!(step_kind(&s), "expect");

        assert_eq!(step_kind(&step("todo")), "no-op");
    }
}

//! Workflow definitions: the JSON documents that describe a reset procedure.
//!
//! A workflow is an ordered list of steps. Each step names what it waits
//! for, what it sends, and how long it is allowed to take. Vendor
//! differences live in these documents, not in code; the interpreter is the
//! same for every device.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Default per-step deadline in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: f64 = 30.0;

/// Accept an explicit JSON `null` where a field has a natural default.
fn null_to_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single step in a reset procedure.
///
/// Legacy documents used `status_text`, `expect_regex` and `timeout_sec`;
/// those spellings are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name, shown in logs and used as the status label fallback.
    pub name: String,

    /// Operator-facing status text; defaults to the step name.
    #[serde(default, alias = "status_text")]
    pub status: Option<String>,

    /// Command to transmit, terminated with `\r` on the wire.
    #[serde(default)]
    pub command: Option<String>,

    /// Interrupt payload to inject every poll cycle until `expect` matches.
    ///
    /// The reserved token `"__BREAK__"` requests a break condition instead
    /// of literal keystrokes. When set, `command` is ignored.
    #[serde(default)]
    pub interrupt: Option<String>,

    /// Pattern to wait for, matched case-insensitively as a multi-line
    /// regex over the accumulated session buffer.
    #[serde(default, alias = "expect_regex")]
    pub expect: Option<String>,

    /// Per-step deadline in seconds.
    #[serde(default, alias = "timeout_sec")]
    pub timeout: Option<f64>,

    /// Whether the operator must touch the hardware during this step
    /// (e.g. hold a MODE button). Surfaced on the status channel.
    #[serde(default, deserialize_with = "null_to_default")]
    pub require_physical_interact: bool,

    /// Bookkeeping flag kept for documents exported mid-run.
    #[serde(default, deserialize_with = "null_to_default")]
    pub is_completed: bool,
}

impl Step {
    /// The operator-facing label for this step.
    #[must_use]
    pub fn label(&self) -> &str {
        self.status
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.name)
    }

    /// The step deadline as a `Duration`.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs_f64(
            self.timeout
                .unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
        )
    }

    /// Whether the step has neither a command, an expect, nor an interrupt.
    ///
    /// Such placeholder steps are skipped by the interpreter.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.command
            .is_none()
            && self
                .expect
                .is_none()
            && self
                .interrupt
                .is_none()
    }
}

/// A complete reset procedure for one device family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (e.g. "Cisco Catalyst 2960-X factory reset").
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,

    /// Ordered steps.
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Parse a workflow definition from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Definition(e.to_string()))
    }

    /// Load a workflow definition from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Definition(format!("{}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// Validate the definition.
    ///
    /// Returns non-fatal warnings on success; structural problems are
    /// `Error::Definition` and make the whole run fail before any I/O.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self
            .steps
            .is_empty()
        {
            return Err(Error::Definition(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        let mut warnings = Vec::new();

        for (i, step) in self
            .steps
            .iter()
            .enumerate()
        {
            let pos = i + 1;
            if step
                .name
                .trim()
                .is_empty()
            {
                return Err(Error::Definition(format!("step {pos} has no name")));
            }
            if step
                .interrupt
                .is_some()
                && step
                    .expect
                    .is_none()
            {
                return Err(Error::Definition(format!(
                    "step {pos} ('{}') has an interrupt but no expect pattern",
                    step.name
                )));
            }
            if let Some(t) = step.timeout {
                if !t.is_finite() || t <= 0.0 {
                    return Err(Error::Definition(format!(
                        "step {pos} ('{}') has an invalid timeout: {t}",
                        step.name
                    )));
                }
            }
            if step
                .interrupt
                .is_some()
                && step
                    .command
                    .is_some()
            {
                warnings.push(format!(
                    "step {pos} ('{}') sets both interrupt and command; command is ignored",
                    step.name
                ));
            }
            if step.is_noop() {
                warnings.push(format!(
                    "step {pos} ('{}') has no command, expect, or interrupt and will be skipped",
                    step.name
                ));
            }
        }

        Ok(warnings)
    }
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
    fn test_parse_with_legacy_aliases() {
        let json = r#"{
            "name": "legacy",
            "steps": [
                {
                    "name": "confirm erase",
                    "status_text": "Erasing configuration",
                    "command": "y",
                    "expect_regex": "switch:",
                    "timeout_sec": 12.5
                }
            ]
        }"#;
        let wf = WorkflowDefinition::from_json(json).unwrap();
        let step = &wf.steps[0];
        assert_eq!(step.label(), "Erasing configuration");
        assert_eq!(step.expect.as_deref(), Some("switch:"));
        assert_eq!(step.deadline(), Duration::from_secs_f64(12.5));
    }

    #[test]
    fn test_parse_tolerates_explicit_nulls() {
        let json = r#"{
            "name": "nulls",
            "description": null,
            "steps": [
                {
                    "name": "wait for prompt",
                    "status": null,
                    "command": null,
                    "interrupt": null,
                    "expect": "Would you like to enter",
                    "timeout": null,
                    "require_physical_interact": null
                }
            ]
        }"#;
        let wf = WorkflowDefinition::from_json(json).unwrap();
        let step = &wf.steps[0];
        assert_eq!(step.label(), "wait for prompt");
        assert!(!step.require_physical_interact);
        assert_eq!(step.deadline(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_empty_workflow() {
        let wf = WorkflowDefinition {
            name: "empty".into(),
            description: None,
            steps: vec![],
        };
        assert!(matches!(wf.validate(), Err(Error::Definition(_))));
    }

    #[test]
    fn test_validate_rejects_unnamed_step() {
        let wf = WorkflowDefinition {
            name: "wf".into(),
            description: None,
            steps: vec![step("  ")],
        };
        assert!(matches!(wf.validate(), Err(Error::Definition(_))));
    }

    #[test]
    fn test_validate_rejects_interrupt_without_expect() {
        let mut s = step("break in");
        s.interrupt = Some("__BREAK__".into());
        let wf = WorkflowDefinition {
            name: "wf".into(),
            description: None,
            steps: vec![s],
        };
        let err = wf
            .validate()
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("interrupt but no expect")
        );
    }

    #[test]
    fn test_validate_rejects_bad_timeout() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut s = step("slow");
            s.expect = Some("ok".into());
            s.timeout = Some(bad);
            let wf = WorkflowDefinition {
                name: "wf".into(),
                description: None,
                steps: vec![s],
            };
            assert!(wf.validate().is_err(), "timeout {bad} should be rejected");
        }
    }

    #[test]
    fn test_validate_warns_on_noop_step() {
        let wf = WorkflowDefinition {
            name: "wf".into(),
            description: None,
            steps: vec![step("placeholder")],
        };
        let warnings = wf
            .validate()
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("skipped"));
    }

    #[test]
    fn test_label_falls_back_on_empty_status() {
        let mut s = step("reload");
        s.status = Some(String::new());
        assert_eq!(s.label(), "reload");
    }
}

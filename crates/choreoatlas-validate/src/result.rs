//! Per-step and per-condition validation results

use serde::{Deserialize, Serialize};

/// Outcome of a step, node, or condition check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pass,
    Fail,
    Skip,
}

impl StepStatus {
    pub fn is_pass(self) -> bool {
        self == StepStatus::Pass
    }

    pub fn is_fail(self) -> bool {
        self == StepStatus::Fail
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pass => "PASS",
            StepStatus::Fail => "FAIL",
            StepStatus::Skip => "SKIP",
        };
        write!(f, "{}", s)
    }
}

/// Whether a condition is a pre- or postcondition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Pre,
    Post,
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionKind::Pre => "pre",
            ConditionKind::Post => "post",
        };
        write!(f, "{}", s)
    }
}

/// Result of evaluating one named pre/postcondition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConditionResult {
    pub kind: ConditionKind,
    pub name: String,
    pub expr: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of validating one flow step or graph node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub call: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionResult>,
}

impl StepResult {
    pub fn pass(step: impl Into<String>, call: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            call: call.into(),
            status: StepStatus::Pass,
            message: None,
            conditions: Vec::new(),
        }
    }

    pub fn fail(
        step: impl Into<String>,
        call: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step: step.into(),
            call: call.into(),
            status: StepStatus::Fail,
            message: Some(message.into()),
            conditions: Vec::new(),
        }
    }

    /// Append to the message, separating from any existing text
    pub fn push_message(&mut self, text: &str) {
        match &mut self.message {
            Some(existing) if !existing.is_empty() => {
                existing.push_str(" | ");
                existing.push_str(text);
            }
            _ => self.message = Some(text.to_string()),
        }
    }
}

//! Classified backend outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of trailing lines kept from backend diagnostics.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Maximum number of characters kept from backend diagnostics.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 4000;

/// The generic result of one backend call.
///
/// Derived from the backend's textual output by the classifier; the rest of
/// the orchestrator only ever matches on this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The call succeeded.
    Success,
    /// Another deployment holds the lock for this stage.
    Conflict {
        /// Whether the backend reported the lock as currently held.
        lock_held: bool,
    },
    /// The resources already exist.
    AlreadyExists,
    /// The resources do not exist.
    NotFound,
    /// The backend could not authenticate.
    AuthRequired,
    /// Any other failure, with the raw backend text.
    OtherFailure {
        /// Raw diagnostic output.
        raw: String,
    },
}

impl Outcome {
    /// Creates an `OtherFailure` outcome.
    #[must_use]
    pub fn other(raw: impl Into<String>) -> Self {
        Self::OtherFailure { raw: raw.into() }
    }

    /// Returns true for outcomes that complete an apply.
    #[must_use]
    pub fn is_apply_success(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyExists)
    }

    /// Returns true for outcomes that complete a destroy.
    #[must_use]
    pub fn is_destroy_success(&self) -> bool {
        matches!(self, Self::Success | Self::NotFound)
    }

    /// Returns true for outcomes that pass validation.
    ///
    /// Credential-only failures count as a pass: the configuration is
    /// structurally valid even when the environment has no live login.
    #[must_use]
    pub fn is_validation_success(&self) -> bool {
        matches!(self, Self::Success | Self::AuthRequired)
    }

    /// Returns true for a lock conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Conflict { lock_held: true } => write!(f, "conflict (lock held)"),
            Self::Conflict { lock_held: false } => write!(f, "conflict"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::NotFound => write!(f, "not found"),
            Self::AuthRequired => write!(f, "authentication required"),
            Self::OtherFailure { .. } => write!(f, "failure"),
        }
    }
}

/// A classified outcome together with the raw text it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendResponse {
    /// The classified outcome.
    pub outcome: Outcome,
    /// Combined stdout and stderr of the backend call.
    #[serde(default)]
    pub output: String,
}

impl BackendResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(outcome: Outcome, output: impl Into<String>) -> Self {
        Self {
            outcome,
            output: output.into(),
        }
    }

    /// Creates a success response.
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self::new(Outcome::Success, output)
    }

    /// Creates a failure response whose raw text is also the output.
    #[must_use]
    pub fn failure(output: impl Into<String>) -> Self {
        let output = output.into();
        Self::new(Outcome::other(output.clone()), output)
    }

    /// Returns the bounded tail of the output for operator display.
    #[must_use]
    pub fn diagnostic_tail(&self) -> String {
        diagnostic_tail(&self.output)
    }
}

/// Returns the last lines of `text`, bounded in both lines and characters.
#[must_use]
pub fn diagnostic_tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    let tail = lines[start..].join("\n");

    let count = tail.chars().count();
    if count <= DIAGNOSTIC_TAIL_CHARS {
        return tail;
    }
    tail.chars().skip(count - DIAGNOSTIC_TAIL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_success_sets() {
        assert!(Outcome::Success.is_apply_success());
        assert!(Outcome::AlreadyExists.is_apply_success());
        assert!(!Outcome::NotFound.is_apply_success());

        assert!(Outcome::NotFound.is_destroy_success());
        assert!(!Outcome::AlreadyExists.is_destroy_success());

        assert!(Outcome::AuthRequired.is_validation_success());
        assert!(!Outcome::other("boom").is_validation_success());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Conflict { lock_held: true }.to_string(), "conflict (lock held)");
        assert_eq!(Outcome::other("x").to_string(), "failure");
    }

    #[test]
    fn test_outcome_serialize() {
        let json = serde_json::to_string(&Outcome::Conflict { lock_held: true }).unwrap();
        assert_eq!(json, r#"{"kind":"conflict","lock_held":true}"#);
    }

    #[test]
    fn test_diagnostic_tail_keeps_last_lines() {
        let text: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let tail = diagnostic_tail(&text);

        assert_eq!(tail.lines().count(), DIAGNOSTIC_TAIL_LINES);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }

    #[test]
    fn test_diagnostic_tail_caps_chars() {
        let text = "x".repeat(DIAGNOSTIC_TAIL_CHARS * 2);
        assert_eq!(diagnostic_tail(&text).len(), DIAGNOSTIC_TAIL_CHARS);
    }

    #[test]
    fn test_diagnostic_tail_short_text_untouched() {
        assert_eq!(diagnostic_tail("Error: boom\n"), "Error: boom");
    }
}

//! Error types for the deployflow orchestrator.
//!
//! Stage-level failures (a backend refusing an apply, a destroy that could
//! not complete) are recorded as data in the run report. The types here
//! cover the failures that stop the orchestrator from running at all:
//! malformed stage descriptors, unreadable configuration and cancelled runs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A stage id was requested that is not part of the stage set.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// The run was cancelled by the operator.
    #[error("Run cancelled: {0}")]
    Cancelled(String),
}

/// Metadata about a descriptor error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "STAGE-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors raised while assembling a stage set.
#[derive(Debug, Clone, Error)]
pub enum DescriptorError {
    /// Two descriptors share the same id.
    #[error("Duplicate stage id '{id}'")]
    DuplicateStage {
        /// The duplicated id.
        id: String,
    },

    /// A descriptor depends on a stage that does not exist.
    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency {
        /// The dependent stage.
        stage: String,
        /// The missing dependency.
        dependency: String,
    },

    /// A descriptor lists itself as a dependency.
    #[error("Stage '{id}' cannot depend on itself")]
    SelfDependency {
        /// The offending stage.
        id: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Cycle detected in stage dependencies: {}", cycle_path.join(" -> "))]
    CycleDetected {
        /// The path of stages forming the cycle.
        cycle_path: Vec<String>,
    },

    /// The stage set has no stages.
    #[error("Stage set is empty")]
    Empty,

    /// A descriptor field is invalid.
    #[error("Stage '{id}': {message}")]
    Invalid {
        /// The offending stage.
        id: String,
        /// What is wrong with it.
        message: String,
    },
}

impl DescriptorError {
    /// Creates a cycle error from the stages forming it.
    #[must_use]
    pub fn cycle(cycle_path: Vec<String>) -> Self {
        Self::CycleDetected { cycle_path }
    }

    /// Returns structured diagnostics for this error.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::DuplicateStage { id } => ErrorInfo::new("STAGE-DUPLICATE", self.to_string())
                .with_fix_hint("Give every stage a unique id.")
                .with_context_entry("stage", id),
            Self::UnknownDependency { stage, dependency } => {
                ErrorInfo::new("STAGE-MISSING-DEP", self.to_string())
                    .with_fix_hint("Check depends_on for typos in stage ids.")
                    .with_context_entry("stage", stage)
                    .with_context_entry("dependency", dependency)
            }
            Self::SelfDependency { id } => ErrorInfo::new("STAGE-SELF-DEP", self.to_string())
                .with_context_entry("stage", id),
            Self::CycleDetected { .. } => ErrorInfo::new("STAGE-CYCLE", self.to_string())
                .with_fix_hint("Remove one of the dependencies in the cycle to break it."),
            Self::Empty => ErrorInfo::new("STAGE-EMPTY", self.to_string())
                .with_fix_hint("Declare at least one [[stages]] entry."),
            Self::Invalid { id, .. } => {
                ErrorInfo::new("STAGE-INVALID", self.to_string()).with_context_entry("stage", id)
            }
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("Failed to parse {}: {message}", path.display())]
    Parse {
        /// The file path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The shared environment file does not define the host endpoint.
    #[error("Host endpoint '{key}' is not set in {}", path.display())]
    MissingHost {
        /// The key that was looked up.
        key: String,
        /// The file that was searched.
        path: PathBuf,
    },

    /// A configured value is out of range.
    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

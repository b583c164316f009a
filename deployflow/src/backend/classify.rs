//! Output classification for backend calls.
//!
//! This is the only place that interprets backend text. Each rule maps a
//! case-insensitive pattern to an [`Outcome`]; rules are tried in order and
//! the first match wins. When nothing matches, the process exit status
//! decides between `Success` and `OtherFailure`.

use crate::core::Outcome;
use regex::{Regex, RegexBuilder};

/// Which outcome a rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// An explicit success message.
    Success,
    /// A deployment lock held by another run.
    LockConflict,
    /// Resources already present.
    AlreadyExists,
    /// Resources absent.
    NotFound,
    /// Missing or invalid credentials.
    AuthRequired,
}

impl RuleKind {
    fn outcome(self) -> Outcome {
        match self {
            Self::Success => Outcome::Success,
            Self::LockConflict => Outcome::Conflict { lock_held: true },
            Self::AlreadyExists => Outcome::AlreadyExists,
            Self::NotFound => Outcome::NotFound,
            Self::AuthRequired => Outcome::AuthRequired,
        }
    }
}

/// One entry of the classification table.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    /// The outcome this rule produces.
    pub kind: RuleKind,
    /// Pattern matched against combined stdout and stderr.
    pub pattern: Regex,
    /// Only consult this rule when the process exited non-zero.
    pub only_on_failure: bool,
}

impl ClassificationRule {
    /// Creates a rule from a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn new(kind: RuleKind, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            kind,
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            only_on_failure: false,
        })
    }

    /// Restricts the rule to failed processes.
    #[must_use]
    pub fn only_on_failure(mut self) -> Self {
        self.only_on_failure = true;
        self
    }
}

/// The default rule table, in priority order.
const DEFAULT_RULES: &[(RuleKind, &str, bool)] = &[
    (
        RuleKind::Success,
        r"deployment complete!|validation ok!|destroy complete!",
        false,
    ),
    (
        RuleKind::LockConflict,
        r"deploy(ment)? lock|lock (is )?(already )?(held|acquired)|failed to acquire lock|--force-lock",
        false,
    ),
    // Credential errors often embed "no such file" or "not found".
    (
        RuleKind::AuthRequired,
        r"cannot configure default credentials|unauthenticated|not authenticated|invalid access token|authentication (failed|required)|\b401\b",
        true,
    ),
    (
        RuleKind::AlreadyExists,
        r"already exists|resource_already_exists",
        false,
    ),
    (
        RuleKind::NotFound,
        r"resource_does_not_exist|does not exist|not found|no such (file|resource)|nothing to destroy",
        false,
    ),
];

/// Ordered table of classification rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|&(kind, pattern, only_on_failure)| {
                let rule = ClassificationRule::new(kind, pattern).ok()?;
                Some(if only_on_failure { rule.only_on_failure() } else { rule })
            })
            .collect();
        Self { rules }
    }
}

impl Classifier {
    /// Creates a classifier with the default rule table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier from explicit rules.
    #[must_use]
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Returns the rules in priority order.
    #[must_use]
    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Classifies backend output.
    #[must_use]
    pub fn classify(&self, output: &str, exit_success: bool) -> Outcome {
        self.rules
            .iter()
            .filter(|rule| !(rule.only_on_failure && exit_success))
            .find(|rule| rule.pattern.is_match(output))
            .map_or_else(
                || {
                    if exit_success {
                        Outcome::Success
                    } else {
                        Outcome::other(output.trim())
                    }
                },
                |rule| rule.kind.outcome(),
            )
    }
}

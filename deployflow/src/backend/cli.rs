//! Backend adapter that shells out to the deployment CLI.

use super::{Backend, Classifier};
use crate::context::RunContext;
use crate::core::BackendResponse;
use crate::stages::StageDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default deployment tool.
pub const DEFAULT_PROGRAM: &str = "databricks";

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

fn default_validate() -> Vec<String> {
    args(&["bundle", "validate", "--target", "{target}"])
}

fn default_status() -> Vec<String> {
    args(&["bundle", "summary", "--target", "{target}"])
}

fn default_apply() -> Vec<String> {
    args(&["bundle", "deploy", "--target", "{target}"])
}

fn default_apply_escalated() -> Vec<String> {
    args(&["bundle", "deploy", "--target", "{target}", "--force", "--force-lock"])
}

fn default_destroy() -> Vec<String> {
    args(&["bundle", "destroy", "--target", "{target}", "--auto-approve"])
}

fn default_trigger() -> Vec<String> {
    args(&["bundle", "run", "--target", "{target}", "--no-wait", "{workload}"])
}

fn default_stop() -> Vec<String> {
    args(&["jobs", "cancel-all-runs", "{workload}"])
}

fn default_release_lock() -> Vec<String> {
    args(&["bundle", "deploy", "--target", "{target}", "--force-lock"])
}

/// Argument templates for each backend operation.
///
/// `{target}`, `{profile}` and `{workload}` are substituted per call. When a
/// template does not mention `{profile}`, `--profile <name>` is appended for
/// runs that have a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplates {
    /// Dry-run validation.
    #[serde(default = "default_validate")]
    pub validate: Vec<String>,
    /// Deployed-resource summary.
    #[serde(default = "default_status")]
    pub status: Vec<String>,
    /// Plain deploy.
    #[serde(default = "default_apply")]
    pub apply: Vec<String>,
    /// Deploy overriding conflicts and locks.
    #[serde(default = "default_apply_escalated")]
    pub apply_escalated: Vec<String>,
    /// Teardown.
    #[serde(default = "default_destroy")]
    pub destroy: Vec<String>,
    /// Workload start without waiting.
    #[serde(default = "default_trigger")]
    pub trigger: Vec<String>,
    /// Workload stop signal.
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    /// Stale lock release.
    #[serde(default = "default_release_lock")]
    pub release_lock: Vec<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            validate: default_validate(),
            status: default_status(),
            apply: default_apply(),
            apply_escalated: default_apply_escalated(),
            destroy: default_destroy(),
            trigger: default_trigger(),
            stop: default_stop(),
            release_lock: default_release_lock(),
        }
    }
}

/// Renders a template into concrete arguments.
#[must_use]
pub fn render_args(template: &[String], ctx: &RunContext, workload: Option<&str>) -> Vec<String> {
    let profile = ctx.profile().unwrap_or_default();
    let mut rendered: Vec<String> = template
        .iter()
        .map(|part| {
            part.replace("{target}", &ctx.target)
                .replace("{profile}", profile)
                .replace("{workload}", workload.unwrap_or_default())
        })
        .collect();

    let explicit = template.iter().any(|part| part.contains("{profile}"));
    if !explicit && !profile.is_empty() {
        rendered.push("--profile".to_string());
        rendered.push(profile.to_string());
    }
    rendered
}

/// A backend that runs the deployment CLI as a subprocess per call.
#[derive(Debug, Clone)]
pub struct CliBackend {
    program: String,
    templates: CommandTemplates,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    classifier: Classifier,
}

impl Default for CliBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl CliBackend {
    /// Creates a backend running `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            templates: CommandTemplates::default(),
            env: BTreeMap::new(),
            timeout: None,
            classifier: Classifier::new(),
        }
    }

    /// Sets the argument templates.
    #[must_use]
    pub fn with_templates(mut self, templates: CommandTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// Adds an environment variable for every child process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets a per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(
        &self,
        operation: &str,
        template: &[String],
        stage: &StageDescriptor,
        ctx: &RunContext,
        workload: Option<&str>,
    ) -> BackendResponse {
        let argv = render_args(template, ctx, workload);
        debug!(
            stage = %stage.id,
            operation,
            program = %self.program,
            args = ?argv,
            location = %stage.location.display(),
            "Invoking backend"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&argv)
            .current_dir(&stage.location)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(stage = %stage.id, operation, ?limit, "Backend call timed out");
                    return BackendResponse::failure(format!(
                        "{operation} for stage '{}' timed out after {limit:?}",
                        stage.id
                    ));
                }
            },
            None => cmd.output().await,
        };

        match result {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let outcome = self.classifier.classify(&text, output.status.success());
                debug!(stage = %stage.id, operation, status = ?output.status.code(), %outcome, "Backend call finished");
                BackendResponse::new(outcome, text)
            }
            Err(e) => {
                warn!(stage = %stage.id, operation, error = %e, "Backend unreachable");
                BackendResponse::failure(format!("failed to run '{}': {e}", self.program))
            }
        }
    }
}

#[async_trait]
impl Backend for CliBackend {
    async fn validate(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.run("validate", &self.templates.validate, stage, ctx, None).await
    }

    async fn status(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.run("status", &self.templates.status, stage, ctx, None).await
    }

    async fn apply(&self, stage: &StageDescriptor, ctx: &RunContext, escalate: bool) -> BackendResponse {
        let template = if escalate {
            &self.templates.apply_escalated
        } else {
            &self.templates.apply
        };
        self.run("apply", template, stage, ctx, None).await
    }

    async fn destroy(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.run("destroy", &self.templates.destroy, stage, ctx, None).await
    }

    async fn trigger_workload(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        workload: &str,
    ) -> BackendResponse {
        self.run("trigger", &self.templates.trigger, stage, ctx, Some(workload)).await
    }

    async fn stop_workload(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        workload: &str,
    ) -> BackendResponse {
        self.run("stop", &self.templates.stop, stage, ctx, Some(workload)).await
    }

    async fn release_lock(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.run("release_lock", &self.templates.release_lock, stage, ctx, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Outcome;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_args_substitutes_and_appends_profile() {
        let ctx = RunContext::new("prod").with_profile("ops");
        let rendered = render_args(&default_trigger(), &ctx, Some("gtfs_pipeline"));

        assert_eq!(
            rendered,
            args(&["bundle", "run", "--target", "prod", "--no-wait", "gtfs_pipeline", "--profile", "ops"])
        );
    }

    #[test]
    fn test_render_args_without_profile() {
        let ctx = RunContext::new("dev");
        assert_eq!(
            render_args(&default_validate(), &ctx, None),
            args(&["bundle", "validate", "--target", "dev"])
        );
    }

    #[test]
    fn test_render_args_explicit_profile_placeholder() {
        let ctx = RunContext::new("dev").with_profile("ops");
        let template = args(&["deploy", "-p", "{profile}", "-t", "{target}"]);
        assert_eq!(render_args(&template, &ctx, None), args(&["deploy", "-p", "ops", "-t", "dev"]));
    }

    #[test]
    fn test_escalated_template_breaks_lock() {
        let templates = CommandTemplates::default();
        assert!(templates.apply_escalated.contains(&"--force-lock".to_string()));
        assert!(!templates.apply.contains(&"--force-lock".to_string()));
    }

    #[test]
    fn test_templates_deserialize_with_defaults() {
        let templates: CommandTemplates =
            toml::from_str(r#"apply = ["deploy", "{target}"]"#).unwrap();
        assert_eq!(templates.apply, args(&["deploy", "{target}"]));
        assert_eq!(templates.destroy, default_destroy());
    }

    #[tokio::test]
    async fn test_missing_program_is_other_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CliBackend::new("deployflow-definitely-missing-tool");
        let stage = StageDescriptor::new("infra", dir.path());
        let ctx = RunContext::new("dev");

        let response = backend.validate(&stage, &ctx).await;
        assert!(matches!(response.outcome, Outcome::OtherFailure { .. }));
        assert!(response.output.contains("deployflow-definitely-missing-tool"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_program_classifies_success() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CliBackend::new("echo").with_env("DATABRICKS_HOST", "example.cloud");
        let stage = StageDescriptor::new("infra", dir.path());
        let ctx = RunContext::new("dev");

        let response = backend.status(&stage, &ctx).await;
        assert_eq!(response.outcome, Outcome::Success);
        assert!(response.output.contains("bundle summary --target dev"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_maps_to_failure() {
        let dir = tempfile::tempdir().unwrap();
        let templates = CommandTemplates {
            validate: args(&["5"]),
            ..CommandTemplates::default()
        };
        let backend = CliBackend::new("sleep")
            .with_templates(templates)
            .with_timeout(Duration::from_millis(50));
        let stage = StageDescriptor::new("infra", dir.path());

        let response = backend.validate(&stage, &RunContext::new("dev")).await;
        assert!(response.output.contains("timed out"));
    }
}

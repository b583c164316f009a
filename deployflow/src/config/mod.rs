//! TOML configuration.
//!
//! Everything has a default, so an empty file (or no file at all) yields the
//! built-in transit stage set deployed with the `databricks` CLI. Relative
//! paths are resolved against the directory holding the config file.

mod environment;

pub use environment::{parse_env_file, read_host};

use crate::backend::{CliBackend, CommandTemplates, DEFAULT_PROGRAM};
use crate::backup::{ConfigBackup, DEFAULT_SUFFIX};
use crate::errors::{ConfigError, DescriptorError};
use crate::pipeline::ReadinessGate;
use crate::stages::{transit_stages, ExistsSignal, StageDescriptor, StageSet, WorkloadTrigger};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "deployflow.toml";

/// Default shared environment file.
pub const DEFAULT_ENV_FILE: &str = "config/shared.env";

/// Default key of the host endpoint.
pub const DEFAULT_HOST_KEY: &str = "DATABRICKS_HOST";

fn default_target() -> String {
    "dev".to_string()
}

fn default_env_file() -> PathBuf {
    PathBuf::from(DEFAULT_ENV_FILE)
}

fn default_host_key() -> String {
    DEFAULT_HOST_KEY.to_string()
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

const fn default_true() -> bool {
    true
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

const fn default_tick_millis() -> u64 {
    1000
}

/// Where the host endpoint comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Shared `KEY=VALUE` file.
    #[serde(default = "default_env_file")]
    pub file: PathBuf,
    /// Key holding the host endpoint; also the variable name passed to the
    /// backend.
    #[serde(default = "default_host_key")]
    pub host_key: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            file: default_env_file(),
            host_key: default_host_key(),
        }
    }
}

/// Deployment CLI settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Program to run.
    #[serde(default = "default_program")]
    pub program: String,
    /// Per-call timeout in seconds; unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Argument templates per operation.
    #[serde(default)]
    pub commands: CommandTemplates,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout_secs: None,
            commands: CommandTemplates::default(),
        }
    }
}

/// Configuration backup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Take a backup before the first mutation.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files to back up; defaults to the shared environment file.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Suffix of the copy.
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: Vec::new(),
            suffix: default_suffix(),
        }
    }
}

/// Readiness gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Length of one progress tick.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
        }
    }
}

/// Workload started after a stage is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Workload id.
    pub workload: String,
    /// Text that confirms the start in the trigger output.
    #[serde(default)]
    pub confirm_marker: Option<String>,
}

/// One `[[stages]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage id.
    pub id: String,
    /// Bundle directory.
    pub location: PathBuf,
    /// Stages that must come first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Markers that show the stage is provisioned.
    #[serde(default)]
    pub exists_markers: Vec<String>,
    /// Status text meaning the stage is not deployed; unset keeps
    /// `(not deployed)`.
    #[serde(default)]
    pub absent_markers: Option<Vec<String>>,
    /// Post-apply workload.
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    /// Readiness wait after the trigger, in seconds.
    #[serde(default)]
    pub readiness_secs: Option<u64>,
    /// Always re-apply with escalation.
    #[serde(default)]
    pub force: bool,
    /// Description for help output.
    #[serde(default)]
    pub description: Option<String>,
}

impl StageConfig {
    fn to_descriptor(&self, base_dir: &Path) -> StageDescriptor {
        let mut signal = ExistsSignal::new(self.exists_markers.iter().cloned());
        if let Some(absent) = &self.absent_markers {
            signal = signal.with_absent_markers(absent.iter().cloned());
        }
        let mut stage = StageDescriptor::new(&self.id, base_dir.join(&self.location))
            .with_dependencies(self.depends_on.iter().cloned())
            .with_exists_signal(signal);
        if let Some(trigger) = &self.trigger {
            let mut workload = WorkloadTrigger::new(&trigger.workload);
            if let Some(marker) = &trigger.confirm_marker {
                workload = workload.with_confirm_marker(marker);
            }
            stage = stage.with_trigger(workload);
        }
        if let Some(secs) = self.readiness_secs {
            stage = stage.with_readiness_wait(Duration::from_secs(secs));
        }
        if self.force {
            stage = stage.forced();
        }
        if let Some(description) = &self.description {
            stage = stage.with_description(description);
        }
        stage
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Default target environment.
    #[serde(default = "default_target")]
    pub target: String,
    /// Default credential profile.
    #[serde(default)]
    pub profile: Option<String>,
    /// Host endpoint source.
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Deployment CLI settings.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Backup settings.
    #[serde(default)]
    pub backup: BackupConfig,
    /// Readiness gate settings.
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Stage declarations; empty means the built-in stage set.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Directory relative paths resolve against (not serialized).
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            profile: None,
            environment: EnvironmentConfig::default(),
            backend: BackendConfig::default(),
            backup: BackupConfig::default(),
            readiness: ReadinessConfig::default(),
            stages: Vec::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl DeployConfig {
    /// Loads the configuration.
    ///
    /// With an explicit path the file must exist. Otherwise
    /// `deployflow.toml` in `cwd` is used when present, and the defaults
    /// (rooted at `cwd`) when not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed or
    /// validated.
    pub fn load(path: Option<&Path>, cwd: &Path) -> Result<Self, ConfigError> {
        let resolved = match path {
            Some(path) => cwd.join(path),
            None => {
                let candidate = cwd.join(DEFAULT_CONFIG_FILE);
                if !candidate.is_file() {
                    debug!(cwd = %cwd.display(), "No config file, using built-in defaults");
                    let config = Self {
                        base_dir: cwd.to_path_buf(),
                        ..Self::default()
                    };
                    config.validate()?;
                    return Ok(config);
                }
                candidate
            }
        };

        let content = std::fs::read_to_string(&resolved).map_err(|source| ConfigError::Read {
            path: resolved.clone(),
            source,
        })?;
        let base_dir = resolved
            .parent()
            .map_or_else(|| cwd.to_path_buf(), Path::to_path_buf);
        let config = Self::from_toml_str(&content, &base_dir).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: resolved.clone(),
                message,
            },
            other => other,
        })?;
        debug!(path = %resolved.display(), stages = config.stages.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parses configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on syntax errors or invalid values.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            message: e.to_string(),
        })?;
        config.base_dir = base_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialization cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::invalid("target", "must not be empty"));
        }
        if self.backend.program.trim().is_empty() {
            return Err(ConfigError::invalid("backend.program", "must not be empty"));
        }
        if self.backend.timeout_secs == Some(0) {
            return Err(ConfigError::invalid("backend.timeout_secs", "must be positive"));
        }
        if self.environment.host_key.trim().is_empty() {
            return Err(ConfigError::invalid("environment.host_key", "must not be empty"));
        }
        if self.readiness.tick_millis == 0 {
            return Err(ConfigError::invalid("readiness.tick_millis", "must be positive"));
        }
        if self.backup.enabled && self.backup.suffix.is_empty() {
            return Err(ConfigError::invalid("backup.suffix", "must not be empty"));
        }
        Ok(())
    }

    /// Resolves a path against the config directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Builds the stage set.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] if the declared stages are inconsistent.
    pub fn stage_set(&self) -> Result<StageSet, DescriptorError> {
        let stages = if self.stages.is_empty() {
            transit_stages()
                .into_iter()
                .map(|mut stage| {
                    stage.location = self.resolve(&stage.location);
                    stage
                })
                .collect()
        } else {
            self.stages
                .iter()
                .map(|s| s.to_descriptor(&self.base_dir))
                .collect()
        };
        StageSet::new(stages)
    }

    /// Reads the host endpoint from the shared environment file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file or key is missing.
    pub fn host(&self) -> Result<String, ConfigError> {
        read_host(&self.resolve(&self.environment.file), &self.environment.host_key)
    }

    /// Builds the CLI backend with the host endpoint injected.
    #[must_use]
    pub fn backend(&self, host: &str) -> CliBackend {
        let backend = CliBackend::new(&self.backend.program)
            .with_templates(self.backend.commands.clone())
            .with_env(&self.environment.host_key, host);
        match self.backend.timeout_secs {
            Some(secs) => backend.with_timeout(Duration::from_secs(secs)),
            None => backend,
        }
    }

    /// Builds the readiness gate.
    #[must_use]
    pub fn readiness_gate(&self) -> ReadinessGate {
        ReadinessGate::new(Duration::from_millis(self.readiness.tick_millis))
    }

    /// Builds the configuration backup, if enabled.
    #[must_use]
    pub fn config_backup(&self) -> Option<ConfigBackup> {
        if !self.backup.enabled {
            return None;
        }
        let paths: Vec<PathBuf> = if self.backup.paths.is_empty() {
            vec![self.resolve(&self.environment.file)]
        } else {
            self.backup.paths.iter().map(|p| self.resolve(p)).collect()
        };
        Some(ConfigBackup::new(paths).with_suffix(&self.backup.suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DeployConfig::from_toml_str("", Path::new("/srv/transit")).unwrap();
        assert_eq!(config.target, "dev");
        assert_eq!(config.backend.program, "databricks");
        assert_eq!(config.readiness_gate().tick(), Duration::from_secs(1));

        let set = config.stage_set().unwrap();
        assert_eq!(set.len(), 5);
        assert_eq!(
            set.get("infra").unwrap().location,
            PathBuf::from("/srv/transit/bundles/infra")
        );
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            target = "prod"
            profile = "ops"

            [environment]
            file = "env/prod.env"

            [backend]
            program = "bundlectl"
            timeout_secs = 600
            [backend.commands]
            destroy = ["teardown", "{target}"]

            [backup]
            paths = ["env/prod.env", "bundles/app/app.yaml"]
            suffix = ".orig"

            [readiness]
            tick_millis = 250

            [[stages]]
            id = "base"
            location = "bundles/base"
            exists_markers = ["base_catalog"]
            absent_markers = ["URL: -"]

            [[stages]]
            id = "ingest"
            location = "bundles/ingest"
            depends_on = ["base"]
            trigger = { workload = "ingest_job", confirm_marker = "Run URL" }
            readiness_secs = 30
            force = true
        "#;
        let config = DeployConfig::from_toml_str(text, Path::new("/srv")).unwrap();

        assert_eq!(config.profile.as_deref(), Some("ops"));
        assert_eq!(config.backend.commands.destroy, vec!["teardown", "{target}"]);
        assert_eq!(config.backend.commands.apply, CommandTemplates::default().apply);
        assert_eq!(config.readiness_gate().tick(), Duration::from_millis(250));

        let set = config.stage_set().unwrap();
        assert_eq!(set.execution_order(), &["base", "ingest"]);
        let base = set.get("base").unwrap();
        assert_eq!(base.exists_signal.absent_markers(), &["URL: -".to_string()]);
        let ingest = set.get("ingest").unwrap();
        assert!(ingest.force);
        assert_eq!(ingest.readiness_wait, Some(Duration::from_secs(30)));
        assert_eq!(ingest.post_apply_trigger.as_ref().unwrap().workload, "ingest_job");

        let backup = config.config_backup().unwrap();
        assert_eq!(backup.paths()[1], PathBuf::from("/srv/bundles/app/app.yaml"));
        assert_eq!(
            backup.backup_path(&backup.paths()[0]),
            PathBuf::from("/srv/env/prod.env.orig")
        );
        assert_eq!(config.backend("https://adb.example").program(), "bundlectl");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = DeployConfig::from_toml_str("[readiness]\ntick_millis = 0", Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "readiness.tick_millis"));

        let err = DeployConfig::from_toml_str("target = \"  \"", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = DeployConfig::from_toml_str("target = ", Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_stage_cycle_surfaces_as_descriptor_error() {
        let text = r#"
            [[stages]]
            id = "a"
            location = "a"
            depends_on = ["b"]

            [[stages]]
            id = "b"
            location = "b"
            depends_on = ["a"]
        "#;
        let config = DeployConfig::from_toml_str(text, Path::new(".")).unwrap();
        assert!(matches!(config.stage_set(), Err(DescriptorError::CycleDetected { .. })));
    }

    #[test]
    fn test_load_discovers_file_and_reads_host() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "target = \"staging\"").unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(
            dir.path().join("config/shared.env"),
            "DATABRICKS_HOST=https://adb.example\n",
        )
        .unwrap();

        let config = DeployConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.target, "staging");
        assert_eq!(config.host().unwrap(), "https://adb.example");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeployConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.base_dir, dir.path());
        assert!(matches!(config.host(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeployConfig::load(Some(Path::new("other.toml")), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_backup_can_be_disabled() {
        let config = DeployConfig::from_toml_str("[backup]\nenabled = false", Path::new(".")).unwrap();
        assert!(config.config_backup().is_none());
    }
}

//! Static stage descriptors.

use crate::errors::DescriptorError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Text the deployment CLI prints for a declared resource that has never
/// been deployed.
pub const NOT_DEPLOYED_MARKER: &str = "(not deployed)";

fn default_absent_markers() -> Vec<String> {
    vec![NOT_DEPLOYED_MARKER.to_string()]
}

/// Markers in a status response that show a stage is provisioned.
///
/// Status output lists every declared resource, deployed or not, so a
/// signal also carries absent markers: any one of them in the output means
/// the stage still needs an apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsSignal {
    markers: Vec<String>,
    #[serde(default = "default_absent_markers")]
    absent_markers: Vec<String>,
}

impl Default for ExistsSignal {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl ExistsSignal {
    /// Creates a signal from a set of markers, with the default absent
    /// marker [`NOT_DEPLOYED_MARKER`].
    #[must_use]
    pub fn new(markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
            absent_markers: default_absent_markers(),
        }
    }

    /// Replaces the absent markers.
    #[must_use]
    pub fn with_absent_markers(mut self, markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.absent_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the markers.
    #[must_use]
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Returns the absent markers.
    #[must_use]
    pub fn absent_markers(&self) -> &[String] {
        &self.absent_markers
    }

    /// Returns true if no markers are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Returns true if every marker and no absent marker occurs in
    /// `status_output`.
    ///
    /// An empty signal never matches.
    #[must_use]
    pub fn matches(&self, status_output: &str) -> bool {
        !self.markers.is_empty()
            && self.markers.iter().all(|m| status_output.contains(m.as_str()))
            && !self.absent_markers.iter().any(|m| status_output.contains(m.as_str()))
    }
}

/// A workload started after a successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadTrigger {
    /// The workload key passed to the backend (job or pipeline resource key).
    pub workload: String,
    /// Text whose presence in the trigger output confirms the start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_marker: Option<String>,
}

impl WorkloadTrigger {
    /// Creates a trigger for a workload.
    #[must_use]
    pub fn new(workload: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            confirm_marker: None,
        }
    }

    /// Sets the confirmation marker.
    #[must_use]
    pub fn with_confirm_marker(mut self, marker: impl Into<String>) -> Self {
        self.confirm_marker = Some(marker.into());
        self
    }

    /// Returns true if the trigger output confirms the workload started.
    ///
    /// Without a marker any output is accepted.
    #[must_use]
    pub fn is_confirmed_by(&self, output: &str) -> bool {
        self.confirm_marker
            .as_deref()
            .map_or(true, |marker| output.contains(marker))
    }
}

/// Immutable description of one deployable stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Unique stage id.
    pub id: String,
    /// Where backend operations for this stage run.
    pub location: PathBuf,
    /// Ids of stages that must be deployed first, in order.
    pub depends_on: Vec<String>,
    /// Markers that show the stage is already provisioned.
    pub exists_signal: ExistsSignal,
    /// Workload to start after apply.
    pub post_apply_trigger: Option<WorkloadTrigger>,
    /// How long to wait after the trigger before the next stage.
    pub readiness_wait: Option<Duration>,
    /// Always re-apply this stage, escalating on the first attempt.
    pub force: bool,
    /// Human-readable description.
    pub description: Option<String>,
}

impl StageDescriptor {
    /// Creates a descriptor with no dependencies or hooks.
    #[must_use]
    pub fn new(id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            depends_on: Vec::new(),
            exists_signal: ExistsSignal::default(),
            post_apply_trigger: None,
            readiness_wait: None,
            force: false,
            description: None,
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the existence markers.
    #[must_use]
    pub fn with_exists_signal(mut self, signal: ExistsSignal) -> Self {
        self.exists_signal = signal;
        self
    }

    /// Sets the post-apply trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: WorkloadTrigger) -> Self {
        self.post_apply_trigger = Some(trigger);
        self
    }

    /// Sets the readiness wait.
    #[must_use]
    pub fn with_readiness_wait(mut self, wait: Duration) -> Self {
        self.readiness_wait = Some(wait);
        self
    }

    /// Marks the stage as always forced.
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validates the descriptor in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is blank, not usable as a flag name, or
    /// the stage depends on itself.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id.trim().is_empty() {
            return Err(DescriptorError::Invalid {
                id: self.id.clone(),
                message: "id cannot be empty".to_string(),
            });
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DescriptorError::Invalid {
                id: self.id.clone(),
                message: "id may only contain letters, digits, '-' and '_'".to_string(),
            });
        }
        if self.depends_on.iter().any(|d| d == &self.id) {
            return Err(DescriptorError::SelfDependency { id: self.id.clone() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_signal_requires_all_markers() {
        let signal = ExistsSignal::new(["gtfs_rt_raw_ingest", "gtfs_pipeline"]);

        assert!(signal.matches("jobs: gtfs_rt_raw_ingest\npipelines: gtfs_pipeline"));
        assert!(!signal.matches("jobs: gtfs_rt_raw_ingest"));
    }

    #[test]
    fn test_declared_but_undeployed_resources_do_not_match() {
        let signal = ExistsSignal::new(["gtfs_rt_raw_ingest"]);
        let fresh = "Name: transit\nTarget: dev\nResources:\n  Jobs:\n    gtfs_rt_raw_ingest:\n      \
            Name: gtfs_rt_raw_ingest\n      URL:  (not deployed)\n";
        let deployed = "Resources:\n  Jobs:\n    gtfs_rt_raw_ingest:\n      \
            URL:  https://example.cloud/jobs/7\n";
        assert!(!signal.matches(fresh));
        assert!(signal.matches(deployed));

        let custom = signal.with_absent_markers(["PENDING"]);
        assert!(custom.matches(fresh.replace("(not deployed)", "-").as_str()));
        assert!(!custom.matches("gtfs_rt_raw_ingest PENDING"));
    }

    #[test]
    fn test_empty_exists_signal_never_matches() {
        let signal = ExistsSignal::default();
        assert!(signal.is_empty());
        assert!(!signal.matches("anything at all"));
    }

    #[test]
    fn test_trigger_confirmation() {
        let trigger = WorkloadTrigger::new("ingest").with_confirm_marker("Run URL");
        assert!(trigger.is_confirmed_by("Run URL: https://host/jobs/1/runs/2"));
        assert!(!trigger.is_confirmed_by("queued"));

        let lenient = WorkloadTrigger::new("ingest");
        assert!(lenient.is_confirmed_by(""));
    }

    #[test]
    fn test_descriptor_builder() {
        let stage = StageDescriptor::new("job", "bundles/job")
            .with_dependency("infra")
            .with_trigger(WorkloadTrigger::new("ingest"))
            .with_readiness_wait(Duration::from_secs(30))
            .forced();

        assert_eq!(stage.depends_on, vec!["infra".to_string()]);
        assert_eq!(stage.readiness_wait, Some(Duration::from_secs(30)));
        assert!(stage.force);
        assert!(stage.validate().is_ok());
    }

    #[test]
    fn test_descriptor_self_dependency() {
        let stage = StageDescriptor::new("job", "bundles/job").with_dependency("job");
        assert!(matches!(stage.validate(), Err(DescriptorError::SelfDependency { .. })));
    }

    #[test]
    fn test_descriptor_rejects_bad_ids() {
        assert!(StageDescriptor::new("", "x").validate().is_err());
        assert!(StageDescriptor::new("has space", "x").validate().is_err());
        assert!(StageDescriptor::new("app_v2", "x").validate().is_ok());
    }
}

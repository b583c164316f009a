//! The built-in stage set for the realtime transit lakehouse.

use super::{ExistsSignal, StageDescriptor, StageSet, WorkloadTrigger};
use crate::errors::DescriptorError;
use std::time::Duration;

/// Readiness wait after starting the raw feed ingestion job.
pub const INGESTION_READINESS: Duration = Duration::from_secs(60);

/// Readiness wait after starting the streaming pipeline.
pub const PIPELINE_READINESS: Duration = Duration::from_secs(90);

/// Marker printed by the backend when a run has been submitted.
const RUN_STARTED_MARKER: &str = "Run URL";

/// Returns the default descriptors, one per bundle.
#[must_use]
pub fn transit_stages() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::new("infra", "bundles/infra")
            .with_exists_signal(ExistsSignal::new(["gtfs_rt_raw"]))
            .with_description("Catalog, schemas and the raw landing volume"),
        StageDescriptor::new("job", "bundles/ingestion-job")
            .with_dependency("infra")
            .with_exists_signal(ExistsSignal::new(["gtfs_rt_raw_ingest"]))
            .with_trigger(
                WorkloadTrigger::new("gtfs_rt_raw_ingest").with_confirm_marker(RUN_STARTED_MARKER),
            )
            .with_readiness_wait(INGESTION_READINESS)
            .with_description("Recurring job polling the realtime feed into the raw volume"),
        StageDescriptor::new("pipeline", "bundles/pipeline")
            .with_dependency("job")
            .with_exists_signal(ExistsSignal::new(["gtfs_pipeline"]))
            .with_trigger(
                WorkloadTrigger::new("gtfs_pipeline").with_confirm_marker(RUN_STARTED_MARKER),
            )
            .with_readiness_wait(PIPELINE_READINESS)
            .with_description("Streaming pipeline turning raw feed files into tables"),
        StageDescriptor::new("sync", "bundles/database-sync")
            .with_dependency("pipeline")
            .with_exists_signal(ExistsSignal::new(["vehicle_positions_synced"]))
            .with_description("Synced tables mirrored into the operational database"),
        StageDescriptor::new("app", "bundles/app")
            .with_dependency("sync")
            .with_exists_signal(ExistsSignal::new(["gtfs-rt-app"]))
            .with_description("Dashboard application"),
    ]
}

/// Returns the default stage set.
///
/// # Errors
///
/// Never fails for the built-in descriptors; the result type mirrors
/// [`StageSet::new`].
pub fn transit_stage_set() -> Result<StageSet, DescriptorError> {
    StageSet::new(transit_stages())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_is_a_linear_chain() {
        let set = transit_stage_set().unwrap();
        assert_eq!(set.execution_order(), &["infra", "job", "pipeline", "sync", "app"]);
    }

    #[test]
    fn test_default_triggers_have_waits() {
        for stage in transit_stages() {
            assert_eq!(
                stage.post_apply_trigger.is_some(),
                stage.readiness_wait.is_some(),
                "stage {}",
                stage.id
            );
        }
    }
}

//! Assertions over stage results.

use crate::context::StageResults;
use crate::core::StageOutcome;

/// Asserts the latest outcome recorded for a stage.
///
/// # Panics
///
/// Panics if the stage has no outcome or it differs from `expected`.
pub fn assert_outcome(results: &StageResults, stage: &str, expected: &StageOutcome) {
    match results.get(stage) {
        Some(actual) => assert_eq!(
            actual, expected,
            "stage '{stage}' recorded {actual}, expected {expected}"
        ),
        None => panic!("no outcome recorded for stage '{stage}'"),
    }
}

/// Asserts that stages were recorded in exactly this order.
///
/// # Panics
///
/// Panics if the recorded order differs.
pub fn assert_recorded_order(results: &StageResults, expected: &[&str]) {
    let actual: Vec<&str> = results.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(actual, expected, "unexpected stage order");
}

/// Asserts that no stage failed.
///
/// # Panics
///
/// Panics naming the first failed stage.
pub fn assert_no_failures(results: &StageResults) {
    if let Some(failed) = results.first_failure() {
        panic!("stage '{}' failed: {}", failed.stage, failed.outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> StageResults {
        let mut results = StageResults::new();
        results.record("infra", StageOutcome::AlreadyExists);
        results.record("job", StageOutcome::Deployed { escalated: false });
        results
    }

    #[test]
    fn test_assertions_pass() {
        let results = results();
        assert_outcome(&results, "infra", &StageOutcome::AlreadyExists);
        assert_recorded_order(&results, &["infra", "job"]);
        assert_no_failures(&results);
    }

    #[test]
    #[should_panic(expected = "no outcome recorded for stage 'app'")]
    fn test_missing_stage_panics() {
        assert_outcome(&results(), "app", &StageOutcome::AlreadyExists);
    }

    #[test]
    #[should_panic(expected = "stage 'app' failed")]
    fn test_failure_panics() {
        let mut results = results();
        results.record("app", StageOutcome::failed("apply failed", ""));
        assert_no_failures(&results);
    }
}

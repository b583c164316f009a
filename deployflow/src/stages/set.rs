//! Validated stage collections with a single dependency order.

use super::StageDescriptor;
use crate::errors::DescriptorError;
use std::collections::{HashMap, HashSet};

/// A validated, topologically ordered set of stages.
///
/// The order is computed once; deploy walks it forwards and teardown walks
/// it backwards.
#[derive(Debug, Clone)]
pub struct StageSet {
    /// Stage descriptors in declaration order.
    stages: Vec<StageDescriptor>,
    /// Index into `stages` by id.
    index: HashMap<String, usize>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
}

impl StageSet {
    /// Creates a stage set.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is empty, an id is duplicated, a
    /// dependency is unknown or the dependencies form a cycle.
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self, DescriptorError> {
        if stages.is_empty() {
            return Err(DescriptorError::Empty);
        }

        let mut index = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            stage.validate()?;
            if index.insert(stage.id.clone(), i).is_some() {
                return Err(DescriptorError::DuplicateStage {
                    id: stage.id.clone(),
                });
            }
        }

        for stage in &stages {
            if let Some(dep) = stage.depends_on.iter().find(|d| !index.contains_key(*d)) {
                return Err(DescriptorError::UnknownDependency {
                    stage: stage.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        let execution_order = topological_sort(&stages, &index)?;

        Ok(Self {
            stages,
            index,
            execution_order,
        })
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the set has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StageDescriptor> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Returns true if a stage with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns stage ids in dependency order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Iterates stages in dependency order.
    pub fn deploy_order(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.execution_order
            .iter()
            .map(move |id| &self.stages[self.index[id]])
    }

    /// Iterates stages in exact reverse dependency order.
    pub fn teardown_order(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.execution_order
            .iter()
            .rev()
            .map(move |id| &self.stages[self.index[id]])
    }

    /// Returns the transitive dependencies of a stage in dependency order.
    ///
    /// The stage itself is not included. Unknown ids yield an empty list.
    #[must_use]
    pub fn prerequisites(&self, id: &str) -> Vec<&StageDescriptor> {
        let mut needed = HashSet::new();
        let mut stack: Vec<&str> = self
            .get(id)
            .map(|s| s.depends_on.iter().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(dep) = stack.pop() {
            if needed.insert(dep.to_string()) {
                if let Some(stage) = self.get(dep) {
                    stack.extend(stage.depends_on.iter().map(String::as_str));
                }
            }
        }

        self.deploy_order()
            .filter(|s| needed.contains(&s.id))
            .collect()
    }
}

/// Performs a depth-first topological sort, visiting in declaration order.
fn topological_sort(
    stages: &[StageDescriptor],
    index: &HashMap<String, usize>,
) -> Result<Vec<String>, DescriptorError> {
    fn visit(
        id: &str,
        stages: &[StageDescriptor],
        index: &HashMap<String, usize>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        result: &mut Vec<String>,
    ) -> Result<(), DescriptorError> {
        if visited.contains(id) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|p| p == id) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(id.to_string());
            return Err(DescriptorError::cycle(cycle));
        }

        path.push(id.to_string());
        for dep in &stages[index[id]].depends_on {
            visit(dep, stages, index, visited, path, result)?;
        }
        path.pop();

        visited.insert(id.to_string());
        result.push(id.to_string());
        Ok(())
    }

    let mut result = Vec::with_capacity(stages.len());
    let mut visited = HashSet::new();
    let mut path = Vec::new();

    for stage in stages {
        visit(&stage.id, stages, index, &mut visited, &mut path, &mut result)?;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stage(id: &str, deps: &[&str]) -> StageDescriptor {
        StageDescriptor::new(id, format!("bundles/{id}")).with_dependencies(deps.iter().copied())
    }

    fn ids<'a>(iter: impl Iterator<Item = &'a StageDescriptor>) -> Vec<String> {
        iter.map(|s| s.id.clone()).collect()
    }

    #[test]
    fn test_linear_chain_order() {
        let set = StageSet::new(vec![
            stage("infra", &[]),
            stage("job", &["infra"]),
            stage("pipeline", &["job"]),
        ])
        .unwrap();

        assert_eq!(set.execution_order(), &["infra", "job", "pipeline"]);
        assert_eq!(ids(set.teardown_order()), vec!["pipeline", "job", "infra"]);
    }

    #[test]
    fn test_dependencies_declared_after_dependents() {
        let set = StageSet::new(vec![stage("app", &["db"]), stage("db", &[])]).unwrap();
        assert_eq!(set.execution_order(), &["db", "app"]);
    }

    #[test]
    fn test_dag_order_is_deterministic() {
        let set = StageSet::new(vec![
            stage("infra", &[]),
            stage("job", &["infra"]),
            stage("sync", &["infra"]),
            stage("app", &["job", "sync"]),
        ])
        .unwrap();

        assert_eq!(set.execution_order(), &["infra", "job", "sync", "app"]);
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let err = StageSet::new(vec![
            stage("a", &["c"]),
            stage("b", &["a"]),
            stage("c", &["b"]),
        ])
        .unwrap_err();

        match err {
            DescriptorError::CycleDetected { cycle_path } => {
                assert_eq!(cycle_path, vec!["a", "c", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_and_unknown() {
        assert!(matches!(
            StageSet::new(vec![stage("a", &[]), stage("a", &[])]),
            Err(DescriptorError::DuplicateStage { .. })
        ));
        assert!(matches!(
            StageSet::new(vec![stage("a", &["ghost"])]),
            Err(DescriptorError::UnknownDependency { .. })
        ));
        assert!(matches!(StageSet::new(Vec::new()), Err(DescriptorError::Empty)));
    }

    #[test]
    fn test_prerequisites_are_transitive_and_ordered() {
        let set = StageSet::new(vec![
            stage("infra", &[]),
            stage("job", &["infra"]),
            stage("pipeline", &["job"]),
            stage("app", &["pipeline"]),
        ])
        .unwrap();

        assert_eq!(ids(set.prerequisites("app").into_iter()), vec!["infra", "job", "pipeline"]);
        assert!(set.prerequisites("infra").is_empty());
        assert!(set.prerequisites("missing").is_empty());
    }
}

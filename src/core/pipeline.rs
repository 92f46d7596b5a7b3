//! Pipeline domain model

use crate::core::{error::PipelineError, stage::Stage};
use std::collections::HashSet;

/// An ordered list of stages. Immutable once registered.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Stages in execution order
    pub stages: Vec<Stage>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Position of a stage by name
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Exclusive end of the parallel group starting at `start`.
    ///
    /// A group only forms when `start` and `start + 1` are both flagged
    /// parallel; it then extends over every directly following parallel
    /// stage. Otherwise the "group" is just `start` itself.
    pub fn parallel_group_end(&self, start: usize) -> usize {
        let is_parallel = |i: usize| self.stages.get(i).is_some_and(|s| s.parallel);

        if !(is_parallel(start) && is_parallel(start + 1)) {
            return start + 1;
        }

        let mut end = start + 1;
        while is_parallel(end) {
            end += 1;
        }
        end
    }

    /// Distinct executor ids referenced by the stages
    pub fn executor_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .map(|s| s.executor_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Check names and keys are usable
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidDefinition(
                "pipeline name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "pipeline '{}' has a stage with an empty name",
                    self.name
                )));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::InvalidDefinition(format!(
                    "duplicate stage name: {}",
                    stage.name
                )));
            }
            if stage.output_key.trim().is_empty() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "stage '{}' has an empty output key",
                    stage.name
                )));
            }
            if stage.executor_id.trim().is_empty() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "stage '{}' has an empty executor id",
                    stage.name
                )));
            }
        }

        Ok(())
    }
}

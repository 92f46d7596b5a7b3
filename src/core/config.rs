//! Configuration: declarative pipeline files and engine settings (YAML)

use crate::core::{
    condition::{ConditionPattern, StateCondition},
    pipeline::PipelineDefinition,
    stage::{render_template, Stage, TaskSpec},
};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipeline definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Stages in execution order
    pub stages: Vec<StageConfig>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Id of the executor the stage is bound to
    pub executor: String,

    /// Shared-state key for the output (defaults to the stage name)
    #[serde(default)]
    pub output_key: Option<String>,

    /// Prompt template; `{{ key }}` reads shared state, `{{ input.key }}` the run input
    pub prompt: String,

    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub retries: usize,

    #[serde(default)]
    pub response_format: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Run the stage only when this condition holds
    #[serde(default)]
    pub when: Option<WhenConfig>,
}

/// Condition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenConfig {
    /// Shared-state key that must be present
    pub key: String,

    /// Pattern the value must contain/match
    #[serde(default)]
    pub pattern: Option<String>,

    /// Whether to use regex pattern matching
    #[serde(default)]
    pub use_regex: bool,
}

fn default_true() -> bool {
    true
}

impl WhenConfig {
    fn to_condition(&self) -> Result<StateCondition> {
        Ok(match &self.pattern {
            None => StateCondition::exists(&self.key),
            Some(pattern) if self.use_regex => {
                let regex = Regex::new(pattern)
                    .with_context(|| format!("Invalid regex for key '{}': {}", self.key, pattern))?;
                StateCondition::matching(&self.key, ConditionPattern::Regex(regex))
            }
            Some(pattern) => {
                StateCondition::matching(&self.key, ConditionPattern::Simple(pattern.clone()))
            }
        })
    }
}

impl StageConfig {
    fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.name)
    }

    fn to_stage(&self) -> Result<Stage> {
        let template = self.prompt.clone();
        let mut stage = Stage::new(&self.name, &self.executor, self.output_key(), move |state, input| {
            TaskSpec::new(render_template(&template, state, input))
        })
        .with_required(self.required)
        .with_parallel(self.parallel)
        .with_retries(self.retries);

        if let Some(format) = &self.response_format {
            stage = stage.with_response_format(format);
        }
        if let Some(secs) = self.timeout_secs {
            stage = stage.with_timeout(Duration::from_secs(secs));
        }
        if let Some(when) = &self.when {
            let condition = when.to_condition()?;
            stage = stage.when(move |state| condition.evaluate(state));
        }

        Ok(stage)
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        let mut seen_names = std::collections::HashSet::new();
        let mut seen_keys = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen_names.insert(&stage.name) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
            if stage.executor.trim().is_empty() {
                anyhow::bail!("Stage '{}' has no executor", stage.name);
            }
            if !seen_keys.insert(stage.output_key()) {
                anyhow::bail!(
                    "Stage '{}' reuses output key '{}'",
                    stage.name,
                    stage.output_key()
                );
            }
            if stage.output_key() == "input" {
                anyhow::bail!("Stage '{}' may not write the reserved key 'input'", stage.name);
            }
            if let Some(when) = &stage.when {
                when.to_condition()?;
            }
        }

        Ok(())
    }

    /// Number of parallel groups (adjacent parallel stages) in the file
    pub fn parallel_groups(&self) -> usize {
        self.stages
            .windows(2)
            .enumerate()
            .filter(|(i, pair)| {
                pair[0].parallel
                    && pair[1].parallel
                    && (*i == 0 || !self.stages[i - 1].parallel)
            })
            .count()
    }

    /// Convert config to a pipeline definition
    pub fn to_definition(&self) -> Result<PipelineDefinition> {
        self.stages
            .iter()
            .try_fold(PipelineDefinition::new(&self.name), |definition, stage| {
                Ok(definition.with_stage(stage.to_stage()?))
            })
    }
}

/// Engine settings: where checkpoints go and default limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for the local checkpoint sink
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Optional database for the remote checkpoint sink (e.g. `sqlite:runs.db`)
    #[serde(default)]
    pub database_url: Option<String>,

    /// Default cost ceiling when a run doesn't set one
    #[serde(default)]
    pub max_cost: Option<f64>,

    /// Characters of stage output kept in run summaries
    #[serde(default = "default_preview_chars")]
    pub output_preview_chars: usize,
}

fn default_checkpoint_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stagehand")
        .join("checkpoints")
}

fn default_preview_chars() -> usize {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            database_url: None,
            max_cost: None,
            output_preview_chars: default_preview_chars(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `STAGEHAND_CHECKPOINT_DIR`, `STAGEHAND_DATABASE_URL` and
    /// `PIPELINE_MAX_COST` from the process environment
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values from an arbitrary lookup (the environment in production)
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("STAGEHAND_CHECKPOINT_DIR") {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("STAGEHAND_DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(raw) = lookup("PIPELINE_MAX_COST") {
            let max_cost: f64 = raw
                .trim()
                .parse()
                .with_context(|| format!("PIPELINE_MAX_COST is not a number: {}", raw))?;
            // Zero means "no ceiling"
            self.max_cost = (max_cost > 0.0).then_some(max_cost);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(max_cost) = self.max_cost {
            if !max_cost.is_finite() || max_cost < 0.0 {
                anyhow::bail!("max_cost must be a non-negative number, got {}", max_cost);
            }
        }
        Ok(())
    }
}

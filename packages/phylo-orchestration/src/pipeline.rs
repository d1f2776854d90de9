use crate::checkpoint::CheckpointManager;
use crate::config::PipelineConfig;
use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use crate::tools::{StageTools, ToolResolver, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Stage context passed to handlers
#[derive(Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub config: Arc<PipelineConfig>,
    pub checkpoints: Arc<CheckpointManager>,
    /// Resolver the stage's tools were looked up with
    pub tools: ToolResolver,
}

impl StageContext {
    pub fn new(config: Arc<PipelineConfig>, checkpoints: Arc<CheckpointManager>, tools: ToolResolver) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            config,
            checkpoints,
            tools,
        }
    }
}

/// Stage input
#[derive(Debug, Clone)]
pub struct StageInput {
    /// Populated by the previous stage (or supplied externally for the first)
    pub input_dir: PathBuf,
    /// Created by the orchestrator before `execute`
    pub output_dir: PathBuf,
}

/// Stage output
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub metrics: StageMetrics,
    /// Whole-stage artifacts (trees, reports, supermatrix)
    pub artifacts: Vec<PathBuf>,
}

impl StageOutput {
    pub fn new(metrics: StageMetrics) -> Self {
        Self {
            metrics,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

/// Stage metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Items whose output was (re)written
    pub items_processed: usize,
    /// Items whose output was already complete
    pub items_skipped: usize,
    /// Malformed items left out
    pub items_excluded: usize,
    /// Valid items below the length threshold
    pub items_dropped: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

impl StageMetrics {
    /// Record a non-fatal item error
    pub fn exclude(&mut self, err: &OrchestratorError) {
        self.items_excluded += 1;
        self.errors.push(err.to_string());
    }

    pub fn merge(&mut self, other: &StageMetrics) {
        self.items_processed += other.items_processed;
        self.items_skipped += other.items_skipped;
        self.items_excluded += other.items_excluded;
        self.items_dropped += other.items_dropped;
        self.duration_ms += other.duration_ms;
        self.errors.extend(other.errors.iter().cloned());
    }
}

/// Stage handler trait (pluggable stages)
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage identifier
    fn stage_id(&self) -> StageId;

    /// Tools resolved before the stage touches the filesystem
    fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
        vec![]
    }

    /// Execute stage
    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_metrics_default() {
        let metrics = StageMetrics::default();
        assert_eq!(metrics.items_processed, 0);
        assert_eq!(metrics.items_skipped, 0);
        assert_eq!(metrics.errors.len(), 0);
    }

    #[test]
    fn test_exclusion_is_recorded() {
        let mut metrics = StageMetrics::default();
        metrics.exclude(&OrchestratorError::malformed("EOG1.faa", "sequences have different lengths"));
        assert_eq!(metrics.items_excluded, 1);
        assert!(metrics.errors[0].contains("EOG1.faa"));
    }

    struct MockStage {
        id: StageId,
    }

    #[async_trait]
    impl StageHandler for MockStage {
        fn stage_id(&self) -> StageId {
            self.id
        }

        fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
            vec![ToolSpec::ALIGNER]
        }

        async fn execute(
            &self,
            input: StageInput,
            _ctx: &StageContext,
            tools: &StageTools,
        ) -> Result<StageOutput> {
            Ok(StageOutput::new(StageMetrics {
                items_processed: tools.len(),
                ..Default::default()
            })
            .with_artifact(input.output_dir.join("done")))
        }
    }

    #[tokio::test]
    async fn test_mock_stage_execution() {
        let stage = MockStage { id: StageId::Align };
        let ctx = StageContext::new(
            Arc::new(PipelineConfig::default()),
            Arc::new(CheckpointManager::default()),
            ToolResolver::with_search_path(vec![]),
        );
        assert_eq!(stage.required_tools(&ctx), vec![ToolSpec::ALIGNER]);

        let input = StageInput {
            input_dir: PathBuf::from("in"),
            output_dir: PathBuf::from("out"),
        };
        let output = stage
            .execute(input, &ctx, &StageTools::default())
            .await
            .unwrap();

        assert_eq!(output.metrics.items_processed, 0);
        assert_eq!(output.artifacts, vec![PathBuf::from("out/done")]);
    }
}

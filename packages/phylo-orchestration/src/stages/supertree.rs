use crate::checkpoint::{is_nonempty_file, ArtifactKey};
use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::stages::StagedOutput;
use crate::tools::{StageTools, ToolSpec};
use crate::workflow::WorkflowPaths;
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

pub const SUPERTREE_FILE: &str = "species_astral.tre";

/// Summary species tree from the per-locus tree bundle
pub struct SupertreeStage;

#[async_trait]
impl StageHandler for SupertreeStage {
    fn stage_id(&self) -> StageId {
        StageId::Supertree
    }

    fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
        vec![ToolSpec::SUPERTREE]
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let astral = tools.get(&ToolSpec::SUPERTREE)?;
        let paths = WorkflowPaths::from_config(&ctx.config);
        let gene_trees = paths.gene_trees();
        ctx.checkpoints.require_input(&gene_trees, "gene tree bundle")?;

        let output = input.output_dir.join(SUPERTREE_FILE);
        let mut metrics = StageMetrics::default();

        if ctx
            .checkpoints
            .should_skip(&ArtifactKey::stage_output(StageId::Supertree, &output))
        {
            info!("SupertreeStage: {} exists, skipping", output.display());
            metrics.items_skipped = 1;
        } else {
            let staged = StagedOutput::new(&output);
            let mut invocation = astral
                .invocation()
                .arg("-i")
                .arg(&gene_trees)
                .arg("-o")
                .arg(staged.path());
            let bootstraps = paths.gene_bootstraps();
            if is_nonempty_file(&bootstraps) {
                invocation = invocation.arg("-b").arg(&bootstraps);
            }
            info!("SupertreeStage: {}", invocation.command_line());
            staged.commit(invocation.run().await)?;
            metrics.items_processed = 1;
        }

        metrics.duration_ms = start.elapsed().as_millis() as u64;
        Ok(StageOutput::new(metrics).with_artifact(output))
    }
}

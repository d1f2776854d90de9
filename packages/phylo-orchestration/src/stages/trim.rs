use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageOutput};
use crate::stages::{locus_jobs, run_locus_jobs, StagedOutput};
use crate::tools::{StageTools, ToolSpec};
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Alignment trimming (`trimal -in <aln> -out <out> -automated1`)
pub struct TrimStage;

#[async_trait]
impl StageHandler for TrimStage {
    fn stage_id(&self) -> StageId {
        StageId::Trim
    }

    fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
        vec![ToolSpec::TRIMMER]
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let trimal = tools.get(&ToolSpec::TRIMMER)?;

        let jobs = locus_jobs(&input.input_dir, &input.output_dir)?;
        info!("TrimStage: {} alignments with {}", jobs.len(), trimal.name);

        let mut metrics = run_locus_jobs(StageId::Trim, ctx, jobs, |job| async move {
            let staged = StagedOutput::new(&job.output);
            let result = trimal
                .invocation()
                .arg("-in")
                .arg(&job.input)
                .arg("-out")
                .arg(staged.path())
                .arg("-automated1")
                .run()
                .await;
            staged.commit(result)
        })
        .await?;

        metrics.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "TrimStage: trimmed {} alignments, {} already done",
            metrics.items_processed, metrics.items_skipped
        );
        Ok(StageOutput::new(metrics))
    }
}

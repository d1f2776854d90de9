use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageOutput};
use crate::stages::{locus_jobs, run_locus_jobs, StagedOutput};
use crate::tools::{StageTools, ToolSpec};
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Multiple sequence alignment, one aligner run per locus
///
/// `mafft --auto --thread <n> <locus>` with standard output captured into
/// the aligned file.
pub struct AlignStage;

#[async_trait]
impl StageHandler for AlignStage {
    fn stage_id(&self) -> StageId {
        StageId::Align
    }

    fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
        vec![ToolSpec::ALIGNER]
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let mafft = tools.get(&ToolSpec::ALIGNER)?;
        let threads = ctx.config.threads.mafft_arg();
        let threads = threads.as_str();

        let jobs = locus_jobs(&input.input_dir, &input.output_dir)?;
        info!(
            "AlignStage: {} loci with {} ({} concurrent)",
            jobs.len(),
            mafft.name,
            ctx.config.workers
        );

        let mut metrics = run_locus_jobs(StageId::Align, ctx, jobs, |job| async move {
            let staged = StagedOutput::new(&job.output);
            let result = mafft
                .invocation()
                .arg("--auto")
                .arg("--thread")
                .arg(threads)
                .arg(&job.input)
                .stdout_to(staged.path())
                .run()
                .await;
            staged.commit(result)
        })
        .await?;

        metrics.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "AlignStage: aligned {} loci, {} already done",
            metrics.items_processed, metrics.items_skipped
        );
        Ok(StageOutput::new(metrics))
    }
}

use crate::checkpoint::{is_nonempty_file, ArtifactKey};
use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::supermatrix;
use crate::tools::StageTools;
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Builds the concatenated alignment and partition file `file` mode reads.
/// A user-supplied concatenated file makes this a no-op.
pub struct SupermatrixStage;

#[async_trait]
impl StageHandler for SupermatrixStage {
    fn stage_id(&self) -> StageId {
        StageId::Supermatrix
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        _tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let matrix = ctx.config.supermatrix_path();
        let partition = ctx.config.partition_path();
        let mut metrics = StageMetrics::default();

        if ctx.config.concat_file.is_some() {
            info!("SupermatrixStage: using supplied {}", matrix.display());
            metrics.items_skipped = 1;
            return Ok(StageOutput::new(metrics).with_artifact(matrix).with_artifact(partition));
        }

        let key = ArtifactKey::stage_output(StageId::Supermatrix, &matrix);
        if ctx.checkpoints.should_skip(&key) && is_nonempty_file(&partition) {
            info!("SupermatrixStage: {} exists, skipping", matrix.display());
            metrics.items_skipped = 1;
        } else {
            let summary = supermatrix::build_from_dir(
                &input.input_dir,
                &matrix,
                &partition,
                ctx.config.workers,
            )?;
            info!(
                "SupermatrixStage: {} loci x {} taxa, {} columns",
                summary.loci, summary.taxa, summary.width
            );
            metrics.items_processed = summary.loci;
            metrics.items_excluded = summary.excluded.len();
            metrics.errors = summary.excluded;
        }

        metrics.duration_ms = start.elapsed().as_millis() as u64;
        Ok(StageOutput::new(metrics).with_artifact(matrix).with_artifact(partition))
    }
}

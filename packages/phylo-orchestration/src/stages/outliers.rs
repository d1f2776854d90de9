use crate::error::Result;
use crate::job::StageId;
use crate::outliers;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::tools::StageTools;
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Report-only outlier screen over the filtered alignments. Always reruns.
pub struct OutlierStage;

#[async_trait]
impl StageHandler for OutlierStage {
    fn stage_id(&self) -> StageId {
        StageId::Outliers
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        _tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let report = outliers::screen_dir(
            &input.input_dir,
            ctx.config.outlier_z_threshold,
            ctx.config.workers,
        )?;
        let (text, json) = report.write(&input.output_dir)?;

        let metrics = StageMetrics {
            items_processed: report.alignments.len(),
            items_excluded: report.skipped.len(),
            errors: report
                .skipped
                .iter()
                .map(|s| format!("{}: {}", s.file_path.display(), s.reason))
                .collect(),
            duration_ms: start.elapsed().as_millis() as u64,
            ..Default::default()
        };
        info!(
            "OutlierStage: {} outlier sequences across {} alignments (z > {})",
            report.outlier_count(),
            report.alignments.len(),
            ctx.config.outlier_z_threshold
        );
        Ok(StageOutput::new(metrics).with_artifact(text).with_artifact(json))
    }
}

// Stage implementations
pub mod align;
pub mod filter;
pub mod gather;
pub mod outliers;
pub mod rename;
pub mod supermatrix;
pub mod supertree;
pub mod trees;
pub mod trim;

// Re-exports
pub use align::AlignStage;
pub use filter::{FilterStage, LengthProbe, NativeProbe, SeqkitProbe};
pub use gather::GatherStage;
pub use outliers::OutlierStage;
pub use rename::RenameStage;
pub use supermatrix::SupermatrixStage;
pub use supertree::SupertreeStage;
pub use trees::{ConcordanceStage, GeneTreesStage, SpeciesTreeStage};
pub use trim::TrimStage;

use crate::checkpoint::ArtifactKey;
use crate::error::{OrchestratorError, Result};
use crate::fanout;
use crate::fasta;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageMetrics};
use futures::stream::{self, TryStreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Every built-in stage
pub fn default_handlers() -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(GatherStage),
        Arc::new(RenameStage),
        Arc::new(AlignStage),
        Arc::new(TrimStage),
        Arc::new(FilterStage),
        Arc::new(OutlierStage),
        Arc::new(SupermatrixStage),
        Arc::new(SpeciesTreeStage),
        Arc::new(GeneTreesStage),
        Arc::new(ConcordanceStage),
        Arc::new(SupertreeStage),
    ]
}

/// One per-locus unit of tool work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocusJob {
    pub locus: String,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// A job per sequence file in `input_dir`; outputs are `{locus}.faa` in `output_dir`.
/// Two files for the same locus are a configuration error.
pub fn locus_jobs(input_dir: &Path, output_dir: &Path) -> Result<Vec<LocusJob>> {
    let files = fanout::locus_files(input_dir)?;
    fanout::check_unique_loci(&files)?;
    Ok(files
        .into_iter()
        .filter_map(|input| {
            let locus = fasta::locus_name(&input)?;
            let output = output_dir.join(fasta::locus_file_name(&locus));
            Some(LocusJob {
                locus,
                input,
                output,
            })
        })
        .collect())
}

/// Run `job` for every locus whose output is not already complete, at most
/// `workers` at a time. The first failure stops the fan-out; outputs finished
/// before it stay in place.
pub(crate) async fn run_locus_jobs<F, Fut>(
    stage: StageId,
    ctx: &StageContext,
    jobs: Vec<LocusJob>,
    job: F,
) -> Result<StageMetrics>
where
    F: Fn(LocusJob) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    let processed = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);

    stream::iter(jobs.into_iter().map(Ok::<_, OrchestratorError>))
        .try_for_each_concurrent(ctx.config.workers, |locus_job| {
            let (processed, skipped, job) = (&processed, &skipped, &job);
            async move {
                let key = ArtifactKey::locus(stage, locus_job.locus.clone(), &locus_job.output);
                if ctx.checkpoints.should_skip(&key) {
                    debug!("{}: {} exists, skipping", stage, key.path.display());
                    skipped.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                debug!("{}: {}", stage, locus_job.locus);
                job(locus_job).await?;
                processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
        .await?;

    Ok(StageMetrics {
        items_processed: processed.into_inner(),
        items_skipped: skipped.into_inner(),
        ..Default::default()
    })
}

/// A tool's temporary output next to its final path. Dropping it without a
/// successful `commit` removes the temporary file, including when the job
/// future is cancelled mid-run.
pub(crate) struct StagedOutput {
    staged: PathBuf,
    output: PathBuf,
    committed: bool,
}

impl StagedOutput {
    pub(crate) fn new(output: &Path) -> Self {
        Self {
            staged: fanout::staging_path(output),
            output: output.to_path_buf(),
            committed: false,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.staged
    }

    /// Move the temporary output into place when the tool succeeded
    pub(crate) fn commit(mut self, result: Result<()>) -> Result<()> {
        result?;
        std::fs::rename(&self.staged, &self.output)
            .map_err(|e| OrchestratorError::io(&self.output, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.staged);
        }
    }
}

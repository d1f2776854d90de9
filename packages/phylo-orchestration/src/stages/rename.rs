use crate::error::{OrchestratorError, Result};
use crate::fanout;
use crate::fasta::{self, HeaderPolicy};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::tools::StageTools;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Cut every header at its first `|`. Works on a flat directory of locus
/// files; each output keeps its input's file name.
pub struct RenameStage;

fn rename_file(path: &Path, output_dir: &Path) -> Result<bool> {
    let name = path
        .file_name()
        .ok_or_else(|| OrchestratorError::malformed(path, "no file name"))?;
    let text = fasta::read_text(path)?;
    let renamed = HeaderPolicy::Truncate.apply(&text);
    fanout::write_if_changed(&output_dir.join(name), renamed.as_bytes())
}

#[async_trait]
impl StageHandler for RenameStage {
    fn stage_id(&self) -> StageId {
        StageId::Rename
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        _tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let files = fanout::locus_files(&input.input_dir)?;
        info!("RenameStage: {} files", files.len());

        let results = fanout::par_map(ctx.config.workers, &files, |path| {
            rename_file(path, &input.output_dir)
        })?;

        let mut metrics = StageMetrics::default();
        for written in results {
            match written {
                Ok(true) => metrics.items_processed += 1,
                Ok(false) => metrics.items_skipped += 1,
                Err(e) if !e.is_fatal() => {
                    warn!("Excluding {}", e);
                    metrics.exclude(&e);
                }
                Err(e) => return Err(e),
            }
        }
        metrics.duration_ms = start.elapsed().as_millis() as u64;
        Ok(StageOutput::new(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rename_keeps_file_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("EOG1234.fasta");
        std::fs::write(&path, ">SpeciesX|EOG1234|extra\nMKV|\n").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();

        assert!(rename_file(&path, &out).unwrap());
        assert_eq!(
            std::fs::read_to_string(out.join("EOG1234.fasta")).unwrap(),
            ">SpeciesX\nMKV|\n"
        );
        assert!(!rename_file(&path, &out).unwrap());
    }
}

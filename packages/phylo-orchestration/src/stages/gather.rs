use crate::error::Result;
use crate::fanout::{self, LocusSource};
use crate::fasta::{self, HeaderPolicy};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::tools::StageTools;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Collect every taxon's copy of each locus into one `{locus}.faa`, headers
/// tagged `>{taxon}|{locus}`
pub struct GatherStage;

/// Concatenate a locus's sources in taxon order. Empty sources add nothing.
pub fn assemble_locus(locus: &str, sources: &[LocusSource]) -> Result<String> {
    let mut buffer = String::new();
    for source in sources {
        let text = fasta::read_text(&source.path)?;
        if text.trim().is_empty() {
            debug!("{}: empty, contributes nothing", source.path.display());
            continue;
        }
        let policy = HeaderPolicy::Tag {
            taxon: &source.taxon,
            locus,
        };
        buffer.push_str(&policy.apply(&text));
    }
    Ok(buffer)
}

fn gather_locus(locus: &str, sources: &[LocusSource], output_dir: &Path) -> Result<Option<bool>> {
    let contents = assemble_locus(locus, sources)?;
    if contents.is_empty() {
        return Ok(None);
    }
    let path = output_dir.join(fasta::locus_file_name(locus));
    fanout::write_if_changed(&path, contents.as_bytes()).map(Some)
}

#[async_trait]
impl StageHandler for GatherStage {
    fn stage_id(&self) -> StageId {
        StageId::Gather
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        _tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let sources = fanout::enumerate_sources(&input.input_dir, &ctx.config.locus_subpath)?;
        if sources.is_empty() {
            warn!(
                "GatherStage: no locus files under {} matching '{}'",
                input.input_dir.display(),
                ctx.config.locus_subpath
            );
        }

        let groups: Vec<(String, Vec<LocusSource>)> =
            fanout::group_by_locus(sources).into_iter().collect();
        info!(
            "GatherStage: {} loci with {} workers",
            groups.len(),
            ctx.config.workers
        );

        let results = fanout::par_map(ctx.config.workers, &groups, |(locus, sources)| {
            gather_locus(locus, sources, &input.output_dir)
        })?;

        let mut metrics = StageMetrics::default();
        for result in results {
            match result {
                Ok(Some(true)) => metrics.items_processed += 1,
                Ok(Some(false)) => metrics.items_skipped += 1,
                Ok(None) => metrics.items_dropped += 1,
                Err(e) if !e.is_fatal() => {
                    warn!("Excluding {}", e);
                    metrics.exclude(&e);
                }
                Err(e) => return Err(e),
            }
        }

        metrics.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "GatherStage: wrote {} loci, {} unchanged",
            metrics.items_processed, metrics.items_skipped
        );
        Ok(StageOutput::new(metrics))
    }
}

use crate::checkpoint::{ArtifactKey, CheckpointManager};
use crate::config::LengthProbeKind;
use crate::error::{OrchestratorError, Result};
use crate::fanout;
use crate::fasta;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::tools::{ResolvedTool, StageTools, ToolSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-record sequence lengths of an alignment file
pub trait LengthProbe: Send + Sync {
    fn name(&self) -> &'static str;

    fn lengths(&self, path: &Path) -> Result<Vec<usize>>;
}

/// Reads the file directly
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProbe;

impl LengthProbe for NativeProbe {
    fn name(&self) -> &'static str {
        "native"
    }

    fn lengths(&self, path: &Path) -> Result<Vec<usize>> {
        Ok(fasta::alignment_lengths(&fasta::read_records(path)?))
    }
}

/// `seqkit fx2tab -n -l <file>`
#[derive(Debug, Clone)]
pub struct SeqkitProbe {
    tool: ResolvedTool,
}

impl SeqkitProbe {
    pub fn new(tool: ResolvedTool) -> Self {
        Self { tool }
    }

    /// Length is the last non-empty tab-separated column of each row
    pub fn parse_table(path: &Path, table: &str) -> Result<Vec<usize>> {
        table
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                line.split('\t')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .last()
                    .and_then(|f| f.parse::<usize>().ok())
                    .ok_or_else(|| {
                        OrchestratorError::malformed(path, format!("unexpected seqkit row '{}'", line))
                    })
            })
            .collect()
    }
}

impl LengthProbe for SeqkitProbe {
    fn name(&self) -> &'static str {
        "seqkit"
    }

    fn lengths(&self, path: &Path) -> Result<Vec<usize>> {
        let output = Command::new(&self.tool.path)
            .args(["fx2tab", "-n", "-l"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| OrchestratorError::io(&self.tool.path, e))?;
        if !output.status.success() {
            return Err(OrchestratorError::ToolInvocationFailed {
                tool: self.tool.name.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Self::parse_table(path, &String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Copied,
    AlreadyPresent,
    /// Uniform length not above the minimum
    Dropped(usize),
}

/// Filter one alignment into `output_dir`. Unequal lengths are `MalformedInput`.
pub fn filter_alignment(
    path: &Path,
    output_dir: &Path,
    min_length: usize,
    probe: &dyn LengthProbe,
    checkpoints: &CheckpointManager,
) -> Result<FilterOutcome> {
    let lengths = probe.lengths(path)?;
    if lengths.is_empty() {
        return Err(OrchestratorError::malformed(path, "no sequences"));
    }
    let length = fasta::uniform_length(&lengths).ok_or_else(|| {
        let min = lengths.iter().min().copied().unwrap_or_default();
        let max = lengths.iter().max().copied().unwrap_or_default();
        OrchestratorError::malformed(path, format!("sequences have different lengths ({}..{})", min, max))
    })?;

    if length <= min_length {
        debug!("{}: length {} not above {}, dropped", path.display(), length, min_length);
        return Ok(FilterOutcome::Dropped(length));
    }

    let name = path
        .file_name()
        .ok_or_else(|| OrchestratorError::malformed(path, "no file name"))?;
    let output: PathBuf = output_dir.join(name);
    let locus = fasta::locus_name(path).unwrap_or_default();
    let key = ArtifactKey::locus(StageId::Filter, locus, &output)
        .with_params(format!("min_length={}", min_length));

    // An existing copy only counts if it is itself a well-formed alignment
    if checkpoints.should_skip(&key)
        && NativeProbe
            .lengths(&output)
            .ok()
            .and_then(|l| fasta::uniform_length(&l))
            .is_some()
    {
        return Ok(FilterOutcome::AlreadyPresent);
    }

    fanout::copy_preserving(path, &output)?;
    Ok(FilterOutcome::Copied)
}

/// Keep alignments of uniform length strictly above `min_length`
pub struct FilterStage;

impl FilterStage {
    fn probe(ctx: &StageContext, tools: &StageTools) -> Result<Box<dyn LengthProbe>> {
        Ok(match ctx.config.length_probe {
            LengthProbeKind::Native => Box::new(NativeProbe),
            LengthProbeKind::Seqkit => Box::new(SeqkitProbe::new(tools.get(&ToolSpec::SEQ_STATS)?.clone())),
        })
    }
}

#[async_trait]
impl StageHandler for FilterStage {
    fn stage_id(&self) -> StageId {
        StageId::Filter
    }

    fn required_tools(&self, ctx: &StageContext) -> Vec<ToolSpec> {
        match ctx.config.length_probe {
            LengthProbeKind::Native => vec![],
            LengthProbeKind::Seqkit => vec![ToolSpec::SEQ_STATS],
        }
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput> {
        let start = Instant::now();
        let probe = Self::probe(ctx, tools)?;
        let min_length = ctx.config.min_length;

        let files = fanout::locus_files(&input.input_dir)?;
        info!(
            "FilterStage: {} alignments, minimum length {} ({} probe)",
            files.len(),
            min_length,
            probe.name()
        );

        let results = fanout::par_map(ctx.config.workers, &files, |path| {
            filter_alignment(path, &input.output_dir, min_length, probe.as_ref(), &ctx.checkpoints)
        })?;

        let mut metrics = StageMetrics::default();
        for result in results {
            match result {
                Ok(FilterOutcome::Copied) => metrics.items_processed += 1,
                Ok(FilterOutcome::AlreadyPresent) => metrics.items_skipped += 1,
                Ok(FilterOutcome::Dropped(_)) => metrics.items_dropped += 1,
                Err(e) if !e.is_fatal() => {
                    warn!("Excluding {}", e);
                    metrics.exclude(&e);
                }
                Err(e) => return Err(e),
            }
        }

        metrics.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "FilterStage: kept {} ({} already present), dropped {} short, excluded {} malformed",
            metrics.items_processed + metrics.items_skipped,
            metrics.items_skipped,
            metrics.items_dropped,
            metrics.items_excluded
        );
        Ok(StageOutput::new(metrics))
    }
}

//! Four-step tree and concordance workflow
//!
//! 1. concatenation tree, 2. per-locus trees, 3. gene concordance,
//! 4. site concordance (off unless enabled). Steps 1 and 2 are skipped when
//! their tree file already exists; steps 3 and 4 always rerun. The input mode
//! only changes how alignments are handed to the tool.

use crate::checkpoint::{ArtifactKey, CheckpointManager};
use crate::config::{InputMode, PipelineConfig, ThreadSpec};
use crate::error::Result;
use crate::fanout;
use crate::job::StageId;
use crate::tools::ResolvedTool;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

/// How alignments reach the tree tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeInput {
    /// Every alignment in a directory
    Dir { alignments: PathBuf },
    /// One concatenated alignment plus its partition file
    File {
        alignment: PathBuf,
        partition: PathBuf,
    },
}

impl ModeInput {
    /// `alignments` is used in `dir` mode; `file` mode takes the configured
    /// supermatrix and partition
    pub fn from_config(config: &PipelineConfig, alignments: &Path) -> Self {
        match config.mode {
            InputMode::Dir => ModeInput::Dir {
                alignments: alignments.to_path_buf(),
            },
            InputMode::File => ModeInput::File {
                alignment: config.supermatrix_path(),
                partition: config.partition_path(),
            },
        }
    }

    /// Partitioned input (`-p`)
    fn partitioned(&self) -> Vec<OsString> {
        match self {
            ModeInput::Dir { alignments } => vec!["-p".into(), alignments.into()],
            ModeInput::File {
                alignment,
                partition,
            } => vec![
                "-s".into(),
                alignment.into(),
                "-p".into(),
                partition.into(),
            ],
        }
    }

    /// One tree per partition (`-S`)
    fn per_locus(&self) -> Vec<OsString> {
        match self {
            ModeInput::Dir { alignments } => vec!["-S".into(), alignments.into()],
            ModeInput::File {
                alignment,
                partition,
            } => vec![
                "-s".into(),
                alignment.into(),
                "-S".into(),
                partition.into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStep {
    ConcatTree,
    LocusTrees,
    GeneConcordance,
    SiteConcordance,
}

impl AnalysisStep {
    pub const ALL: [AnalysisStep; 4] = [
        AnalysisStep::ConcatTree,
        AnalysisStep::LocusTrees,
        AnalysisStep::GeneConcordance,
        AnalysisStep::SiteConcordance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStep::ConcatTree => "concatenation tree",
            AnalysisStep::LocusTrees => "per-locus trees",
            AnalysisStep::GeneConcordance => "gene concordance",
            AnalysisStep::SiteConcordance => "site concordance",
        }
    }

    /// Stage whose directory holds the step's output
    pub fn stage(&self) -> StageId {
        match self {
            AnalysisStep::ConcatTree => StageId::SpeciesTree,
            AnalysisStep::LocusTrees => StageId::GeneTrees,
            AnalysisStep::GeneConcordance | AnalysisStep::SiteConcordance => StageId::Concordance,
        }
    }
}

/// Output prefixes handed to `--prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPaths {
    pub species_prefix: PathBuf,
    pub gene_prefix: PathBuf,
    pub gcf_prefix: PathBuf,
    pub scf_prefix: PathBuf,
}

impl WorkflowPaths {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            species_prefix: config.stage_dir(StageId::SpeciesTree).join("concat"),
            gene_prefix: config.stage_dir(StageId::GeneTrees).join("loci"),
            gcf_prefix: config.stage_dir(StageId::Concordance).join("concord"),
            scf_prefix: config.stage_dir(StageId::Concordance).join("concord_scf"),
        }
    }

    pub fn species_tree(&self) -> PathBuf {
        with_suffix(&self.species_prefix, ".treefile")
    }

    pub fn gene_trees(&self) -> PathBuf {
        with_suffix(&self.gene_prefix, ".treefile")
    }

    /// Bootstrap trees, only present when the per-locus run wrote them
    pub fn gene_bootstraps(&self) -> PathBuf {
        with_suffix(&self.gene_prefix, ".ufboot")
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowParams {
    pub bootstrap: u32,
    pub threads: ThreadSpec,
    pub site_concordance: bool,
    pub scf_quartets: u32,
}

impl WorkflowParams {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            bootstrap: config.bootstrap,
            threads: config.threads,
            site_concordance: config.site_concordance,
            scf_quartets: config.scf_quartets,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Ran,
    /// Output already present
    Skipped,
    Disabled,
}

pub struct TreeWorkflow {
    pub input: ModeInput,
    pub paths: WorkflowPaths,
    pub params: WorkflowParams,
}

impl TreeWorkflow {
    pub fn new(input: ModeInput, paths: WorkflowPaths, params: WorkflowParams) -> Self {
        Self {
            input,
            paths,
            params,
        }
    }

    pub fn from_config(config: &PipelineConfig, alignments: &Path) -> Self {
        Self::new(
            ModeInput::from_config(config, alignments),
            WorkflowPaths::from_config(config),
            WorkflowParams::from_config(config),
        )
    }

    fn common(&self, prefix: &Path) -> Vec<OsString> {
        vec![
            "-T".into(),
            self.params.threads.to_string().into(),
            "--prefix".into(),
            prefix.into(),
        ]
    }

    /// Tool arguments for a step
    pub fn arguments(&self, step: AnalysisStep) -> Vec<OsString> {
        let mut args = Vec::new();
        match step {
            AnalysisStep::ConcatTree => {
                args.extend(self.input.partitioned());
                if self.params.bootstrap > 0 {
                    args.push("-B".into());
                    args.push(self.params.bootstrap.to_string().into());
                }
                args.extend(self.common(&self.paths.species_prefix));
            }
            AnalysisStep::LocusTrees => {
                args.extend(self.input.per_locus());
                args.extend(self.common(&self.paths.gene_prefix));
            }
            AnalysisStep::GeneConcordance => {
                args.push("-t".into());
                args.push(self.paths.species_tree().into());
                args.push("--gcf".into());
                args.push(self.paths.gene_trees().into());
                args.extend(self.common(&self.paths.gcf_prefix));
                args.push("-redo".into());
            }
            AnalysisStep::SiteConcordance => {
                args.push("-t".into());
                args.push(self.paths.species_tree().into());
                args.extend(self.input.partitioned());
                args.push("--scfl".into());
                args.push(self.params.scf_quartets.to_string().into());
                args.extend(self.common(&self.paths.scf_prefix));
                args.push("-redo".into());
            }
        }
        args
    }

    /// Main file a step produces
    pub fn output_of(&self, step: AnalysisStep) -> PathBuf {
        match step {
            AnalysisStep::ConcatTree => self.paths.species_tree(),
            AnalysisStep::LocusTrees => self.paths.gene_trees(),
            AnalysisStep::GeneConcordance => with_suffix(&self.paths.gcf_prefix, ".cf.tree"),
            AnalysisStep::SiteConcordance => with_suffix(&self.paths.scf_prefix, ".cf.tree"),
        }
    }

    fn prefix_of(&self, step: AnalysisStep) -> &Path {
        match step {
            AnalysisStep::ConcatTree => &self.paths.species_prefix,
            AnalysisStep::LocusTrees => &self.paths.gene_prefix,
            AnalysisStep::GeneConcordance => &self.paths.gcf_prefix,
            AnalysisStep::SiteConcordance => &self.paths.scf_prefix,
        }
    }

    pub async fn run_step(
        &self,
        step: AnalysisStep,
        tool: &ResolvedTool,
        checkpoints: &CheckpointManager,
    ) -> Result<StepOutcome> {
        if step == AnalysisStep::SiteConcordance && !self.params.site_concordance {
            info!("Step {}: disabled", step.as_str());
            return Ok(StepOutcome::Disabled);
        }

        if matches!(step, AnalysisStep::ConcatTree | AnalysisStep::LocusTrees) {
            let key = ArtifactKey::stage_output(step.stage(), self.output_of(step));
            if checkpoints.should_skip(&key) {
                info!(
                    "Step {}: {} exists, skipping",
                    step.as_str(),
                    key.path.display()
                );
                return Ok(StepOutcome::Skipped);
            }
        }

        if let Some(parent) = self.prefix_of(step).parent() {
            if !parent.as_os_str().is_empty() {
                fanout::ensure_dir(parent)?;
            }
        }

        info!("Step {}: running {}", step.as_str(), tool.name);
        tool.invocation().args(self.arguments(step)).run().await?;
        Ok(StepOutcome::Ran)
    }

    /// All four steps in order; the first failure stops the workflow
    pub async fn run_all(
        &self,
        tool: &ResolvedTool,
        checkpoints: &CheckpointManager,
    ) -> Result<Vec<(AnalysisStep, StepOutcome)>> {
        let mut outcomes = Vec::with_capacity(AnalysisStep::ALL.len());
        for step in AnalysisStep::ALL {
            outcomes.push((step, self.run_step(step, tool, checkpoints).await?));
        }
        Ok(outcomes)
    }
}

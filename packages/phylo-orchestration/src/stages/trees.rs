//! Tree stages: each runs its share of the four-step workflow

use crate::config::InputMode;
use crate::error::{OrchestratorError, Result};
use crate::fanout;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::tools::{StageTools, ToolSpec};
use crate::workflow::{AnalysisStep, ModeInput, StepOutcome, TreeWorkflow, WorkflowParams, WorkflowPaths};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, warn};

/// Directory inside a tree stage's output that holds the valid inputs when
/// the input directory contains anything else
pub const STAGING_DIR: &str = "_inputs";

/// Work out what the tree tool reads. In `dir` mode stray files never reach
/// the tool: they are deleted (with `sanitize`) or worked around through a
/// staging directory.
pub fn prepare_input(ctx: &StageContext, input: &StageInput) -> Result<ModeInput> {
    let config = &ctx.config;
    match config.mode {
        InputMode::File => {
            let mode_input = ModeInput::from_config(config, &input.input_dir);
            if let ModeInput::File {
                alignment,
                partition,
            } = &mode_input
            {
                ctx.checkpoints.require_input(alignment, "concatenated alignment")?;
                ctx.checkpoints.require_input(partition, "partition file")?;
            }
            Ok(mode_input)
        }
        InputMode::Dir => {
            let selection = fanout::select_inputs(&input.input_dir)?;
            if selection.valid.is_empty() {
                return Err(OrchestratorError::config(format!(
                    "no alignments in {}",
                    input.input_dir.display()
                )));
            }
            if selection.is_clean() {
                return Ok(ModeInput::from_config(config, &input.input_dir));
            }

            warn!(
                "{} non-alignment entries in {}",
                selection.rejected.len(),
                input.input_dir.display()
            );
            if config.sanitize {
                selection.sanitize(config.dry_run)?;
                if !config.dry_run {
                    return Ok(ModeInput::from_config(config, &input.input_dir));
                }
            }

            let staging = input.output_dir.join(STAGING_DIR);
            selection.stage_into(&staging)?;
            info!(
                "Handing {} alignments to the tree tool via {}",
                selection.valid.len(),
                staging.display()
            );
            Ok(ModeInput::from_config(config, &staging))
        }
    }
}

async fn run_steps(
    steps: &[AnalysisStep],
    input: StageInput,
    ctx: &StageContext,
    tools: &StageTools,
) -> Result<StageOutput> {
    let start = Instant::now();
    let iqtree = tools.get(&ToolSpec::TREE_INFERENCE)?;
    let workflow = TreeWorkflow::new(
        prepare_input(ctx, &input)?,
        WorkflowPaths::from_config(&ctx.config),
        WorkflowParams::from_config(&ctx.config),
    );

    let mut metrics = StageMetrics::default();
    let mut output = StageOutput::default();
    for step in steps {
        match workflow.run_step(*step, iqtree, &ctx.checkpoints).await? {
            StepOutcome::Ran => {
                metrics.items_processed += 1;
                output.artifacts.push(workflow.output_of(*step));
            }
            StepOutcome::Skipped => {
                metrics.items_skipped += 1;
                output.artifacts.push(workflow.output_of(*step));
            }
            StepOutcome::Disabled => {}
        }
    }
    metrics.duration_ms = start.elapsed().as_millis() as u64;
    output.metrics = metrics;
    Ok(output)
}

/// Step 1: partitioned concatenation tree with bootstrap support
pub struct SpeciesTreeStage;

#[async_trait]
impl StageHandler for SpeciesTreeStage {
    fn stage_id(&self) -> StageId {
        StageId::SpeciesTree
    }

    fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
        vec![ToolSpec::TREE_INFERENCE]
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput> {
        run_steps(&[AnalysisStep::ConcatTree], input, ctx, tools).await
    }
}

/// Step 2: one tree per locus, bundled in a single tree file
pub struct GeneTreesStage;

#[async_trait]
impl StageHandler for GeneTreesStage {
    fn stage_id(&self) -> StageId {
        StageId::GeneTrees
    }

    fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
        vec![ToolSpec::TREE_INFERENCE]
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput> {
        run_steps(&[AnalysisStep::LocusTrees], input, ctx, tools).await
    }
}

/// Steps 3 and 4: gene and (optionally) site concordance factors
pub struct ConcordanceStage;

#[async_trait]
impl StageHandler for ConcordanceStage {
    fn stage_id(&self) -> StageId {
        StageId::Concordance
    }

    fn required_tools(&self, _ctx: &StageContext) -> Vec<ToolSpec> {
        vec![ToolSpec::TREE_INFERENCE]
    }

    async fn execute(
        &self,
        input: StageInput,
        ctx: &StageContext,
        tools: &StageTools,
    ) -> Result<StageOutput> {
        run_steps(
            &[AnalysisStep::GeneConcordance, AnalysisStep::SiteConcordance],
            input,
            ctx,
            tools,
        )
        .await
    }
}

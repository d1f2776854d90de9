use crate::checkpoint::{CheckpointManager, CheckpointStats};
use crate::config::PipelineConfig;
use crate::error::{OrchestratorError, Result};
use crate::fanout;
use crate::job::{Job, JobStateMachine, StageId};
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics};
use crate::plan::{StageNode, StagePlan};
use crate::stages;
use crate::tools::ToolResolver;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const RUN_REPORT_FILE: &str = "run_report.json";

/// Ledger entry for one executed stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageId,
    pub name: &'static str,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Resolved binaries, `role=path`
    pub tools: Vec<String>,
    pub metrics: StageMetrics,
    pub checkpoints: CheckpointStats,
    pub artifacts: Vec<PathBuf>,
}

/// Pipeline result (aggregated metrics from all stages)
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub items_processed: usize,
    pub items_skipped: usize,
    pub items_excluded: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub stages: Vec<StageReport>,
}

impl PipelineResult {
    pub fn record(&mut self, report: StageReport) {
        self.items_processed += report.metrics.items_processed;
        self.items_skipped += report.metrics.items_skipped;
        self.items_excluded += report.metrics.items_excluded;
        self.errors.extend(report.metrics.errors.iter().cloned());
        self.stages.push(report);
    }
}

/// Contents of `run_report.json`
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub job: &'a Job,
    pub config: &'a PipelineConfig,
    pub result: &'a PipelineResult,
}

/// Runs a stage plan: stages strictly in order, each one's tools resolved
/// before it touches the filesystem. No rollback; a failed run keeps every
/// earlier output as a checkpoint for the next attempt.
pub struct PipelineOrchestrator {
    config: Arc<PipelineConfig>,
    checkpoint_mgr: Arc<CheckpointManager>,
    tools: ToolResolver,
    stage_handlers: HashMap<StageId, Arc<dyn StageHandler>>,
}

impl PipelineOrchestrator {
    /// Orchestrator with every built-in stage registered. Tools are looked up
    /// in `tool_dir` (if configured) and then `PATH`.
    pub fn new(config: PipelineConfig) -> Self {
        let mut tools = ToolResolver::from_env();
        if let Some(dir) = &config.tool_dir {
            tools = tools.prepend(dir.clone());
        }

        let mut orch = Self {
            config: Arc::new(config),
            checkpoint_mgr: Arc::new(CheckpointManager::default()),
            tools,
            stage_handlers: HashMap::new(),
        };
        for handler in stages::default_handlers() {
            orch.register_handler(handler);
        }
        orch
    }

    pub fn with_tools(mut self, tools: ToolResolver) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_checkpoints(mut self, checkpoint_mgr: Arc<CheckpointManager>) -> Self {
        self.checkpoint_mgr = checkpoint_mgr;
        self
    }

    /// Register a stage handler (replaces any handler for the same stage)
    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.stage_handlers.insert(handler.stage_id(), handler);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoint_mgr
    }

    /// The full plan for this configuration
    pub fn plan(&self) -> Result<StagePlan> {
        StagePlan::from_config(&self.config)
    }

    /// Execute a plan (main entry point). The run ledger is written to the
    /// work root on success and, when the work root exists, on failure.
    pub async fn execute(&self, plan: &StagePlan) -> Result<(Job, PipelineResult)> {
        let start_time = Instant::now();
        let mut sm = JobStateMachine::new(Job::new_queued(
            self.config.work_dir.display().to_string(),
        ));
        let job_id = sm.job().id;

        info!("Starting run {} in {}", job_id, self.config.work_dir.display());
        info!("Execution plan:\n{}", plan.execution_plan());

        sm.start()?;
        let mut result = PipelineResult::default();
        let outcome = self.run_plan(job_id, plan, &mut sm, &mut result).await;
        result.duration_ms = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                sm.complete(result.items_processed)?;
                info!(
                    "Run {} completed - {} items processed, {} skipped, {} excluded in {}ms",
                    job_id,
                    result.items_processed,
                    result.items_skipped,
                    result.items_excluded,
                    result.duration_ms
                );
                fanout::ensure_dir(&self.config.work_dir)?;
                self.write_report(sm.job(), &result)?;
                Ok((sm.into_job(), result))
            }
            Err(e) => {
                error!("Run {} failed: {}", job_id, e);
                sm.fail(&e)?;
                if self.config.work_dir.is_dir() {
                    if let Err(report_err) = self.write_report(sm.job(), &result) {
                        warn!("Could not write run report: {}", report_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_plan(
        &self,
        job_id: uuid::Uuid,
        plan: &StagePlan,
        sm: &mut JobStateMachine,
        result: &mut PipelineResult,
    ) -> Result<()> {
        let ctx = StageContext {
            job_id,
            config: self.config.clone(),
            checkpoints: self.checkpoint_mgr.clone(),
            tools: self.tools.clone(),
        };

        for (idx, node) in plan.nodes().iter().enumerate() {
            sm.enter_stage(node.id)?;
            info!(
                "Run {}: Stage {}/{} - {}",
                job_id,
                idx + 1,
                plan.len(),
                node.name
            );

            let handler = self.stage_handlers.get(&node.id).cloned().ok_or_else(|| {
                OrchestratorError::config(format!("No handler registered for stage {}", node.id))
            })?;

            let report = Self::execute_stage(handler, node, &ctx)
                .await
                .map_err(|e| {
                    error!("Run {}: Stage {} failed: {}", job_id, node.id, e);
                    e.in_stage(node.id.as_str())
                })?;

            info!(
                "Run {}: Stage {} completed - {} processed, {} skipped, {} excluded in {}ms",
                job_id,
                node.id,
                report.metrics.items_processed,
                report.metrics.items_skipped,
                report.metrics.items_excluded,
                report.metrics.duration_ms
            );
            result.record(report);
        }
        Ok(())
    }

    /// Execute a single stage
    async fn execute_stage(
        handler: Arc<dyn StageHandler>,
        node: &StageNode,
        ctx: &StageContext,
    ) -> Result<StageReport> {
        // Tools first: a missing binary must fail before any file I/O
        let tools = ctx.tools.resolve_all(&handler.required_tools(ctx))?;

        ctx.checkpoints.require_dir(&node.input_dir, "input directory")?;
        fanout::ensure_dir(&node.output_dir)?;

        let started = Instant::now();
        let input = StageInput {
            input_dir: node.input_dir.clone(),
            output_dir: node.output_dir.clone(),
        };
        let mut output = handler.execute(input, ctx, &tools).await?;
        output.metrics.duration_ms = started.elapsed().as_millis() as u64;

        let mut tool_names: Vec<String> = handler
            .required_tools(ctx)
            .iter()
            .filter_map(|spec| tools.get(spec).ok())
            .map(|t| format!("{}={}", t.role, t.path.display()))
            .collect();
        tool_names.sort();

        Ok(StageReport {
            stage: node.id,
            name: node.name,
            input_dir: node.input_dir.clone(),
            output_dir: node.output_dir.clone(),
            tools: tool_names,
            metrics: output.metrics,
            checkpoints: ctx.checkpoints.stats(node.id),
            artifacts: output.artifacts,
        })
    }

    fn write_report(&self, job: &Job, result: &PipelineResult) -> Result<()> {
        let report = RunReport {
            job,
            config: &self.config,
            result,
        };
        let json = serde_json::to_vec_pretty(&report).map_err(OrchestratorError::serialization)?;
        let path = self.config.work_dir.join(RUN_REPORT_FILE);
        fanout::write_atomic(&path, &json)?;
        info!("Run report written to {}", path.display());
        Ok(())
    }
}

/*
 * Phylo Orchestration - idempotent phylogenomics pipeline
 *
 * Turns per-taxon single-copy ortholog directories into species trees by
 * driving external tools (aligner, trimmer, tree inference, supertree) over
 * thousands of independent loci.
 *
 * Architecture:
 * - Tool Resolver (ordered candidates, own search path)
 * - Artifact Checkpoints (skip work whose output already exists)
 * - Locus Fan-out (enumeration, header normalization, length filtering)
 * - Stage Plan + Orchestrator (static order, run ledger)
 * - Tree Workflow (dir/file input modes, concordance factors)
 */

// Public modules
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fanout;
pub mod fasta;
pub mod job;
pub mod orchestrator;
pub mod outliers;
pub mod pipeline;
pub mod plan;
pub mod stages;
pub mod supermatrix;
pub mod tools;
pub mod workflow;

// Re-exports
pub use checkpoint::{ArtifactKey, CheckpointManager, CheckpointPolicy, CheckpointStats, ExistenceCheckpoint};
pub use config::{ConfigOverrides, HeaderPolicyKind, InputMode, LengthProbeKind, PipelineConfig, ThreadSpec};
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use fanout::{InputSelection, LocusSource};
pub use fasta::{HeaderPolicy, SequenceRecord};
pub use job::{Job, JobState, JobStateMachine, StageId};
pub use orchestrator::{PipelineOrchestrator, PipelineResult, StageReport};
pub use outliers::OutlierReport;
pub use pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
pub use plan::{StageNode, StagePlan};
pub use tools::{ResolvedTool, StageTools, ToolResolver, ToolSpec};
pub use workflow::{AnalysisStep, ModeInput, StepOutcome, TreeWorkflow};

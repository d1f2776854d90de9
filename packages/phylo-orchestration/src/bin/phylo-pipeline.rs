//! Phylogenomics pipeline CLI
//!
//! # Usage
//!
//! ```bash
//! # Whole pipeline, BUSCO runs under ./busco, outputs under ./phylogenomics
//! phylo-pipeline run
//!
//! # Resume from trimming, stop after the gene trees
//! phylo-pipeline run --from trim --to gene-trees
//!
//! # One stage with a YAML config and a local tool directory
//! phylo-pipeline --config pipeline.yaml --tool-dir ~/bin stage align
//!
//! # Tree and concordance workflow on a supplied supermatrix
//! phylo-pipeline concord --mode file --concat-file concat.faa --partition parts.nex
//!
//! # Print the resolved plan
//! phylo-pipeline plan
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use phylo_orchestration::config::{ConfigOverrides, ThreadsValue};
use phylo_orchestration::plan::{stage_name, StageNode, StagePlan};
use phylo_orchestration::{PipelineConfig, PipelineOrchestrator, PipelineResult, StageId};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phylo-pipeline")]
#[command(about = "BUSCO single-copy orthologs to species trees, one resumable stage at a time", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOpts {
    /// YAML configuration file (`version: 1`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-taxon annotation directory (or flat locus directory for header truncation)
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// Root of every stage output directory
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Threads handed to external tools: AUTO or a number
    #[arg(long, global = true)]
    threads: Option<String>,

    /// Parallel per-locus workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Alignments must be strictly longer than this
    #[arg(long, global = true)]
    min_length: Option<usize>,

    /// Ultrafast bootstrap replicates (0 disables)
    #[arg(long, global = true)]
    bootstrap: Option<u32>,

    /// Tree input mode: dir or file
    #[arg(long, global = true)]
    mode: Option<String>,

    /// Concatenated alignment for file mode
    #[arg(long, global = true)]
    concat_file: Option<PathBuf>,

    /// Partition file for file mode
    #[arg(long, global = true)]
    partition: Option<PathBuf>,

    /// First-stage header policy: tag or truncate
    #[arg(long, global = true)]
    header_policy: Option<String>,

    /// Also compute site concordance factors (`--site-concordance=false` to turn off)
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    site_concordance: Option<bool>,

    /// Include the outlier screen in full runs (`--outliers=false` to turn off)
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    outliers: Option<bool>,

    /// Z-score above which a sequence is reported as an outlier
    #[arg(long, global = true)]
    z_threshold: Option<f64>,

    /// Searched before PATH for external tools
    #[arg(long, global = true)]
    tool_dir: Option<PathBuf>,

    /// Delete non-alignment files from tree-stage inputs
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    sanitize: Option<bool>,

    /// With --sanitize, only log what would be deleted
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    dry_run: Option<bool>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl GlobalOpts {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            input_dir: self.input_dir.clone(),
            work_dir: self.work_dir.clone(),
            header_policy: self.header_policy.clone(),
            threads: self.threads.clone().map(ThreadsValue::Keyword),
            workers: self.workers,
            min_length: self.min_length,
            bootstrap: self.bootstrap,
            mode: self.mode.clone(),
            concat_file: self.concat_file.clone(),
            partition_file: self.partition.clone(),
            site_concordance: self.site_concordance,
            outliers: self.outliers,
            outlier_z_threshold: self.z_threshold,
            sanitize: self.sanitize,
            dry_run: self.dry_run,
            tool_dir: self.tool_dir.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline (or a contiguous slice of it)
    Run {
        /// First stage to run
        #[arg(long)]
        from: Option<String>,

        /// Last stage to run
        #[arg(long)]
        to: Option<String>,
    },

    /// Run a single stage
    Stage {
        /// Stage name, e.g. align or species-tree
        name: String,
    },

    /// Concatenation tree, per-locus trees and concordance factors
    Concord,

    /// Screen alignments for outlier sequences (report only)
    Outliers {
        /// Alignment directory (defaults to the filtered alignments)
        #[arg(long)]
        alignments: Option<PathBuf>,
    },

    /// Print the execution plan and exit
    Plan,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn parse_stage(name: Option<String>) -> anyhow::Result<Option<StageId>> {
    Ok(name.map(|n| StageId::from_str(&n)).transpose()?)
}

fn build_plan(orch: &PipelineOrchestrator, command: Commands) -> anyhow::Result<Option<StagePlan>> {
    let config = orch.config();
    let plan = match command {
        Commands::Plan => {
            println!("{}", orch.plan()?.execution_plan());
            return Ok(None);
        }
        Commands::Run { from, to } => orch.plan()?.slice(parse_stage(from)?, parse_stage(to)?)?,
        Commands::Stage { name } => StagePlan::single(config, StageId::from_str(&name)?)?,
        Commands::Concord => {
            let stages = [StageId::SpeciesTree, StageId::GeneTrees, StageId::Concordance];
            let nodes = stages
                .iter()
                .map(|id| StagePlan::single(config, *id).map(|p| p.nodes()[0].clone()))
                .collect::<Result<Vec<_>, _>>()?;
            StagePlan::new(nodes)?
        }
        Commands::Outliers { alignments } => match alignments {
            Some(dir) => StagePlan::new(vec![StageNode::new(
                StageId::Outliers,
                stage_name(StageId::Outliers),
                dir,
                config.stage_dir(StageId::Outliers),
            )])?,
            None => StagePlan::single(config, StageId::Outliers)?,
        },
    };
    Ok(Some(plan))
}

fn print_summary(result: &PipelineResult) {
    println!(
        "{:<14} {:>9} {:>8} {:>9} {:>8} {:>10}",
        "stage", "processed", "skipped", "excluded", "dropped", "time"
    );
    for stage in &result.stages {
        println!(
            "{:<14} {:>9} {:>8} {:>9} {:>8} {:>8}ms",
            stage.stage.as_str(),
            stage.metrics.items_processed,
            stage.metrics.items_skipped,
            stage.metrics.items_excluded,
            stage.metrics.items_dropped,
            stage.metrics.duration_ms
        );
    }
    for err in &result.errors {
        println!("  excluded: {}", err);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Unknown modes and bad values fail here, before any directory exists
    let config = PipelineConfig::resolve(cli.global.config.as_deref(), &cli.global.overrides())
        .context("invalid configuration")?;
    let orch = PipelineOrchestrator::new(config);

    let Some(plan) = build_plan(&orch, cli.command)? else {
        return Ok(());
    };

    let (job, result) = orch.execute(&plan).await?;
    print_summary(&result);
    println!("run {} finished in {}ms", job.id, result.duration_ms);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

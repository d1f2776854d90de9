//! End-to-end runs over fake tools
//!
//! Covers the full stage chain in both input modes, tool preference, stray
//! files in tree inputs, and the outlier screen.

mod common;

use common::*;
use phylo_orchestration::config::InputMode;
use phylo_orchestration::stages::trees::STAGING_DIR;
use phylo_orchestration::{ErrorCategory, StageId, StagePlan};
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

const TAXA: [&str; 3] = ["SpeciesA", "SpeciesB", "SpeciesC"];
const LOCI: [&str; 2] = ["EOG1", "EOG2"];

fn busco_tree(base: &Path) {
    for taxon in TAXA {
        for locus in LOCI {
            busco_locus(base, taxon, locus, &busco_record(locus, 150));
        }
    }
}

fn filtered_alignments(dir: &Path) {
    for locus in LOCI {
        let body: String = TAXA
            .iter()
            .map(|t| format!(">{}|{}\n{}\n", t, locus, "M".repeat(150)))
            .collect();
        write(&dir.join(format!("{}.faa", locus)), &body);
    }
}

fn tool_calls(tools: &Path, name: &str) -> Vec<String> {
    calls(tools)
        .into_iter()
        .filter(|c| c.starts_with(&format!("{} ", name)))
        .collect()
}

#[tokio::test]
async fn test_full_run_dir_mode_and_rerun() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    fake_toolchain(&tools);

    let config = config(root.path());
    busco_tree(&config.input_dir);

    let filtered = config.stage_dir(StageId::Filter);
    let species = config.stage_dir(StageId::SpeciesTree);
    let genes = config.stage_dir(StageId::GeneTrees);
    let concord = config.stage_dir(StageId::Concordance);
    let supertree = config.stage_dir(StageId::Supertree);
    let work_dir = config.work_dir.clone();

    let orch = orchestrator(config, &tools);
    let plan = orch.plan().unwrap();
    let ids: Vec<StageId> = plan.nodes().iter().map(|n| n.id).collect();
    assert_eq!(
        ids,
        vec![
            StageId::Gather,
            StageId::Align,
            StageId::Trim,
            StageId::Filter,
            StageId::SpeciesTree,
            StageId::GeneTrees,
            StageId::Concordance,
            StageId::Supertree,
        ]
    );

    let (_, result) = orch.execute(&plan).await.unwrap();
    assert!(result.errors.is_empty());
    assert!(filtered.join("EOG1.faa").exists());
    assert!(species.join("concat.treefile").exists());
    assert!(genes.join("loci.treefile").exists());
    assert!(concord.join("concord.cf.tree").exists());
    assert!(supertree.join("species_astral.tre").exists());
    assert!(work_dir.join("run_report.json").exists());

    let iqtree = tool_calls(&tools, "iqtree2");
    assert_eq!(iqtree.len(), 3, "site concordance is off by default");
    assert_eq!(
        iqtree[0],
        format!(
            "iqtree2 -p {} -T AUTO --prefix {}",
            filtered.display(),
            species.join("concat").display()
        )
    );
    assert!(iqtree[1].starts_with(&format!("iqtree2 -S {} ", filtered.display())));
    assert!(iqtree[2].contains("--gcf"));
    assert!(iqtree[2].ends_with("-redo"));

    let astral = tool_calls(&tools, "astral");
    assert_eq!(astral.len(), 1);
    assert!(astral[0].contains(&format!("-b {}", genes.join("loci.ufboot").display())));

    // Second run: tree steps and supertree are checkpointed, concordance reruns
    let (_, rerun) = orch.execute(&plan).await.unwrap();
    assert_eq!(tool_calls(&tools, "iqtree2").len(), 4);
    assert_eq!(tool_calls(&tools, "astral").len(), 1);
    assert_eq!(tool_calls(&tools, "mafft").len(), LOCI.len());

    let skipped: Vec<(StageId, usize)> = rerun
        .stages
        .iter()
        .map(|s| (s.stage, s.metrics.items_skipped))
        .collect();
    assert!(skipped.contains(&(StageId::SpeciesTree, 1)));
    assert!(skipped.contains(&(StageId::GeneTrees, 1)));
    assert!(skipped.contains(&(StageId::Supertree, 1)));
    assert!(skipped.contains(&(StageId::Align, LOCI.len())));
}

#[tokio::test]
async fn test_full_run_file_mode_builds_supermatrix() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    fake_toolchain(&tools);

    let mut config = config(root.path());
    config.mode = InputMode::File;
    config.site_concordance = true;
    busco_tree(&config.input_dir);

    let matrix = config.supermatrix_path();
    let partition = config.partition_path();
    let orch = orchestrator(config, &tools);
    let plan = orch.plan().unwrap();
    assert!(plan.get(StageId::Supermatrix).is_some());

    orch.execute(&plan).await.unwrap();

    let supermatrix = std::fs::read_to_string(&matrix).unwrap();
    assert!(supermatrix.starts_with(&format!(">SpeciesA\n{}\n", "M".repeat(300))));
    assert_eq!(
        std::fs::read_to_string(&partition).unwrap(),
        "#nexus\nbegin sets;\n    charset EOG1 = 1-150;\n    charset EOG2 = 151-300;\nend;\n"
    );

    let iqtree = tool_calls(&tools, "iqtree2");
    assert_eq!(iqtree.len(), 4);
    let file_input = format!("-s {} -p {}", matrix.display(), partition.display());
    assert!(iqtree[0].starts_with(&format!("iqtree2 {}", file_input)));
    assert!(iqtree[1].starts_with(&format!(
        "iqtree2 -s {} -S {}",
        matrix.display(),
        partition.display()
    )));
    assert!(iqtree[3].contains(&file_input));
    assert!(iqtree[3].contains("--scfl 100"));
}

#[tokio::test]
async fn test_newest_tree_tool_is_preferred() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    fake_iqtree(&tools, "iqtree2");
    fake_iqtree(&tools, "iqtree3");

    let config = config(root.path());
    filtered_alignments(&config.stage_dir(StageId::Filter));
    let plan = StagePlan::single(&config, StageId::SpeciesTree).unwrap();

    let (_, result) = orchestrator(config, &tools).execute(&plan).await.unwrap();
    assert!(result.stages[0].tools[0].ends_with("iqtree3"));
    assert_eq!(tool_calls(&tools, "iqtree3").len(), 1);
    assert!(tool_calls(&tools, "iqtree2").is_empty());
}

#[tokio::test]
async fn test_missing_tree_tool_fails_before_any_output() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    std::fs::create_dir_all(&tools).unwrap();

    let config = config(root.path());
    filtered_alignments(&config.stage_dir(StageId::Filter));
    let species = config.stage_dir(StageId::SpeciesTree);
    let plan = StagePlan::single(&config, StageId::SpeciesTree).unwrap();

    let err = orchestrator(config, &tools).execute(&plan).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Tool);
    assert!(err.to_string().contains("iqtree3, iqtree2, iqtree"));
    assert!(!species.exists());
}

#[tokio::test]
async fn test_stray_files_are_staged_around() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    fake_iqtree(&tools, "iqtree2");

    let config = config(root.path());
    let filtered = config.stage_dir(StageId::Filter);
    filtered_alignments(&filtered);
    write(&filtered.join("README.txt"), "notes");

    let species = config.stage_dir(StageId::SpeciesTree);
    let plan = StagePlan::single(&config, StageId::SpeciesTree).unwrap();
    orchestrator(config, &tools).execute(&plan).await.unwrap();

    let staging = species.join(STAGING_DIR);
    assert!(tool_calls(&tools, "iqtree2")[0].contains(&format!("-p {} ", staging.display())));
    let mut staged: Vec<String> = std::fs::read_dir(&staging)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    staged.sort();
    assert_eq!(staged, vec!["EOG1.faa", "EOG2.faa"]);
    // Nothing deleted without sanitize
    assert!(filtered.join("README.txt").exists());
}

#[tokio::test]
async fn test_sanitize_removes_stray_files() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    fake_iqtree(&tools, "iqtree2");

    let mut config = config(root.path());
    config.sanitize = true;
    let filtered = config.stage_dir(StageId::Filter);
    filtered_alignments(&filtered);
    write(&filtered.join("README.txt"), "notes");

    let plan = StagePlan::single(&config, StageId::GeneTrees).unwrap();
    orchestrator(config, &tools).execute(&plan).await.unwrap();

    assert!(!filtered.join("README.txt").exists());
    assert!(tool_calls(&tools, "iqtree2")[0].contains(&format!("-S {} ", filtered.display())));
}

#[tokio::test]
async fn test_supertree_requires_gene_trees() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    fake_astral(&tools);

    let config = config(root.path());
    std::fs::create_dir_all(config.stage_dir(StageId::GeneTrees)).unwrap();
    let plan = StagePlan::single(&config, StageId::Supertree).unwrap();

    let err = orchestrator(config, &tools).execute(&plan).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(tool_calls(&tools, "astral").is_empty());
}

#[tokio::test]
async fn test_outlier_screen_reports_divergent_sequence() {
    let root = TempDir::new().unwrap();
    let mut config = config(root.path());
    config.outlier_z_threshold = 1.5;

    let filtered = config.stage_dir(StageId::Filter);
    write(
        &filtered.join("EOG1.faa"),
        ">A|EOG1\nAAAAAAAAAA\n>B|EOG1\nAAAAAAAAAA\n>C|EOG1\nAAAAAAAAAA\n>D|EOG1\nAAAAAAAAAA\n>E|EOG1\nCCCCCCCCCC\n",
    );
    write(&filtered.join("EOG2.faa"), ">A|EOG2\nMK\n>B|EOG2\nMK\n");
    write(&filtered.join("EOG3.faa"), "");

    let out = config.stage_dir(StageId::Outliers);
    let plan = StagePlan::single(&config, StageId::Outliers).unwrap();
    let (_, result) = orchestrator(config, root.path()).execute(&plan).await.unwrap();

    assert_eq!(result.stages[0].metrics.items_processed, 2);
    assert_eq!(result.stages[0].metrics.items_excluded, 1);

    let text = std::fs::read_to_string(out.join("outlier_report.txt")).unwrap();
    assert!(text.starts_with("OUTLIER SEQUENCE ANALYSIS REPORT\n===============================\n"));
    assert!(text.contains("  - E|EOG1: Avg Distance = 1.0000, Z-score = 2.0000\n"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("outlier_report.json")).unwrap())
            .unwrap();
    assert_eq!(json["alignments"][0]["outliers"][0]["id"], "E|EOG1");
}

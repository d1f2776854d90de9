//! Command-line behaviour of the `phylo-pipeline` binary

mod common;

use common::*;
use phylo_orchestration::{ConfigOverrides, ErrorCategory, PipelineConfig};
use std::process::Command;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_phylo-pipeline"))
}

#[test]
fn test_unknown_mode_is_rejected_at_resolution() {
    let overrides = ConfigOverrides {
        mode: Some("tree".to_string()),
        ..Default::default()
    };
    let err = PipelineConfig::resolve(None, &overrides).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.to_string().contains("tree"));
}

#[test]
fn test_unknown_mode_exits_before_creating_directories() {
    let root = TempDir::new().unwrap();
    let work_dir = root.path().join("phylogenomics");

    let output = cli()
        .arg("--mode")
        .arg("tree")
        .arg("--work-dir")
        .arg(&work_dir)
        .arg("run")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
    assert!(!work_dir.exists());
}

#[test]
fn test_plan_lists_stages_without_running() {
    let root = TempDir::new().unwrap();
    let work_dir = root.path().join("phylogenomics");

    let output = cli()
        .arg("--work-dir")
        .arg(&work_dir)
        .arg("--mode")
        .arg("file")
        .arg("plan")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[supermatrix]"));
    assert!(stdout.contains("[supertree]"));
    assert!(!stdout.contains("[outliers]"));
    assert!(!work_dir.exists());
}

#[test]
fn test_yaml_config_and_tool_dir() {
    let root = TempDir::new().unwrap();
    let tools = root.path().join("tools");
    fake_toolchain(&tools);

    let input = root.path().join("busco");
    busco_locus(&input, "SpeciesA", "EOG1", &busco_record("EOG1", 5));
    busco_locus(&input, "SpeciesB", "EOG1", &busco_record("EOG1", 5));

    let work_dir = root.path().join("out");
    let config_path = root.path().join("pipeline.yaml");
    write(
        &config_path,
        &format!(
            "version: 1\npipeline:\n  input_dir: {}\n  work_dir: {}\n  workers: 2\n",
            input.display(),
            work_dir.display()
        ),
    );

    let output = cli()
        .arg("--config")
        .arg(&config_path)
        .arg("--tool-dir")
        .arg(&tools)
        .args(["run", "--to", "align"])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        std::fs::read_to_string(work_dir.join("02_aligned/EOG1.faa")).unwrap(),
        ">SpeciesA|EOG1\nMMMMM\n>SpeciesB|EOG1\nMMMMM\n"
    );
    assert!(work_dir.join("run_report.json").exists());
}

#[test]
fn test_config_without_version_is_rejected() {
    let root = TempDir::new().unwrap();
    let config_path = root.path().join("pipeline.yaml");
    write(&config_path, "pipeline:\n  workers: 2\n");

    let output = cli()
        .arg("--config")
        .arg(&config_path)
        .arg("plan")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("version"));
}

#[test]
fn test_command_line_turns_off_config_switch() {
    let root = TempDir::new().unwrap();
    let config_path = root.path().join("pipeline.yaml");
    write(
        &config_path,
        &format!(
            "version: 1\npipeline:\n  work_dir: {}\n  outliers: true\n",
            root.path().join("out").display()
        ),
    );

    let plan = |extra: &[&str]| {
        let output = cli()
            .arg("--config")
            .arg(&config_path)
            .args(extra)
            .arg("plan")
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    };

    assert!(plan(&[]).contains("[outliers]"));
    assert!(!plan(&["--outliers=false"]).contains("[outliers]"));
    assert!(plan(&["--outliers"]).contains("[outliers]"));
}

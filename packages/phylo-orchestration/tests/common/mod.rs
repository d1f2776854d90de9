//! Shared fixtures: BUSCO-shaped input trees and shell-script stand-ins for
//! the external tools.

#![allow(dead_code)]

use phylo_orchestration::{PipelineConfig, PipelineOrchestrator, ToolResolver};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const BUSCO_SUBPATH: &str = "run_eukaryota_odb10/busco_sequences/single_copy_busco_sequences";

pub fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// `{base}/{taxon}/run_*/.../{locus}.faa`
pub fn busco_locus(base: &Path, taxon: &str, locus: &str, contents: &str) -> PathBuf {
    let path = base
        .join(taxon)
        .join(BUSCO_SUBPATH)
        .join(format!("{}.faa", locus));
    write(&path, contents);
    path
}

/// BUSCO-style record: header carries coordinates after the gene id
pub fn busco_record(locus: &str, len: usize) -> String {
    format!(">{}:1-{}\n{}\n", locus, len * 3, "M".repeat(len))
}

pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Every line of `calls.log`, one per tool invocation: `name arg1 arg2 ...`
pub fn calls(tool_dir: &Path) -> Vec<String> {
    std::fs::read_to_string(tool_dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn logged(tool_dir: &Path, name: &str, body: &str) -> PathBuf {
    let log = tool_dir.join("calls.log");
    fake_tool(
        tool_dir,
        name,
        &format!("echo \"{} $*\" >> \"{}\"\n{}", name, log.display(), body),
    )
}

/// mafft: echoes its last argument (the input) to stdout
pub fn fake_mafft(tool_dir: &Path) -> PathBuf {
    logged(tool_dir, "mafft", "for a in \"$@\"; do last=\"$a\"; done\ncat \"$last\"")
}

/// trimal -in X -out Y -automated1: copies X to Y
pub fn fake_trimal(tool_dir: &Path) -> PathBuf {
    logged(tool_dir, "trimal", "cp \"$2\" \"$4\"")
}

/// iqtree: writes `{prefix}.treefile`, `{prefix}.ufboot` and `{prefix}.cf.tree`
pub fn fake_iqtree(tool_dir: &Path, name: &str) -> PathBuf {
    logged(
        tool_dir,
        name,
        r#"prefix=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--prefix" ]; then prefix="$2"; fi
  shift
done
echo "((A,B),C);" > "$prefix.treefile"
echo "((A,B),C);" > "$prefix.ufboot"
echo "((A,B)100,C);" > "$prefix.cf.tree""#,
    )
}

/// astral -i T -o OUT [-b B]: writes OUT
pub fn fake_astral(tool_dir: &Path) -> PathBuf {
    logged(tool_dir, "astral", "echo \"((A,B),C);\" > \"$4\"")
}

pub fn fake_toolchain(tool_dir: &Path) {
    fake_mafft(tool_dir);
    fake_trimal(tool_dir);
    fake_iqtree(tool_dir, "iqtree2");
    fake_astral(tool_dir);
}

/// Small config rooted in a temporary directory; bootstrap off so argument
/// lists stay short
pub fn config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.input_dir = root.join("busco");
    config.work_dir = root.join("phylogenomics");
    config.locus_subpath = "run_*/busco_sequences/single_copy_busco_sequences".to_string();
    config.workers = 2;
    config.bootstrap = 0;
    config
}

/// Orchestrator that only sees the fake tools, never the host `PATH`
pub fn orchestrator(config: PipelineConfig, tool_dir: &Path) -> PipelineOrchestrator {
    PipelineOrchestrator::new(config)
        .with_tools(ToolResolver::with_search_path(vec![tool_dir.to_path_buf()]))
}

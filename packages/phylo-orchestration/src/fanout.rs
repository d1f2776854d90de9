//! Locus fan-out engine
//!
//! Enumerates taxa and per-locus files, selects valid inputs, and runs
//! per-item work on a bounded rayon pool. Listings are always sorted by name,
//! so repeated runs over the same directories see the same order.

use crate::error::{OrchestratorError, Result};
use crate::fasta;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One per-taxon, per-locus source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocusSource {
    pub taxon: String,
    pub locus: String,
    pub path: PathBuf,
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| OrchestratorError::io(dir, e))? {
        let entry = entry.map_err(|e| OrchestratorError::io(dir, e))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// Taxon directories directly under `base` (hidden entries skipped)
pub fn enumerate_taxa(base: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut taxa = Vec::new();
    for path in sorted_entries(base)? {
        if !path.is_dir() || is_hidden(&path) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            taxa.push((name.to_string(), path.clone()));
        }
    }
    Ok(taxa)
}

/// Expand a relative sub-path under `root`. A component ending in `*` matches
/// every directory entry that starts with the text before the `*`.
pub fn expand_subpath(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let mut current = vec![root.to_path_buf()];

    for component in pattern.split('/').filter(|c| !c.is_empty() && *c != ".") {
        let mut next = Vec::new();
        for dir in &current {
            match component.strip_suffix('*') {
                Some(prefix) => {
                    if !dir.is_dir() {
                        continue;
                    }
                    for path in sorted_entries(dir)? {
                        let matches = path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.starts_with(prefix))
                            .unwrap_or(false);
                        if matches && path.is_dir() {
                            next.push(path);
                        }
                    }
                }
                None => {
                    let path = dir.join(component);
                    if path.is_dir() {
                        next.push(path);
                    }
                }
            }
        }
        current = next;
    }

    Ok(current)
}

/// Sequence files directly inside `dir`, sorted
pub fn locus_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_file() && !is_hidden(p) && fasta::has_sequence_extension(p))
        .collect())
}

/// Fail when two files in one directory name the same locus (`EOG1.fa` and
/// `EOG1.faa`); both would map to the same output.
pub fn check_unique_loci(files: &[PathBuf]) -> Result<()> {
    let mut seen: BTreeMap<String, &PathBuf> = BTreeMap::new();
    for path in files {
        let Some(locus) = fasta::locus_name(path) else {
            continue;
        };
        if let Some(first) = seen.insert(locus.clone(), path) {
            return Err(OrchestratorError::config(format!(
                "locus {} appears twice: {} and {}",
                locus,
                first.display(),
                path.display()
            )));
        }
    }
    Ok(())
}

/// Every (taxon, locus) source under `base`, in taxon then locus order.
/// Taxa without a matching sub-path or without locus files contribute nothing.
pub fn enumerate_sources(base: &Path, subpath: &str) -> Result<Vec<LocusSource>> {
    let mut sources = Vec::new();

    for (taxon, taxon_dir) in enumerate_taxa(base)? {
        let dirs = expand_subpath(&taxon_dir, subpath)?;
        if dirs.is_empty() {
            debug!("Taxon {} has no '{}' directory", taxon, subpath);
            continue;
        }

        let before = sources.len();
        for dir in dirs {
            for path in locus_files(&dir)? {
                if let Some(locus) = fasta::locus_name(&path) {
                    sources.push(LocusSource {
                        taxon: taxon.clone(),
                        locus,
                        path,
                    });
                }
            }
        }
        debug!("Taxon {}: {} locus files", taxon, sources.len() - before);
    }

    Ok(sources)
}

/// Group sources by locus; within a locus, taxa keep enumeration order
pub fn group_by_locus(sources: Vec<LocusSource>) -> BTreeMap<String, Vec<LocusSource>> {
    let mut groups: BTreeMap<String, Vec<LocusSource>> = BTreeMap::new();
    for source in sources {
        groups.entry(source.locus.clone()).or_default().push(source);
    }
    groups
}

/// Working set of a tree-stage input directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputSelection {
    /// Alignment files the tool should see, sorted
    pub valid: Vec<PathBuf>,
    /// Everything else in the directory
    pub rejected: Vec<PathBuf>,
}

impl InputSelection {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Delete rejected files. With `dry_run` nothing is removed, only logged.
    pub fn sanitize(&self, dry_run: bool) -> Result<usize> {
        for path in &self.rejected {
            if dry_run {
                info!("[dry-run] would remove {}", path.display());
                continue;
            }
            if path.is_dir() {
                warn!("Leaving directory {} in place", path.display());
                continue;
            }
            fs::remove_file(path).map_err(|e| OrchestratorError::io(path, e))?;
            info!("Removed {}", path.display());
        }
        Ok(if dry_run { 0 } else { self.rejected.iter().filter(|p| !p.is_dir()).count() })
    }

    /// Fill `staging` with links (or copies) of the valid inputs only.
    /// The staging directory is recreated from scratch.
    pub fn stage_into(&self, staging: &Path) -> Result<()> {
        if staging.exists() {
            fs::remove_dir_all(staging).map_err(|e| OrchestratorError::io(staging, e))?;
        }
        ensure_dir(staging)?;

        for path in &self.valid {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = staging.join(name);
            if fs::hard_link(path, &target).is_err() {
                fs::copy(path, &target).map_err(|e| OrchestratorError::io(&target, e))?;
            }
        }
        debug!(
            "Staged {} inputs into {}",
            self.valid.len(),
            staging.display()
        );
        Ok(())
    }
}

/// Split a directory into valid alignment files and everything else. Nothing is deleted.
pub fn select_inputs(dir: &Path) -> Result<InputSelection> {
    let mut selection = InputSelection::default();
    for path in sorted_entries(dir)? {
        if path.is_file() && !is_hidden(&path) && fasta::has_sequence_extension(&path) {
            selection.valid.push(path);
        } else {
            selection.rejected.push(path);
        }
    }
    Ok(selection)
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| OrchestratorError::io(dir, e))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

/// Write `contents` to a hidden sibling and rename it over `path`
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);
    fs::write(&tmp, contents).map_err(|e| OrchestratorError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| OrchestratorError::io(path, e))
}

/// Write only when the file is missing or differs. Returns whether it wrote.
pub fn write_if_changed(path: &Path, contents: &[u8]) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    write_atomic(path, contents)?;
    Ok(true)
}

/// Copy a file, permission bits included, through a temporary sibling
pub fn copy_preserving(from: &Path, to: &Path) -> Result<()> {
    let tmp = temp_sibling(to);
    // fs::copy carries the permission bits over
    fs::copy(from, &tmp).map_err(|e| OrchestratorError::io(from, e))?;
    fs::rename(&tmp, to).map_err(|e| OrchestratorError::io(to, e))
}

/// Temporary path used while a tool writes `path`
pub fn staging_path(path: &Path) -> PathBuf {
    temp_sibling(path)
}

/// Run `f` over `items` on a pool of `workers` threads, keeping input order
pub fn par_map<T, R, F>(workers: usize, items: &[T], f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| OrchestratorError::Other(anyhow::anyhow!("thread pool: {}", e)))?;
    Ok(pool.install(|| items.par_iter().map(f).collect()))
}

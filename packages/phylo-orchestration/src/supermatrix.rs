//! Concatenated alignment plus NEXUS partition file for `file` mode

use crate::error::{OrchestratorError, Result};
use crate::fanout;
use crate::fasta;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// One locus block in the supermatrix, 1-based inclusive columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub locus: String,
    pub start: usize,
    pub end: usize,
}

/// One aligned locus, sequences keyed by taxon
#[derive(Debug, Clone)]
pub struct LocusAlignment {
    pub locus: String,
    pub length: usize,
    pub rows: BTreeMap<String, String>,
}

impl LocusAlignment {
    /// Parse one alignment; unequal lengths or no records are `MalformedInput`
    pub fn read(path: &Path) -> Result<Self> {
        let locus = fasta::locus_name(path)
            .ok_or_else(|| OrchestratorError::malformed(path, "not a sequence file"))?;
        let records = fasta::read_records(path)?;
        if records.is_empty() {
            return Err(OrchestratorError::malformed(path, "no sequences"));
        }
        let length = fasta::uniform_length(&fasta::alignment_lengths(&records))
            .ok_or_else(|| OrchestratorError::malformed(path, "sequences have different lengths"))?;

        let mut rows = BTreeMap::new();
        for record in &records {
            let taxon = record.taxon().to_string();
            if rows.insert(taxon.clone(), record.sequence()).is_some() {
                warn!("{}: taxon {} appears more than once, keeping the last", locus, taxon);
            }
        }
        Ok(Self { locus, length, rows })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Supermatrix {
    pub taxa: BTreeSet<String>,
    pub loci: Vec<LocusAlignment>,
}

impl Supermatrix {
    /// Loci are concatenated in the order given
    pub fn new(loci: Vec<LocusAlignment>) -> Self {
        let taxa = loci
            .iter()
            .flat_map(|l| l.rows.keys().cloned())
            .collect();
        Self { taxa, loci }
    }

    pub fn width(&self) -> usize {
        self.loci.iter().map(|l| l.length).sum()
    }

    pub fn partitions(&self) -> Vec<Partition> {
        let mut start = 1;
        self.loci
            .iter()
            .map(|l| {
                let p = Partition {
                    locus: l.locus.clone(),
                    start,
                    end: start + l.length - 1,
                };
                start += l.length;
                p
            })
            .collect()
    }

    /// FASTA with one record per taxon; missing loci are filled with gaps
    pub fn render_fasta(&self) -> String {
        let mut out = String::new();
        for taxon in &self.taxa {
            out.push('>');
            out.push_str(taxon);
            out.push('\n');
            for locus in &self.loci {
                match locus.rows.get(taxon) {
                    Some(seq) => out.push_str(seq),
                    None => out.push_str(&"-".repeat(locus.length)),
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn render_nexus(&self) -> String {
        let mut out = String::from("#nexus\nbegin sets;\n");
        for p in self.partitions() {
            out.push_str(&format!("    charset {} = {}-{};\n", p.locus, p.start, p.end));
        }
        out.push_str("end;\n");
        out
    }
}

/// Outcome of building from a directory
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    pub loci: usize,
    pub taxa: usize,
    pub width: usize,
    pub excluded: Vec<String>,
}

/// Read every alignment in `dir` (sorted by locus) and write the supermatrix
/// and partition files. Malformed alignments are left out.
pub fn build_from_dir(
    dir: &Path,
    matrix_path: &Path,
    partition_path: &Path,
    workers: usize,
) -> Result<BuildSummary> {
    let files = fanout::locus_files(dir)?;
    fanout::check_unique_loci(&files)?;
    let parsed = fanout::par_map(workers, &files, |p| LocusAlignment::read(p))?;

    let mut loci = Vec::new();
    let mut excluded = Vec::new();
    for (path, result) in files.iter().zip(parsed) {
        match result {
            Ok(locus) if locus.length == 0 => {
                debug!("{}: empty alignment", locus.locus);
                excluded.push(format!("{}: empty alignment", path.display()));
            }
            Ok(locus) => loci.push(locus),
            Err(e) if !e.is_fatal() => {
                warn!("{}", e);
                excluded.push(e.to_string());
            }
            Err(e) => return Err(e),
        }
    }
    loci.sort_by(|a, b| a.locus.cmp(&b.locus));

    if loci.is_empty() {
        return Err(OrchestratorError::config(format!(
            "no usable alignments in {} to build a supermatrix from",
            dir.display()
        )));
    }

    let matrix = Supermatrix::new(loci);
    for parent in [matrix_path.parent(), partition_path.parent()].into_iter().flatten() {
        if !parent.as_os_str().is_empty() {
            fanout::ensure_dir(parent)?;
        }
    }
    fanout::write_atomic(matrix_path, matrix.render_fasta().as_bytes())?;
    fanout::write_atomic(partition_path, matrix.render_nexus().as_bytes())?;

    Ok(BuildSummary {
        loci: matrix.loci.len(),
        taxa: matrix.taxa.len(),
        width: matrix.width(),
        excluded,
    })
}

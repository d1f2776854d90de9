//! Alignment outlier screen
//!
//! Flags sequences whose mean identity distance to the rest of their alignment
//! sits more than `z_threshold` population standard deviations above the mean.
//! Reporting only; alignments are never modified.

use crate::error::{OrchestratorError, Result};
use crate::fanout;
use crate::fasta::{self, SequenceRecord};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extensions screened
pub const ALIGNMENT_EXTENSIONS: &[&str] = &["fasta", "fa", "faa", "fna", "aln", "fas"];

/// Positions holding one of these in either sequence never count as a match
pub const SKIP_LETTERS: &[u8] = b"-*";

pub const REPORT_TEXT: &str = "outlier_report.txt";
pub const REPORT_JSON: &str = "outlier_report.json";

/// `1 - matches / len(a)`; 1.0 for empty sequences
pub fn identity_distance(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() {
        return 1.0;
    }
    let matches = a
        .iter()
        .zip(b)
        .filter(|(x, y)| !SKIP_LETTERS.contains(x) && !SKIP_LETTERS.contains(y) && x == y)
        .count();
    1.0 - matches as f64 / a.len() as f64
}

/// Mean distance of each sequence to every other one
pub fn mean_distances(seqs: &[Vec<u8>]) -> Vec<f64> {
    let n = seqs.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }
    (0..n)
        .into_par_iter()
        .map(|i| {
            let total: f64 = (0..n)
                .filter(|&j| j != i)
                .map(|j| identity_distance(&seqs[i], &seqs[j]))
                .sum();
            total / (n - 1) as f64
        })
        .collect()
}

/// Population z-scores; None when they are undefined (fewer than two values,
/// zero spread, or non-finite input)
pub fn z_scores(values: &[f64]) -> Option<Vec<f64>> {
    if values.len() < 2 || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std == 0.0 {
        return None;
    }
    Some(values.iter().map(|v| (v - mean) / std).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierHit {
    pub id: String,
    pub avg_distance: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentScreen {
    pub alignment_name: String,
    pub file_path: PathBuf,
    pub num_sequences: usize,
    pub alignment_length: usize,
    pub outliers: Vec<OutlierHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAlignment {
    pub file_path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    pub z_threshold: f64,
    pub alignments: Vec<AlignmentScreen>,
    pub skipped: Vec<SkippedAlignment>,
}

/// Outliers among already-parsed records
pub fn screen_records(records: &[SequenceRecord], z_threshold: f64) -> Vec<OutlierHit> {
    let seqs: Vec<Vec<u8>> = records.iter().map(|r| r.sequence().into_bytes()).collect();
    let means = mean_distances(&seqs);
    let Some(z) = z_scores(&means) else {
        return Vec::new();
    };

    records
        .iter()
        .zip(means.iter().zip(z))
        .filter(|(_, (_, z))| *z > z_threshold)
        .map(|(record, (mean, z))| OutlierHit {
            id: record.id().to_string(),
            avg_distance: *mean,
            z_score: z,
        })
        .collect()
}

/// Name used in reports: file name up to its first `.`
fn alignment_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

pub fn screen_alignment(path: &Path, z_threshold: f64) -> Result<AlignmentScreen> {
    let records = fasta::read_records(path)?;
    if records.is_empty() {
        return Err(OrchestratorError::malformed(path, "no sequences"));
    }
    let lengths = fasta::alignment_lengths(&records);
    let alignment_length = fasta::uniform_length(&lengths)
        .ok_or_else(|| OrchestratorError::malformed(path, "sequences have different lengths"))?;

    Ok(AlignmentScreen {
        alignment_name: alignment_name(path),
        file_path: path.to_path_buf(),
        num_sequences: records.len(),
        alignment_length,
        outliers: screen_records(&records, z_threshold),
    })
}

/// Alignment files directly inside `dir`, sorted
pub fn alignment_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| OrchestratorError::io(dir, e))? {
        let path = entry.map_err(|e| OrchestratorError::io(dir, e))?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| ALIGNMENT_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Screen every alignment in `dir`. Unreadable or malformed files are skipped.
pub fn screen_dir(dir: &Path, z_threshold: f64, workers: usize) -> Result<OutlierReport> {
    let files = alignment_files(dir)?;
    info!("Screening {} alignments in {}", files.len(), dir.display());

    let results = fanout::par_map(workers, &files, |path| screen_alignment(path, z_threshold))?;

    let mut report = OutlierReport {
        z_threshold,
        ..Default::default()
    };
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(screen) => {
                debug!(
                    "{}: {} sequences, {} outliers",
                    screen.alignment_name,
                    screen.num_sequences,
                    screen.outliers.len()
                );
                report.alignments.push(screen);
            }
            Err(e) if !e.is_fatal() || matches!(e, OrchestratorError::IoAt { .. }) => {
                warn!("Skipping {}: {}", path.display(), e);
                report.skipped.push(SkippedAlignment {
                    file_path: path.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

impl OutlierReport {
    pub fn outlier_count(&self) -> usize {
        self.alignments.iter().map(|a| a.outliers.len()).sum()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::from("OUTLIER SEQUENCE ANALYSIS REPORT\n");
        out.push_str("===============================\n\n");

        for screen in &self.alignments {
            out.push_str(&format!("Alignment: {}\n", screen.alignment_name));
            out.push_str(&format!("File: {}\n", screen.file_path.display()));
            out.push_str(&format!("Sequences: {}\n", screen.num_sequences));
            out.push_str(&format!("Alignment Length: {}\n", screen.alignment_length));

            if screen.outliers.is_empty() {
                out.push_str("\nNo outlier sequences detected.\n");
            } else {
                out.push_str("\nPotential outlier sequences:\n");
                for hit in &screen.outliers {
                    out.push_str(&format!(
                        "  - {}: Avg Distance = {:.4}, Z-score = {:.4}\n",
                        hit.id, hit.avg_distance, hit.z_score
                    ));
                }
            }
            out.push('\n');
            out.push_str(&"-".repeat(50));
            out.push_str("\n\n");
        }

        if self.outlier_count() == 0 {
            out.push_str("No outlier sequences were detected in any alignments.\n");
        }
        out
    }

    /// Write the text and JSON reports into `dir`
    pub fn write(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        fanout::ensure_dir(dir)?;
        let text_path = dir.join(REPORT_TEXT);
        let json_path = dir.join(REPORT_JSON);

        fanout::write_atomic(&text_path, self.render_text().as_bytes())?;
        let json = serde_json::to_vec_pretty(self).map_err(OrchestratorError::serialization)?;
        fanout::write_atomic(&json_path, &json)?;

        info!("Report saved to {}", text_path.display());
        Ok((text_path, json_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_distance() {
        assert_eq!(identity_distance(b"ACGT", b"ACGT"), 0.0);
        assert_eq!(identity_distance(b"ACGT", b"TGCA"), 1.0);
        // gap positions never match but still count towards the length
        assert_eq!(identity_distance(b"AC-T", b"AC-T"), 0.25);
        assert_eq!(identity_distance(b"A*GT", b"ACGT"), 0.25);
        assert_eq!(identity_distance(b"", b""), 1.0);
    }

    #[test]
    fn test_z_scores_undefined_without_spread() {
        assert!(z_scores(&[0.1, 0.1, 0.1]).is_none());
        assert!(z_scores(&[0.5]).is_none());
        assert!(z_scores(&[f64::NAN, 0.2]).is_none());

        let z = z_scores(&[1.0, 3.0]).unwrap();
        assert!((z[0] + 1.0).abs() < 1e-12);
        assert!((z[1] - 1.0).abs() < 1e-12);
    }

    fn alignment(divergent: bool) -> String {
        let mut text = String::new();
        for i in 0..12 {
            text.push_str(&format!(">taxon{}|EOG1\nACDEFGHIKLMNPQRSTVWY\n", i));
        }
        if divergent {
            text.push_str(">odd|EOG1\nWWWWWWWWWWWWWWWWWWWW\n");
        }
        text
    }

    #[test]
    fn test_divergent_sequence_is_flagged() {
        let records = fasta::parse_records(&alignment(true));
        let hits = screen_records(&records, 3.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "odd|EOG1");
        assert!(hits[0].z_score > 3.0);
    }

    #[test]
    fn test_identical_sequences_flag_nothing() {
        let records = fasta::parse_records(&alignment(false));
        assert!(screen_records(&records, 3.0).is_empty());
    }

    #[test]
    fn test_screen_dir_writes_reports_and_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("EOG1.faa"), alignment(true)).unwrap();
        std::fs::write(dir.path().join("EOG2.fasta"), alignment(false)).unwrap();
        std::fs::write(dir.path().join("EOG3.aln"), ">a\nAAA\n>b\nAA\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let report = screen_dir(dir.path(), 3.0, 2).unwrap();
        assert_eq!(report.alignments.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.outlier_count(), 1);

        let out = dir.path().join("out");
        let (text_path, json_path) = report.write(&out).unwrap();
        let text = std::fs::read_to_string(text_path).unwrap();
        assert!(text.starts_with("OUTLIER SEQUENCE ANALYSIS REPORT\n"));
        assert!(text.contains("Alignment: EOG1\n"));
        assert!(text.contains("  - odd|EOG1: Avg Distance = "));
        assert!(text.contains("Alignment: EOG2\n"));
        assert!(text.contains("No outlier sequences detected."));
        assert!(!text.contains("in any alignments"));

        let parsed: OutlierReport =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(parsed.alignments.len(), 2);
    }

    #[test]
    fn test_empty_report_footer() {
        let report = OutlierReport {
            z_threshold: 3.0,
            ..Default::default()
        };
        assert!(report
            .render_text()
            .ends_with("No outlier sequences were detected in any alignments.\n"));
    }
}

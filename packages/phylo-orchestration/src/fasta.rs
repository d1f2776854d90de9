//! FASTA records and header normalization
//!
//! Records keep their body lines exactly as read so header rewrites never
//! touch sequence data.

use crate::error::{OrchestratorError, Result};
use std::path::Path;

/// Extensions recognised as per-locus sequence files
pub const SEQUENCE_EXTENSIONS: &[&str] = &["fa", "faa", "fas", "fasta"];

/// Extension written by every stage that produces locus files
pub const LOCUS_EXTENSION: &str = "faa";

pub fn has_sequence_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SEQUENCE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Locus name: the file name up to its sequence extension
pub fn locus_name(path: &Path) -> Option<String> {
    if !has_sequence_extension(path) {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `{locus}.faa`
pub fn locus_file_name(locus: &str) -> String {
    format!("{}.{}", locus, LOCUS_EXTENSION)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Header text without the leading `>`
    pub header: String,
    /// Body lines as read (no line terminators)
    pub lines: Vec<String>,
}

impl SequenceRecord {
    /// Residue count, ignoring whitespace
    pub fn sequence_len(&self) -> usize {
        self.lines
            .iter()
            .map(|l| l.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }

    pub fn sequence(&self) -> String {
        self.lines
            .iter()
            .flat_map(|l| l.chars().filter(|c| !c.is_whitespace()))
            .collect()
    }

    /// First whitespace-delimited token of the header
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }

    /// Header up to the first `|`
    pub fn taxon(&self) -> &str {
        let id = self.id();
        id.split('|').next().unwrap_or(id)
    }
}

/// Parse records; text before the first header is ignored
pub fn parse_records(text: &str) -> Vec<SequenceRecord> {
    let mut records = Vec::new();
    let mut current: Option<SequenceRecord> = None;

    for line in text.lines() {
        if let Some(header) = line.strip_prefix('>') {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(SequenceRecord {
                header: header.to_string(),
                lines: Vec::new(),
            });
        } else if let Some(record) = current.as_mut() {
            record.lines.push(line.to_string());
        }
    }
    if let Some(done) = current {
        records.push(done);
    }
    records
}

/// Read a sequence file as text. Content that is not UTF-8 is `MalformedInput`.
pub fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => OrchestratorError::malformed(path, "not valid UTF-8"),
        _ => OrchestratorError::io(path, e),
    })
}

pub fn read_records(path: &Path) -> Result<Vec<SequenceRecord>> {
    Ok(parse_records(&read_text(path)?))
}

pub fn render_records(records: &[SequenceRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push('>');
        out.push_str(&record.header);
        out.push('\n');
        for line in &record.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Per-record lengths; a file without records is malformed
pub fn alignment_lengths(records: &[SequenceRecord]) -> Vec<usize> {
    records.iter().map(SequenceRecord::sequence_len).collect()
}

/// The shared length when every length agrees
pub fn uniform_length(lengths: &[usize]) -> Option<usize> {
    let first = *lengths.first()?;
    lengths.iter().all(|&l| l == first).then_some(first)
}

/// Header rewrite policies. They are alternatives, never applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPolicy<'a> {
    /// `>{taxon}|{locus}`
    Tag { taxon: &'a str, locus: &'a str },
    /// Drop everything from the first `|`
    Truncate,
}

impl<'a> HeaderPolicy<'a> {
    /// Rewrite one header line (with its leading `>`)
    pub fn rewrite_header(&self, line: &str) -> String {
        match self {
            HeaderPolicy::Tag { taxon, locus } => format!(">{}|{}", taxon, locus),
            HeaderPolicy::Truncate => match line.find('|') {
                Some(idx) => line[..idx].to_string(),
                None => line.to_string(),
            },
        }
    }

    /// Rewrite every header line of a FASTA text; other lines pass through.
    /// Output always ends with a newline so files can be appended safely.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 1);
        for line in text.lines() {
            if line.starts_with('>') {
                out.push_str(&self.rewrite_header(line));
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }
        out
    }
}

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No {role} found on the search path (tried: {})", candidates.join(", "))]
    ToolNotFound {
        role: String,
        candidates: Vec<String>,
    },

    #[error("Malformed input {}: {reason}", path.display())]
    MalformedInput { path: PathBuf, reason: String },

    #[error("{tool} failed ({status}){}", format_stderr(stderr))]
    ToolInvocationFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Stage {stage} failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("IO error at {}: {source}", path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_stderr(stderr: &str) -> String {
    let tail = stderr.trim();
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail)
    }
}

impl OrchestratorError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Attach the offending path to an I/O error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::Yaml(_) | Self::StageNotFound(_) | Self::Parse(_) => {
                ErrorCategory::Configuration
            }
            Self::ToolNotFound { .. } | Self::ToolInvocationFailed { .. } => ErrorCategory::Tool,
            Self::MalformedInput { .. } => ErrorCategory::Input,
            Self::StageFailed { source, .. } => source.category(),
            Self::InvalidStateTransition { .. }
            | Self::IoAt { .. }
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Other(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Malformed items are excluded and the stage keeps going; everything else aborts the run.
    pub fn is_fatal(&self) -> bool {
        self.category() != ErrorCategory::Input
    }
}

/// Error category recorded in the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Unknown mode, missing required file or directory, bad config file
    Configuration,
    /// Tool missing from the search path, or a tool exited non-zero
    Tool,
    /// A single malformed item (skipped, never fatal)
    Input,
    /// Filesystem and other environment failures
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Tool => "tool",
            ErrorCategory::Input => "input",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "configuration" => Ok(ErrorCategory::Configuration),
            "tool" => Ok(ErrorCategory::Tool),
            "input" => Ok(ErrorCategory::Input),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_roundtrip() {
        for category in &[
            ErrorCategory::Configuration,
            ErrorCategory::Tool,
            ErrorCategory::Input,
            ErrorCategory::Infrastructure,
        ] {
            let s = category.as_str();
            let parsed = ErrorCategory::from_str(s).unwrap();
            assert_eq!(*category, parsed);
        }
    }

    #[test]
    fn test_error_category_invalid() {
        assert!(ErrorCategory::from_str("transient").is_err());
    }

    #[test]
    fn test_tool_not_found_lists_every_candidate() {
        let err = OrchestratorError::ToolNotFound {
            role: "tree inference".to_string(),
            candidates: vec!["iqtree3".into(), "iqtree2".into(), "iqtree".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("iqtree3, iqtree2, iqtree"));
        assert_eq!(err.category(), ErrorCategory::Tool);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_input_is_not_fatal() {
        let err = OrchestratorError::malformed("aln/EOG1.faa", "unequal sequence lengths");
        assert_eq!(err.category(), ErrorCategory::Input);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_stage_failure_keeps_inner_category() {
        let err = OrchestratorError::config("unknown mode 'tree'").in_stage("species-tree");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().starts_with("Stage species-tree failed"));
    }

    #[test]
    fn test_tool_failure_message_includes_stderr_tail() {
        let err = OrchestratorError::ToolInvocationFailed {
            tool: "mafft".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "  bad input\n".to_string(),
        };
        assert_eq!(err.to_string(), "mafft failed (exit status: 1): bad input");
    }
}

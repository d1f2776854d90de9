use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity of one output artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub stage: StageId,
    /// None for whole-stage artifacts (trees, supermatrix)
    pub locus: Option<String>,
    pub path: PathBuf,
    /// Parameters that shaped the artifact, for policies that care
    pub params: Option<String>,
}

impl ArtifactKey {
    pub fn locus(stage: StageId, locus: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            locus: Some(locus.into()),
            path: path.into(),
            params: None,
        }
    }

    pub fn stage_output(stage: StageId, path: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            locus: None,
            path: path.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }
}

/// Decides whether an artifact from an earlier run can be reused
pub trait CheckpointPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_complete(&self, key: &ArtifactKey) -> bool;
}

/// Artifact exists and is non-empty. Content is not inspected, so a truncated
/// but non-empty file from an interrupted run counts as complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistenceCheckpoint;

impl CheckpointPolicy for ExistenceCheckpoint {
    fn name(&self) -> &'static str {
        "exists-nonempty"
    }

    fn is_complete(&self, key: &ArtifactKey) -> bool {
        is_nonempty_file(&key.path)
    }
}

pub fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Checkpoint hits and misses for one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub hits: usize,
    pub misses: usize,
}

/// Checkpoint manager (policy + per-stage bookkeeping)
pub struct CheckpointManager {
    policy: Arc<dyn CheckpointPolicy>,
    stats: Mutex<HashMap<StageId, CheckpointStats>>,
}

impl CheckpointManager {
    pub fn new(policy: Arc<dyn CheckpointPolicy>) -> Self {
        Self {
            policy,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// True when the artifact is already complete and its work can be skipped
    pub fn should_skip(&self, key: &ArtifactKey) -> bool {
        let complete = self.policy.is_complete(key);

        let mut stats = self.stats.lock();
        let entry = stats.entry(key.stage).or_default();
        if complete {
            entry.hits += 1;
        } else {
            entry.misses += 1;
        }
        complete
    }

    pub fn stats(&self, stage: StageId) -> CheckpointStats {
        self.stats.lock().get(&stage).copied().unwrap_or_default()
    }

    /// A merged input the stage cannot run without; missing or empty aborts the run
    pub fn require_input(&self, path: &Path, what: &str) -> Result<()> {
        if is_nonempty_file(path) {
            Ok(())
        } else {
            Err(OrchestratorError::config(format!(
                "required {} {} is missing or empty",
                what,
                path.display()
            )))
        }
    }

    /// A stage input directory; missing aborts the run
    pub fn require_dir(&self, path: &Path, what: &str) -> Result<()> {
        if path.is_dir() {
            Ok(())
        } else {
            Err(OrchestratorError::config(format!(
                "required {} {} does not exist",
                what,
                path.display()
            )))
        }
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new(Arc::new(ExistenceCheckpoint))
    }
}

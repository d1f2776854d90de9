use crate::error::{ErrorCategory, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    /// Collect per-taxon locus files and tag headers `>{taxon}|{locus}`
    Gather,
    /// Truncate headers at the first `|` (alternative first stage)
    Rename,
    Align,
    Trim,
    /// Keep alignments with uniform length above the minimum
    Filter,
    /// Report-only outlier screen over filtered alignments
    Outliers,
    /// Concatenate filtered alignments into one supermatrix plus partition
    Supermatrix,
    SpeciesTree,
    GeneTrees,
    Concordance,
    Supertree,
}

impl StageId {
    pub const ALL: [StageId; 11] = [
        StageId::Gather,
        StageId::Rename,
        StageId::Align,
        StageId::Trim,
        StageId::Filter,
        StageId::Outliers,
        StageId::Supermatrix,
        StageId::SpeciesTree,
        StageId::GeneTrees,
        StageId::Concordance,
        StageId::Supertree,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Gather => "gather",
            StageId::Rename => "rename",
            StageId::Align => "align",
            StageId::Trim => "trim",
            StageId::Filter => "filter",
            StageId::Outliers => "outliers",
            StageId::Supermatrix => "supermatrix",
            StageId::SpeciesTree => "species-tree",
            StageId::GeneTrees => "gene-trees",
            StageId::Concordance => "concordance",
            StageId::Supertree => "supertree",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| {
                OrchestratorError::config(format!(
                    "Unknown stage '{}'. Valid stages: {}",
                    s,
                    Self::ALL
                        .iter()
                        .map(|id| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    /// Default output directory name under the work root
    pub fn default_dir_name(&self) -> &'static str {
        match self {
            StageId::Gather | StageId::Rename => "01_loci",
            StageId::Align => "02_aligned",
            StageId::Trim => "03_trimmed",
            StageId::Filter => "04_filtered",
            StageId::Supermatrix => "05_supermatrix",
            StageId::SpeciesTree => "06_species_tree",
            StageId::GeneTrees => "07_gene_trees",
            StageId::Concordance => "08_concordance",
            StageId::Supertree => "09_supertree",
            StageId::Outliers => "outliers",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        current_stage: Option<StageId>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        items_processed: usize,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
        failed_stage: Option<StageId>,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Queued { .. } => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

/// One pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Work root the run writes into
    pub label: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new_queued(label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            state: JobState::Queued { queued_at: now },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Job state machine for transitions
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    /// Transition: QUEUED → RUNNING
    pub fn start(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running {
                    started_at: now,
                    current_stage: None,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// RUNNING → RUNNING with a new current stage
    pub fn enter_stage(&mut self, stage: StageId) -> Result<()> {
        if let JobState::Running { current_stage, .. } = &mut self.job.state {
            *current_stage = Some(stage);
            self.job.updated_at = Utc::now();
            return Ok(());
        }
        Err(self.invalid("running"))
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self, items_processed: usize) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;

                self.job.state = JobState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                    items_processed,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("completed")),
        }
    }

    /// Transition: RUNNING → FAILED
    pub fn fail(&mut self, error: &OrchestratorError) -> Result<()> {
        match &self.job.state {
            JobState::Running {
                started_at,
                current_stage,
            } => {
                let now = Utc::now();
                self.job.state = JobState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error: error.to_string(),
                    error_category: error.category(),
                    failed_stage: *current_stage,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }

    fn invalid(&self, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.job.state.state_name().to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_roundtrip() {
        for id in StageId::ALL {
            assert_eq!(StageId::from_str(id.as_str()).unwrap(), id);
        }
        assert!(StageId::from_str("phase9").is_err());
    }

    #[test]
    fn test_gather_and_rename_share_output_dir() {
        assert_eq!(
            StageId::Gather.default_dir_name(),
            StageId::Rename.default_dir_name()
        );
    }

    #[test]
    fn test_job_lifecycle_success() {
        let job = Job::new_queued("work");
        let mut sm = JobStateMachine::new(job);

        sm.start().unwrap();
        sm.enter_stage(StageId::Align).unwrap();
        sm.complete(42).unwrap();

        match &sm.job().state {
            JobState::Completed {
                items_processed, ..
            } => assert_eq!(*items_processed, 42),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(sm.job().state.is_terminal());
    }

    #[test]
    fn test_job_failure_records_stage_and_category() {
        let mut sm = JobStateMachine::new(Job::new_queued("work"));
        sm.start().unwrap();
        sm.enter_stage(StageId::SpeciesTree).unwrap();

        let err = OrchestratorError::ToolNotFound {
            role: "tree inference".into(),
            candidates: vec!["iqtree3".into()],
        };
        sm.fail(&err).unwrap();

        match &sm.job().state {
            JobState::Failed {
                failed_stage,
                error_category,
                ..
            } => {
                assert_eq!(*failed_stage, Some(StageId::SpeciesTree));
                assert_eq!(*error_category, ErrorCategory::Tool);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = JobStateMachine::new(Job::new_queued("work"));
        assert!(sm.complete(0).is_err());
        assert!(sm.enter_stage(StageId::Align).is_err());

        sm.start().unwrap();
        assert!(sm.start().is_err());

        sm.complete(0).unwrap();
        let err = OrchestratorError::config("late");
        assert!(sm.fail(&err).is_err());
    }
}

use crate::config::{HeaderPolicyKind, InputMode, PipelineConfig};
use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use std::collections::HashSet;
use std::path::PathBuf;

/// Stage node in the static plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    pub id: StageId,
    pub name: &'static str,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl StageNode {
    pub fn new(
        id: StageId,
        name: &'static str,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            name,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }
}

pub fn stage_name(id: StageId) -> &'static str {
    match id {
        StageId::Gather => "Gather loci",
        StageId::Rename => "Rename headers",
        StageId::Align => "Align",
        StageId::Trim => "Trim",
        StageId::Filter => "Filter by length",
        StageId::Outliers => "Outlier screen",
        StageId::Supermatrix => "Build supermatrix",
        StageId::SpeciesTree => "Species tree",
        StageId::GeneTrees => "Gene trees",
        StageId::Concordance => "Concordance factors",
        StageId::Supertree => "Supertree",
    }
}

/// Ordered stage list. Each stage reads the directory its predecessor wrote;
/// no dependency inference happens here.
#[derive(Debug, Clone)]
pub struct StagePlan {
    nodes: Vec<StageNode>,
}

impl StagePlan {
    pub fn new(nodes: Vec<StageNode>) -> Result<Self> {
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.id) {
                return Err(OrchestratorError::config(format!(
                    "Stage {} appears twice in the plan",
                    node.id
                )));
            }
            if node.input_dir == node.output_dir {
                return Err(OrchestratorError::config(format!(
                    "Stage {} would write into its own input directory {}",
                    node.id,
                    node.input_dir.display()
                )));
            }
        }
        Ok(Self { nodes })
    }

    /// Every stage with its directories, whether or not the config enables it
    fn chain(config: &PipelineConfig) -> Vec<StageNode> {
        let node = |id: StageId, input: PathBuf| {
            StageNode::new(id, stage_name(id), input, config.stage_dir(id))
        };

        let loci = config.stage_dir(match config.header_policy {
            HeaderPolicyKind::Tag => StageId::Gather,
            HeaderPolicyKind::Truncate => StageId::Rename,
        });
        let aligned = config.stage_dir(StageId::Align);
        let trimmed = config.stage_dir(StageId::Trim);
        let filtered = config.stage_dir(StageId::Filter);

        // Tree stages read the filtered directory in dir mode, the supermatrix's directory in file mode
        let tree_input = match config.mode {
            InputMode::Dir => filtered.clone(),
            InputMode::File => config
                .supermatrix_path()
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        vec![
            node(StageId::Gather, config.input_dir.clone()),
            node(StageId::Rename, config.input_dir.clone()),
            node(StageId::Align, loci),
            node(StageId::Trim, aligned),
            node(StageId::Filter, trimmed),
            node(StageId::Outliers, filtered.clone()),
            node(StageId::Supermatrix, filtered),
            node(StageId::SpeciesTree, tree_input.clone()),
            node(StageId::GeneTrees, tree_input.clone()),
            node(StageId::Concordance, tree_input),
            node(StageId::Supertree, config.stage_dir(StageId::GeneTrees)),
        ]
    }

    fn enabled(config: &PipelineConfig, id: StageId) -> bool {
        match id {
            StageId::Gather => config.header_policy == HeaderPolicyKind::Tag,
            StageId::Rename => config.header_policy == HeaderPolicyKind::Truncate,
            StageId::Outliers => config.outliers,
            StageId::Supermatrix => config.builds_supermatrix(),
            _ => true,
        }
    }

    /// Full run for this configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            Self::chain(config)
                .into_iter()
                .filter(|n| Self::enabled(config, n.id))
                .collect(),
        )
    }

    /// One stage on its own, enabled or not
    pub fn single(config: &PipelineConfig, id: StageId) -> Result<Self> {
        let node = Self::chain(config)
            .into_iter()
            .find(|n| n.id == id)
            .ok_or_else(|| OrchestratorError::StageNotFound(id.to_string()))?;
        Self::new(vec![node])
    }

    /// Contiguous slice `from..=to` of this plan
    pub fn slice(&self, from: Option<StageId>, to: Option<StageId>) -> Result<Self> {
        let position = |id: StageId| {
            self.nodes
                .iter()
                .position(|n| n.id == id)
                .ok_or_else(|| {
                    OrchestratorError::StageNotFound(format!(
                        "{} is not part of this run's plan",
                        id
                    ))
                })
        };
        let start = from.map(position).transpose()?.unwrap_or(0);
        let end = match to {
            Some(id) => position(id)?,
            None => self.nodes.len().saturating_sub(1),
        };
        if start > end {
            return Err(OrchestratorError::config(format!(
                "--from stage comes after --to stage ({} > {})",
                self.nodes[start].id, self.nodes[end].id
            )));
        }
        Ok(Self {
            nodes: self.nodes[start..=end].to_vec(),
        })
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn get(&self, id: StageId) -> Option<&StageNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Human-readable plan (for logging and `plan`)
    pub fn execution_plan(&self) -> String {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                format!(
                    "Stage {}: {} [{}] {} -> {}",
                    i + 1,
                    node.name,
                    node.id,
                    node.input_dir.display(),
                    node.output_dir.display()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

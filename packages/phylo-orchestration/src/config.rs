//! Run configuration
//!
//! Built once per run: defaults, overlaid by an optional YAML file, overlaid by
//! command-line overrides. Stages only ever see `&PipelineConfig`.

use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration file schema versions this build understands
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Default locus sub-path under each taxon directory (BUSCO layout)
pub const DEFAULT_LOCUS_SUBPATH: &str = "run_*/busco_sequences/single_copy_busco_sequences";

pub const SUPERMATRIX_FILE: &str = "supermatrix.faa";
pub const PARTITION_FILE: &str = "partitions.nex";

/// How the tree stages receive their alignments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Every alignment in a directory
    Dir,
    /// One concatenated alignment plus a partition file
    File,
}

impl InputMode {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dir" => Ok(Self::Dir),
            "file" => Ok(Self::File),
            _ => Err(OrchestratorError::config(format!(
                "Unknown mode '{}'. Valid modes: dir, file",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::File => "file",
        }
    }
}

/// Thread count handed to external tools (never used by the orchestrator itself)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSpec {
    Auto,
    Count(usize),
}

impl ThreadSpec {
    pub fn parse(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match s.parse::<usize>() {
            Ok(0) | Err(_) => Err(OrchestratorError::config(format!(
                "Invalid thread count '{}'. Use AUTO or a positive integer",
                s
            ))),
            Ok(n) => Ok(Self::Count(n)),
        }
    }

    /// MAFFT spells "auto" as -1
    pub fn mafft_arg(&self) -> String {
        match self {
            Self::Auto => "-1".to_string(),
            Self::Count(n) => n.to_string(),
        }
    }
}

impl std::fmt::Display for ThreadSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "AUTO"),
            Self::Count(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for ThreadSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Header normalization applied by the first stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderPolicyKind {
    /// Gather from taxon directories, headers become `>{taxon}|{locus}`
    Tag,
    /// Rename a flat directory, headers cut at the first `|`
    Truncate,
}

impl HeaderPolicyKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tag" => Ok(Self::Tag),
            "truncate" => Ok(Self::Truncate),
            _ => Err(OrchestratorError::config(format!(
                "Unknown header policy '{}'. Valid policies: tag, truncate",
                s
            ))),
        }
    }
}

/// Where alignment lengths come from during filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthProbeKind {
    Native,
    Seqkit,
}

impl LengthProbeKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "seqkit" => Ok(Self::Seqkit),
            _ => Err(OrchestratorError::config(format!(
                "Unknown length probe '{}'. Valid probes: native, seqkit",
                s
            ))),
        }
    }
}

/// Resolved, immutable run configuration
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Per-taxon annotation root (tag policy) or flat locus directory (truncate policy)
    pub input_dir: PathBuf,
    /// Root that holds every stage output directory
    pub work_dir: PathBuf,
    pub locus_subpath: String,
    pub header_policy: HeaderPolicyKind,
    pub threads: ThreadSpec,
    /// Parallel per-locus workers inside a stage
    pub workers: usize,
    /// Alignments must be strictly longer than this to pass the filter
    pub min_length: usize,
    /// Ultrafast bootstrap replicates (0 disables)
    pub bootstrap: u32,
    pub mode: InputMode,
    pub concat_file: Option<PathBuf>,
    pub partition_file: Option<PathBuf>,
    pub site_concordance: bool,
    pub scf_quartets: u32,
    pub length_probe: LengthProbeKind,
    pub outliers: bool,
    pub outlier_z_threshold: f64,
    /// Delete non-alignment files from tree-stage inputs instead of staging around them
    pub sanitize: bool,
    /// With `sanitize`, only log what would be deleted
    pub dry_run: bool,
    /// Searched before PATH when resolving tools
    pub tool_dir: Option<PathBuf>,
    pub stage_dirs: BTreeMap<StageId, PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("busco"),
            work_dir: PathBuf::from("phylogenomics"),
            locus_subpath: DEFAULT_LOCUS_SUBPATH.to_string(),
            header_policy: HeaderPolicyKind::Tag,
            threads: ThreadSpec::Auto,
            workers: num_cpus::get().max(1),
            min_length: 100,
            bootstrap: 1000,
            mode: InputMode::Dir,
            concat_file: None,
            partition_file: None,
            site_concordance: false,
            scf_quartets: 100,
            length_probe: LengthProbeKind::Native,
            outliers: false,
            outlier_z_threshold: 3.0,
            sanitize: false,
            dry_run: false,
            tool_dir: None,
            stage_dirs: BTreeMap::new(),
        }
    }
}

/// Thread count as written in YAML (`8`) or on the command line (`AUTO`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThreadsValue {
    Count(usize),
    Keyword(String),
}

/// Named overrides; every field is optional and only set fields are applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locus_subpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<ThreadsValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concat_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_concordance: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scf_quartets: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_probe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outliers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_z_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitize: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_dir: Option<PathBuf>,
    /// Output directory per stage name, e.g. `align: /scratch/aligned`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dirs: BTreeMap<String, PathBuf>,
}

/// YAML schema v1
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: Option<u32>,
    #[serde(default)]
    pipeline: ConfigOverrides,
}

impl PipelineConfig {
    /// Defaults → YAML file → command-line overrides, then validation.
    pub fn resolve(config_file: Option<&Path>, cli: &ConfigOverrides) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = config_file {
            let file_overrides = Self::load_overrides(path)?;
            config.apply(&file_overrides)?;
        }
        config.apply(cli)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_overrides(path: &Path) -> Result<ConfigOverrides> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::overrides_from_yaml(&content)
    }

    pub fn overrides_from_yaml(content: &str) -> Result<ConfigOverrides> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;
        match file.version {
            None => Err(OrchestratorError::config(
                "Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.",
            )),
            Some(v) if !SUPPORTED_VERSIONS.contains(&v) => Err(OrchestratorError::config(format!(
                "Unsupported configuration version {}. Supported versions: {}",
                v,
                SUPPORTED_VERSIONS
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
            Some(_) => Ok(file.pipeline),
        }
    }

    /// Overlay every field set in `o`
    pub fn apply(&mut self, o: &ConfigOverrides) -> Result<()> {
        if let Some(v) = &o.input_dir {
            self.input_dir = v.clone();
        }
        if let Some(v) = &o.work_dir {
            self.work_dir = v.clone();
        }
        if let Some(v) = &o.locus_subpath {
            self.locus_subpath = v.clone();
        }
        if let Some(v) = &o.header_policy {
            self.header_policy = HeaderPolicyKind::from_str(v)?;
        }
        if let Some(v) = &o.threads {
            self.threads = match v {
                ThreadsValue::Count(n) => ThreadSpec::parse(&n.to_string())?,
                ThreadsValue::Keyword(s) => ThreadSpec::parse(s)?,
            };
        }
        if let Some(v) = o.workers {
            self.workers = v;
        }
        if let Some(v) = o.min_length {
            self.min_length = v;
        }
        if let Some(v) = o.bootstrap {
            self.bootstrap = v;
        }
        if let Some(v) = &o.mode {
            self.mode = InputMode::from_str(v)?;
        }
        if let Some(v) = &o.concat_file {
            self.concat_file = Some(v.clone());
        }
        if let Some(v) = &o.partition_file {
            self.partition_file = Some(v.clone());
        }
        if let Some(v) = o.site_concordance {
            self.site_concordance = v;
        }
        if let Some(v) = o.scf_quartets {
            self.scf_quartets = v;
        }
        if let Some(v) = &o.length_probe {
            self.length_probe = LengthProbeKind::from_str(v)?;
        }
        if let Some(v) = o.outliers {
            self.outliers = v;
        }
        if let Some(v) = o.outlier_z_threshold {
            self.outlier_z_threshold = v;
        }
        if let Some(v) = o.sanitize {
            self.sanitize = v;
        }
        if let Some(v) = o.dry_run {
            self.dry_run = v;
        }
        if let Some(v) = &o.tool_dir {
            self.tool_dir = Some(v.clone());
        }
        for (name, dir) in &o.dirs {
            self.stage_dirs.insert(StageId::from_str(name)?, dir.clone());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(OrchestratorError::config("workers must be at least 1"));
        }
        if self.bootstrap != 0 && self.bootstrap < 1000 {
            return Err(OrchestratorError::config(format!(
                "bootstrap must be 0 (disabled) or at least 1000 ultrafast replicates, got {}",
                self.bootstrap
            )));
        }
        if !(self.outlier_z_threshold > 0.0) {
            return Err(OrchestratorError::config(
                "outlier_z_threshold must be a positive number",
            ));
        }
        if self.concat_file.is_some() != self.partition_file.is_some() {
            return Err(OrchestratorError::config(
                "concat_file and partition_file must be given together",
            ));
        }
        Ok(())
    }

    /// Output directory of a stage
    pub fn stage_dir(&self, stage: StageId) -> PathBuf {
        self.stage_dirs
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| self.work_dir.join(stage.default_dir_name()))
    }

    /// Concatenated alignment used in `file` mode
    pub fn supermatrix_path(&self) -> PathBuf {
        self.concat_file
            .clone()
            .unwrap_or_else(|| self.stage_dir(StageId::Supermatrix).join(SUPERMATRIX_FILE))
    }

    /// Partition file used in `file` mode
    pub fn partition_path(&self) -> PathBuf {
        self.partition_file
            .clone()
            .unwrap_or_else(|| self.stage_dir(StageId::Supermatrix).join(PARTITION_FILE))
    }

    /// True when the supermatrix stage has to build the `file` mode inputs
    pub fn builds_supermatrix(&self) -> bool {
        self.mode == InputMode::File && self.concat_file.is_none()
    }
}

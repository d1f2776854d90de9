//! External tool resolution and invocation
//!
//! Each stage resolves its tools from an ordered candidate list (newest first)
//! against the resolver's own search path. Nothing is cached between stages and
//! the process-wide `PATH` is never modified.

use crate::error::{OrchestratorError, Result};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::debug;

/// A tool role and its candidate binary names, most preferred first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToolSpec {
    pub role: &'static str,
    pub candidates: &'static [&'static str],
}

impl ToolSpec {
    pub const ALIGNER: ToolSpec = ToolSpec {
        role: "aligner",
        candidates: &["mafft"],
    };

    pub const TRIMMER: ToolSpec = ToolSpec {
        role: "trimmer",
        candidates: &["trimal"],
    };

    pub const TREE_INFERENCE: ToolSpec = ToolSpec {
        role: "tree inference",
        candidates: &["iqtree3", "iqtree2", "iqtree"],
    };

    pub const SUPERTREE: ToolSpec = ToolSpec {
        role: "supertree",
        candidates: &["astral"],
    };

    pub const SEQ_STATS: ToolSpec = ToolSpec {
        role: "sequence statistics",
        candidates: &["seqkit"],
    };
}

/// A binary found on the search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub role: &'static str,
    pub name: String,
    pub path: PathBuf,
}

impl ResolvedTool {
    pub fn invocation(&self) -> Invocation<'_> {
        Invocation {
            tool: self,
            args: Vec::new(),
            stdout: None,
            current_dir: None,
        }
    }
}

/// Ordered-candidate binary lookup
#[derive(Debug, Clone)]
pub struct ToolResolver {
    search_path: Vec<PathBuf>,
}

impl ToolResolver {
    /// Search the directories listed in `PATH`
    pub fn from_env() -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self { search_path }
    }

    pub fn with_search_path(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    /// Search `dir` before everything else
    pub fn prepend(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path.insert(0, dir.into());
        self
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// First candidate present on the search path, or `ToolNotFound` naming all of them
    pub fn resolve(&self, spec: &ToolSpec) -> Result<ResolvedTool> {
        for name in spec.candidates {
            if let Some(path) = self.locate(name) {
                debug!("Resolved {} -> {}", spec.role, path.display());
                return Ok(ResolvedTool {
                    role: spec.role,
                    name: name.to_string(),
                    path,
                });
            }
        }
        Err(OrchestratorError::ToolNotFound {
            role: spec.role.to_string(),
            candidates: spec.candidates.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Resolve several roles up front; fails on the first missing one
    pub fn resolve_all(&self, specs: &[ToolSpec]) -> Result<StageTools> {
        let mut resolved = HashMap::new();
        for spec in specs {
            resolved.insert(spec.role, self.resolve(spec)?);
        }
        Ok(StageTools { resolved })
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.search_path
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

impl Default for ToolResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Tools resolved for one stage, keyed by role
#[derive(Debug, Clone, Default)]
pub struct StageTools {
    resolved: HashMap<&'static str, ResolvedTool>,
}

impl StageTools {
    pub fn get(&self, spec: &ToolSpec) -> Result<&ResolvedTool> {
        self.resolved
            .get(spec.role)
            .ok_or_else(|| OrchestratorError::ToolNotFound {
                role: spec.role.to_string(),
                candidates: spec.candidates.iter().map(|c| c.to_string()).collect(),
            })
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// One subprocess call
pub struct Invocation<'a> {
    tool: &'a ResolvedTool,
    args: Vec<OsString>,
    stdout: Option<PathBuf>,
    current_dir: Option<PathBuf>,
}

impl<'a> Invocation<'a> {
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Redirect the tool's standard output into `path`
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Shell-like rendering for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.tool.name.as_str().into())
            .chain(self.args.iter().map(|a| a.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion; non-zero exit becomes `ToolInvocationFailed`
    pub async fn run(self) -> Result<()> {
        self.execute(false).await.map(|_| ())
    }

    /// Run to completion and return standard output
    pub async fn capture(self) -> Result<String> {
        self.execute(true).await
    }

    async fn execute(self, capture: bool) -> Result<String> {
        debug!("$ {}", self.command_line());

        let mut cmd = tokio::process::Command::new(&self.tool.path);
        // A cancelled fan-out drops this future; the child must not outlive it
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        match &self.stdout {
            Some(path) => {
                let file =
                    std::fs::File::create(path).map_err(|e| OrchestratorError::io(path, e))?;
                cmd.stdout(Stdio::from(file));
            }
            None if capture => {
                cmd.stdout(Stdio::piped());
            }
            None => {
                cmd.stdout(Stdio::null());
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::io(&self.tool.path, e))?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OrchestratorError::io(&self.tool.path, e))?;

        if !output.status.success() {
            return Err(OrchestratorError::ToolInvocationFailed {
                tool: self.tool.name.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr, 5),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn stderr_tail(stderr: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

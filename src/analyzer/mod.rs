//! Package-manager contract and per-definition-file resolution.
//!
//! Each ecosystem implements [`PackageManager`]. Managers are created through
//! the explicit [`ManagerKind::create`] mapping and run by [`resolve_all`], which
//! resolves independent definition files in parallel and merges the results
//! into one [`AnalyzerResult`].

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{AnalyzerResult, ProjectAnalyzerResult};
use crate::process::{display_command, locate_tool, ToolOutput, ToolRunner};

pub mod node;
pub mod rust;
pub mod scratch;

/// Maximum depth of a dependency tree before resolution is aborted.
pub const MAX_DEPTH: usize = 256;

/// Unrecoverable failure while resolving one definition file.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("`{command}` failed with exit code {exit_code}\n{stderr}")]
    ToolInvocationFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to run `{command}`: {source}")]
    ToolUnavailable {
        command: String,
        source: std::io::Error,
    },

    #[error("{} already exists; remove it before analyzing", .path.display())]
    DirtyWorkingTree { path: PathBuf },

    #[error("lockfile {} not found", .path.display())]
    LockfileMissing { path: PathBuf },

    #[error("unsupported project topology in {}: {reason}", .path.display())]
    UnsupportedTopology { path: PathBuf, reason: String },

    #[error("`{name}` is required by {} but not installed", .path.display())]
    DependencyNotInstalled { path: PathBuf, name: String },

    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CyclicGraphDetected { cycle: Vec<String> },

    #[error("could not parse output of `{command}`: {message}")]
    MalformedOutput { command: String, message: String },

    #[error("could not read {}: {message}", .path.display())]
    ManifestUnreadable { path: PathBuf, message: String },

    #[error("inconsistent dependency graph for {}: {message}", .path.display())]
    InconsistentResult { path: PathBuf, message: String },

    #[error("resolution task aborted: {message}")]
    TaskAborted { message: String },
}

/// Supported package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    Cargo,
    Npm,
}

impl ManagerKind {
    pub const ALL: [ManagerKind; 2] = [ManagerKind::Cargo, ManagerKind::Npm];

    /// Instantiate the resolver for this manager.
    pub fn create(self, ctx: AnalyzerContext) -> Arc<dyn PackageManager> {
        match self {
            ManagerKind::Cargo => Arc::new(rust::CargoResolver::new(ctx)),
            ManagerKind::Npm => Arc::new(node::NpmResolver::new(ctx)),
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerKind::Cargo => write!(f, "Cargo"),
            ManagerKind::Npm => write!(f, "NPM"),
        }
    }
}

/// Shared inputs of every resolver.
#[derive(Clone)]
pub struct AnalyzerContext {
    /// Root of the analyzed repository; path dependencies below it are projects.
    pub analysis_root: PathBuf,
    pub runner: Arc<dyn ToolRunner>,
}

impl AnalyzerContext {
    pub fn new(analysis_root: impl Into<PathBuf>, runner: Arc<dyn ToolRunner>) -> Self {
        let analysis_root = analysis_root.into();
        let analysis_root = std::fs::canonicalize(&analysis_root).unwrap_or(analysis_root);
        AnalyzerContext {
            analysis_root,
            runner,
        }
    }

    /// Run a tool, failing only if it cannot be spawned.
    pub fn run(
        &self,
        working_dir: &Path,
        command: &str,
        args: &[&str],
    ) -> Result<ToolOutput, ResolutionError> {
        self.runner
            .run(working_dir, command, args)
            .map_err(|source| ResolutionError::ToolUnavailable {
                command: display_command(command, args),
                source,
            })
    }

    /// Run a tool and require a zero exit code.
    pub fn run_checked(
        &self,
        working_dir: &Path,
        command: &str,
        args: &[&str],
    ) -> Result<ToolOutput, ResolutionError> {
        let output = self.run(working_dir, command, args)?;
        if !output.success() {
            return Err(ResolutionError::ToolInvocationFailed {
                command: display_command(command, args),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Whether `path` lies inside the analysis root. Paths that do not exist
    /// are compared with `.` and `..` resolved lexically.
    pub fn is_inside_root(&self, path: &Path) -> bool {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path));
        path.starts_with(&self.analysis_root)
    }

    /// `file` relative to the analysis root, or unchanged if outside it.
    pub fn relative_path(&self, file: &Path) -> PathBuf {
        let file = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
        file.strip_prefix(&self.analysis_root)
            .map(Path::to_path_buf)
            .unwrap_or(file)
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// The contract every ecosystem resolver implements.
pub trait PackageManager: Send + Sync {
    fn kind(&self) -> ManagerKind;

    /// Glob patterns matching this manager's definition files.
    fn definition_file_globs(&self) -> &'static [&'static str];

    /// Main external tool, used for diagnostics.
    fn command(&self) -> &'static str;

    fn context(&self) -> &AnalyzerContext;

    /// Resolve the full dependency graph of one definition file.
    ///
    /// Either a complete, validated result is returned or the resolution fails;
    /// partial graphs are never returned.
    fn resolve_dependencies(
        &self,
        definition_file: &Path,
    ) -> Result<ProjectAnalyzerResult, ResolutionError>;

    fn locate_tool(&self) -> Option<PathBuf> {
        locate_tool(self.command())
    }

    /// First line of `<command> --version`.
    fn tool_version(&self) -> Result<String, ResolutionError> {
        let ctx = self.context();
        let output = ctx.run_checked(&ctx.analysis_root, self.command(), &["--version"])?;
        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

/// Log where each manager's tool lives and its version. Failures are only logged.
pub fn log_tool_diagnostics(manager: &dyn PackageManager) {
    match manager.locate_tool() {
        Some(path) => tracing::debug!("{} tool found at {}", manager.kind(), path.display()),
        None => tracing::debug!("{} tool `{}` not found in PATH", manager.kind(), manager.command()),
    }
    match manager.tool_version() {
        Ok(version) => tracing::debug!("{} version: {}", manager.command(), version),
        Err(e) => tracing::debug!("Could not determine {} version: {}", manager.command(), e),
    }
}

/// Directory a definition file lives in.
pub(crate) fn working_dir(definition_file: &Path) -> PathBuf {
    match definition_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Check the result before handing it out.
pub(crate) fn validated(
    definition_file: &Path,
    result: ProjectAnalyzerResult,
) -> Result<ProjectAnalyzerResult, ResolutionError> {
    result
        .validate()
        .map_err(|message| ResolutionError::InconsistentResult {
            path: definition_file.to_path_buf(),
            message,
        })?;
    Ok(result)
}

/// Author name without `<email>` or `(url)` parts.
pub(crate) fn parse_author(raw: &str) -> Option<String> {
    let name = raw
        .split(['<', '('])
        .next()
        .unwrap_or_default()
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Resolve every `(manager, definition file)` job with at most `concurrency`
/// resolutions in flight, then merge.
///
/// A failing definition file is recorded in [`AnalyzerResult::issues`] and does
/// not affect the others. Results are merged in definition-file order so the
/// output does not depend on completion order.
pub async fn resolve_all(
    jobs: Vec<(Arc<dyn PackageManager>, PathBuf)>,
    concurrency: usize,
) -> AnalyzerResult {
    let mut outcomes: Vec<_> = stream::iter(jobs)
        .map(|(manager, file)| async move {
            let kind = manager.kind();
            let task_file = file.clone();
            let outcome =
                tokio::task::spawn_blocking(move || manager.resolve_dependencies(&task_file))
                    .await
                    .unwrap_or_else(|e| {
                        Err(ResolutionError::TaskAborted {
                            message: e.to_string(),
                        })
                    });
            (file, kind, outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

    let mut merged = AnalyzerResult::default();
    for (file, kind, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                tracing::info!(
                    "{} resolved {} with {} packages",
                    kind,
                    file.display(),
                    result.packages.len()
                );
                merged.add(result);
            }
            Err(e) => {
                tracing::warn!("{} failed to resolve {}: {}", kind, file.display(), e);
                merged.add_issue(&file, format!("{kind}: {e}"));
            }
        }
    }
    merged
}

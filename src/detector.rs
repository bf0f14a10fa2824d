use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use walkdir::{DirEntry, WalkDir};

use crate::analyzer::PackageManager;

/// Directories that hold installed or generated content rather than sources.
const SKIPPED_DIRS: [&str; 2] = ["node_modules", "target"];

/// Definition files below `root` for each manager, as `(manager, file)` jobs.
///
/// Files are matched by name against each manager's globs. Hidden directories
/// and module or build output directories are not descended into. The result is
/// sorted by path.
pub fn find_definition_files(
    root: &Path,
    managers: &[Arc<dyn PackageManager>],
) -> Vec<(Arc<dyn PackageManager>, PathBuf)> {
    let matchers: Vec<(Arc<dyn PackageManager>, Vec<Pattern>)> = managers
        .iter()
        .map(|manager| {
            let patterns = manager
                .definition_file_globs()
                .iter()
                .filter_map(|glob| match Pattern::new(glob) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid pattern `{}` of {}: {}", glob, manager.kind(), e);
                        None
                    }
                })
                .collect();
            (Arc::clone(manager), patterns)
        })
        .collect();

    let mut jobs = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        for (manager, patterns) in &matchers {
            if patterns.iter().any(|p| p.matches(&file_name)) {
                tracing::debug!("Found {} definition file {}", manager.kind(), entry.path().display());
                jobs.push((Arc::clone(manager), entry.path().to_path_buf()));
            }
        }
    }

    jobs.sort_by(|a, b| (&a.1, a.0.kind()).cmp(&(&b.1, b.0.kind())));
    jobs
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

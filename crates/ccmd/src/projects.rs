//! Multi-project mode: finding the repositories under a root directory.

use std::fs;
use std::path::{Path, PathBuf};

use ccm_core::{AppError, AppResult, ConfigErrorReason, FileSystemOperation, MULTI_PROJECT_ROOT_ENV};
use tracing::{debug, warn};

/// How many directory levels below the root are searched.
pub const MAX_DISCOVERY_DEPTH: usize = 3;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules"];

/// A git repository found under the multi-project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitProject {
    /// Directory name
    pub name: String,
    pub path: PathBuf,
    /// Path relative to the root, `/`-joined
    pub relative_path: String,
}

/// Reads and checks `CCMANAGER_MULTI_PROJECT_ROOT`.
///
/// # Errors
///
/// - `AppError::Config { reason: Missing }` if the variable is unset or empty
/// - `AppError::Config { reason: Validation }` if it is not an existing directory
pub fn multi_project_root() -> AppResult<PathBuf> {
    let value = std::env::var_os(MULTI_PROJECT_ROOT_ENV)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::config(
                MULTI_PROJECT_ROOT_ENV,
                ConfigErrorReason::Missing,
                format!("{MULTI_PROJECT_ROOT_ENV} is not set"),
            )
        })?;
    validate_root(PathBuf::from(value))
}

fn validate_root(root: PathBuf) -> AppResult<PathBuf> {
    if !root.is_dir() {
        return Err(AppError::config(
            MULTI_PROJECT_ROOT_ENV,
            ConfigErrorReason::Validation,
            format!("{} is not an existing directory", root.display()),
        ));
    }
    Ok(root)
}

/// Finds git repositories under `root`, sorted by name.
///
/// Hidden directories and `node_modules` are skipped, and a repository's
/// own subdirectories are not searched for nested repositories.
///
/// # Errors
///
/// `AppError::FileSystem { operation: Read }` if `root` cannot be read.
/// Unreadable subdirectories are skipped.
pub fn discover_projects(root: &Path) -> AppResult<Vec<GitProject>> {
    let entries = fs::read_dir(root).map_err(|e| AppError::file_system(FileSystemOperation::Read, root, e))?;

    let mut projects = Vec::new();
    let mut pending: Vec<(PathBuf, usize)> = collect_dirs(entries)
        .into_iter()
        .map(|dir| (dir, 1))
        .collect();

    while let Some((dir, depth)) = pending.pop() {
        if dir.join(".git").exists() {
            projects.push(project_at(root, &dir));
            continue;
        }
        if depth >= MAX_DISCOVERY_DEPTH {
            continue;
        }
        match fs::read_dir(&dir) {
            Ok(entries) => pending.extend(collect_dirs(entries).into_iter().map(|d| (d, depth + 1))),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory"),
        }
    }

    projects.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    debug!(root = %root.display(), found = projects.len(), "Project discovery complete");
    Ok(projects)
}

/// Visible, non-skipped subdirectories.
fn collect_dirs(entries: fs::ReadDir) -> Vec<PathBuf> {
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.') && !SKIPPED_DIRS.contains(&&*name)
        })
        .map(|entry| entry.path())
        .collect()
}

fn project_at(root: &Path, dir: &Path) -> GitProject {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative_path = dir
        .strip_prefix(root)
        .map(|rel| {
            rel.iter()
                .map(|c| c.to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_else(|_| name.clone());
    GitProject {
        name,
        path: dir.to_path_buf(),
        relative_path,
    }
}

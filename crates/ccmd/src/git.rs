//! Git collaborator commands.
//!
//! Thin wrappers around the `git` CLI. Query helpers never fail: a failing
//! command resolves to the conservative answer documented on each function.
//! Only [`list_worktrees`] surfaces `AppError::Git`, since callers need the
//! list to do anything at all.
//!
//! All functions in this module perform blocking I/O; call them via
//! `spawn_blocking` from async code.

use std::path::{Path, PathBuf};
use std::process::Command;

use ccm_core::{AppError, AppResult};
use tracing::{debug, trace, warn};

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name; `None` when detached or bare
    pub branch: Option<String>,
    pub is_main: bool,
    pub is_bare: bool,
    pub is_detached: bool,
    pub is_locked: bool,
    pub is_prunable: bool,
}

/// Runs `git -C <dir> <args>` and returns trimmed stdout.
///
/// # Errors
///
/// `AppError::Git` if git cannot be started or exits non-zero. A missing
/// binary is reported with exit code -1.
pub fn run_git(dir: &Path, args: &[&str]) -> AppResult<String> {
    let command = format!("git {}", args.join(" "));
    trace!(dir = %dir.display(), command = %command, "Running git");

    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|e| AppError::git(&command, -1, e.to_string(), None))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(AppError::git(
            command,
            output.status.code().unwrap_or(-1),
            stderr,
            Some(stdout),
        ));
    }
    Ok(stdout)
}

/// Returns true if the worktree has staged, unstaged or untracked changes.
///
/// A failing `git status` counts as dirty.
pub fn has_uncommitted_changes(path: &Path) -> bool {
    match run_git(path, &["status", "--porcelain"]) {
        Ok(out) => !out.is_empty(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "git status failed, assuming dirty");
            true
        }
    }
}

/// Resolves the main repository root for any path inside a repository or
/// one of its worktrees.
///
/// Returns `None` if git cannot tell.
pub fn find_repository_root(path: &Path) -> Option<PathBuf> {
    let common = match run_git(path, &["rev-parse", "--git-common-dir"]) {
        Ok(out) => out,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Not a git repository");
            return None;
        }
    };

    // Relative answers are relative to `path`.
    let common_dir = path.join(common);
    let common_dir = std::fs::canonicalize(&common_dir).unwrap_or(common_dir);

    if is_submodule_git_dir(&common_dir) {
        return run_git(path, &["rev-parse", "--show-toplevel"])
            .ok()
            .map(PathBuf::from);
    }
    common_dir.parent().map(Path::to_path_buf)
}

/// Submodule git dirs live under `<super>/.git/modules/<name>`.
fn is_submodule_git_dir(common_dir: &Path) -> bool {
    let names: Vec<Option<&str>> = common_dir.iter().map(|c| c.to_str()).collect();
    names
        .windows(2)
        .any(|pair| matches!(pair, [Some(".git"), Some("modules")]))
}

/// Returns true if `extensions.worktreeConfig` is enabled.
///
/// A failing lookup (including an unset key) counts as disabled.
pub fn is_worktree_config_enabled(path: &Path) -> bool {
    run_git(path, &["config", "--bool", "extensions.worktreeConfig"])
        .map(|out| out == "true")
        .unwrap_or(false)
}

/// Lists the worktrees of the repository containing `path`.
///
/// # Errors
///
/// `AppError::Git` if `git worktree list` fails.
pub fn list_worktrees(path: &Path) -> AppResult<Vec<Worktree>> {
    let out = run_git(path, &["worktree", "list", "--porcelain"])?;
    Ok(parse_worktree_porcelain(&out))
}

/// Parses `git worktree list --porcelain` output. The first entry is the
/// main worktree.
pub fn parse_worktree_porcelain(output: &str) -> Vec<Worktree> {
    let mut worktrees: Vec<Worktree> = Vec::new();
    let mut current: Option<Worktree> = None;

    for line in output.lines() {
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        if key == "worktree" {
            worktrees.extend(current.take());
            current = Some(Worktree {
                path: PathBuf::from(value),
                is_main: worktrees.is_empty(),
                ..Worktree::default()
            });
            continue;
        }
        let Some(worktree) = current.as_mut() else {
            continue;
        };
        match key {
            "HEAD" => worktree.head = Some(value.to_string()),
            "branch" => {
                let short = value.strip_prefix("refs/heads/").unwrap_or(value);
                worktree.branch = Some(short.to_string());
            }
            "bare" => worktree.is_bare = true,
            "detached" => worktree.is_detached = true,
            "locked" => worktree.is_locked = true,
            "prunable" => worktree.is_prunable = true,
            _ => {}
        }
    }
    worktrees.extend(current);
    worktrees
}

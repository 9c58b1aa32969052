use crate::cmd::{current_branch, local_branch_exists, main_worktree, run_git, run_git_ok};
use crate::GitError;
use serde::Serialize;
use std::path::Path;

const AUTOCOMMIT_MESSAGE: &str = "Auto-commit before merge";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub success: bool,
    pub branch: String,
    pub target_branch: String,
    pub conflicts: Vec<String>,
    pub message: String,
}

/// Merge the worktree's branch into the target branch of its source repo.
///
/// The source repository's original branch is restored on every failure
/// path; on success HEAD is left on the target branch at the merge commit.
pub(crate) fn local_merge_blocking(
    work_dir: &Path,
    target_override: Option<String>,
) -> Result<MergeResult, GitError> {
    let branch = current_branch(work_dir)?;
    let source_repo = main_worktree(work_dir)?;
    let target_branch = resolve_target_branch(&source_repo, target_override)?;

    autocommit_if_dirty(work_dir)?;

    let original_branch = current_branch(&source_repo)?;
    run_git_ok(&source_repo, &["checkout", &target_branch])?;

    let merge = match run_git(&source_repo, &["merge", "--no-edit", &branch]) {
        Ok(output) => output,
        Err(err) => {
            restore_branch(&source_repo, &original_branch);
            return Err(err);
        }
    };

    if merge.status.success() {
        tracing::info!(branch, target_branch, "local merge succeeded");
        return Ok(MergeResult {
            success: true,
            branch: branch.clone(),
            target_branch: target_branch.clone(),
            conflicts: Vec::new(),
            message: format!("Merged {branch} into {target_branch}"),
        });
    }

    let conflicts = unmerged_files(&source_repo);
    let _ = run_git(&source_repo, &["merge", "--abort"]);
    restore_branch(&source_repo, &original_branch);
    tracing::info!(
        branch,
        target_branch,
        conflict_count = conflicts.len(),
        "local merge hit conflicts"
    );

    Ok(MergeResult {
        success: false,
        branch: branch.clone(),
        target_branch: target_branch.clone(),
        conflicts,
        message: format!("Merge of {branch} into {target_branch} has conflicts"),
    })
}

/// Caller override, else `origin/HEAD`, else the first of `main`/`master`
/// that exists locally.
fn resolve_target_branch(
    source_repo: &Path,
    target_override: Option<String>,
) -> Result<String, GitError> {
    if let Some(target) = target_override {
        return Ok(target);
    }

    if let Ok(output) = run_git(
        source_repo,
        &["symbolic-ref", "refs/remotes/origin/HEAD"],
    ) {
        if output.status.success() {
            let full = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if let Some(branch) = full.strip_prefix("refs/remotes/origin/") {
                return Ok(branch.to_string());
            }
        }
    }

    for candidate in ["main", "master"] {
        if local_branch_exists(source_repo, candidate)? {
            return Ok(candidate.to_string());
        }
    }

    Err(GitError::TargetBranchUnknown)
}

fn autocommit_if_dirty(work_dir: &Path) -> Result<(), GitError> {
    let status = run_git_ok(work_dir, &["status", "--porcelain"])?;
    if status.trim().is_empty() {
        return Ok(());
    }
    run_git_ok(work_dir, &["add", "-A"])?;
    run_git_ok(work_dir, &["commit", "-m", AUTOCOMMIT_MESSAGE])?;
    Ok(())
}

fn unmerged_files(repo: &Path) -> Vec<String> {
    match run_git(repo, &["diff", "--name-only", "--diff-filter=U"]) {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn restore_branch(repo: &Path, branch: &str) {
    if let Err(err) = run_git_ok(repo, &["checkout", branch]) {
        tracing::warn!(branch, error = %err, "could not restore original branch after merge");
    }
}

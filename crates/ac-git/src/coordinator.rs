use crate::cmd::{command_stderr, local_branch_exists, run_git, run_git_ok};
use crate::merge::local_merge_blocking;
use crate::{GitError, MergeResult};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Creates and removes one git worktree per agent, runs the local-merge
/// protocol, and shells out for status/diff/PR. All mutating operations are
/// serialized behind `ops_lock`; the shell-outs themselves run on blocking
/// threads so no async task stalls on subprocess I/O.
pub struct WorktreeCoordinator {
    base_dir: PathBuf,
    ops_lock: Mutex<()>,
}

impl WorktreeCoordinator {
    pub fn new(base_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            base_dir,
            ops_lock: Mutex::new(()),
        })
    }

    pub fn work_dir_for(&self, agent_id: Uuid) -> PathBuf {
        self.base_dir.join(agent_id.to_string())
    }

    /// Create the worktree for `agent_id` off `source_repo`, attaching to
    /// `branch_name` if it already exists and creating it otherwise.
    pub async fn create_worktree(
        &self,
        source_repo: &Path,
        agent_id: Uuid,
        branch_name: &str,
    ) -> Result<(PathBuf, String), GitError> {
        let _guard = self.ops_lock.lock().await;
        let source_repo = source_repo.to_path_buf();
        let base_dir = self.base_dir.clone();
        let branch = branch_name.to_string();
        tokio::task::spawn_blocking(move || {
            create_worktree_blocking(&source_repo, &base_dir, agent_id, &branch)
        })
        .await
        .map_err(|e| GitError::CommandFailed {
            command: "git worktree add".to_string(),
            stderr: e.to_string(),
        })?
    }

    /// Force-remove the agent's worktree. Best effort: a failed git removal
    /// falls back to a filesystem delete plus prune, and residual errors are
    /// logged and swallowed.
    pub async fn remove_worktree(&self, source_repo: &Path, agent_id: Uuid) {
        let _guard = self.ops_lock.lock().await;
        let source_repo = source_repo.to_path_buf();
        let work_dir = self.work_dir_for(agent_id);
        let result = tokio::task::spawn_blocking(move || {
            remove_worktree_blocking(&source_repo, &work_dir)
        })
        .await;
        if let Err(err) = result {
            tracing::warn!(agent_id = %agent_id, error = %err, "worktree removal task failed");
        }
    }

    /// Merge the worktree's branch into the target branch of its source
    /// repository. Merge conflicts are a non-error outcome (`success: false`).
    pub async fn try_local_merge(
        &self,
        work_dir: &Path,
        target_branch: Option<String>,
    ) -> Result<MergeResult, GitError> {
        let _guard = self.ops_lock.lock().await;
        let work_dir = work_dir.to_path_buf();
        tokio::task::spawn_blocking(move || local_merge_blocking(&work_dir, target_branch))
            .await
            .map_err(|e| GitError::CommandFailed {
                command: "git merge".to_string(),
                stderr: e.to_string(),
            })?
    }

    /// Push the worktree's branch upstream, then open a PR via the `gh` CLI.
    /// Returns the CLI's stdout (the PR URL) trimmed.
    pub async fn create_pull_request(
        &self,
        work_dir: &Path,
        title: &str,
        body: &str,
    ) -> Result<String, GitError> {
        let _guard = self.ops_lock.lock().await;
        let work_dir = work_dir.to_path_buf();
        let title = title.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || create_pull_request_blocking(&work_dir, &title, &body))
            .await
            .map_err(|e| GitError::CommandFailed {
                command: "gh pr create".to_string(),
                stderr: e.to_string(),
            })?
    }

    pub async fn status(&self, work_dir: &Path) -> Result<String, GitError> {
        let work_dir = work_dir.to_path_buf();
        tokio::task::spawn_blocking(move || run_git_ok(&work_dir, &["status", "--porcelain"]))
            .await
            .map_err(|e| GitError::CommandFailed {
                command: "git status".to_string(),
                stderr: e.to_string(),
            })?
    }

    pub async fn diff(&self, work_dir: &Path) -> Result<String, GitError> {
        let work_dir = work_dir.to_path_buf();
        tokio::task::spawn_blocking(move || diff_blocking(&work_dir))
            .await
            .map_err(|e| GitError::CommandFailed {
                command: "git diff".to_string(),
                stderr: e.to_string(),
            })?
    }
}

fn create_worktree_blocking(
    source_repo: &Path,
    base_dir: &Path,
    agent_id: Uuid,
    branch: &str,
) -> Result<(PathBuf, String), GitError> {
    if !source_repo.is_dir() {
        return Err(GitError::NotGitRepository(source_repo.to_path_buf()));
    }
    let probe = run_git(source_repo, &["rev-parse", "--git-dir"])?;
    if !probe.status.success() {
        return Err(GitError::NotGitRepository(source_repo.to_path_buf()));
    }

    std::fs::create_dir_all(base_dir)?;
    let work_dir = base_dir.join(agent_id.to_string());
    let work_dir_str = work_dir.to_string_lossy().to_string();

    let output = if local_branch_exists(source_repo, branch)? {
        tracing::info!(branch, "attaching worktree to existing branch");
        run_git(source_repo, &["worktree", "add", &work_dir_str, branch])?
    } else {
        tracing::info!(branch, "creating worktree with new branch");
        run_git(source_repo, &["worktree", "add", "-b", branch, &work_dir_str])?
    };

    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: "git worktree add".to_string(),
            stderr: command_stderr(&output),
        });
    }

    Ok((work_dir, branch.to_string()))
}

fn remove_worktree_blocking(source_repo: &Path, work_dir: &Path) {
    let work_dir_str = work_dir.to_string_lossy().to_string();
    match run_git(
        source_repo,
        &["worktree", "remove", "--force", &work_dir_str],
    ) {
        Ok(output) if output.status.success() => return,
        Ok(output) => {
            tracing::warn!(
                work_dir = %work_dir.display(),
                stderr = %command_stderr(&output),
                "git worktree remove failed, falling back to filesystem delete"
            );
        }
        Err(err) => {
            tracing::warn!(work_dir = %work_dir.display(), error = %err, "could not run git worktree remove");
        }
    }

    if work_dir.exists() {
        if let Err(err) = std::fs::remove_dir_all(work_dir) {
            tracing::warn!(work_dir = %work_dir.display(), error = %err, "filesystem worktree delete failed");
        }
    }
    match run_git(source_repo, &["worktree", "prune"]) {
        Ok(output) if !output.status.success() => {
            tracing::warn!(stderr = %command_stderr(&output), "git worktree prune failed");
        }
        Err(err) => {
            tracing::warn!(error = %err, "could not run git worktree prune");
        }
        _ => {}
    }
}

fn create_pull_request_blocking(
    work_dir: &Path,
    title: &str,
    body: &str,
) -> Result<String, GitError> {
    let branch = crate::cmd::current_branch(work_dir)?;
    run_git_ok(work_dir, &["push", "-u", "origin", &branch])?;

    let output = Command::new("gh")
        .args(["pr", "create", "--title", title, "--body", body])
        .current_dir(work_dir)
        .output()
        .map_err(GitError::Io)?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: "gh pr create".to_string(),
            stderr: command_stderr(&output),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn diff_blocking(work_dir: &Path) -> Result<String, GitError> {
    // `git diff` exits 1 with `--exit-code`-style config in some setups;
    // treat exit 1 with output as success the way porcelain consumers do.
    let output = run_git(work_dir, &["diff"])?;
    let code = output.status.code().unwrap_or_default();
    if output.status.success() || code == 1 {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(GitError::CommandFailed {
            command: "git diff".to_string(),
            stderr: command_stderr(&output),
        })
    }
}

use crate::GitError;
use std::path::Path;
use std::process::{Command, Output};

/// Run `git` with argv-array arguments in `cwd`. User-supplied values only
/// ever travel as argv entries, never through a shell string.
pub(crate) fn run_git(cwd: &Path, args: &[&str]) -> Result<Output, GitError> {
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(GitError::Io)
}

pub(crate) fn command_stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Run `git`, requiring a zero exit status; returns stdout.
pub(crate) fn run_git_ok(cwd: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = run_git(cwd, args)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: command_stderr(&output),
        })
    }
}

/// Whether `refs/heads/<branch>` exists in the repository at `cwd`.
pub(crate) fn local_branch_exists(cwd: &Path, branch: &str) -> Result<bool, GitError> {
    let reference = format!("refs/heads/{branch}");
    let output = run_git(cwd, &["show-ref", "--verify", "--quiet", &reference])?;
    Ok(output.status.success())
}

/// Current branch name (`git rev-parse --abbrev-ref HEAD`).
pub(crate) fn current_branch(cwd: &Path) -> Result<String, GitError> {
    Ok(run_git_ok(cwd, &["rev-parse", "--abbrev-ref", "HEAD"])?
        .trim()
        .to_string())
}

/// Main-repository path for a worktree: the first `worktree <path>` entry of
/// the porcelain listing is always the main worktree.
pub(crate) fn main_worktree(cwd: &Path) -> Result<std::path::PathBuf, GitError> {
    let listing = run_git_ok(cwd, &["worktree", "list", "--porcelain"])?;
    listing
        .lines()
        .find_map(|line| line.strip_prefix("worktree "))
        .map(|path| std::path::PathBuf::from(path.trim()))
        .ok_or_else(|| GitError::CommandFailed {
            command: "git worktree list --porcelain".to_string(),
            stderr: "no worktree entries in listing".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(path: &Path) {
        Command::new("git")
            .args(["init", "-b", "main"])
            .current_dir(path)
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(path)
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(path)
            .output()
            .unwrap();
        std::fs::write(path.join("README.md"), "test").unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(path)
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(path)
            .output()
            .unwrap();
    }

    #[test]
    fn run_git_ok_surfaces_stderr_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let err = run_git_ok(dir.path(), &["checkout", "does-not-exist"]).unwrap_err();
        match err {
            GitError::CommandFailed { command, .. } => {
                assert!(command.contains("checkout"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn local_branch_exists_distinguishes_branches() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        assert!(local_branch_exists(dir.path(), "main").unwrap());
        assert!(!local_branch_exists(dir.path(), "missing").unwrap());
    }

    #[test]
    fn current_branch_reports_main() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        assert_eq!(current_branch(dir.path()).unwrap(), "main");
    }

    #[test]
    fn main_worktree_of_primary_checkout_is_itself() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let main = main_worktree(dir.path()).unwrap();
        assert_eq!(
            main.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}

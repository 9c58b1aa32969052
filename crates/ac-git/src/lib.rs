mod cmd;
mod coordinator;
mod merge;

pub use coordinator::WorktreeCoordinator;
pub use merge::MergeResult;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotGitRepository(PathBuf),
    #[error("Could not determine a merge target branch (no origin/HEAD, no main or master)")]
    TargetBranchUnknown,
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

use std::path::{Path, PathBuf};

/// Holds a configurable base directory for all console file paths.
///
/// Use `ConsolePaths::new()` for production (resolves `~/.aiagent-console`),
/// or `ConsolePaths::with_base()` for testing with an isolated directory.
#[derive(Debug, Clone)]
pub struct ConsolePaths {
    base: PathBuf,
}

impl ConsolePaths {
    /// Create paths rooted at `~/.aiagent-console`. Returns an error if the
    /// home directory cannot be determined.
    pub fn new() -> anyhow::Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(Self {
            base: home.join(".aiagent-console"),
        })
    }

    /// Create paths rooted at a custom base directory (useful for tests).
    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Directory that holds one git worktree per agent.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.base.join("worktrees")
    }

    /// Default session log directory, used when `config.json` does not
    /// override `logDir`.
    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.base.join("agent-consoled.pid")
    }

    pub fn ensure_base_dir(&self) -> anyhow::Result<()> {
        if !self.base.exists() {
            std::fs::create_dir_all(&self.base)?;
        }
        Ok(())
    }
}

//! Process-management helpers for the `agent-consoled` binary.

use std::path::{Path, PathBuf};

/// The daemon's PID file. It both advertises the listening process to the
/// `status`/`stop` subcommands and guards `start` against double launches.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded by a previous `start`, if the file holds a parseable one.
    pub fn read(&self) -> Option<u32> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        raw.trim().parse().ok()
    }

    /// Claim the file for the current process.
    pub fn write_current(&self) -> anyhow::Result<()> {
        std::fs::write(&self.path, std::process::id().to_string())?;
        Ok(())
    }

    /// Best-effort removal; a file that is already gone is not an error.
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Whether `pid` currently names a live process. On unix this is the
/// signal-0 probe; elsewhere we assume alive and let the caller's health
/// check sort it out.
pub fn process_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Append-only session log at
/// `<log_dir>/YYYY-MM/DD/HHMMSS_<agent>_<tab>_<sanitized work dir>.log`.
pub struct SessionLog {
    file: File,
}

impl SessionLog {
    pub fn open(
        log_dir: &Path,
        agent_name: &str,
        tab_name: &str,
        work_dir: &Path,
    ) -> std::io::Result<Self> {
        let now = chrono::Local::now();
        let dir = log_dir
            .join(now.format("%Y-%m").to_string())
            .join(now.format("%d").to_string());
        std::fs::create_dir_all(&dir)?;

        let file_name = format!(
            "{}_{}_{}_{}.log",
            now.format("%H%M%S"),
            agent_name,
            tab_name,
            sanitize_path(&work_dir.to_string_lossy()),
        );
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(file_name))?;
        Ok(Self { file })
    }

    /// Write failures degrade silently; a broken log never interrupts the
    /// output path.
    pub fn append(&mut self, data: &str) {
        if let Err(err) = self.file.write_all(data.as_bytes()) {
            tracing::debug!(error = %err, "session log write failed");
        }
    }
}

/// Path separators and drive colons become underscores so the work dir can
/// sit inside a single file name.
pub fn sanitize_path(path: &str) -> String {
    path.replace(['/', '\\', ':'], "_")
        .trim_start_matches('_')
        .to_string()
}

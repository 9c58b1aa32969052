use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// Daemon configuration read from an optional `config.json` in the process
/// working directory. The `PORT` environment variable overrides `port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_vite_port")]
    pub vite_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_enabled: bool,
}

fn default_port() -> u16 {
    3001
}

fn default_vite_port() -> u16 {
    5173
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            vite_port: default_vite_port(),
            log_dir: None,
            log_enabled: false,
        }
    }
}

impl ConsoleConfig {
    /// Load `config.json` from `dir` (missing file falls back to defaults),
    /// then apply the `PORT` environment override.
    pub fn load_from(dir: &Path) -> Self {
        let mut config = Self::read_file(dir);
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable PORT override"),
            }
        }
        config
    }

    fn read_file(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "invalid config.json, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not read config.json, using defaults");
                Self::default()
            }
        }
    }

    /// Rewrite `config.json` in `dir` with the current values.
    pub fn save_to(&self, dir: &Path) -> anyhow::Result<()> {
        let path = dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

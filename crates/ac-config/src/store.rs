use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

pub const STORE_FILE: &str = ".aiagent-local.json";
pub const MAX_RECENT_REPOS: usize = 10;
/// Upper bound on the scrollback persisted per agent across restarts.
pub const SCROLLBACK_PERSIST_MAX_CHARS: usize = 50_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSettings {
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size: u16,
}

fn default_font_family() -> String {
    "monospace".to_string()
}

fn default_font_size() -> u16 {
    14
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            font_size: default_font_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAgent {
    pub id: Uuid,
    pub name: String,
    pub source_repo: String,
    pub work_dir: String,
    pub branch: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_buffer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default)]
    pub recent_repos: Vec<String>,
    #[serde(default)]
    pub terminal: TerminalSettings,
    #[serde(default)]
    pub agents: Vec<PersistedAgent>,
}

/// Durable JSON store at `.aiagent-local.json` in the process working
/// directory. Writes are whole-file rewrites; every mutation goes through
/// `update` which reloads, applies, and saves under one lock so cross-field
/// updates within a tick cannot clobber each other.
pub struct LocalStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(dir: &std::path::Path) -> Self {
        Self {
            path: dir.join(STORE_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> LocalState {
        if !self.path.exists() {
            return LocalState::default();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "invalid store file, using defaults");
                    LocalState::default()
                }
            },
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "could not read store file, using defaults");
                LocalState::default()
            }
        }
    }

    fn save(&self, state: &LocalState) {
        let content = match serde_json::to_string_pretty(state) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(error = %err, "could not serialize store state");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, content) {
            tracing::warn!(path = %self.path.display(), error = %err, "could not write store file");
        }
    }

    /// Reload-modify-save under the store lock.
    pub fn update<F: FnOnce(&mut LocalState)>(&self, mutate: F) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.load();
        mutate(&mut state);
        self.save(&state);
    }

    /// Push `repo` to the front of the recent-repos LRU (max 10, deduped).
    pub fn push_recent_repo(&self, repo: &str) {
        self.update(|state| {
            state.recent_repos.retain(|r| r != repo);
            state.recent_repos.insert(0, repo.to_string());
            state.recent_repos.truncate(MAX_RECENT_REPOS);
        });
    }

    pub fn recent_repos(&self) -> Vec<String> {
        self.load().recent_repos
    }

    pub fn terminal_settings(&self) -> TerminalSettings {
        self.load().terminal
    }

    pub fn set_terminal_settings(&self, settings: TerminalSettings) {
        self.update(|state| state.terminal = settings);
    }

    pub fn upsert_agent(&self, agent: PersistedAgent) {
        self.update(|state| {
            state.agents.retain(|a| a.id != agent.id);
            state.agents.push(agent);
        });
    }

    pub fn remove_agent(&self, id: Uuid) {
        self.update(|state| state.agents.retain(|a| a.id != id));
    }

    pub fn persisted_agents(&self) -> Vec<PersistedAgent> {
        self.load().agents
    }

    /// Replace the whole persisted-agent list (startup reconciliation and
    /// graceful shutdown both rewrite it wholesale).
    pub fn set_agents(&self, agents: Vec<PersistedAgent>) {
        self.update(|state| state.agents = agents);
    }
}

/// Last `max_chars` characters of `s`, on a char boundary.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match s.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

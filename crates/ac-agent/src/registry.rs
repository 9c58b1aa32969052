use crate::buffer::{BufferStats, OutputChunk};
use crate::control::ControlRegistry;
use crate::events::{Event, EventBus};
use crate::logfile::SessionLog;
use crate::tab::{TabSession, TabStatus};
use crate::AgentError;
use ac_config::store::{tail_chars, PersistedAgent, SCROLLBACK_PERSIST_MAX_CHARS};
use ac_config::{ConsolePaths, LocalStore, SharedConfig};
use ac_git::WorktreeCoordinator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Stopped,
}

/// An agent: immutable identity plus an ordered tab list.
pub struct AgentRecord {
    pub id: Uuid,
    pub name: String,
    pub source_repo: PathBuf,
    pub work_dir: PathBuf,
    pub branch: String,
    pub created_at: i64,
    tabs: StdRwLock<Vec<Arc<TabSession>>>,
}

impl AgentRecord {
    pub(crate) fn new(
        id: Uuid,
        name: String,
        source_repo: PathBuf,
        work_dir: PathBuf,
        branch: String,
        created_at: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            source_repo,
            work_dir,
            branch,
            created_at,
            tabs: StdRwLock::new(Vec::new()),
        })
    }

    pub fn tabs(&self) -> Vec<Arc<TabSession>> {
        self.tabs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn first_tab(&self) -> Option<Arc<TabSession>> {
        self.tabs().into_iter().next()
    }

    pub fn tab(&self, tab_id: Uuid) -> Option<Arc<TabSession>> {
        self.tabs().into_iter().find(|t| t.id == tab_id)
    }

    fn add_tab(&self, tab: Arc<TabSession>) {
        self.tabs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(tab);
    }

    fn take_tab(&self, tab_id: Uuid) -> Option<Arc<TabSession>> {
        let mut tabs = self.tabs.write().unwrap_or_else(|e| e.into_inner());
        let index = tabs.iter().position(|t| t.id == tab_id)?;
        Some(tabs.remove(index))
    }

    fn tab_count(&self) -> usize {
        self.tabs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Running if any tab runs, else stopped if any tab stopped, else idle.
    pub fn status(&self) -> AgentStatus {
        let tabs = self.tabs();
        if tabs.iter().any(|t| t.status() == TabStatus::Running) {
            AgentStatus::Running
        } else if tabs.iter().any(|t| t.status() == TabStatus::Stopped) {
            AgentStatus::Stopped
        } else {
            AgentStatus::Idle
        }
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            name: self.name.clone(),
            source_repo: self.source_repo.to_string_lossy().into_owned(),
            work_dir: self.work_dir.to_string_lossy().into_owned(),
            branch: self.branch.clone(),
            created_at: self.created_at,
            status: self.status(),
            tabs: self
                .tabs()
                .iter()
                .map(|t| TabSnapshot {
                    id: t.id,
                    name: t.name.clone(),
                    status: t.status(),
                })
                .collect(),
        }
    }

    fn to_persisted(&self, output_buffer: Option<String>) -> PersistedAgent {
        PersistedAgent {
            id: self.id,
            name: self.name.clone(),
            source_repo: self.source_repo.to_string_lossy().into_owned(),
            work_dir: self.work_dir.to_string_lossy().into_owned(),
            branch: self.branch.clone(),
            created_at: self.created_at,
            output_buffer,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: TabStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub id: Uuid,
    pub name: String,
    pub source_repo: String,
    pub work_dir: String,
    pub branch: String,
    pub created_at: i64,
    pub status: AgentStatus,
    pub tabs: Vec<TabSnapshot>,
}

pub const DEFAULT_TAB_NAME: &str = "Terminal";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns all agents and their tabs. The map lock is only ever held for map
/// mutation and snapshotting; worktree shell-outs, PTY spawns, and store
/// writes all happen outside it.
pub struct AgentRegistry {
    agents: RwLock<HashMap<Uuid, Arc<AgentRecord>>>,
    bus: EventBus,
    control: Arc<ControlRegistry>,
    coordinator: Arc<WorktreeCoordinator>,
    store: Arc<LocalStore>,
    config: SharedConfig,
    paths: ConsolePaths,
}

impl AgentRegistry {
    pub fn new(
        bus: EventBus,
        control: Arc<ControlRegistry>,
        coordinator: Arc<WorktreeCoordinator>,
        store: Arc<LocalStore>,
        config: SharedConfig,
        paths: ConsolePaths,
    ) -> Arc<Self> {
        Arc::new(Self {
            agents: RwLock::new(HashMap::new()),
            bus,
            control,
            coordinator,
            store,
            config,
            paths,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn control(&self) -> &Arc<ControlRegistry> {
        &self.control
    }

    pub async fn create(
        &self,
        name: &str,
        source_repo: PathBuf,
    ) -> Result<AgentSnapshot, AgentError> {
        let agent_id = Uuid::new_v4();
        let branch = branch_name_for(name, agent_id);
        let (work_dir, branch) = self
            .coordinator
            .create_worktree(&source_repo, agent_id, &branch)
            .await?;

        let record = AgentRecord::new(
            agent_id,
            name.to_string(),
            source_repo.clone(),
            work_dir,
            branch,
            chrono::Utc::now().timestamp_millis(),
        );
        record.add_tab(TabSession::new(
            agent_id,
            DEFAULT_TAB_NAME.to_string(),
            self.bus.clone(),
        ));

        self.agents.write().await.insert(agent_id, record.clone());

        self.store.upsert_agent(record.to_persisted(None));
        self.store
            .push_recent_repo(&source_repo.to_string_lossy());

        tracing::info!(agent_id = %agent_id, name, "agent created");
        self.publish_agents_updated().await;
        Ok(record.snapshot())
    }

    /// Stop every tab, clear control, remove the worktree (best effort) and
    /// the persistence entry.
    pub async fn delete(&self, agent_id: Uuid) -> Result<(), AgentError> {
        let record = self
            .agents
            .write()
            .await
            .remove(&agent_id)
            .ok_or(AgentError::AgentNotFound(agent_id))?;

        for tab in record.tabs() {
            tab.stop(&record, &self.bus).await;
            tab.buffer().close();
        }
        self.control.clear_agent(agent_id);

        self.coordinator
            .remove_worktree(&record.source_repo, agent_id)
            .await;
        self.store.remove_agent(agent_id);

        tracing::info!(agent_id = %agent_id, "agent deleted");
        self.publish_agents_updated().await;
        Ok(())
    }

    pub async fn record(&self, agent_id: Uuid) -> Result<Arc<AgentRecord>, AgentError> {
        self.agents
            .read()
            .await
            .get(&agent_id)
            .cloned()
            .ok_or(AgentError::AgentNotFound(agent_id))
    }

    pub async fn get(&self, agent_id: Uuid) -> Option<AgentSnapshot> {
        self.agents
            .read()
            .await
            .get(&agent_id)
            .map(|record| record.snapshot())
    }

    pub async fn list(&self) -> Vec<AgentSnapshot> {
        let mut snapshots: Vec<AgentSnapshot> = self
            .agents
            .read()
            .await
            .values()
            .map(|record| record.snapshot())
            .collect();
        snapshots.sort_by_key(|a| (a.created_at, a.id));
        snapshots
    }

    pub async fn create_tab(
        &self,
        agent_id: Uuid,
        name: Option<String>,
    ) -> Result<TabSnapshot, AgentError> {
        let record = self.record(agent_id).await?;
        let name =
            name.unwrap_or_else(|| format!("{} {}", DEFAULT_TAB_NAME, record.tab_count() + 1));
        let tab = TabSession::new(agent_id, name, self.bus.clone());
        let snapshot = TabSnapshot {
            id: tab.id,
            name: tab.name.clone(),
            status: tab.status(),
        };
        record.add_tab(tab);

        self.bus.publish(Event::TabCreated {
            agent_id,
            tab: snapshot.clone(),
        });
        self.publish_agents_updated().await;
        Ok(snapshot)
    }

    pub async fn close_tab(&self, agent_id: Uuid, tab_id: Uuid) -> Result<(), AgentError> {
        let record = self.record(agent_id).await?;
        let tab = record
            .take_tab(tab_id)
            .ok_or(AgentError::TabNotFound(tab_id))?;

        tab.stop(&record, &self.bus).await;
        tab.buffer().close();
        self.control.clear_tab(agent_id, tab_id);

        self.bus.publish(Event::TabClosed { agent_id, tab_id });
        self.publish_agents_updated().await;
        Ok(())
    }

    /// Resolve a tab: explicit id, or the agent's first tab.
    pub async fn resolve_tab(
        &self,
        agent_id: Uuid,
        tab_id: Option<Uuid>,
    ) -> Result<(Arc<AgentRecord>, Arc<TabSession>), AgentError> {
        let record = self.record(agent_id).await?;
        let tab = match tab_id {
            Some(id) => record.tab(id).ok_or(AgentError::TabNotFound(id))?,
            None => record.first_tab().ok_or(AgentError::NoTabs(agent_id))?,
        };
        Ok((record, tab))
    }

    /// Lazily spawn the tab's PTY (idempotent when already running).
    pub async fn start_tab(
        &self,
        agent_id: Uuid,
        tab_id: Option<Uuid>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<TabSession>, AgentError> {
        let (record, tab) = self.resolve_tab(agent_id, tab_id).await?;
        let log = self.open_log(&record, &tab);
        tab.start(&record, &self.bus, log, cols, rows).await?;
        Ok(tab)
    }

    pub async fn stop_tab(&self, agent_id: Uuid, tab_id: Option<Uuid>) -> Result<(), AgentError> {
        let (record, tab) = self.resolve_tab(agent_id, tab_id).await?;
        tab.stop(&record, &self.bus).await;
        Ok(())
    }

    pub async fn write_tab(
        &self,
        agent_id: Uuid,
        tab_id: Uuid,
        data: &[u8],
    ) -> Result<(), AgentError> {
        let (_, tab) = self.resolve_tab(agent_id, Some(tab_id)).await?;
        tab.write(data).await
    }

    pub async fn resize_tab(
        &self,
        agent_id: Uuid,
        tab_id: Uuid,
        cols: u16,
        rows: u16,
    ) -> Result<(), AgentError> {
        let (_, tab) = self.resolve_tab(agent_id, Some(tab_id)).await?;
        tab.resize(cols, rows).await
    }

    pub async fn snapshot_tab(
        &self,
        agent_id: Uuid,
        tab_id: Uuid,
        from_seq: u64,
    ) -> Result<(Vec<OutputChunk>, i64), AgentError> {
        let (_, tab) = self.resolve_tab(agent_id, Some(tab_id)).await?;
        Ok(tab.buffer().snapshot(from_seq))
    }

    pub async fn tab_stats(&self, agent_id: Uuid, tab_id: Uuid) -> Result<BufferStats, AgentError> {
        let (_, tab) = self.resolve_tab(agent_id, Some(tab_id)).await?;
        Ok(tab.buffer().stats())
    }

    /// Re-admit persisted agents whose worktree still exists; each gets one
    /// idle tab seeded with the saved scrollback at seq 0. The rest are
    /// forgotten.
    pub async fn restore_persisted(&self) {
        let saved = self.store.persisted_agents();
        if saved.is_empty() {
            return;
        }

        let mut kept = Vec::new();
        for persisted in saved {
            let work_dir = PathBuf::from(&persisted.work_dir);
            if !work_dir.is_dir() {
                tracing::info!(
                    agent_id = %persisted.id,
                    work_dir = %persisted.work_dir,
                    "dropping persisted agent whose worktree is gone"
                );
                continue;
            }

            let record = AgentRecord::new(
                persisted.id,
                persisted.name.clone(),
                PathBuf::from(&persisted.source_repo),
                work_dir,
                persisted.branch.clone(),
                persisted.created_at,
            );
            let tab = TabSession::new(
                persisted.id,
                DEFAULT_TAB_NAME.to_string(),
                self.bus.clone(),
            );
            if let Some(scrollback) = persisted
                .output_buffer
                .as_deref()
                .filter(|s| !s.is_empty())
            {
                tab.buffer().seed(scrollback.to_string());
            }
            record.add_tab(tab);

            self.agents
                .write()
                .await
                .insert(persisted.id, record.clone());
            kept.push(persisted);
        }

        tracing::info!(count = kept.len(), "restored persisted agents");
        self.store.set_agents(kept);
    }

    /// Graceful shutdown: SIGINT every live PTY, wait up to five seconds,
    /// force-kill stragglers, drain buffers, persist first-tab scrollback.
    pub async fn shutdown(&self) {
        let records: Vec<Arc<AgentRecord>> =
            self.agents.read().await.values().cloned().collect();

        let mut live_tabs = Vec::new();
        for record in &records {
            for tab in record.tabs() {
                if !tab.pty_stopped().await {
                    tab.interrupt().await;
                    live_tabs.push(tab);
                }
            }
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while tokio::time::Instant::now() < deadline {
            let mut all_stopped = true;
            for tab in &live_tabs {
                if !tab.pty_stopped().await {
                    all_stopped = false;
                    break;
                }
            }
            if all_stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for tab in &live_tabs {
            if !tab.pty_stopped().await {
                tracing::warn!(tab_id = %tab.id, "PTY did not exit in time, force killing");
                tab.force_kill().await;
            }
        }

        let mut persisted = Vec::new();
        for record in &records {
            for tab in record.tabs() {
                tab.buffer().close();
            }
            let scrollback = record.first_tab().map(|tab| {
                let contents = tab.buffer().contents();
                tail_chars(&contents, SCROLLBACK_PERSIST_MAX_CHARS).to_string()
            });
            persisted.push(record.to_persisted(scrollback));
        }
        persisted.sort_by_key(|a| (a.created_at, a.id));
        self.store.set_agents(persisted);
        tracing::info!(count = records.len(), "registry shut down");
    }

    async fn publish_agents_updated(&self) {
        let agents = self.list().await;
        self.bus.publish(Event::AgentsUpdated { agents });
    }

    fn open_log(&self, record: &AgentRecord, tab: &TabSession) -> Option<SessionLog> {
        let (enabled, log_dir) = {
            let config = self.config.read().unwrap_or_else(|e| e.into_inner());
            (config.log_enabled, config.log_dir.clone())
        };
        if !enabled {
            return None;
        }
        let log_dir = log_dir.unwrap_or_else(|| self.paths.logs_dir());
        match SessionLog::open(&log_dir, &record.name, &tab.name, &record.work_dir) {
            Ok(log) => Some(log),
            Err(err) => {
                tracing::warn!(
                    agent = %record.name,
                    tab = %tab.name,
                    error = %err,
                    "could not open session log, continuing without"
                );
                None
            }
        }
    }
}

/// `agent/<slug>-<short id>`, unique per agent and readable in `git branch`.
fn branch_name_for(name: &str, agent_id: Uuid) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    let slug = if slug.is_empty() { "agent".to_string() } else { slug };
    let short_id = &agent_id.simple().to_string()[..8];
    format!("agent/{slug}-{short_id}")
}

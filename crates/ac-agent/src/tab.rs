use crate::buffer::OutputBuffer;
use crate::events::{Event, EventBus};
use crate::logfile::SessionLog;
use crate::registry::AgentRecord;
use crate::AgentError;
use ac_pty::PtySession;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Idle,
    Running,
    Stopped,
}

/// One sub-session of an agent: a PTY (spawned lazily on first attach) and
/// its sequenced output buffer.
pub struct TabSession {
    pub id: Uuid,
    pub name: String,
    agent_id: Uuid,
    status: Mutex<TabStatus>,
    buffer: Arc<OutputBuffer>,
    pty: tokio::sync::Mutex<Option<Arc<PtySession>>>,
    // The PTY exit task needs a way back to this tab without keeping it
    // alive past agent deletion.
    weak: Weak<TabSession>,
}

impl TabSession {
    pub fn new(agent_id: Uuid, name: String, bus: EventBus) -> Arc<Self> {
        let id = Uuid::new_v4();
        Arc::new_cyclic(|weak| Self {
            id,
            name,
            agent_id,
            status: Mutex::new(TabStatus::Idle),
            buffer: OutputBuffer::new(agent_id, id, bus),
            pty: tokio::sync::Mutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn status(&self) -> TabStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn buffer(&self) -> &Arc<OutputBuffer> {
        &self.buffer
    }

    pub fn is_running(&self) -> bool {
        self.status() == TabStatus::Running
    }

    /// Spawn the PTY if it is not already running. Idempotent.
    pub async fn start(
        &self,
        agent: &Arc<AgentRecord>,
        bus: &EventBus,
        log: Option<SessionLog>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<PtySession>, AgentError> {
        let mut slot = self.pty.lock().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.is_stopped() {
                return Ok(existing.clone());
            }
        }

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let env = vec![
            ("TERM".to_string(), "xterm-256color".to_string()),
            ("COLORTERM".to_string(), "truecolor".to_string()),
        ];
        let session = Arc::new(PtySession::spawn(
            self.id,
            &shell,
            &[],
            &agent.work_dir,
            env,
            cols,
            rows,
        )?);
        *slot = Some(session.clone());
        drop(slot);

        self.buffer.set_log(log);
        self.transition(TabStatus::Running, agent, bus);

        // PTY bytes feed the sequenced buffer, which publishes chunks.
        let buffer = self.buffer.clone();
        let mut output_rx = session.subscribe();
        let tab_id = self.id;
        tokio::spawn(async move {
            loop {
                match output_rx.recv().await {
                    Ok(data) => buffer.append(&data),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%tab_id, skipped, "PTY output receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Exit drains the buffer, closes the log, and walks the status back.
        let weak_tab = self.weak.clone();
        let agent = Arc::clone(agent);
        let bus = bus.clone();
        let mut exit_rx = session.subscribe_exit();
        tokio::spawn(async move {
            let _ = exit_rx.recv().await;
            let Some(tab) = weak_tab.upgrade() else {
                return;
            };
            tab.buffer.flush();
            tab.buffer.close_log();
            tab.transition(TabStatus::Stopped, &agent, &bus);
        });

        Ok(session)
    }

    /// Flush pending output, kill the PTY, and mark the tab stopped.
    pub async fn stop(&self, agent: &Arc<AgentRecord>, bus: &EventBus) {
        let pty = self.pty.lock().await.take();
        if let Some(pty) = pty {
            if let Err(err) = pty.kill().await {
                tracing::warn!(tab_id = %self.id, error = %err, "PTY kill failed");
            }
        }
        self.buffer.flush();
        self.buffer.close_log();
        self.transition(TabStatus::Stopped, agent, bus);
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), AgentError> {
        let slot = self.pty.lock().await;
        if let Some(pty) = slot.as_ref() {
            if !pty.is_stopped() {
                pty.write(data).await?;
            }
        }
        Ok(())
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), AgentError> {
        let slot = self.pty.lock().await;
        if let Some(pty) = slot.as_ref() {
            if !pty.is_stopped() {
                pty.resize(cols, rows).await?;
            }
        }
        Ok(())
    }

    /// SIGINT the PTY child (graceful-shutdown path).
    pub async fn interrupt(&self) {
        let slot = self.pty.lock().await;
        if let Some(pty) = slot.as_ref() {
            if !pty.is_stopped() {
                pty.interrupt();
            }
        }
    }

    pub async fn pty_stopped(&self) -> bool {
        let slot = self.pty.lock().await;
        slot.as_ref().map_or(true, |pty| pty.is_stopped())
    }

    pub async fn force_kill(&self) {
        let slot = self.pty.lock().await;
        if let Some(pty) = slot.as_ref() {
            let _ = pty.kill().await;
        }
    }

    /// Status transition that also publishes tab-status and the recomputed
    /// agent status. Repeated transitions to the same state stay silent.
    fn transition(&self, status: TabStatus, agent: &Arc<AgentRecord>, bus: &EventBus) {
        let changed = {
            let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
            let changed = *current != status;
            *current = status;
            changed
        };
        if !changed {
            return;
        }
        bus.publish(Event::TabStatus {
            agent_id: self.agent_id,
            tab_id: self.id,
            status,
        });
        bus.publish(Event::AgentStatus {
            agent_id: agent.id,
            status: agent.status(),
        });
    }
}

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::messages::{ClientMessage, ServerMessage};
use ac_agent::{AgentError, Event};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
const OUTBOUND_QUEUE: usize = 256;

/// Per-connection attachment state: at most one (agent, tab) at a time,
/// with the tab clearable independently when it is closed under us.
struct SubscriberSession {
    id: Uuid,
    attached_agent: Option<Uuid>,
    attached_tab: Option<Uuid>,
}

impl SubscriberSession {
    fn attached_to(&self, agent_id: Uuid, tab_id: Uuid) -> bool {
        self.attached_agent == Some(agent_id) && self.attached_tab == Some(tab_id)
    }
}

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    use futures::{SinkExt, StreamExt};

    let subscriber_id = Uuid::new_v4();
    tracing::info!(%subscriber_id, "subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

    // Outbound frames funnel through one queue so event forwarding and
    // request replies cannot interleave partial writes.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "could not serialize server message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut events = state.bus.subscribe();
    let mut session = SubscriberSession {
        id: subscriber_id,
        attached_agent: None,
        attached_tab: None,
    };

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                handle_client_message(&state, &mut session, &out_tx, msg).await;
                            }
                            Err(err) => {
                                let _ = out_tx
                                    .send(ServerMessage::Error {
                                        message: format!("Invalid message: {err}"),
                                    })
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !forward_event(&mut session, &out_tx, event).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%subscriber_id, skipped, "event receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Any control this subscriber still holds is released on disconnect.
    state.control.release_all(subscriber_id);
    drop(out_tx);
    let _ = send_task.await;
    tracing::info!(%subscriber_id, "subscriber disconnected");
}

async fn handle_client_message(
    state: &AppState,
    session: &mut SubscriberSession,
    out_tx: &mpsc::Sender<ServerMessage>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Attach {
            agent_id,
            tab_id,
            from_seq,
        } => {
            // Re-attaching releases the previous claim first.
            if let (Some(agent), Some(tab)) = (session.attached_agent, session.attached_tab) {
                state.control.release(agent, tab, session.id);
            }
            session.attached_agent = None;
            session.attached_tab = None;

            let tab = match state
                .registry
                .start_tab(agent_id, tab_id, DEFAULT_COLS, DEFAULT_ROWS)
                .await
            {
                Ok(tab) => tab,
                Err(err) => {
                    send_error(out_tx, &err).await;
                    return;
                }
            };

            let has_control = state.control.claim_if_unowned(agent_id, tab.id, session.id);
            session.attached_agent = Some(agent_id);
            session.attached_tab = Some(tab.id);

            let (chunks, last_seq) = tab.buffer().snapshot(from_seq.unwrap_or(0));
            let _ = out_tx
                .send(ServerMessage::Attached {
                    agent_id,
                    tab_id: tab.id,
                    has_control,
                    last_seq,
                })
                .await;
            let _ = out_tx
                .send(ServerMessage::OutputSync {
                    chunks,
                    tab_id: tab.id,
                    last_seq,
                })
                .await;
        }

        ClientMessage::Detach => {
            if let (Some(agent), Some(tab)) = (session.attached_agent, session.attached_tab) {
                state.control.release(agent, tab, session.id);
            }
            session.attached_agent = None;
            session.attached_tab = None;
            let _ = out_tx.send(ServerMessage::Detached).await;
        }

        ClientMessage::Input { data, tab_id } => {
            let Some(agent_id) = session.attached_agent else {
                return;
            };
            let Some(tab_id) = tab_id.or(session.attached_tab) else {
                return;
            };
            // Non-owners are dropped silently, not errored.
            if !state.control.is_owner(agent_id, tab_id, session.id) {
                return;
            }
            if let Err(err) = state
                .registry
                .write_tab(agent_id, tab_id, data.as_bytes())
                .await
            {
                send_error(out_tx, &err).await;
            }
        }

        ClientMessage::Resize { cols, rows, tab_id } => {
            let Some(agent_id) = session.attached_agent else {
                return;
            };
            let Some(tab_id) = tab_id.or(session.attached_tab) else {
                return;
            };
            if !state.control.is_owner(agent_id, tab_id, session.id) {
                return;
            }
            if cols == 0 || rows == 0 {
                return;
            }
            if let Err(err) = state.registry.resize_tab(agent_id, tab_id, cols, rows).await {
                send_error(out_tx, &err).await;
            }
        }

        ClientMessage::Start { agent_id, tab_id } => {
            if let Err(err) = state
                .registry
                .start_tab(agent_id, tab_id, DEFAULT_COLS, DEFAULT_ROWS)
                .await
            {
                send_error(out_tx, &err).await;
            }
        }

        ClientMessage::Stop { agent_id, tab_id } => {
            if let Err(err) = state.registry.stop_tab(agent_id, tab_id).await {
                send_error(out_tx, &err).await;
            }
        }

        ClientMessage::GainControl => {
            let (Some(agent_id), Some(tab_id)) = (session.attached_agent, session.attached_tab)
            else {
                let _ = out_tx
                    .send(ServerMessage::Error {
                        message: "Not attached to a tab".to_string(),
                    })
                    .await;
                return;
            };
            state.control.try_gain_control(agent_id, tab_id, session.id);
        }

        ClientMessage::CreateTab { agent_id, name } => {
            if let Err(err) = state.registry.create_tab(agent_id, name).await {
                send_error(out_tx, &err).await;
            }
        }

        ClientMessage::CloseTab { agent_id, tab_id } => {
            if let Err(err) = state.registry.close_tab(agent_id, tab_id).await {
                send_error(out_tx, &err).await;
            }
        }

        ClientMessage::SyncOutput {
            agent_id,
            tab_id,
            from_seq,
        } => match state.registry.snapshot_tab(agent_id, tab_id, from_seq).await {
            Ok((chunks, last_seq)) => {
                let _ = out_tx
                    .send(ServerMessage::OutputSync {
                        chunks,
                        tab_id,
                        last_seq,
                    })
                    .await;
            }
            Err(err) => send_error(out_tx, &err).await,
        },

        ClientMessage::GetBufferStats { agent_id, tab_id } => {
            match state.registry.tab_stats(agent_id, tab_id).await {
                Ok(stats) => {
                    let _ = out_tx
                        .send(ServerMessage::BufferStats {
                            agent_id,
                            tab_id,
                            stats,
                        })
                        .await;
                }
                Err(err) => send_error(out_tx, &err).await,
            }
        }
    }
}

/// Relay a bus event to this subscriber if its gating rules match. Returns
/// `false` when the outbound queue is gone and the connection should die.
async fn forward_event(
    session: &mut SubscriberSession,
    out_tx: &mpsc::Sender<ServerMessage>,
    event: Event,
) -> bool {
    let msg = match event {
        Event::Chunk {
            agent_id,
            tab_id,
            chunk,
        } => session.attached_to(agent_id, tab_id).then(|| ServerMessage::Output {
            data: chunk.data,
            tab_id,
            seq: chunk.seq,
        }),

        // The sidebar always needs a fresh agent list.
        Event::AgentsUpdated { agents } => Some(ServerMessage::AgentsUpdated { agents }),
        Event::AgentStatus { agent_id, status } => {
            Some(ServerMessage::AgentStatus { agent_id, status })
        }

        Event::TabStatus {
            agent_id,
            tab_id,
            status,
        } => (session.attached_agent == Some(agent_id)).then_some(ServerMessage::TabStatus {
            agent_id,
            tab_id,
            status,
        }),

        Event::TabCreated { agent_id, tab } => (session.attached_agent == Some(agent_id))
            .then_some(ServerMessage::TabCreated { agent_id, tab }),

        Event::TabClosed { agent_id, tab_id } => {
            if session.attached_agent != Some(agent_id) {
                None
            } else {
                // Our attached tab going away detaches the tab but keeps the
                // agent; the client picks a new tab on its own.
                if session.attached_tab == Some(tab_id) {
                    session.attached_tab = None;
                }
                Some(ServerMessage::TabClosed { agent_id, tab_id })
            }
        }

        Event::ControlChanged {
            agent_id,
            tab_id,
            new_owner,
        } => session
            .attached_to(agent_id, tab_id)
            .then(|| ServerMessage::ControlChanged {
                has_control: new_owner == Some(session.id),
            }),
    };

    match msg {
        Some(msg) => out_tx.send(msg).await.is_ok(),
        None => true,
    }
}

async fn send_error(out_tx: &mpsc::Sender<ServerMessage>, err: &AgentError) {
    let _ = out_tx
        .send(ServerMessage::Error {
            message: err.to_string(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_agent::{
        AgentRegistry, AgentStatus, ControlRegistry, EventBus, OutputChunk, TabStatus,
    };
    use ac_config::{ConsoleConfig, ConsolePaths, LocalStore};
    use ac_git::WorktreeCoordinator;
    use std::sync::Arc;

    fn test_state(dir: &std::path::Path) -> AppState {
        let paths = ConsolePaths::with_base(dir.join("console"));
        let store = Arc::new(LocalStore::new(dir));
        let bus = EventBus::new();
        let control = ControlRegistry::new(bus.clone());
        let coordinator = WorktreeCoordinator::new(paths.worktrees_dir());
        let config = ac_config::shared(ConsoleConfig::default());
        let registry = AgentRegistry::new(
            bus.clone(),
            control.clone(),
            coordinator.clone(),
            store.clone(),
            config.clone(),
            paths.clone(),
        );
        AppState::new(
            config,
            dir.to_path_buf(),
            paths,
            store,
            registry,
            control,
            coordinator,
            bus,
        )
    }

    fn session(id: Uuid) -> SubscriberSession {
        SubscriberSession {
            id,
            attached_agent: None,
            attached_tab: None,
        }
    }

    fn attached_session(id: Uuid, agent: Uuid, tab: Uuid) -> SubscriberSession {
        SubscriberSession {
            id,
            attached_agent: Some(agent),
            attached_tab: Some(tab),
        }
    }

    fn chunk(seq: u64, data: &str) -> OutputChunk {
        OutputChunk {
            seq,
            data: data.to_string(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn attach_to_unknown_agent_replies_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut sub = session(Uuid::new_v4());
        let (out_tx, mut out_rx) = mpsc::channel(8);

        handle_client_message(
            &state,
            &mut sub,
            &out_tx,
            ClientMessage::Attach {
                agent_id: Uuid::new_v4(),
                tab_id: None,
                from_seq: None,
            },
        )
        .await;

        match out_rx.try_recv().unwrap() {
            ServerMessage::Error { message } => {
                assert!(message.contains("Agent not found"), "got: {message}");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(sub.attached_agent.is_none());
        assert!(sub.attached_tab.is_none());
    }

    #[tokio::test]
    async fn input_without_attachment_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut sub = session(Uuid::new_v4());
        let (out_tx, mut out_rx) = mpsc::channel(8);

        handle_client_message(
            &state,
            &mut sub,
            &out_tx,
            ClientMessage::Input {
                data: "ls\n".to_string(),
                tab_id: None,
            },
        )
        .await;

        // No PTY write happened and, per the error table, no error frame.
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn input_from_non_owner_is_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (agent, tab) = (Uuid::new_v4(), Uuid::new_v4());
        let owner = Uuid::new_v4();
        state.control.try_gain_control(agent, tab, owner);

        let viewer = Uuid::new_v4();
        let mut sub = attached_session(viewer, agent, tab);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        handle_client_message(
            &state,
            &mut sub,
            &out_tx,
            ClientMessage::Input {
                data: "x".to_string(),
                tab_id: None,
            },
        )
        .await;

        assert!(out_rx.try_recv().is_err());
        assert!(state.control.is_owner(agent, tab, owner));
    }

    #[tokio::test]
    async fn resize_from_non_owner_is_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (agent, tab) = (Uuid::new_v4(), Uuid::new_v4());
        state.control.try_gain_control(agent, tab, Uuid::new_v4());

        let mut sub = attached_session(Uuid::new_v4(), agent, tab);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        handle_client_message(
            &state,
            &mut sub,
            &out_tx,
            ClientMessage::Resize {
                cols: 120,
                rows: 40,
                tab_id: None,
            },
        )
        .await;

        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn gain_control_without_attachment_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut sub = session(Uuid::new_v4());
        let (out_tx, mut out_rx) = mpsc::channel(8);

        handle_client_message(&state, &mut sub, &out_tx, ClientMessage::GainControl).await;

        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::Error { .. }
        ));
    }

    #[tokio::test]
    async fn gain_control_takes_ownership_of_attached_tab() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (agent, tab) = (Uuid::new_v4(), Uuid::new_v4());
        let previous_owner = Uuid::new_v4();
        state.control.try_gain_control(agent, tab, previous_owner);

        let thief = Uuid::new_v4();
        let mut sub = attached_session(thief, agent, tab);
        let (out_tx, _out_rx) = mpsc::channel(8);

        handle_client_message(&state, &mut sub, &out_tx, ClientMessage::GainControl).await;

        assert!(state.control.is_owner(agent, tab, thief));
        assert!(!state.control.is_owner(agent, tab, previous_owner));
    }

    #[tokio::test]
    async fn detach_releases_control_and_confirms() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (agent, tab) = (Uuid::new_v4(), Uuid::new_v4());
        let sub_id = Uuid::new_v4();
        state.control.try_gain_control(agent, tab, sub_id);

        let mut sub = attached_session(sub_id, agent, tab);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        handle_client_message(&state, &mut sub, &out_tx, ClientMessage::Detach).await;

        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::Detached
        ));
        assert!(sub.attached_agent.is_none());
        assert!(sub.attached_tab.is_none());
        assert_eq!(state.control.owner_of(agent, tab), None);
    }

    #[tokio::test]
    async fn chunks_are_forwarded_only_for_the_attached_tab() {
        let (agent, tab) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub = attached_session(Uuid::new_v4(), agent, tab);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let delivered = forward_event(
            &mut sub,
            &out_tx,
            Event::Chunk {
                agent_id: agent,
                tab_id: tab,
                chunk: chunk(7, "hi\n"),
            },
        )
        .await;
        assert!(delivered);
        match out_rx.try_recv().unwrap() {
            ServerMessage::Output { data, tab_id, seq } => {
                assert_eq!(data, "hi\n");
                assert_eq!(tab_id, tab);
                assert_eq!(seq, 7);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // Same agent, different tab: skipped.
        forward_event(
            &mut sub,
            &out_tx,
            Event::Chunk {
                agent_id: agent,
                tab_id: Uuid::new_v4(),
                chunk: chunk(8, "other"),
            },
        )
        .await;
        // Different agent entirely: skipped.
        forward_event(
            &mut sub,
            &out_tx,
            Event::Chunk {
                agent_id: Uuid::new_v4(),
                tab_id: tab,
                chunk: chunk(9, "other"),
            },
        )
        .await;
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn agents_updated_reaches_unattached_subscribers() {
        let mut sub = session(Uuid::new_v4());
        let (out_tx, mut out_rx) = mpsc::channel(8);

        forward_event(&mut sub, &out_tx, Event::AgentsUpdated { agents: vec![] }).await;
        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::AgentsUpdated { .. }
        ));

        forward_event(
            &mut sub,
            &out_tx,
            Event::AgentStatus {
                agent_id: Uuid::new_v4(),
                status: AgentStatus::Running,
            },
        )
        .await;
        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::AgentStatus { .. }
        ));
    }

    #[tokio::test]
    async fn tab_events_are_gated_to_the_attached_agent() {
        let agent = Uuid::new_v4();
        let mut sub = attached_session(Uuid::new_v4(), agent, Uuid::new_v4());
        let (out_tx, mut out_rx) = mpsc::channel(8);

        forward_event(
            &mut sub,
            &out_tx,
            Event::TabStatus {
                agent_id: Uuid::new_v4(),
                tab_id: Uuid::new_v4(),
                status: TabStatus::Running,
            },
        )
        .await;
        assert!(out_rx.try_recv().is_err(), "other agent's tab event leaked");

        forward_event(
            &mut sub,
            &out_tx,
            Event::TabStatus {
                agent_id: agent,
                tab_id: Uuid::new_v4(),
                status: TabStatus::Running,
            },
        )
        .await;
        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::TabStatus { .. }
        ));
    }

    #[tokio::test]
    async fn closing_the_attached_tab_detaches_it_but_keeps_the_agent() {
        let (agent, tab) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub = attached_session(Uuid::new_v4(), agent, tab);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        forward_event(
            &mut sub,
            &out_tx,
            Event::TabClosed {
                agent_id: agent,
                tab_id: tab,
            },
        )
        .await;

        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::TabClosed { .. }
        ));
        assert_eq!(sub.attached_agent, Some(agent));
        assert_eq!(sub.attached_tab, None);
    }

    #[tokio::test]
    async fn control_changed_translates_owner_to_boolean() {
        let (agent, tab) = (Uuid::new_v4(), Uuid::new_v4());
        let me = Uuid::new_v4();
        let mut sub = attached_session(me, agent, tab);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        forward_event(
            &mut sub,
            &out_tx,
            Event::ControlChanged {
                agent_id: agent,
                tab_id: tab,
                new_owner: Some(me),
            },
        )
        .await;
        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::ControlChanged { has_control: true }
        ));

        forward_event(
            &mut sub,
            &out_tx,
            Event::ControlChanged {
                agent_id: agent,
                tab_id: tab,
                new_owner: Some(Uuid::new_v4()),
            },
        )
        .await;
        assert!(matches!(
            out_rx.try_recv().unwrap(),
            ServerMessage::ControlChanged { has_control: false }
        ));

        // Control changes for tabs we are not attached to stay silent.
        forward_event(
            &mut sub,
            &out_tx,
            Event::ControlChanged {
                agent_id: agent,
                tab_id: Uuid::new_v4(),
                new_owner: Some(me),
            },
        )
        .await;
        assert!(out_rx.try_recv().is_err());
    }
}

use ac_agent::{AgentSnapshot, AgentStatus, BufferStats, OutputChunk, TabSnapshot, TabStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames a browser sends over `/ws`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Attach {
        agent_id: Uuid,
        #[serde(default)]
        tab_id: Option<Uuid>,
        #[serde(default)]
        from_seq: Option<u64>,
    },
    Detach,
    Input {
        data: String,
        #[serde(default)]
        tab_id: Option<Uuid>,
    },
    Resize {
        cols: u16,
        rows: u16,
        #[serde(default)]
        tab_id: Option<Uuid>,
    },
    Start {
        agent_id: Uuid,
        #[serde(default)]
        tab_id: Option<Uuid>,
    },
    Stop {
        agent_id: Uuid,
        #[serde(default)]
        tab_id: Option<Uuid>,
    },
    GainControl,
    CreateTab {
        agent_id: Uuid,
        #[serde(default)]
        name: Option<String>,
    },
    CloseTab {
        agent_id: Uuid,
        tab_id: Uuid,
    },
    SyncOutput {
        agent_id: Uuid,
        tab_id: Uuid,
        from_seq: u64,
    },
    GetBufferStats {
        agent_id: Uuid,
        tab_id: Uuid,
    },
}

/// Frames the server sends back.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Output {
        data: String,
        tab_id: Uuid,
        seq: u64,
    },
    OutputSync {
        chunks: Vec<OutputChunk>,
        tab_id: Uuid,
        last_seq: i64,
    },
    Attached {
        agent_id: Uuid,
        tab_id: Uuid,
        has_control: bool,
        last_seq: i64,
    },
    Detached,
    AgentStatus {
        agent_id: Uuid,
        status: AgentStatus,
    },
    TabStatus {
        agent_id: Uuid,
        tab_id: Uuid,
        status: TabStatus,
    },
    TabCreated {
        agent_id: Uuid,
        tab: TabSnapshot,
    },
    TabClosed {
        agent_id: Uuid,
        tab_id: Uuid,
    },
    AgentsUpdated {
        agents: Vec<AgentSnapshot>,
    },
    ControlChanged {
        has_control: bool,
    },
    BufferStats {
        agent_id: Uuid,
        tab_id: Uuid,
        stats: BufferStats,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_parses_with_optional_fields() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "attach", "agentId": "6a0f5a00-0000-4000-8000-000000000001"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Attach {
                agent_id,
                tab_id,
                from_seq,
            } => {
                assert_eq!(
                    agent_id.to_string(),
                    "6a0f5a00-0000-4000-8000-000000000001"
                );
                assert!(tab_id.is_none());
                assert!(from_seq.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn attach_parses_from_seq() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "attach", "agentId": "6a0f5a00-0000-4000-8000-000000000001", "fromSeq": 17}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Attach {
                from_seq: Some(17),
                ..
            }
        ));
    }

    #[test]
    fn gain_control_is_a_bare_tag() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "gain-control"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::GainControl));
    }

    #[test]
    fn input_defaults_tab_to_none() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "input", "data": "ls\n"}"#).unwrap();
        match msg {
            ClientMessage::Input { data, tab_id } => {
                assert_eq!(data, "ls\n");
                assert!(tab_id.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type": "reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn output_serializes_kebab_tag_and_camel_fields() {
        let msg = ServerMessage::Output {
            data: "hi\n".to_string(),
            tab_id: Uuid::nil(),
            seq: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "output");
        assert_eq!(json["data"], "hi\n");
        assert_eq!(json["seq"], 3);
        assert!(json.get("tabId").is_some());
    }

    #[test]
    fn attached_serializes_has_control_and_last_seq() {
        let msg = ServerMessage::Attached {
            agent_id: Uuid::nil(),
            tab_id: Uuid::nil(),
            has_control: true,
            last_seq: -1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "attached");
        assert_eq!(json["hasControl"], true);
        assert_eq!(json["lastSeq"], -1);
    }

    #[test]
    fn output_sync_carries_chunk_list() {
        let msg = ServerMessage::OutputSync {
            chunks: vec![OutputChunk {
                seq: 0,
                data: "hi\n".to_string(),
                timestamp: 123,
            }],
            tab_id: Uuid::nil(),
            last_seq: 0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "output-sync");
        assert_eq!(json["chunks"][0]["seq"], 0);
        assert_eq!(json["chunks"][0]["data"], "hi\n");
        assert_eq!(json["lastSeq"], 0);
    }

    #[test]
    fn control_changed_is_a_boolean_for_the_receiver() {
        let msg = ServerMessage::ControlChanged { has_control: false };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "control-changed");
        assert_eq!(json["hasControl"], false);
    }

    #[test]
    fn detached_serializes_as_bare_tag() {
        let json = serde_json::to_value(&ServerMessage::Detached).unwrap();
        assert_eq!(json["type"], "detached");
    }
}

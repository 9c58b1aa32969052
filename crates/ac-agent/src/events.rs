use crate::buffer::OutputChunk;
use crate::registry::{AgentSnapshot, AgentStatus, TabSnapshot};
use crate::tab::TabStatus;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything the console publishes in-process: PTY output chunks, tab and
/// agent status transitions, registry mutations, and control handoffs.
#[derive(Debug, Clone)]
pub enum Event {
    Chunk {
        agent_id: Uuid,
        tab_id: Uuid,
        chunk: OutputChunk,
    },
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
        agent_id: Uuid,
        tab_id: Uuid,
        new_owner: Option<Uuid>,
    },
}

const BUS_CAPACITY: usize = 1024;

/// In-process publish/subscribe fan-out. Publishing never blocks; slow
/// subscribers lag and must resync via sequence numbers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // send only fails when there are no subscribers, which is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

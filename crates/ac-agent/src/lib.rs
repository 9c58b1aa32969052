pub mod buffer;
pub mod control;
pub mod events;
pub mod logfile;
pub mod registry;
pub mod tab;

pub use buffer::{BufferStats, OutputBuffer, OutputChunk};
pub use control::ControlRegistry;
pub use events::{Event, EventBus};
pub use registry::{AgentRegistry, AgentSnapshot, AgentStatus, TabSnapshot};
pub use tab::{TabSession, TabStatus};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),
    #[error("Tab not found: {0}")]
    TabNotFound(Uuid),
    #[error("Agent has no tabs: {0}")]
    NoTabs(Uuid),
    #[error(transparent)]
    Pty(#[from] ac_pty::PtyError),
    #[error(transparent)]
    Git(#[from] ac_git::GitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub mod console;
pub mod paths;
pub mod store;

pub use console::ConsoleConfig;
pub use paths::ConsolePaths;
pub use store::{LocalState, LocalStore, PersistedAgent, TerminalSettings};

use std::sync::{Arc, RwLock};

/// Live console settings shared between the HTTP layer (which mutates them)
/// and the agent registry (which reads logging preferences at tab start).
pub type SharedConfig = Arc<RwLock<ConsoleConfig>>;

pub fn shared(config: ConsoleConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

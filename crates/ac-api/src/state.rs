use ac_agent::{AgentRegistry, ControlRegistry, EventBus};
use ac_config::{ConsolePaths, LocalStore, SharedConfig};
use ac_git::WorktreeCoordinator;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    /// Directory holding `config.json` and `.aiagent-local.json` (the
    /// process working directory in production).
    pub config_dir: PathBuf,
    pub paths: ConsolePaths,
    pub store: Arc<LocalStore>,
    pub registry: Arc<AgentRegistry>,
    pub control: Arc<ControlRegistry>,
    pub coordinator: Arc<WorktreeCoordinator>,
    pub bus: EventBus,

    pub version: &'static str,
}

impl AppState {
    pub fn new(
        config: SharedConfig,
        config_dir: PathBuf,
        paths: ConsolePaths,
        store: Arc<LocalStore>,
        registry: Arc<AgentRegistry>,
        control: Arc<ControlRegistry>,
        coordinator: Arc<WorktreeCoordinator>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            config_dir,
            paths,
            store,
            registry,
            control,
            coordinator,
            bus,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

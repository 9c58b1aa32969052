use agent_consoled::{process_exists, PidFile};
use ac_agent::{AgentRegistry, ControlRegistry, EventBus};
use ac_api::rest::health::init_start_time;
use ac_api::{build_router, AppState};
use ac_config::{ConsoleConfig, ConsolePaths, LocalStore};
use ac_git::WorktreeCoordinator;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "agent-consoled", version, about = "Multi-agent console daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Port to bind to (overrides config.json and PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check daemon status
    Status,
    /// Stop a running daemon
    Stop,
    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_consoled=info,ac_api=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let paths = ConsolePaths::new()?;
    let pid_file = PidFile::new(paths.pid_path());

    match cli.command {
        Commands::Start { port } => start(port, paths, pid_file).await,
        Commands::Status => status(pid_file).await,
        Commands::Stop => stop(pid_file).await,
        Commands::Version => {
            println!("agent-consoled {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn start(port: Option<u16>, paths: ConsolePaths, pid_file: PidFile) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let mut config = ConsoleConfig::load_from(&cwd);
    if let Some(port) = port {
        config.port = port;
    }

    if let Some(pid) = pid_file.read() {
        if process_exists(pid) {
            anyhow::bail!("agent-consoled is already running (PID {pid}); stop it first");
        }
        tracing::warn!(pid, "clearing pid file left behind by a dead daemon");
        pid_file.remove();
    }

    paths.ensure_base_dir()?;
    pid_file.write_current()?;
    init_start_time();

    let shared_config = ac_config::shared(config.clone());
    let store = Arc::new(LocalStore::new(&cwd));
    let bus = EventBus::new();
    let control = ControlRegistry::new(bus.clone());
    let coordinator = WorktreeCoordinator::new(paths.worktrees_dir());
    let registry = AgentRegistry::new(
        bus.clone(),
        control.clone(),
        coordinator.clone(),
        store.clone(),
        shared_config.clone(),
        paths.clone(),
    );
    registry.restore_persisted().await;

    let state = AppState::new(
        shared_config,
        cwd,
        paths,
        store,
        registry.clone(),
        control,
        coordinator,
        bus,
    );
    let app = build_router(state);

    let addr: SocketAddr = config.bind_addr().parse()?;
    tracing::info!("Listening on {}", addr);
    println!("agent-consoled listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = async move {
        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl+c");
        }
        tracing::info!("Shutting down...");
        registry.shutdown().await;
        pid_file.remove();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn status(pid_file: PidFile) -> anyhow::Result<()> {
    let Some(pid) = pid_file.read() else {
        println!("agent-consoled: no daemon registered");
        return Ok(());
    };
    if !process_exists(pid) {
        println!("agent-consoled: pid file points at dead process {pid}, clearing it");
        pid_file.remove();
        return Ok(());
    }

    println!("agent-consoled: running as PID {pid}");
    let config = ConsoleConfig::load_from(&std::env::current_dir()?);
    let health_url = format!("http://{}/api/health", config.bind_addr());
    match reqwest::get(&health_url).await {
        Ok(resp) => {
            let body: serde_json::Value = resp.json().await?;
            println!(
                "  version {}, up {}s",
                body["version"].as_str().unwrap_or("unknown"),
                body["uptimeSecs"].as_u64().unwrap_or(0)
            );
        }
        Err(_) => {
            println!("  health endpoint unreachable at {health_url}");
        }
    }
    Ok(())
}

async fn stop(pid_file: PidFile) -> anyhow::Result<()> {
    let Some(pid) = pid_file.read() else {
        println!("agent-consoled: nothing to stop");
        return Ok(());
    };
    if !process_exists(pid) {
        println!("agent-consoled: process {pid} is already gone, clearing pid file");
        pid_file.remove();
        return Ok(());
    }

    println!("agent-consoled: asking PID {pid} to shut down");
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }

    // Give the daemon time to drain sessions before escalating.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while process_exists(pid) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if process_exists(pid) {
        println!("agent-consoled: PID {pid} ignored SIGTERM, escalating to SIGKILL");
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGKILL);
        }
    }

    pid_file.remove();
    println!("agent-consoled: stopped");
    Ok(())
}

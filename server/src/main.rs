//! Telemetry-Driven Task Generator server.
//!
//! This is the main entry point for the server application. It's responsible for:
//! - Initializing logging and configuration.
//! - Setting up the main `Server` struct.
//! - Wiring the store, scheduler, change broadcast, auto-approval engine, and
//!   templates store together, and starting the web server and API endpoints.
//! - Handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod audit;
mod auto_approval;
mod broadcast;
mod config;
mod docs;
mod scheduler;
mod store;
mod templates_store;

use audit::AuditWriter;
use auto_approval::AutoApprovalEngine;
use broadcast::ChangeBroadcast;
use config::ConfigManager;
use scheduler::Scheduler;
use store::TaskStore;
use templates_store::TemplatesStore;

/// Command-line arguments for the server.
///
/// Every other setting is environment-driven (§6 of the specification); the
/// CLI only covers what has to be known before the environment is read: where
/// to listen and where the data directory lives.
#[derive(Parser, Debug)]
#[command(name = "tgt-server")]
#[command(about = "Telemetry-driven task generator server", long_about = None)]
struct CliArgs {
    /// Address to bind the HTTP server to.
    #[arg(long = "listen-address", value_name = "ADDRESS", default_value = "127.0.0.1:8181")]
    listen_address: String,

    /// Root data directory; tasks/, context_log/, and templates.json all live
    /// under here unless overridden by FGK_TASKS_DIR / FGK_CONTEXTLOG_DIR.
    #[arg(long = "data-dir", value_name = "DIR", default_value = "./data")]
    data_dir: PathBuf,
}

/// The main application structure for the server. It owns every long-lived
/// component and the handles to their background tasks, so shutdown can wait
/// on each of them in turn.
pub struct Server {
    listen_address: SocketAddr,
    store: Arc<TaskStore>,
    scheduler: Arc<Scheduler>,
    broadcast: Arc<ChangeBroadcast>,
    templates: Arc<TemplatesStore>,
    auto_approval: Arc<AutoApprovalEngine>,
    config: Arc<tgt_core::TgtConfig>,
    tasks_dir: PathBuf,
    scheduler_task_handle: Option<JoinHandle<()>>,
    broadcast_task_handle: Option<JoinHandle<()>>,
    auto_approval_task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Server {
    pub async fn new(listen_address: SocketAddr, data_dir: PathBuf) -> Result<Self> {
        let config = ConfigManager::load();

        let tasks_dir = data_dir.join(&config.tasks_dir);
        let contextlog_dir = data_dir.join(&config.contextlog_dir);

        let audit = AuditWriter::new(&contextlog_dir).context("failed to open audit writer")?;
        let store = TaskStore::new(&tasks_dir, audit.clone()).context("failed to open task store")?;
        let templates = TemplatesStore::load(&data_dir)
            .await
            .context("failed to load templates store")?;

        let broadcast = ChangeBroadcast::new(store.clone());
        let scheduler = Scheduler::new(
            config.clone(),
            &contextlog_dir,
            store.clone(),
            audit.clone(),
            Some(broadcast.clone()),
        );
        let auto_approval = AutoApprovalEngine::new(config.clone(), store.clone(), audit);

        Ok(Self {
            listen_address,
            store,
            scheduler,
            broadcast,
            templates,
            auto_approval,
            config: Arc::new(config),
            tasks_dir,
            scheduler_task_handle: None,
            broadcast_task_handle: None,
            auto_approval_task_handle: None,
            shutdown_tx: None,
        })
    }

    /// Starts every background loop and the HTTP server, and runs until a
    /// shutdown signal is broadcast.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            listen_address = %self.listen_address,
            tasks_dir = %self.tasks_dir.display(),
            auto_approve = self.config.auto_approve,
            "starting telemetry-driven task generator server"
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let scheduler_task = tokio::spawn(
            Arc::clone(&self.scheduler).run_loop(shutdown_tx.subscribe()),
        );

        let broadcast_task = tokio::spawn(Arc::clone(&self.broadcast).run(
            self.tasks_dir.clone(),
            std::time::Duration::from_millis(self.config.watch_debounce_ms),
            self.store.subscribe_changes(),
            shutdown_tx.subscribe(),
        ));

        let auto_approval_task = tokio::spawn(Arc::clone(&self.auto_approval).run_loop(
            self.store.subscribe_changes(),
            shutdown_tx.subscribe(),
        ));

        self.scheduler_task_handle = Some(scheduler_task);
        self.broadcast_task_handle = Some(broadcast_task);
        self.auto_approval_task_handle = Some(auto_approval_task);

        let app_state = crate::api::AppState {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            scheduler: Arc::clone(&self.scheduler),
            broadcast: Arc::clone(&self.broadcast),
            templates: Arc::clone(&self.templates),
            auto_approval: Arc::clone(&self.auto_approval),
        };
        let app = crate::api::create_router(app_state);

        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| {
                format!(
                    "failed to bind TCP listener to {}. \
                     Check if the port is already in use (EADDRINUSE) or requires elevated permissions (EACCES).",
                    self.listen_address
                )
            })?;

        info!(listen_address = %self.listen_address, "HTTP server listening");

        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

        Ok(())
    }

    /// Broadcasts the shutdown signal and waits for every background task to
    /// finish, each bounded by a short timeout so one stuck task can't hang
    /// the whole process.
    pub async fn shutdown(&mut self) {
        info!("shutting down telemetry-driven task generator server");

        const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

        if let Some(shutdown_tx) = &self.shutdown_tx {
            if let Err(e) = shutdown_tx.send(()) {
                warn!("failed to send shutdown signal: {e}");
            }
        }

        for (name, handle) in [
            ("scheduler", self.scheduler_task_handle.take()),
            ("change broadcast", self.broadcast_task_handle.take()),
            ("auto-approval", self.auto_approval_task_handle.take()),
        ] {
            let Some(handle) = handle else { continue };
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("{name} task completed successfully"),
                Ok(Err(e)) => warn!("{name} task panicked: {e}"),
                Err(_) => warn!("{name} task shutdown timeout reached, aborting"),
            }
        }

        info!("server shutdown complete");
    }
}

/// Sets up signal handlers for graceful shutdown.
///
/// On Unix systems, handles SIGTERM and SIGINT. On non-Unix systems, handles
/// Ctrl+C. If signal registration fails, falls back to Ctrl+C handling.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("failed to register signal handlers: {e}");
                error!("falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to wait for Ctrl+C: {e}");
                } else {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to receive Ctrl+C signal: {e}");
        } else {
            info!("received Ctrl+C");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "tgt-server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tgt_server=info,tgt_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();

    info!("telemetry-driven task generator server starting up");

    let listen_address: SocketAddr = match cli_args.listen_address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen address '{}': {e}", cli_args.listen_address);
            std::process::exit(1);
        }
    };

    let mut server = match Server::new(listen_address, cli_args.data_dir).await {
        Ok(server) => server,
        Err(e) => {
            error!("failed to initialize server: {e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("server error: {e}");
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("shutdown signal received, initiating graceful shutdown");
        }
    }

    server.shutdown().await;
    info!("server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_creation_wires_every_component() {
        let dir = tempfile::tempdir().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Server::new(addr, dir.path().to_path_buf()).await;
        assert!(server.is_ok());
    }
}

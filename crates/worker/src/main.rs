mod metrics;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use sha2::{Digest, Sha256};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_core::config::LlmProvider;
use tally_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditHandle, AuditStore,
    CheckpointStore, Config, FsImageSource, GroqClient, ImageSource, LlmClient, OllamaClient,
    OrchestratorStatus, ReceiptOrchestrator, ReceiptStore, ReportStore, SqliteAuditStore,
    SqliteCheckpointStore, SqliteReceiptStore, SqliteReportStore, WorkflowEngine,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("TALLY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("LLM provider: {:?}", config.llm.provider);
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Create SQLite stores; they all share the same database file
    let receipts: Arc<dyn ReceiptStore> = Arc::new(
        SqliteReceiptStore::new(&config.database.path).context("Failed to create receipt store")?,
    );
    let reports: Arc<dyn ReportStore> = Arc::new(
        SqliteReportStore::new(&config.database.path).context("Failed to create report store")?,
    );
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(
        SqliteCheckpointStore::new(&config.database.path)
            .context("Failed to create checkpoint store")?,
    );
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Stores initialized");

    // Create audit system and spawn the writer task
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let images: Arc<dyn ImageSource> = Arc::new(FsImageSource::new(config.images.clone()));

    // The engine is generic over the LLM client, so the provider branch
    // happens here and everything downstream is monomorphized.
    match config.llm.provider {
        LlmProvider::Groq => {
            let groq = config
                .llm
                .groq
                .clone()
                .context("groq provider selected but [llm.groq] is missing")?;
            info!("Using Groq model {}", groq.model);
            let mut client = GroqClient::new(groq.api_key, groq.model)
                .with_timeout(Duration::from_secs(groq.timeout_secs.into()));
            if let Some(api_base) = groq.api_base {
                client = client.with_api_base(api_base);
            }
            serve(
                config,
                client,
                images,
                receipts,
                reports,
                checkpoints,
                audit_handle,
                writer_handle,
            )
            .await
        }
        LlmProvider::Ollama => {
            let ollama = config.llm.ollama.clone().unwrap_or_default();
            info!("Using Ollama model {} at {}", ollama.model, ollama.url);
            let client = OllamaClient::new(ollama.model)
                .with_api_base(ollama.url)
                .with_timeout(Duration::from_secs(ollama.timeout_secs.into()));
            serve(
                config,
                client,
                images,
                receipts,
                reports,
                checkpoints,
                audit_handle,
                writer_handle,
            )
            .await
        }
    }
}

/// Shared state for the HTTP handlers.
#[derive(Clone)]
struct AppState {
    status: Arc<dyn Fn() -> OrchestratorStatus + Send + Sync>,
}

async fn serve<C: LlmClient + 'static>(
    config: Config,
    llm: C,
    images: Arc<dyn ImageSource>,
    receipts: Arc<dyn ReceiptStore>,
    reports: Arc<dyn ReportStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit_handle: AuditHandle,
    writer_handle: tokio::task::JoinHandle<()>,
) -> Result<()> {
    let engine =
        Arc::new(WorkflowEngine::new(images, Arc::new(llm)).with_checkpoint_store(checkpoints));

    let orchestrator = ReceiptOrchestrator::new(
        config.orchestrator.clone(),
        engine,
        receipts,
        reports,
        Some(audit_handle.clone()),
    );

    if config.orchestrator.enabled {
        orchestrator.start().await;
        info!("Receipt orchestrator started");
    } else {
        info!("Orchestrator disabled in config");
    }

    let status_source = orchestrator.clone();
    let state = AppState {
        status: Arc::new(move || status_source.status()),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(serve_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    orchestrator.stop().await;

    // Emit ServiceStopped event
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Every AuditHandle clone must drop before the writer drains and
    // exits. The orchestrator and the router state hold clones; the
    // router dropped when the server future completed.
    // Order matters: we emit the final event BEFORE dropping handles.
    drop(orchestrator);
    drop(audit_handle);

    // Wait for writer to finish processing remaining events
    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = (state.status)();
    Json(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "orchestrator": {
            "running": status.running,
            "active_runs": status.active_runs,
        },
    }))
}

async fn serve_metrics(State(state): State<AppState>) -> String {
    let status = (state.status)();
    metrics::collect_dynamic_metrics(&status);
    metrics::encode_metrics()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

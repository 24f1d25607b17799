use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod service;
mod session;
mod store;

use absen_core::{MatchPolicy, VisionPipeline};
use config::Config;
use service::AttendanceService;
use session::SessionStore;
use store::FaceStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "absend starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        similarity_threshold = config.similarity_threshold,
        session_ttl_secs = config.session_ttl_secs,
        "configuration loaded"
    );

    let pipeline = VisionPipeline::load_onnx(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        &config.mesh_model_path(),
    )
    .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(pipeline, config.engine_queue_depth).context("starting vision engine")?;

    let store = if config.db_path.as_os_str() == ":memory:" {
        tracing::warn!("using an in-memory database; enrollments are lost on exit");
        FaceStore::open_in_memory().await
    } else {
        FaceStore::open(&config.db_path).await
    }
    .with_context(|| format!("opening database {}", config.db_path.display()))?;

    let sessions = Arc::new(SessionStore::new(config.session_ttl()));
    spawn_sweeper(sessions.clone(), config.session_ttl(), config.sweep_interval());

    let service = Arc::new(AttendanceService::new(
        sessions,
        engine,
        store,
        MatchPolicy::new(config.similarity_threshold),
        config.liveness,
        config.candidate_limit,
    ));
    let app = http::router(service, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "absend ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("absend shutting down");
        })
        .await
        .context("serving HTTP")?;

    Ok(())
}

/// Periodically drop expired liveness sessions.
fn spawn_sweeper(sessions: Arc<SessionStore>, ttl: Duration, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = sessions.sweep_expired(ttl);
            if removed > 0 {
                tracing::debug!(removed, remaining = sessions.len(), "expired sessions swept");
            }
        }
    });
}

//! FraudPilot - Real-time card fraud screening pipeline
//! Events in from the bus, enriched with profile and velocity context,
//! decided by the analyzer panel, routed to alerts / review / approval.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fraudpilot_backend::api::{self, ApiState};
use fraudpilot_backend::bus::ingest::IngestServer;
use fraudpilot_backend::bus::InMemoryBus;
use fraudpilot_backend::coordinator::{Coordinator, DecisionConfig};
use fraudpilot_backend::feedback::FeedbackSink;
use fraudpilot_backend::models::Config;
use fraudpilot_backend::pipeline::enrichment::ProfileTable;
use fraudpilot_backend::pipeline::velocity::VelocityTracker;
use fraudpilot_backend::pipeline::{PipelineStats, Topology};
use fraudpilot_backend::router::DecisionRouter;
use fraudpilot_backend::scorer;
use fraudpilot_backend::storage::StateStore;

#[derive(Debug, Parser)]
#[command(name = "fraudpilot", about = "Real-time fraud screening pipeline")]
struct Args {
    /// HTTP port for the control plane (overrides PORT).
    #[arg(long)]
    port: Option<u16>,
    /// State store path (overrides DATABASE_PATH).
    #[arg(long)]
    database_path: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fraudpilot_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = Config::from_env().context("load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.database_path {
        config.database_path = path;
    }
    info!(
        scorer = %config.scorer_profile,
        partitions = config.partitions,
        pool = config.analyzer_pool_size,
        "starting fraudpilot"
    );

    let store = Arc::new(StateStore::open(&config.database_path)?);
    let velocity = Arc::new(VelocityTracker::new(
        store.clone(),
        config.velocity_window_secs,
    ));
    let restored = velocity.restore()?;
    if restored > 0 {
        info!(restored, "velocity state recovered from store");
    }
    let profiles = Arc::new(ProfileTable::new());

    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent("FraudPilot/0.1")
        .build()
        .context("build scorer http client")?;
    let scorer = scorer::from_config(&config, http)?;
    let coordinator = Arc::new(Coordinator::new(
        scorer,
        config.analyzer_pool_size,
        DecisionConfig::from(&config),
    ));
    let router = Arc::new(DecisionRouter::from_config(&config));

    let bus = InMemoryBus::new();
    let stats = Arc::new(PipelineStats::default());

    Topology {
        bus: bus.clone(),
        store: store.clone(),
        profiles: profiles.clone(),
        velocity: velocity.clone(),
        coordinator: coordinator.clone(),
        router,
        stats: stats.clone(),
        partitions: config.partitions,
        commit_interval: Duration::from_millis(config.commit_interval_ms),
    }
    .spawn()?;

    FeedbackSink::new(bus.clone(), store.clone()).spawn()?;

    let ingest = IngestServer::new(bus.clone());
    let ingest_stats = ingest.stats();
    ingest.bind(&config.bus_bootstrap).await?;

    let app = api::router(ApiState {
        coordinator,
        profiles,
        store: store.clone(),
        stats,
        ingest_stats,
    });
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("bind http port {}", config.port))?;
    info!(port = config.port, "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    // Orderly shutdown: commit whatever the ticker has not flushed yet.
    // In-flight scorer calls are abandoned; their events are redelivered
    // from the bus on restart.
    if let Err(e) = velocity.flush() {
        warn!(error = %e, "final velocity flush failed");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

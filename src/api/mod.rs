//! HTTP control plane
//! Synchronous analyze-one endpoint plus agent metadata and liveness.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bus::ingest::IngestStats;
use crate::coordinator::Coordinator;
use crate::pipeline::enrichment::ProfileTable;
use crate::pipeline::PipelineStats;
use crate::storage::StateStore;

pub mod routes;

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    pub profiles: Arc<ProfileTable>,
    pub store: Arc<StateStore>,
    pub stats: Arc<PipelineStats>,
    pub ingest_stats: Arc<IngestStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/fraud-detection/analyze", post(routes::analyze))
        .route("/api/fraud-detection/agents/info", get(routes::agents_info))
        .route("/api/fraud-detection/health", get(routes::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

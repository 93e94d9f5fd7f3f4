//! API Routes
//! Handlers for the fraud-detection control plane.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Serialize;

use crate::analyzers::Specialist;
use crate::bus::ingest::IngestStatsSnapshot;
use crate::coordinator::TECHNICAL_ERROR_REASON;
use crate::models::{Decision, EnrichedEvent, TransactionEvent};
use crate::pipeline::PipelineStatsSnapshot;

use super::ApiState;

/// Run one event through the coordinator with an empty streaming context.
/// A technical-error decision comes back as a 500 so callers can tell a
/// degraded verdict from a real one; the body still carries the decision.
pub async fn analyze(
    State(state): State<ApiState>,
    Json(event): Json<TransactionEvent>,
) -> Result<(StatusCode, Json<Decision>), StatusCode> {
    event.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let decision = state
        .coordinator
        .decide(&EnrichedEvent::bare(event))
        .await;
    let status = if decision.primary_reason == TECHNICAL_ERROR_REASON {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(decision)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: &'static str,
    pub specialization: &'static str,
    pub weight: f64,
    pub focus: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsInfoResponse {
    pub agents: Vec<AgentInfo>,
    pub count: usize,
}

pub async fn agents_info() -> Json<AgentsInfoResponse> {
    let agents: Vec<AgentInfo> = Specialist::ALL
        .iter()
        .map(|s| AgentInfo {
            id: s.id(),
            specialization: s.specialization(),
            weight: s.weight(),
            focus: s.focus(),
        })
        .collect();
    let count = agents.len();
    Json(AgentsInfoResponse { agents, count })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub profiles_loaded: usize,
    pub feedback_recorded: u64,
    pub pipeline: PipelineStatsSnapshot,
    pub ingest: IngestStatsSnapshot,
    pub timestamp: String,
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        profiles_loaded: state.profiles.len(),
        feedback_recorded: state.store.feedback_count().unwrap_or(0),
        pipeline: state.stats.snapshot(),
        ingest: state.ingest_stats.snapshot(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

//! Scorer capability
//! Opaque text-scoring service consumed by the analyzers: prompt in, scored
//! prose out. The parse rules for the scored text are fixed; every backend
//! goes through them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod cloud;
pub mod local;

pub use cloud::CloudScorer;
pub use local::LocalScorer;

use crate::models::Config;

/// Transient failure of the backing service. Never propagates past an
/// analyzer: callers substitute a neutral opinion (risk 0.5).
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scoring service unavailable: {0}")]
    Unavailable(String),
}

/// prompt -> raw scored text.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, prompt: &str) -> Result<String, ScorerError>;
}

/// Raw text plus the fields parsed out of it.
#[derive(Debug, Clone)]
pub struct ScoredResponse {
    pub analysis: String,
    pub risk_score: f64,
    pub reasoning: String,
    pub recommendation: String,
}

const NEUTRAL_RISK: f64 = 0.5;
const DEFAULT_RECOMMENDATION: &str = "Standard fraud review recommended";

/// Parse a scored response out of raw model text.
///
/// Score resolution order: an explicit `RISK_SCORE:` line wins; otherwise
/// keyword classes over the lowercased text; otherwise neutral 0.5.
pub fn parse_scored(raw: &str) -> ScoredResponse {
    ScoredResponse {
        analysis: raw.to_string(),
        risk_score: extract_risk_score(raw),
        reasoning: extract_reasoning(raw),
        recommendation: extract_recommendation(raw),
    }
}

fn extract_risk_score(raw: &str) -> f64 {
    for line in raw.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("RISK_SCORE:") {
            if let Some(token) = rest.split_whitespace().next() {
                if let Ok(score) = token.parse::<f64>() {
                    if score.is_finite() {
                        return score.clamp(0.0, 1.0);
                    }
                }
            }
        }
    }

    let lower = raw.to_lowercase();
    for (keywords, score) in [
        (&["high risk", "fraudulent", "suspicious"][..], 0.8),
        (&["medium risk", "unusual", "concerning"][..], 0.6),
        (&["low risk", "normal", "legitimate"][..], 0.2),
    ] {
        if keywords.iter().any(|k| lower.contains(k)) {
            return score;
        }
    }

    NEUTRAL_RISK
}

fn extract_reasoning(raw: &str) -> String {
    if let Some(start) = raw.find("REASONING:") {
        let after = &raw[start + "REASONING:".len()..];
        let body = match after.find("RECOMMENDATION:") {
            Some(end) => &after[..end],
            None => after,
        };
        return body.trim().to_string();
    }

    let head: String = raw.chars().take(200).collect();
    format!("{}…", head)
}

fn extract_recommendation(raw: &str) -> String {
    match raw.find("RECOMMENDATION:") {
        Some(start) => raw[start + "RECOMMENDATION:".len()..].trim().to_string(),
        None => DEFAULT_RECOMMENDATION.to_string(),
    }
}

/// Select the Scorer backend for the configured profile. No behavioral
/// difference downstream; the profiles differ only in endpoint and auth.
pub fn from_config(config: &Config, http: reqwest::Client) -> anyhow::Result<Arc<dyn Scorer>> {
    match config.scorer_profile.as_str() {
        "cloud" => Ok(Arc::new(CloudScorer::new(
            http,
            config
                .scorer_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("SCORER_API_KEY required for cloud profile"))?,
            config.scorer_model.clone(),
            std::time::Duration::from_millis(config.scorer_timeout_ms),
        ))),
        "local" => Ok(Arc::new(LocalScorer::new(
            http,
            config.scorer_base_url.clone(),
            config.scorer_model.clone(),
            std::time::Duration::from_millis(config.scorer_timeout_ms),
        ))),
        other => anyhow::bail!("unknown SCORER_PROFILE '{}' (expected cloud|local)", other),
    }
}

// Chat-completion wire shapes shared by both backends.

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatMessageOut {
    pub content: String,
}

pub(crate) const SYSTEM_PROMPT: &str = "You are a payment fraud scoring engine. \
Answer with a RISK_SCORE: line (0.0 to 1.0), a REASONING: section and a \
RECOMMENDATION: section.";

pub(crate) fn chat_request(model: &str, prompt: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            },
        ],
        temperature: Some(0.1),
        max_tokens: Some(512),
    }
}

pub(crate) fn first_choice_content(body: &str) -> Result<String, ScorerError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ScorerError::Unavailable(format!("bad completion body: {e}")))?;
    Ok(parsed
        .choices
        .first()
        .and_then(|c| c.message.as_ref())
        .map(|m| m.content.clone())
        .unwrap_or_default())
}

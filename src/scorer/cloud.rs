//! Cloud scorer backend
//! OpenRouter-style hosted chat-completions endpoint with bearer auth.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{chat_request, first_choice_content, Scorer, ScorerError};

const CLOUD_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Clone)]
pub struct CloudScorer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl CloudScorer {
    pub fn new(http: reqwest::Client, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http,
            api_key,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl Scorer for CloudScorer {
    async fn score(&self, prompt: &str) -> Result<String, ScorerError> {
        let start = Instant::now();
        let req = chat_request(&self.model, prompt);

        let resp = self
            .http
            .post(CLOUD_ENDPOINT)
            .timeout(self.timeout)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| ScorerError::Unavailable(format!("cloud request: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(400).collect();
            warn!(status = status.as_u16(), "cloud scorer rejected call");
            return Err(ScorerError::Unavailable(format!(
                "cloud {}: {}",
                status.as_u16(),
                snippet
            )));
        }

        let content = first_choice_content(&body)?;
        debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "cloud scorer call complete"
        );
        Ok(content)
    }
}

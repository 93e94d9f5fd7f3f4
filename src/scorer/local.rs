//! Local scorer backend
//! OpenAI-compatible inference server on the local network (no auth). Same
//! request shape as the cloud profile; the core sees no difference.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{chat_request, first_choice_content, Scorer, ScorerError};

#[derive(Clone)]
pub struct LocalScorer {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl LocalScorer {
    pub fn new(http: reqwest::Client, base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout,
        }
    }
}

#[async_trait]
impl Scorer for LocalScorer {
    async fn score(&self, prompt: &str) -> Result<String, ScorerError> {
        let start = Instant::now();
        let req = chat_request(&self.model, prompt);
        let url = format!("{}/chat/completions", self.base_url);

        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| ScorerError::Unavailable(format!("local request: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = status.as_u16(), url = %url, "local scorer rejected call");
            return Err(ScorerError::Unavailable(format!(
                "local {}: {}",
                status.as_u16(),
                body.chars().take(400).collect::<String>()
            )));
        }

        let content = first_choice_content(&body)?;
        debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "local scorer call complete"
        );
        Ok(content)
    }
}

//! Core record model
//! Typed carriers for everything that crosses the bus: transaction events,
//! customer profiles, enriched events, analyzer opinions and final decisions.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Second-precision wall-clock timestamps on the transaction wire format
/// (`yyyy-MM-ddTHH:mm:ss`, no zone suffix).
pub mod event_ts {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// One card-authorization event submitted for screening.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub transaction_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    pub merchant_id: String,
    pub merchant_category: String,
    pub location: String,
    #[serde(with = "event_ts")]
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TransactionEvent {
    /// Structural sanity check applied at the bus adapter. Records that fail
    /// are logged and skipped; the core never sees them.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.transaction_id.is_empty()
            || self.customer_id.is_empty()
            || self.currency.is_empty()
            || self.merchant_id.is_empty()
            || self.merchant_category.is_empty()
            || self.location.is_empty()
        {
            anyhow::bail!("empty required field on transaction {}", self.transaction_id);
        }
        if self.amount <= 0.0 || !self.amount.is_finite() {
            anyhow::bail!(
                "non-positive amount {} on transaction {}",
                self.amount,
                self.transaction_id
            );
        }
        Ok(())
    }

    /// Text form handed to analyzers.
    pub fn describe(&self) -> String {
        format!(
            "Transaction {}: {} {:.2} at merchant {} (category {}), location '{}', time {}",
            self.transaction_id,
            self.currency,
            self.amount,
            self.merchant_id,
            self.merchant_category,
            self.location,
            self.timestamp.format(event_ts::FORMAT),
        )
    }
}

/// Customer risk tier kept on the profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Historical baseline per payer, fed by the compacted profile topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProfile {
    pub customer_id: String,
    pub average_transaction_amount: f64,
    pub daily_limit: f64,
    pub typical_categories: Vec<String>,
    pub primary_location: String,
    pub risk_level: RiskLevel,
}

impl CustomerProfile {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.customer_id.is_empty() {
            anyhow::bail!("profile missing customer id");
        }
        if self.average_transaction_amount <= 0.0 || self.daily_limit <= 0.0 {
            anyhow::bail!("non-positive amounts on profile {}", self.customer_id);
        }
        if self.average_transaction_amount > self.daily_limit {
            anyhow::bail!("profile {} average exceeds daily limit", self.customer_id);
        }
        if self.typical_categories.is_empty() {
            anyhow::bail!("profile {} has no typical categories", self.customer_id);
        }
        Ok(())
    }
}

/// Event plus whatever enrichment was known at processing time. Either join
/// side may be absent; that is a join miss, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEvent {
    pub event: TransactionEvent,
    pub profile: Option<CustomerProfile>,
    pub velocity: Option<u64>,
}

impl EnrichedEvent {
    /// Bare event with no streaming context, used by the synchronous
    /// analyze endpoint.
    pub fn bare(event: TransactionEvent) -> Self {
        Self {
            event,
            profile: None,
            velocity: None,
        }
    }

    pub fn high_velocity(&self, threshold: u64) -> bool {
        self.velocity.map(|v| v > threshold).unwrap_or(false)
    }

    /// Current amount more than 3x the profiled average.
    pub fn unusual_amount(&self) -> bool {
        self.profile
            .as_ref()
            .map(|p| self.event.amount > 3.0 * p.average_transaction_amount)
            .unwrap_or(false)
    }

    /// One-line summary of the streaming context, reused in prompts and in
    /// the decision explanation.
    pub fn streaming_summary(&self) -> String {
        let velocity = match self.velocity {
            Some(v) => format!("{} events in the last 5 minutes", v),
            None => "velocity unknown".to_string(),
        };
        let profile = match &self.profile {
            Some(p) => format!(
                "profile avg {:.2}, daily limit {:.2}, risk {}, home '{}'",
                p.average_transaction_amount,
                p.daily_limit,
                p.risk_level.as_str(),
                p.primary_location
            ),
            None => "no profile on record".to_string(),
        };
        format!("Streaming context: {}; {}", velocity, profile)
    }
}

/// One analyzer's scored response to an enriched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opinion {
    pub analyzer_id: String,
    pub specialization: String,
    pub analysis: String,
    pub risk_score: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub recommendation: String,
    pub produced_at: DateTime<Utc>,
}

impl Opinion {
    /// The emitting analyzer has no separate confidence axis: confidence is
    /// the risk score clamped to [0, 1].
    pub fn new(
        analyzer_id: impl Into<String>,
        specialization: impl Into<String>,
        analysis: impl Into<String>,
        risk_score: f64,
        reasoning: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        let risk = risk_score.clamp(0.0, 1.0);
        Self {
            analyzer_id: analyzer_id.into(),
            specialization: specialization.into(),
            analysis: analysis.into(),
            risk_score: risk,
            confidence: risk,
            reasoning: reasoning.into(),
            recommendation: recommendation.into(),
            produced_at: Utc::now(),
        }
    }

    /// Whether this opinion points at fraud on its own.
    pub fn indicates_fraud(&self) -> bool {
        self.risk_score > 0.6
    }
}

/// The single per-event outcome, published to exactly one output topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub transaction_id: String,
    pub fraud: bool,
    pub confidence: f64,
    pub primary_reason: String,
    pub detailed_explanation: String,
    pub opinions: Vec<Opinion>,
    pub analyzed_at: DateTime<Utc>,
}

impl Decision {
    pub fn high_confidence(&self) -> bool {
        self.confidence >= 0.8
    }

    /// Strict on both ends: lower < confidence < upper.
    pub fn needs_human(&self, lower: f64, upper: f64) -> bool {
        self.confidence > lower && self.confidence < upper
    }
}

/// Analyst verdict on a past decision, consumed from the feedback topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalystFeedback {
    pub transaction_id: String,
    pub actual_fraud: bool,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub scorer_profile: String,
    pub scorer_model: String,
    pub scorer_api_key: Option<String>,
    pub scorer_base_url: String,
    pub scorer_timeout_ms: u64,
    pub bus_bootstrap: String,
    pub port: u16,
    pub database_path: String,
    pub partitions: usize,
    pub analyzer_pool_size: usize,
    pub commit_interval_ms: u64,
    pub velocity_window_secs: i64,
    pub velocity_high_threshold: u64,
    pub fraud_risk_threshold: f64,
    pub fraud_alert_confidence: f64,
    pub needs_human_lower: f64,
    pub needs_human_upper: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let scorer_profile =
            std::env::var("SCORER_PROFILE").unwrap_or_else(|_| "local".to_string());

        let scorer_model = std::env::var("SCORER_MODEL")
            .unwrap_or_else(|_| "meta-llama/llama-3.1-8b-instruct".to_string());

        let scorer_api_key = std::env::var("SCORER_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let scorer_base_url = std::env::var("SCORER_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434/v1".to_string());

        let scorer_timeout_ms = env_parse("SCORER_TIMEOUT_MS", 10_000u64);
        let bus_bootstrap =
            std::env::var("BUS_BOOTSTRAP").unwrap_or_else(|_| "127.0.0.1:9070".to_string());
        let port = env_parse("PORT", 8080u16);
        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./fraudpilot.db".to_string());

        let partitions = env_parse("PARTITIONS", 4usize).max(1);
        let analyzer_pool_size = env_parse("ANALYZER_POOL_SIZE", 5usize).max(1);
        let commit_interval_ms = env_parse("COMMIT_INTERVAL_MS", 1_000u64).max(100);
        let velocity_window_secs = env_parse("VELOCITY_WINDOW_SECS", 300i64).max(1);
        let velocity_high_threshold = env_parse("VELOCITY_HIGH_THRESHOLD", 3u64);
        let fraud_risk_threshold = env_parse("FRAUD_RISK_THRESHOLD", 0.6f64);
        let fraud_alert_confidence = env_parse("FRAUD_ALERT_CONFIDENCE", 0.8f64);
        let needs_human_lower = env_parse("NEEDS_HUMAN_LOWER", 0.3f64);
        let needs_human_upper = env_parse("NEEDS_HUMAN_UPPER", 0.7f64);

        Ok(Self {
            scorer_profile,
            scorer_model,
            scorer_api_key,
            scorer_base_url,
            scorer_timeout_ms,
            bus_bootstrap,
            port,
            database_path,
            partitions,
            analyzer_pool_size,
            commit_interval_ms,
            velocity_window_secs,
            velocity_high_threshold,
            fraud_risk_threshold,
            fraud_alert_confidence,
            needs_human_lower,
            needs_human_upper,
        })
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

//! In-process message bus
//! Named topics carrying keyed JSON records. Every topic keeps a retained
//! log (latest-per-key when compacted) that is replayed to new subscribers,
//! which is what gives the profile table its snapshot semantics and the
//! state stores their rebuild path. Malformed records are logged and
//! skipped at this boundary; the core never sees them.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub mod ingest;

pub mod topics {
    pub const TRANSACTIONS: &str = "transactions";
    pub const CUSTOMER_PROFILES: &str = "customerProfiles";
    pub const ANALYST_FEEDBACK: &str = "analyst-feedback";
    pub const FRAUD_ALERTS: &str = "fraud-alerts";
    pub const HUMAN_REVIEW: &str = "human-review";
    pub const APPROVED: &str = "approved-transactions";

    pub const INPUTS: [&str; 3] = [TRANSACTIONS, CUSTOMER_PROFILES, ANALYST_FEEDBACK];
}

/// One keyed record on a topic.
#[derive(Debug, Clone)]
pub struct BusRecord {
    pub key: String,
    pub value: Value,
}

struct Topic {
    compacted: bool,
    retained: Vec<BusRecord>,
    subscribers: Vec<mpsc::UnboundedSender<BusRecord>>,
}

impl Topic {
    fn new(compacted: bool) -> Self {
        Self {
            compacted,
            retained: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}

pub struct InMemoryBus {
    inner: RwLock<HashMap<String, Topic>>,
}

impl InMemoryBus {
    /// Bus with the standard topic set; `customerProfiles` is compacted.
    pub fn new() -> Arc<Self> {
        let mut map = HashMap::new();
        for name in [
            topics::TRANSACTIONS,
            topics::ANALYST_FEEDBACK,
            topics::FRAUD_ALERTS,
            topics::HUMAN_REVIEW,
            topics::APPROVED,
        ] {
            map.insert(name.to_string(), Topic::new(false));
        }
        map.insert(topics::CUSTOMER_PROFILES.to_string(), Topic::new(true));
        Arc::new(Self {
            inner: RwLock::new(map),
        })
    }

    pub fn publish(&self, topic: &str, key: &str, value: Value) -> Result<()> {
        let record = BusRecord {
            key: key.to_string(),
            value,
        };
        let mut inner = self.inner.write();
        let topic = inner
            .get_mut(topic)
            .with_context(|| format!("unknown topic '{topic}'"))?;

        if topic.compacted {
            if let Some(existing) = topic.retained.iter_mut().find(|r| r.key == record.key) {
                *existing = record.clone();
            } else {
                topic.retained.push(record.clone());
            }
        } else {
            topic.retained.push(record.clone());
        }

        topic
            .subscribers
            .retain(|sub| sub.send(record.clone()).is_ok());
        Ok(())
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, key: &str, value: &T) -> Result<()> {
        self.publish(topic, key, serde_json::to_value(value).context("encode record")?)
    }

    /// Subscribe to a topic; the retained log is replayed first, so a late
    /// subscriber of a compacted topic observes the current snapshot.
    pub fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<BusRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        let topic = inner
            .get_mut(topic)
            .with_context(|| format!("unknown topic '{topic}'"))?;
        for record in &topic.retained {
            let _ = tx.send(record.clone());
        }
        topic.subscribers.push(tx);
        Ok(rx)
    }

    /// Retained records, for inspection and tests.
    pub fn retained(&self, topic: &str) -> Vec<BusRecord> {
        self.inner
            .read()
            .get(topic)
            .map(|t| t.retained.clone())
            .unwrap_or_default()
    }
}

/// Decode a record value, logging and skipping on failure (the
/// malformed-record policy: the core never sees these).
pub fn decode<T: DeserializeOwned>(topic: &str, record: &BusRecord) -> Option<T> {
    match serde_json::from_value::<T>(record.value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(topic, key = %record.key, error = %e, "malformed record skipped");
            None
        }
    }
}

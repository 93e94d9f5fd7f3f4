//! End-to-end pipeline scenarios
//!
//! Drives the full topology over the in-process bus with scripted scorer
//! backends: profile + velocity enrichment, the three-phase coordinator and
//! the branch router, observed through the output topics.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use fraudpilot_backend::bus::{topics, BusRecord, InMemoryBus};
use fraudpilot_backend::coordinator::{Coordinator, DecisionConfig};
use fraudpilot_backend::pipeline::enrichment::ProfileTable;
use fraudpilot_backend::pipeline::velocity::VelocityTracker;
use fraudpilot_backend::pipeline::{PipelineStats, Topology};
use fraudpilot_backend::router::DecisionRouter;
use fraudpilot_backend::scorer::{Scorer, ScorerError};
use fraudpilot_backend::storage::StateStore;
use fraudpilot_backend::{EnrichedEvent, TransactionEvent};

/// Honors the RISK_SCORE contract with one fixed score.
struct UniformScorer(f64);

#[async_trait]
impl Scorer for UniformScorer {
    async fn score(&self, _prompt: &str) -> Result<String, ScorerError> {
        Ok(format!(
            "RISK_SCORE: {:.2}\nREASONING: scripted assessment\nRECOMMENDATION: none",
            self.0
        ))
    }
}

/// Total outage: every call fails, every opinion degrades to neutral.
struct OutageScorer;

#[async_trait]
impl Scorer for OutageScorer {
    async fn score(&self, _prompt: &str) -> Result<String, ScorerError> {
        Err(ScorerError::Unavailable("upstream down".to_string()))
    }
}

/// Splits the panel: timing and consensus prompts score low, the rest high.
struct SplitScorer;

#[async_trait]
impl Scorer for SplitScorer {
    async fn score(&self, prompt: &str) -> Result<String, ScorerError> {
        let score = if prompt.contains("timing-patterns") || prompt.contains("Panel consensus") {
            0.3
        } else {
            0.9
        };
        Ok(format!("RISK_SCORE: {:.2}\nREASONING: scripted", score))
    }
}

struct Harness {
    bus: Arc<InMemoryBus>,
    alerts: UnboundedReceiver<BusRecord>,
    review: UnboundedReceiver<BusRecord>,
    approved: UnboundedReceiver<BusRecord>,
}

fn start(scorer: impl Scorer + 'static) -> Harness {
    let bus = InMemoryBus::new();
    let alerts = bus.subscribe(topics::FRAUD_ALERTS).unwrap();
    let review = bus.subscribe(topics::HUMAN_REVIEW).unwrap();
    let approved = bus.subscribe(topics::APPROVED).unwrap();

    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let velocity = Arc::new(VelocityTracker::new(store.clone(), 300));
    Topology {
        bus: bus.clone(),
        store,
        profiles: Arc::new(ProfileTable::new()),
        velocity,
        coordinator: Arc::new(Coordinator::new(
            Arc::new(scorer),
            10,
            DecisionConfig::default(),
        )),
        router: Arc::new(DecisionRouter::default()),
        stats: Arc::new(PipelineStats::default()),
        partitions: 2,
        commit_interval: Duration::from_millis(200),
    }
    .spawn()
    .unwrap();

    Harness {
        bus,
        alerts,
        review,
        approved,
    }
}

fn profile_value(customer: &str, average: f64, risk: &str, location: &str) -> serde_json::Value {
    json!({
        "customerId": customer,
        "averageTransactionAmount": average,
        "dailyLimit": 10000.0,
        "typicalCategories": ["RETAIL", "RESTAURANT"],
        "primaryLocation": location,
        "riskLevel": risk
    })
}

fn event_value(
    txn: &str,
    customer: &str,
    amount: f64,
    category: &str,
    location: &str,
    timestamp: &str,
) -> serde_json::Value {
    json!({
        "transactionId": txn,
        "customerId": customer,
        "amount": amount,
        "currency": "USD",
        "merchantId": "MERCH-1",
        "merchantCategory": category,
        "location": location,
        "timestamp": timestamp,
        "metadata": {}
    })
}

async fn next(rx: &mut UnboundedReceiver<BusRecord>) -> BusRecord {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for output record")
        .expect("output channel closed")
}

/// Publish profiles before events and give the profile updater a beat to
/// materialize them.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn high_velocity_attack_escalates_to_alert() {
    let mut h = start(UniformScorer(0.9));

    h.bus.publish(
        topics::CUSTOMER_PROFILES,
        "CUST-001",
        profile_value("CUST-001", 253.0, "low", "Los Angeles"),
    )
    .unwrap();
    settle().await;

    // Nine events inside thirty seconds.
    for i in 0..9 {
        h.bus
            .publish(
                topics::TRANSACTIONS,
                "CUST-001",
                event_value(
                    &format!("TXN-{i}"),
                    "CUST-001",
                    54.0,
                    "ONLINE",
                    "Unknown Location",
                    &format!("2024-03-01T12:00:{:02}", i * 3),
                ),
            )
            .unwrap();
    }

    let mut last = None;
    for _ in 0..9 {
        last = Some(next(&mut h.alerts).await);
    }
    let ninth = last.unwrap();
    assert_eq!(ninth.value["type"], "AI_FRAUD_ALERT");
    assert_eq!(ninth.value["priority"], "HIGH");
    assert_eq!(ninth.value["confidencePct"], 100);
    // 5 phase-1 + velocity pair + profile pair + consensus.
    assert_eq!(ninth.value["opinionCount"], 10);
    assert_eq!(ninth.value["transactionId"], "TXN-8");
}

#[tokio::test]
async fn split_panel_on_risky_profile_lands_in_review_at_the_boundary() {
    let mut h = start(SplitScorer);

    h.bus.publish(
        topics::CUSTOMER_PROFILES,
        "CUST-001",
        profile_value("CUST-001", 392.0, "high", "New York"),
    )
    .unwrap();
    settle().await;

    h.bus
        .publish(
            topics::TRANSACTIONS,
            "CUST-001",
            event_value("TXN-B1", "CUST-B1-ignored", 30.0, "ONLINE", "Unknown", "x"),
        )
        .ok();
    // The frame above is malformed on purpose (bad timestamp); the real one
    // follows and must be the only decision.
    h.bus
        .publish(
            topics::TRANSACTIONS,
            "CUST-001",
            event_value(
                "TXN-B2",
                "CUST-001",
                30.0,
                "ONLINE",
                "Unknown",
                "2024-03-01T12:00:00",
            ),
        )
        .unwrap();

    let record = next(&mut h.review).await;
    assert_eq!(record.value["type"], "AI_REVIEW_CASE");
    assert_eq!(record.value["status"], "PENDING_HUMAN_REVIEW");
    assert_eq!(record.value["transactionId"], "TXN-B2");
    // 6 of 8 opinions agree with the fraud flag: confidence lands exactly on
    // 0.8, which the strict alert gate sends to review.
    let confidence = record.value["confidence"].as_f64().unwrap();
    assert!((confidence - 0.8).abs() < 1e-9);
    assert_eq!(record.value["opinions"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn legitimate_transaction_is_approved() {
    let mut h = start(UniformScorer(0.05));

    h.bus.publish(
        topics::CUSTOMER_PROFILES,
        "CUST-001",
        profile_value("CUST-001", 178.0, "low", "Houston"),
    )
    .unwrap();
    settle().await;

    h.bus
        .publish(
            topics::TRANSACTIONS,
            "CUST-001",
            event_value(
                "TXN-C1",
                "CUST-001",
                48.0,
                "GROCERY",
                "Houston",
                "2024-03-01T12:00:00",
            ),
        )
        .unwrap();

    let record = next(&mut h.approved).await;
    assert_eq!(record.value["type"], "AI_APPROVAL");
    assert_eq!(record.value["status"], "APPROVED_BY_AI");
    let confidence = record.value["confidence"].as_f64().unwrap();
    assert!(confidence >= 0.9);
    assert_eq!(record.value["opinionCount"], 8);
}

#[tokio::test]
async fn scorer_outage_degrades_to_neutral_approval() {
    let mut h = start(OutageScorer);

    h.bus
        .publish(
            topics::TRANSACTIONS,
            "CUST-010",
            event_value(
                "TXN-D1",
                "CUST-010",
                54.0,
                "ONLINE",
                "Unknown",
                "2024-03-01T12:00:00",
            ),
        )
        .unwrap();

    let record = next(&mut h.approved).await;
    assert_eq!(record.value["opinionCount"], 6);
}

#[tokio::test]
async fn scorer_outage_with_high_velocity_still_flags_fraud() {
    let mut h = start(OutageScorer);

    for i in 0..4 {
        h.bus
            .publish(
                topics::TRANSACTIONS,
                "CUST-011",
                event_value(
                    &format!("TXN-D{i}"),
                    "CUST-011",
                    54.0,
                    "ONLINE",
                    "Unknown",
                    &format!("2024-03-01T12:00:{:02}", i),
                ),
            )
            .unwrap();
    }

    // Events 1-3 stay under the velocity threshold and approve; the 4th
    // crosses it, the bonus flags fraud, and the all-neutral panel's low
    // agreement keeps it on the review path.
    for _ in 0..3 {
        next(&mut h.approved).await;
    }
    let record = next(&mut h.review).await;
    assert_eq!(record.value["transactionId"], "TXN-D3");
    let confidence = record.value["confidence"].as_f64().unwrap();
    assert!((confidence - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn profile_arriving_after_event_only_joins_later_events() {
    let mut h = start(UniformScorer(0.05));

    h.bus
        .publish(
            topics::TRANSACTIONS,
            "CUST-NEW",
            event_value(
                "TXN-E1",
                "CUST-NEW",
                48.0,
                "GROCERY",
                "Houston",
                "2024-03-01T12:00:00",
            ),
        )
        .unwrap();

    let first = next(&mut h.approved).await;
    // No profile yet: no profile collaboration pair.
    assert_eq!(first.value["opinionCount"], 6);

    h.bus.publish(
        topics::CUSTOMER_PROFILES,
        "CUST-NEW",
        profile_value("CUST-NEW", 178.0, "low", "Houston"),
    )
    .unwrap();
    settle().await;

    h.bus
        .publish(
            topics::TRANSACTIONS,
            "CUST-NEW",
            event_value(
                "TXN-E2",
                "CUST-NEW",
                48.0,
                "GROCERY",
                "Houston",
                "2024-03-01T12:00:05",
            ),
        )
        .unwrap();

    let second = next(&mut h.approved).await;
    assert_eq!(second.value["transactionId"], "TXN-E2");
    assert_eq!(second.value["opinionCount"], 8);
}

#[tokio::test]
async fn window_roll_resets_velocity_between_bursts() {
    let mut h = start(UniformScorer(0.05));

    // Three events at t.
    for i in 0..3 {
        h.bus
            .publish(
                topics::TRANSACTIONS,
                "CUST-002",
                event_value(
                    &format!("TXN-F{i}"),
                    "CUST-002",
                    20.0,
                    "ONLINE",
                    "Houston",
                    &format!("2024-03-01T12:00:{:02}", i),
                ),
            )
            .unwrap();
    }
    // Four more at t + 5 min + 1 s: a fresh window.
    for i in 3..7 {
        h.bus
            .publish(
                topics::TRANSACTIONS,
                "CUST-002",
                event_value(
                    &format!("TXN-F{i}"),
                    "CUST-002",
                    20.0,
                    "ONLINE",
                    "Houston",
                    &format!("2024-03-01T12:05:{:02}", i - 2),
                ),
            )
            .unwrap();
    }

    let mut counts = Vec::new();
    for _ in 0..7 {
        let record = next(&mut h.approved).await;
        counts.push(record.value["opinionCount"].as_u64().unwrap());
    }
    // Had the window not rolled, the fifth event would sit at velocity 5 and
    // carry the velocity-collaboration pair. It rolls, so only the seventh
    // (fourth of the new window) crosses the threshold.
    assert_eq!(counts, vec![6, 6, 6, 6, 6, 6, 8]);
}

#[tokio::test]
async fn replayed_event_decides_identically() {
    let scorer: Arc<dyn Scorer> = Arc::new(UniformScorer(0.9));
    let coordinator = Coordinator::new(scorer, 5, DecisionConfig::default());

    let event: TransactionEvent = serde_json::from_value(event_value(
        "TXN-R1",
        "CUST-001",
        54.0,
        "ONLINE",
        "Unknown",
        "2024-03-01T12:00:00",
    ))
    .unwrap();
    let enriched = EnrichedEvent {
        event,
        profile: None,
        velocity: Some(9),
    };

    let first = coordinator.decide(&enriched).await;
    let second = coordinator.decide(&enriched).await;
    assert_eq!(first.fraud, second.fraud);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.primary_reason, second.primary_reason);
    assert_eq!(first.opinions.len(), second.opinions.len());
}

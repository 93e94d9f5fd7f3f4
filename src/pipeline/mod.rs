//! Stream topology
//! Partition-parallel processing of the transaction stream: a pump rekeys
//! events by customer onto partition channels; each partition worker drives
//! velocity update, profile join, decision and routing in arrival order.
//! One slow decision delays only its own partition.

use anyhow::Result;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

pub mod enrichment;
pub mod velocity;

use crate::bus::{decode, topics, InMemoryBus};
use crate::coordinator::Coordinator;
use crate::models::{CustomerProfile, TransactionEvent};
use crate::pipeline::enrichment::{Enricher, ProfileTable};
use crate::pipeline::velocity::VelocityTracker;
use crate::router::DecisionRouter;
use crate::storage::StateStore;

const PARTITION_CHANNEL_DEPTH: usize = 1024;
const MAINTENANCE_INTERVAL_SECS: u64 = 600;
/// In-memory windows kept per customer during compaction; the persisted
/// history is pruned on its own schedule.
const KEEP_WINDOWS: usize = 2;

/// Counters for the whole topology, surfaced on the health endpoint.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_processed: AtomicU64,
    pub events_skipped: AtomicU64,
    pub profiles_applied: AtomicU64,
    pub fraud_alerts: AtomicU64,
    pub review_cases: AtomicU64,
    pub approvals: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            profiles_applied: self.profiles_applied.load(Ordering::Relaxed),
            fraud_alerts: self.fraud_alerts.load(Ordering::Relaxed),
            review_cases: self.review_cases.load(Ordering::Relaxed),
            approvals: self.approvals.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatsSnapshot {
    pub events_processed: u64,
    pub events_skipped: u64,
    pub profiles_applied: u64,
    pub fraud_alerts: u64,
    pub review_cases: u64,
    pub approvals: u64,
}

pub struct Topology {
    pub bus: Arc<InMemoryBus>,
    pub store: Arc<StateStore>,
    pub profiles: Arc<ProfileTable>,
    pub velocity: Arc<VelocityTracker>,
    pub coordinator: Arc<Coordinator>,
    pub router: Arc<DecisionRouter>,
    pub stats: Arc<PipelineStats>,
    pub partitions: usize,
    pub commit_interval: Duration,
}

impl Topology {
    /// Spawn the whole topology: profile updater, transaction pump,
    /// partition workers, commit ticker and maintenance loop. Handles are
    /// returned so the caller can abort on shutdown.
    pub fn spawn(self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        let partitions = self.partitions.max(1);

        // Profile updater: materialize the compacted topic.
        {
            let mut rx = self.bus.subscribe(topics::CUSTOMER_PROFILES)?;
            let profiles = self.profiles.clone();
            let stats = self.stats.clone();
            handles.push(tokio::spawn(async move {
                while let Some(record) = rx.recv().await {
                    let Some(profile) =
                        decode::<CustomerProfile>(topics::CUSTOMER_PROFILES, &record)
                    else {
                        continue;
                    };
                    if let Err(e) = profile.validate() {
                        warn!(key = %record.key, error = %e, "invalid profile skipped");
                        continue;
                    }
                    profiles.upsert(profile);
                    stats.profiles_applied.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }

        // Partition workers.
        let mut senders = Vec::with_capacity(partitions);
        for partition in 0..partitions {
            let (tx, mut rx) = mpsc::channel::<TransactionEvent>(PARTITION_CHANNEL_DEPTH);
            senders.push(tx);

            let enricher = Enricher::new(self.profiles.clone(), self.velocity.clone());
            let coordinator = self.coordinator.clone();
            let router = self.router.clone();
            let bus = self.bus.clone();
            let stats = self.stats.clone();
            handles.push(tokio::spawn(async move {
                info!(partition, "partition worker up");
                while let Some(event) = rx.recv().await {
                    let enriched = enricher.enrich(event);
                    let decision = coordinator.decide(&enriched).await;
                    let routed = router.route(&decision);
                    stats.events_processed.fetch_add(1, Ordering::Relaxed);
                    let branch = match routed.topic {
                        topics::FRAUD_ALERTS => &stats.fraud_alerts,
                        topics::HUMAN_REVIEW => &stats.review_cases,
                        _ => &stats.approvals,
                    };
                    branch.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = bus.publish_json(
                        routed.topic,
                        &enriched.event.customer_id,
                        &routed.envelope,
                    ) {
                        // Produce failure stalls this partition; the event is
                        // redelivered after recovery rather than swallowed.
                        error!(partition, error = %e, "produce failed, stalling partition");
                        break;
                    }
                }
                info!(partition, "partition worker down");
            }));
        }

        // Transaction pump: decode, validate, rekey by customer.
        {
            let mut rx = self.bus.subscribe(topics::TRANSACTIONS)?;
            let stats = self.stats.clone();
            handles.push(tokio::spawn(async move {
                while let Some(record) = rx.recv().await {
                    let Some(event) = decode::<TransactionEvent>(topics::TRANSACTIONS, &record)
                    else {
                        stats.events_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    };
                    if let Err(e) = event.validate() {
                        warn!(key = %record.key, error = %e, "invalid transaction skipped");
                        stats.events_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    let partition = partition_for(&event.customer_id, partitions);
                    if senders[partition].send(event).await.is_err() {
                        error!(partition, "partition channel closed, pump stopping");
                        break;
                    }
                }
            }));
        }

        // Commit ticker: flush dirty window counts on the commit interval.
        {
            let velocity = self.velocity.clone();
            let mut ticker = interval(self.commit_interval);
            handles.push(tokio::spawn(async move {
                loop {
                    ticker.tick().await;
                    if let Err(e) = velocity.flush() {
                        warn!(error = %e, "velocity commit failed");
                    }
                }
            }));
        }

        // Maintenance: compact in-memory windows, prune the closed ones on
        // disk, nudge sqlite.
        {
            let velocity = self.velocity.clone();
            let store = self.store.clone();
            let mut ticker = interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
            handles.push(tokio::spawn(async move {
                loop {
                    ticker.tick().await;
                    velocity.compact(KEEP_WINDOWS);
                    let cutoff = chrono::Utc::now().timestamp() - 86_400;
                    match store.prune_windows_before(cutoff) {
                        Ok(0) => {}
                        Ok(deleted) => {
                            info!(deleted, "pruned closed velocity windows");
                            let _ = store.optimize();
                        }
                        Err(e) => warn!(error = %e, "window prune failed"),
                    }
                }
            }));
        }

        Ok(handles)
    }
}

fn partition_for(customer_id: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    customer_id.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

//! Analyst feedback sink
//! Drains the feedback topic into the feedback store and fans each verdict
//! out to every analyzer's knowledge log. Write-only: nothing on the
//! decision path reads these rows.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analyzers::Specialist;
use crate::bus::{decode, topics, InMemoryBus};
use crate::models::AnalystFeedback;
use crate::storage::StateStore;

pub struct FeedbackSink {
    bus: Arc<InMemoryBus>,
    store: Arc<StateStore>,
}

impl FeedbackSink {
    pub fn new(bus: Arc<InMemoryBus>, store: Arc<StateStore>) -> Self {
        Self { bus, store }
    }

    pub fn spawn(self) -> anyhow::Result<JoinHandle<()>> {
        let mut rx = self.bus.subscribe(topics::ANALYST_FEEDBACK)?;
        let store = self.store;
        Ok(tokio::spawn(async move {
            info!("feedback sink running");
            while let Some(record) = rx.recv().await {
                let Some(feedback) = decode::<AnalystFeedback>(topics::ANALYST_FEEDBACK, &record)
                else {
                    continue;
                };
                if let Err(e) = record_all(&store, &feedback) {
                    warn!(
                        transaction = %feedback.transaction_id,
                        error = %e,
                        "feedback not recorded"
                    );
                }
            }
        }))
    }
}

fn record_all(store: &StateStore, feedback: &AnalystFeedback) -> anyhow::Result<()> {
    store.record_feedback(feedback)?;
    for specialist in Specialist::ALL {
        store.record_knowledge(specialist.id(), feedback)?;
    }
    Ok(())
}

//! Enrichment joins
//! Materialized profile view plus the two left-joins that turn a bare
//! transaction into an EnrichedEvent. A missing side is a join miss, never
//! an error.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::models::{CustomerProfile, EnrichedEvent, TransactionEvent};
use crate::pipeline::velocity::VelocityTracker;

/// View over the compacted profile topic: latest profile per customer.
#[derive(Default)]
pub struct ProfileTable {
    profiles: RwLock<HashMap<String, CustomerProfile>>,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: CustomerProfile) {
        debug!(customer = %profile.customer_id, "profile upserted");
        self.profiles
            .write()
            .insert(profile.customer_id.clone(), profile);
    }

    pub fn get(&self, customer_id: &str) -> Option<CustomerProfile> {
        self.profiles.read().get(customer_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

/// Joins the event stream against the profile table and the velocity store.
pub struct Enricher {
    profiles: Arc<ProfileTable>,
    velocity: Arc<VelocityTracker>,
}

impl Enricher {
    pub fn new(profiles: Arc<ProfileTable>, velocity: Arc<VelocityTracker>) -> Self {
        Self { profiles, velocity }
    }

    /// Count the event into its window, then left-join profile and velocity.
    /// The surfaced count includes the triggering event.
    pub fn enrich(&self, event: TransactionEvent) -> EnrichedEvent {
        let velocity = self.velocity.observe(&event.customer_id, event.timestamp);
        let profile = self.profiles.get(&event.customer_id);
        EnrichedEvent {
            event,
            profile,
            velocity: Some(velocity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;
    use crate::storage::StateStore;
    use chrono::NaiveDate;

    fn event(customer: &str, secs: i64) -> TransactionEvent {
        TransactionEvent {
            transaction_id: format!("TXN-{}", secs),
            customer_id: customer.to_string(),
            amount: 48.0,
            currency: "USD".to_string(),
            merchant_id: "MERCH-1".to_string(),
            merchant_category: "GROCERY".to_string(),
            location: "Houston".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
                + chrono::Duration::seconds(secs),
            metadata: Default::default(),
        }
    }

    fn enricher() -> (Arc<ProfileTable>, Enricher) {
        let profiles = Arc::new(ProfileTable::new());
        let velocity = Arc::new(VelocityTracker::new(
            Arc::new(StateStore::open_in_memory().unwrap()),
            300,
        ));
        (profiles.clone(), Enricher::new(profiles, velocity))
    }

    #[test]
    fn missing_profile_is_a_join_miss() {
        let (_profiles, enricher) = enricher();
        let enriched = enricher.enrich(event("CUST-NEW", 0));
        assert!(enriched.profile.is_none());
        assert_eq!(enriched.velocity, Some(1));
    }

    #[test]
    fn profile_joins_once_present() {
        let (profiles, enricher) = enricher();
        let first = enricher.enrich(event("CUST-NEW", 0));
        assert!(first.profile.is_none());

        profiles.upsert(CustomerProfile {
            customer_id: "CUST-NEW".to_string(),
            average_transaction_amount: 178.0,
            daily_limit: 2000.0,
            typical_categories: vec!["GROCERY".to_string()],
            primary_location: "Houston".to_string(),
            risk_level: RiskLevel::Low,
        });

        let second = enricher.enrich(event("CUST-NEW", 5));
        assert_eq!(
            second.profile.as_ref().map(|p| p.primary_location.as_str()),
            Some("Houston")
        );
        assert_eq!(second.velocity, Some(2));
    }

    #[test]
    fn velocity_tracks_per_customer_windows() {
        let (_profiles, enricher) = enricher();
        for k in 1..=4 {
            let enriched = enricher.enrich(event("CUST-007", k));
            assert_eq!(enriched.velocity, Some(k as u64));
        }
        let other = enricher.enrich(event("CUST-008", 9));
        assert_eq!(other.velocity, Some(1));
    }
}

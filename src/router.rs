//! Decision router
//! Branches every decision to exactly one output topic. Predicates are
//! evaluated in order and are mutually exclusive and total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::topics;
use crate::models::{Config, Decision, Opinion};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertPriority {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
}

/// High-confidence fraud, pushed straight to the alert channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAlert {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub alert_id: Uuid,
    pub priority: AlertPriority,
    pub transaction_id: String,
    /// Rounded percent, not the raw fraction.
    pub confidence_pct: u32,
    pub primary_reason: String,
    pub opinion_count: usize,
    pub detailed_explanation: String,
    pub timestamp: DateTime<Utc>,
}

/// Anything fraud-flagged or in the uncertainty band goes to a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCase {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub case_id: Uuid,
    pub status: String,
    pub transaction_id: String,
    pub confidence: f64,
    pub primary_reason: String,
    pub opinions: Vec<Opinion>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub status: String,
    pub transaction_id: String,
    pub confidence: f64,
    pub opinion_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutputEnvelope {
    Alert(FraudAlert),
    Review(ReviewCase),
    Approval(Approval),
}

/// A routed decision: the topic it goes to and the envelope it carries.
#[derive(Debug, Clone)]
pub struct Routed {
    pub topic: &'static str,
    pub envelope: OutputEnvelope,
}

#[derive(Debug, Clone)]
pub struct DecisionRouter {
    fraud_alert_confidence: f64,
    needs_human_lower: f64,
    needs_human_upper: f64,
}

impl Default for DecisionRouter {
    fn default() -> Self {
        Self {
            fraud_alert_confidence: 0.8,
            needs_human_lower: 0.3,
            needs_human_upper: 0.7,
        }
    }
}

impl DecisionRouter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fraud_alert_confidence: config.fraud_alert_confidence,
            needs_human_lower: config.needs_human_lower,
            needs_human_upper: config.needs_human_upper,
        }
    }

    pub fn route(&self, decision: &Decision) -> Routed {
        let now = Utc::now();

        // Strict '>' on the alert gate: confidence exactly at the threshold
        // falls through to review.
        if decision.fraud && decision.confidence > self.fraud_alert_confidence {
            let priority = if decision.confidence >= self.fraud_alert_confidence {
                AlertPriority::High
            } else {
                AlertPriority::Medium
            };
            return Routed {
                topic: topics::FRAUD_ALERTS,
                envelope: OutputEnvelope::Alert(FraudAlert {
                    envelope_type: "AI_FRAUD_ALERT".to_string(),
                    alert_id: Uuid::new_v4(),
                    priority,
                    transaction_id: decision.transaction_id.clone(),
                    confidence_pct: (decision.confidence * 100.0).round() as u32,
                    primary_reason: decision.primary_reason.clone(),
                    opinion_count: decision.opinions.len(),
                    detailed_explanation: decision.detailed_explanation.clone(),
                    timestamp: now,
                }),
            };
        }

        if decision.fraud || decision.needs_human(self.needs_human_lower, self.needs_human_upper) {
            return Routed {
                topic: topics::HUMAN_REVIEW,
                envelope: OutputEnvelope::Review(ReviewCase {
                    envelope_type: "AI_REVIEW_CASE".to_string(),
                    case_id: Uuid::new_v4(),
                    status: "PENDING_HUMAN_REVIEW".to_string(),
                    transaction_id: decision.transaction_id.clone(),
                    confidence: decision.confidence,
                    primary_reason: decision.primary_reason.clone(),
                    opinions: decision.opinions.clone(),
                    timestamp: now,
                }),
            };
        }

        Routed {
            topic: topics::APPROVED,
            envelope: OutputEnvelope::Approval(Approval {
                envelope_type: "AI_APPROVAL".to_string(),
                status: "APPROVED_BY_AI".to_string(),
                transaction_id: decision.transaction_id.clone(),
                confidence: decision.confidence,
                opinion_count: decision.opinions.len(),
                timestamp: now,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(fraud: bool, confidence: f64) -> Decision {
        Decision {
            transaction_id: "TXN-1".to_string(),
            fraud,
            confidence,
            primary_reason: "test".to_string(),
            detailed_explanation: "explanation".to_string(),
            opinions: vec![
                Opinion::new("behavior", "customer-behavior", "", 0.9, "r", "a"),
                Opinion::new("consensus", "consensus", "", 0.8, "r", "a"),
            ],
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn high_confidence_fraud_goes_to_alerts() {
        let routed = DecisionRouter::default().route(&decision(true, 0.95));
        assert_eq!(routed.topic, topics::FRAUD_ALERTS);
        match routed.envelope {
            OutputEnvelope::Alert(alert) => {
                assert_eq!(alert.envelope_type, "AI_FRAUD_ALERT");
                assert_eq!(alert.priority, AlertPriority::High);
                assert_eq!(alert.confidence_pct, 95);
                assert_eq!(alert.opinion_count, 2);
            }
            other => panic!("expected alert, got {:?}", other),
        }
    }

    #[test]
    fn alert_gate_is_strict_at_the_threshold() {
        // Exactly 0.8 is not 'greater than': falls to human review via the
        // fraud clause.
        let routed = DecisionRouter::default().route(&decision(true, 0.8));
        assert_eq!(routed.topic, topics::HUMAN_REVIEW);
    }

    #[test]
    fn fraud_band_gap_still_reaches_review() {
        // fraud with 0.7 <= c <= 0.8: needs_human is false but the fraud
        // clause routes it to review.
        let routed = DecisionRouter::default().route(&decision(true, 0.75));
        assert_eq!(routed.topic, topics::HUMAN_REVIEW);
        match routed.envelope {
            OutputEnvelope::Review(case) => {
                assert_eq!(case.status, "PENDING_HUMAN_REVIEW");
                assert_eq!(case.opinions.len(), 2);
            }
            other => panic!("expected review, got {:?}", other),
        }
    }

    #[test]
    fn uncertain_non_fraud_needs_a_human() {
        let routed = DecisionRouter::default().route(&decision(false, 0.5));
        assert_eq!(routed.topic, topics::HUMAN_REVIEW);
    }

    #[test]
    fn needs_human_band_is_strict_at_both_ends() {
        let router = DecisionRouter::default();
        assert_eq!(router.route(&decision(false, 0.7)).topic, topics::APPROVED);
        assert_eq!(router.route(&decision(false, 0.3)).topic, topics::APPROVED);
        assert_eq!(
            router.route(&decision(false, 0.69)).topic,
            topics::HUMAN_REVIEW
        );
    }

    #[test]
    fn confident_non_fraud_is_approved() {
        let routed = DecisionRouter::default().route(&decision(false, 0.9));
        assert_eq!(routed.topic, topics::APPROVED);
        match routed.envelope {
            OutputEnvelope::Approval(approval) => {
                assert_eq!(approval.status, "APPROVED_BY_AI");
                assert_eq!(approval.opinion_count, 2);
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[test]
    fn branch_is_total_over_the_confidence_range() {
        let router = DecisionRouter::default();
        for fraud in [false, true] {
            for step in 0..=100 {
                let c = step as f64 / 100.0;
                let routed = router.route(&decision(fraud, c));
                assert!(matches!(
                    routed.topic,
                    topics::FRAUD_ALERTS | topics::HUMAN_REVIEW | topics::APPROVED
                ));
            }
        }
    }
}

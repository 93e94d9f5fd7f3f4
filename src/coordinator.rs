//! Decision coordinator
//! Runs one enriched event through the analyzer panel in three phases:
//! independent scoring, conditional collaborative refinement, weighted
//! consensus. Pure function of (enriched event, scorer, config); the stream
//! topology and the HTTP surface both call into it.

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::analyzers::Specialist;
use crate::models::{Config, Decision, EnrichedEvent, Opinion, RiskLevel};
use crate::scorer::{parse_scored, Scorer};

pub const CONSENSUS_ID: &str = "consensus";

/// Weight applied to collaboration and consensus opinions in the weighted
/// mean; phase-1 opinions use their specialist weight.
const SUPPORT_WEIGHT: f64 = 0.8;

/// Phase-1 risk spread beyond which the panel is considered in disagreement.
const DISAGREEMENT_SPREAD: f64 = 0.4;

pub const TECHNICAL_ERROR_REASON: &str = "Technical error during analysis";
const INTELLIGENCE_SOURCES: &str =
    "Intelligence Sources: Real-time velocity, customer profiles, temporal patterns";

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub fraud_risk_threshold: f64,
    pub velocity_high_threshold: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            fraud_risk_threshold: 0.6,
            velocity_high_threshold: 3,
        }
    }
}

impl From<&Config> for DecisionConfig {
    fn from(config: &Config) -> Self {
        Self {
            fraud_risk_threshold: config.fraud_risk_threshold,
            velocity_high_threshold: config.velocity_high_threshold,
        }
    }
}

pub struct Coordinator {
    scorer: Arc<dyn Scorer>,
    /// Bounded pool shared across partitions. Five permits match one
    /// decision pass; raise ANALYZER_POOL_SIZE to partitions x 5 for linear
    /// scaling.
    pool: Arc<Semaphore>,
    config: DecisionConfig,
}

impl Coordinator {
    pub fn new(scorer: Arc<dyn Scorer>, pool_size: usize, config: DecisionConfig) -> Self {
        Self {
            scorer,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            config,
        }
    }

    /// Decide one enriched event. Infallible by contract: any uncaught
    /// failure inside the phases becomes a synthetic technical-error
    /// decision that downstream routing surfaces for human handling.
    pub async fn decide(&self, enriched: &EnrichedEvent) -> Decision {
        match self.run(enriched).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    transaction = %enriched.event.transaction_id,
                    error = %e,
                    "decision pass failed"
                );
                technical_error_decision(&enriched.event.transaction_id, &e.to_string())
            }
        }
    }

    async fn run(&self, enriched: &EnrichedEvent) -> Result<Decision> {
        let phase1 = self.independent_scoring(enriched).await?;
        let collaboration = self.collaborative_refinement(enriched, &phase1).await?;
        let consensus = self.consensus_opinion(enriched, &phase1).await;

        let mut opinions = phase1;
        opinions.extend(collaboration);
        opinions.push(consensus);

        Ok(self.synthesize(enriched, opinions))
    }

    /// Phase 1: all five specialists concurrently, each under a pool permit.
    /// The pass waits for all five; degraded analyzers already produced
    /// neutral opinions inside `analyze`.
    async fn independent_scoring(&self, enriched: &EnrichedEvent) -> Result<Vec<Opinion>> {
        let handles: Vec<_> = Specialist::ALL
            .into_iter()
            .map(|specialist| {
                let scorer = self.scorer.clone();
                let pool = self.pool.clone();
                let enriched = enriched.clone();
                tokio::spawn(async move {
                    let _permit = pool.acquire_owned().await.context("analyzer pool closed")?;
                    Ok::<Opinion, anyhow::Error>(
                        specialist.analyze(scorer.as_ref(), &enriched).await,
                    )
                })
            })
            .collect();

        let mut opinions = Vec::with_capacity(Specialist::ALL.len());
        for joined in join_all(handles).await {
            opinions.push(joined.context("analyzer task panicked")??);
        }
        Ok(opinions)
    }

    /// Phase 2: collaboration streams. Disagreement, high velocity or a
    /// present profile opens the phase; each stream still has its own gate.
    async fn collaborative_refinement(
        &self,
        enriched: &EnrichedEvent,
        phase1: &[Opinion],
    ) -> Result<Vec<Opinion>> {
        let spread = risk_spread(phase1);
        let high_velocity = enriched.high_velocity(self.config.velocity_high_threshold);
        let triggered = spread > DISAGREEMENT_SPREAD || high_velocity || enriched.profile.is_some();
        if !triggered {
            return Ok(Vec::new());
        }

        debug!(
            transaction = %enriched.event.transaction_id,
            spread,
            high_velocity,
            profile = enriched.profile.is_some(),
            "collaboration phase opened"
        );

        let mut handles = Vec::new();

        if high_velocity {
            let question = format!(
                "{} events in 5 minutes - does this align with automated attack patterns?",
                enriched.velocity.unwrap_or_default()
            );
            for specialist in [Specialist::Pattern, Specialist::Temporal] {
                handles.push(self.spawn_collaboration(specialist, enriched, question.clone()));
            }
        }

        if let Some(profile) = &enriched.profile {
            let question = format!(
                "Customer baseline averages {:.2} per transaction with a {} risk tier - does this event fit the customer?",
                profile.average_transaction_amount,
                profile.risk_level.as_str()
            );
            for specialist in [Specialist::Behavior, Specialist::Risk] {
                handles.push(self.spawn_collaboration(specialist, enriched, question.clone()));
            }
        }

        let mut opinions = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            opinions.push(joined.context("collaboration task panicked")??);
        }
        Ok(opinions)
    }

    fn spawn_collaboration(
        &self,
        specialist: Specialist,
        enriched: &EnrichedEvent,
        question: String,
    ) -> tokio::task::JoinHandle<Result<Opinion>> {
        let scorer = self.scorer.clone();
        let pool = self.pool.clone();
        let enriched = enriched.clone();
        tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.context("analyzer pool closed")?;
            Ok(specialist
                .collaborate(scorer.as_ref(), &enriched, &question)
                .await)
        })
    }

    /// Final consensus opinion summarizing the panel under the streaming
    /// context. Same failure policy as the analyzers: the summary call
    /// degrading yields a neutral consensus.
    async fn consensus_opinion(&self, enriched: &EnrichedEvent, phase1: &[Opinion]) -> Opinion {
        let mut prompt = String::from(
            "Panel consensus request: weigh the specialist opinions below into one final fraud assessment.\n",
        );
        prompt.push_str(&enriched.streaming_summary());
        prompt.push('\n');
        for opinion in phase1 {
            prompt.push_str(&format!(
                "{} scored risk {:.2}: {}\n",
                opinion.analyzer_id, opinion.risk_score, opinion.reasoning
            ));
        }

        let _permit = match self.pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return neutral_consensus("analyzer pool closed"),
        };
        match self.scorer.score(&prompt).await {
            Ok(raw) => {
                let scored = parse_scored(&raw);
                Opinion::new(
                    CONSENSUS_ID,
                    CONSENSUS_ID,
                    scored.analysis,
                    scored.risk_score,
                    scored.reasoning,
                    scored.recommendation,
                )
            }
            Err(e) => neutral_consensus(&e.to_string()),
        }
    }

    /// Phase 3: weighted mean, streaming bonus, confidence, explanation.
    fn synthesize(&self, enriched: &EnrichedEvent, opinions: Vec<Opinion>) -> Decision {
        let base = weighted_base(&opinions);
        let high_velocity = enriched.high_velocity(self.config.velocity_high_threshold);

        let mut bonus = 0.0;
        if high_velocity {
            bonus += 0.25;
        }
        if enriched.unusual_amount() {
            bonus += 0.20;
        }
        if enriched
            .profile
            .as_ref()
            .map(|p| p.risk_level == RiskLevel::High)
            .unwrap_or(false)
        {
            bonus += 0.10;
        }

        let final_risk = (base + bonus).min(1.0);
        let fraud = final_risk >= self.config.fraud_risk_threshold;

        let agreeing = opinions
            .iter()
            .filter(|o| o.indicates_fraud() == fraud)
            .count();
        let agreement_ratio = if opinions.is_empty() {
            0.0
        } else {
            agreeing as f64 / opinions.len() as f64
        };
        let mut confidence: f64 = if agreement_ratio >= 0.8 {
            0.9
        } else if agreement_ratio >= 0.6 {
            0.7
        } else if agreement_ratio >= 0.4 {
            0.5
        } else {
            0.3
        };
        if high_velocity {
            confidence += 0.1;
        }
        if enriched.profile.is_some() {
            confidence += 0.1;
        }
        let confidence = confidence.min(1.0);

        let primary_reason = if fraud {
            if high_velocity {
                "High transaction velocity with elevated panel risk".to_string()
            } else {
                "Weighted analyzer consensus above fraud threshold".to_string()
            }
        } else {
            "Transaction consistent with panel assessment".to_string()
        };

        let mut explanation = String::new();
        explanation.push_str(&enriched.streaming_summary());
        explanation.push('\n');
        for opinion in &opinions {
            explanation.push_str(&format!(
                "- {} ({:.0}% risk): {}\n",
                opinion.analyzer_id,
                opinion.risk_score * 100.0,
                opinion.reasoning
            ));
        }
        explanation.push_str(&format!(
            "Final risk {:.2}; decision: {}\n",
            final_risk,
            if fraud { "FRAUD" } else { "APPROVE" }
        ));
        explanation.push_str(INTELLIGENCE_SOURCES);

        Decision {
            transaction_id: enriched.event.transaction_id.clone(),
            fraud,
            confidence,
            primary_reason,
            detailed_explanation: explanation,
            opinions,
            analyzed_at: Utc::now(),
        }
    }
}

/// Weighted mean risk over the full opinion set. Order-independent: each
/// opinion's weight is looked up from its id.
pub(crate) fn weighted_base(opinions: &[Opinion]) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for opinion in opinions {
        let weight = Specialist::ALL
            .iter()
            .find(|s| s.id() == opinion.analyzer_id)
            .map(|s| s.weight())
            .unwrap_or(SUPPORT_WEIGHT);
        weighted_sum += weight * opinion.risk_score;
        weight_total += weight;
    }
    if weight_total == 0.0 {
        0.0
    } else {
        weighted_sum / weight_total
    }
}

fn risk_spread(opinions: &[Opinion]) -> f64 {
    let max = opinions.iter().map(|o| o.risk_score).fold(0.0_f64, f64::max);
    let min = opinions.iter().map(|o| o.risk_score).fold(1.0_f64, f64::min);
    (max - min).max(0.0)
}

fn neutral_consensus(reason: &str) -> Opinion {
    Opinion::new(
        CONSENSUS_ID,
        CONSENSUS_ID,
        "",
        0.5,
        format!("consensus degraded: {}", reason),
        "manual review required",
    )
}

pub(crate) fn technical_error_decision(transaction_id: &str, detail: &str) -> Decision {
    Decision {
        transaction_id: transaction_id.to_string(),
        fraud: true,
        confidence: 0.5,
        primary_reason: TECHNICAL_ERROR_REASON.to_string(),
        detailed_explanation: format!("{}: {}", TECHNICAL_ERROR_REASON, detail),
        opinions: Vec::new(),
        analyzed_at: Utc::now(),
    }
}

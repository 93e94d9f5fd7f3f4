//! Specialist analyzer panel
//! Five fixed specializations over one closed enum. Each builds its own
//! prompt from the enriched event, calls the Scorer, and parses the reply
//! into an Opinion. Scorer failure degrades to a neutral opinion here and
//! never propagates.

use tracing::warn;

use crate::models::{EnrichedEvent, Opinion};
use crate::scorer::{parse_scored, Scorer, ScorerError};

pub const COLLAB_SUFFIX: &str = "-collab";
const NEUTRAL_RISK: f64 = 0.5;
const NEUTRAL_RECOMMENDATION: &str = "manual review required";

/// The analyzer panel. Weights feed the coordinator's consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Specialist {
    Behavior,
    Pattern,
    Risk,
    Geographic,
    Temporal,
}

impl Specialist {
    pub const ALL: [Specialist; 5] = [
        Specialist::Behavior,
        Specialist::Pattern,
        Specialist::Risk,
        Specialist::Geographic,
        Specialist::Temporal,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Specialist::Behavior => "behavior",
            Specialist::Pattern => "pattern",
            Specialist::Risk => "risk",
            Specialist::Geographic => "geographic",
            Specialist::Temporal => "temporal",
        }
    }

    pub fn specialization(&self) -> &'static str {
        match self {
            Specialist::Behavior => "customer-behavior",
            Specialist::Pattern => "attack-patterns",
            Specialist::Risk => "financial-risk",
            Specialist::Geographic => "location-risk",
            Specialist::Temporal => "timing-patterns",
        }
    }

    /// Consensus weight for phase-1 opinions.
    pub fn weight(&self) -> f64 {
        match self {
            Specialist::Behavior => 1.2,
            Specialist::Pattern => 1.3,
            Specialist::Risk => 1.1,
            Specialist::Geographic => 1.0,
            Specialist::Temporal => 1.0,
        }
    }

    pub fn focus(&self) -> &'static str {
        match self {
            Specialist::Behavior => {
                "transaction velocity against the customer's baseline spending and timing anomalies"
            }
            Specialist::Pattern => {
                "card-testing bursts, bot activity and credential-stuffing signatures"
            }
            Specialist::Risk => {
                "amount deviation against the customer profile and merchant risk tier"
            }
            Specialist::Geographic => {
                "baseline location against the event location and geographic impossibility under high velocity"
            }
            Specialist::Temporal => {
                "off-hours activity, sub-second intervals and regularity indicative of scripting"
            }
        }
    }

    fn analysis_prompt(&self, enriched: &EnrichedEvent) -> String {
        format!(
            "As the {} specialist, assess this card authorization for fraud. \
Focus on {}.\n{}\n{}",
            self.specialization(),
            self.focus(),
            enriched.event.describe(),
            enriched.streaming_summary(),
        )
    }

    fn collaboration_prompt(&self, enriched: &EnrichedEvent, question: &str) -> String {
        format!(
            "You are the {} specialist in a joint fraud review. \
Colleagues raised the question: {}\n{}\n{}",
            self.specialization(),
            question,
            enriched.event.describe(),
            enriched.streaming_summary(),
        )
    }

    /// Independent phase-1 opinion.
    pub async fn analyze(&self, scorer: &dyn Scorer, enriched: &EnrichedEvent) -> Opinion {
        let prompt = self.analysis_prompt(enriched);
        self.scored_opinion(scorer, &prompt, self.id().to_string())
            .await
    }

    /// Phase-2 collaboration opinion; the id carries a `-collab` suffix so
    /// the consensus weighting can tell the streams apart.
    pub async fn collaborate(
        &self,
        scorer: &dyn Scorer,
        enriched: &EnrichedEvent,
        question: &str,
    ) -> Opinion {
        let prompt = self.collaboration_prompt(enriched, question);
        self.scored_opinion(scorer, &prompt, format!("{}{}", self.id(), COLLAB_SUFFIX))
            .await
    }

    async fn scored_opinion(&self, scorer: &dyn Scorer, prompt: &str, id: String) -> Opinion {
        match scorer.score(prompt).await {
            Ok(raw) => {
                let scored = parse_scored(&raw);
                Opinion::new(
                    id,
                    self.specialization(),
                    scored.analysis,
                    scored.risk_score,
                    scored.reasoning,
                    scored.recommendation,
                )
            }
            Err(e) => self.neutral_opinion(id, &e),
        }
    }

    fn neutral_opinion(&self, id: String, error: &ScorerError) -> Opinion {
        warn!(analyzer = self.id(), error = %error, "scorer call failed, emitting neutral opinion");
        Opinion::new(
            id,
            self.specialization(),
            "",
            NEUTRAL_RISK,
            format!("analyzer degraded: {}", error),
            NEUTRAL_RECOMMENDATION,
        )
    }
}

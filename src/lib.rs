//! FraudPilot Backend Library
//!
//! Exposes the screening pipeline modules for the binary and for
//! integration tests: record model, scorer backends, analyzer panel,
//! coordinator, stream topology, router and the bus boundary.

pub mod analyzers;
pub mod api;
pub mod bus;
pub mod coordinator;
pub mod feedback;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod scorer;
pub mod storage;

pub use coordinator::{Coordinator, DecisionConfig};
pub use models::{
    AnalystFeedback, Config, CustomerProfile, Decision, EnrichedEvent, Opinion, RiskLevel,
    TransactionEvent,
};
pub use router::DecisionRouter;

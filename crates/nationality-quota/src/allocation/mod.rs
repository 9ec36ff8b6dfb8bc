//! Nationality quota allocation: tier discovery, headroom and cascade, dominance control,
//! the per-request decision pipeline and the TTL waiting list.
//!
//! Engines are pure functions over a [`WorldSnapshot`]; [`QuotaAllocationService`] captures the
//! snapshot, runs the engines and commits the outcome through the storage traits.

pub mod capacity;
pub mod clock;
pub mod decision;
pub mod dominance;
pub mod domain;
pub mod ledger;
pub(crate) mod locks;
pub mod queue;
pub mod repository;
pub mod router;
pub mod service;
pub mod snapshot;
pub mod tiers;
pub mod validation;

#[cfg(test)]
mod tests;

pub use capacity::{
    cascade, CapacityEngine, CapacitySnapshot, ConfigurationError, HeadroomResult,
    OutflowProjection, TierCapacity, TierStatusResult,
};
pub use clock::{Clock, SystemClock};
pub use decision::{Decision, PriorityScore, RequestProcessor, ScoreComponent};
pub use dominance::{DominanceAlertEngine, DominanceCheckResult, Trend};
pub use domain::{
    AlertLevel, DecisionLog, DecisionRule, DecisionType, DepartureKind, DominanceAlert,
    Establishment, EstablishmentId, Nationality, NationalityCap, NationalityCode,
    PlannedDeparture, Profession, ProfessionId, QueueEntry, QuotaRequest, RequestId,
    RequestStatus, RequestSubmission, RuleStep, TierAssignment, TierLevel, TierStatus,
    WorkerRecord, WorkerState,
};
pub use ledger::QuotaLedger;
pub use queue::{
    drain_order, DrainPlan, QueueEntryView, QueueError, QueueOutcome, QueueProcessor,
    QueueResolution, QueueStatus, RevalidationStep, TierContext, TierQueueStatus,
};
pub use repository::{
    ClassificationStore, QuotaRepository, Registry, RepositoryError, UnitOfWork, WorkforceRoster,
};
pub use router::allocation_router;
pub use service::{
    DrainReport, ProcessedRequest, QuotaAllocationService, RevalidationFailure,
    RevalidationReport, ServiceError,
};
pub use snapshot::WorldSnapshot;
pub use tiers::{ProfessionTier, TierDiscovery, TierDiscoveryEngine, TierInfo};
pub use validation::{validate_submission, ValidatedSubmission, ValidationError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    DecisionLog, DominanceAlert, Establishment, Nationality, NationalityCap, NationalityCode,
    Profession, ProfessionId, QueueEntry, QuotaRequest, RequestId, RequestStatus, TierAssignment,
    WorkerRecord,
};

/// Reference data owned by the roster system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub nationalities: Vec<Nationality>,
    pub professions: Vec<Profession>,
    pub establishments: Vec<Establishment>,
}

/// Read-only upstream view of workers, caps and reference data.
pub trait WorkforceRoster: Send + Sync {
    fn registry(&self) -> Result<Registry, RepositoryError>;
    fn caps(&self) -> Result<Vec<NationalityCap>, RepositoryError>;
    fn workers(&self) -> Result<Vec<WorkerRecord>, RepositoryError>;
}

/// Storage for requests, the waiting list and the decision audit trail.
pub trait QuotaRepository: Send + Sync {
    fn fetch_request(&self, id: &RequestId) -> Result<Option<QuotaRequest>, RepositoryError>;
    fn requests_for(&self, nationality: &NationalityCode)
        -> Result<Vec<QuotaRequest>, RepositoryError>;
    fn queue_entries(&self, nationality: &NationalityCode)
        -> Result<Vec<QueueEntry>, RepositoryError>;
    fn queue_entry(&self, id: &RequestId) -> Result<Option<QueueEntry>, RepositoryError>;
    fn decision_logs(&self, id: &RequestId) -> Result<Vec<DecisionLog>, RepositoryError>;
    /// Apply every change in `work` or none of them.
    fn commit(&self, work: UnitOfWork) -> Result<(), RepositoryError>;
}

/// Storage for tier generations and dominance alerts.
pub trait ClassificationStore: Send + Sync {
    fn current_tiers(&self, nationality: &NationalityCode)
        -> Result<Vec<TierAssignment>, RepositoryError>;
    /// Close the current rows for the given pairs and open `assignments` in one step.
    fn replace_tier_generation(
        &self,
        assignments: Vec<TierAssignment>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    fn active_alerts(&self, nationality: &NationalityCode)
        -> Result<Vec<DominanceAlert>, RepositoryError>;
    fn upsert_alert(&self, alert: DominanceAlert) -> Result<(), RepositoryError>;
    fn resolve_alert(
        &self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

/// A batch of mutations committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    /// Requests must still carry these statuses when the batch is applied.
    pub expected: Vec<(RequestId, RequestStatus)>,
    pub requests: Vec<QuotaRequest>,
    pub enqueue: Vec<QueueEntry>,
    pub touch: Vec<QueueEntry>,
    pub dequeue: Vec<RequestId>,
    pub logs: Vec<DecisionLog>,
}

impl UnitOfWork {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.enqueue.is_empty()
            && self.touch.is_empty()
            && self.dequeue.is_empty()
            && self.logs.is_empty()
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::QuotaParameters;

use super::capacity::{
    CapacitySnapshot, ConfigurationError, HeadroomResult, OutflowProjection, TierStatusResult,
};
use super::clock::Clock;
use super::decision::{Decision, RequestProcessor};
use super::dominance::DominanceCheckResult;
use super::domain::{
    AlertLevel, DecisionLog, DominanceAlert, NationalityCode, ProfessionId, QueueEntry,
    QuotaRequest, RequestId, RequestStatus, RequestSubmission, TierLevel, TierStatus,
};
use super::locks::KeyedLocks;
use super::queue::{
    DrainPlan, QueueEntryView, QueueError, QueueOutcome, QueueProcessor, QueueResolution,
    QueueStatus, RevalidationStep, TierContext,
};
use super::repository::{
    ClassificationStore, QuotaRepository, RepositoryError, UnitOfWork, WorkforceRoster,
};
use super::snapshot::WorldSnapshot;
use super::tiers::{TierDiscovery, TierDiscoveryEngine, TierInfo};
use super::validation::{validate_submission, ValidationError};

const DRAIN_ATTEMPTS: usize = 3;

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    let id = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RequestId(format!("req-{id:06}"))
}

/// Service composing the engines with storage, clock and locking.
pub struct QuotaAllocationService<R, C, W> {
    repository: Arc<R>,
    classifications: Arc<C>,
    roster: Arc<W>,
    clock: Arc<dyn Clock>,
    processor: RequestProcessor,
    queue: QueueProcessor,
    parameter_version: String,
    nationality_locks: KeyedLocks<NationalityCode>,
    drain_locks: KeyedLocks<(NationalityCode, TierLevel)>,
}

/// Persisted result of `process_request`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedRequest {
    pub request: QuotaRequest,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_entry: Option<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
    pub nationality: NationalityCode,
    pub tier: TierLevel,
    pub tier_status: TierStatus,
    pub capacity: u32,
    pub processed_count: usize,
    pub approved_requests: Vec<RequestId>,
    pub blocked_requests: Vec<RequestId>,
    pub capacity_used: u32,
    pub capacity_remaining: u32,
    pub remaining_in_queue: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevalidationReport {
    pub expired: Vec<RequestId>,
    pub blocked: Vec<RequestId>,
    pub retained: Vec<RequestId>,
    pub failed: Vec<RevalidationFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevalidationFailure {
    pub request_id: RequestId,
    pub error: String,
}

/// Error raised by the allocation service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("request {0} not found")]
    NotFound(RequestId),
}

impl<R, C, W> QuotaAllocationService<R, C, W>
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    pub fn new(
        repository: Arc<R>,
        classifications: Arc<C>,
        roster: Arc<W>,
        clock: Arc<dyn Clock>,
        parameters: &QuotaParameters,
    ) -> Self {
        Self {
            repository,
            classifications,
            roster,
            clock,
            processor: RequestProcessor::new(parameters),
            queue: QueueProcessor::new(parameters),
            parameter_version: parameters.parameter_version.clone(),
            nationality_locks: KeyedLocks::default(),
            drain_locks: KeyedLocks::default(),
        }
    }

    pub fn processor(&self) -> &RequestProcessor {
        &self.processor
    }

    pub fn queue_processor(&self) -> &QueueProcessor {
        &self.queue
    }

    fn snapshot(&self, nationality: &NationalityCode) -> Result<WorldSnapshot, RepositoryError> {
        WorldSnapshot::capture(
            self.clock.now(),
            nationality,
            self.roster.as_ref(),
            self.repository.as_ref(),
            self.classifications.as_ref(),
        )
    }

    fn known_snapshot(&self, nationality: &NationalityCode) -> Result<WorldSnapshot, ServiceError> {
        let snapshot = self.snapshot(nationality)?;
        if !snapshot.nationalities.contains_key(nationality) {
            return Err(ValidationError::UnknownNationality(nationality.clone()).into());
        }
        Ok(snapshot)
    }

    /// Decide a submission and persist the request, its audit log and any queue entry at once.
    pub fn process_request(
        &self,
        submission: RequestSubmission,
    ) -> Result<ProcessedRequest, ServiceError> {
        let nationality = NationalityCode::new(&submission.nationality.0);
        let submission = RequestSubmission {
            nationality: nationality.clone(),
            ..submission
        };

        self.nationality_locks
            .with_lock(nationality.clone(), || self.decide_and_store(&nationality, &submission))
    }

    fn decide_and_store(
        &self,
        nationality: &NationalityCode,
        submission: &RequestSubmission,
    ) -> Result<ProcessedRequest, ServiceError> {
        let snapshot = self.snapshot(nationality)?;
        let candidate = validate_submission(&snapshot, submission)?;
        let decision = self.processor.evaluate(&snapshot, &candidate)?;
        let now = snapshot.now;

        let request = QuotaRequest {
            id: next_request_id(),
            nationality: nationality.clone(),
            profession: submission.profession.clone(),
            establishment: submission.establishment.clone(),
            requested_count: submission.requested_count,
            approved_count: decision.approved_count,
            status: decision.decision.status(),
            priority_score: decision.priority_score,
            tier_at_submission: Some(decision.tier_level),
            submitted_at: now,
            decided_at: Some(now),
            decision_reason: Some(decision.reason.clone()),
        };

        let queue_entry = if request.status == RequestStatus::Queued {
            Some(
                self.queue
                    .add_to_queue(&snapshot, &request, decision.tier_level)?,
            )
        } else {
            None
        };

        let log = decision.to_log(request.id.clone(), &self.parameter_version, now);
        self.repository.commit(UnitOfWork {
            requests: vec![request.clone()],
            enqueue: queue_entry.iter().cloned().collect(),
            logs: vec![log],
            ..UnitOfWork::default()
        })?;

        info!(
            request_id = %request.id,
            nationality = %request.nationality,
            profession = %request.profession,
            decision = decision.decision.label(),
            approved = decision.approved_count,
            tier = decision.tier_level.number(),
            "quota request decided"
        );

        Ok(ProcessedRequest {
            request,
            decision,
            queue_entry,
        })
    }

    /// Dry run of `process_request`; nothing is written.
    pub fn check_eligibility(&self, submission: RequestSubmission) -> Result<Decision, ServiceError> {
        let nationality = NationalityCode::new(&submission.nationality.0);
        let submission = RequestSubmission {
            nationality: nationality.clone(),
            ..submission
        };
        let snapshot = self.snapshot(&nationality)?;
        let candidate = validate_submission(&snapshot, &submission)?;
        Ok(self.processor.evaluate(&snapshot, &candidate)?)
    }

    pub fn get_request(&self, id: &RequestId) -> Result<QuotaRequest, ServiceError> {
        self.repository
            .fetch_request(id)?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    pub fn decision_history(&self, id: &RequestId) -> Result<Vec<DecisionLog>, ServiceError> {
        self.get_request(id)?;
        Ok(self.repository.decision_logs(id)?)
    }

    pub fn headroom(
        &self,
        nationality: &NationalityCode,
        include_outflow: bool,
    ) -> Result<HeadroomResult, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        Ok(self
            .processor
            .capacity()
            .calculate_effective_headroom(&snapshot, nationality, include_outflow)?)
    }

    pub fn project_outflow(
        &self,
        nationality: &NationalityCode,
        horizon_days: Option<i64>,
    ) -> Result<OutflowProjection, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        let capacity = self.processor.capacity();
        let horizon = horizon_days.unwrap_or(capacity.parameters().projection_horizon_days);
        Ok(capacity.project_outflow(&snapshot, nationality, horizon))
    }

    pub fn tier_status(&self, nationality: &NationalityCode) -> Result<TierStatusResult, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        Ok(self
            .processor
            .capacity()
            .calculate_tier_status(&snapshot, nationality)?)
    }

    pub fn capacity_snapshot(
        &self,
        nationality: &NationalityCode,
    ) -> Result<CapacitySnapshot, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        Ok(self
            .processor
            .capacity()
            .capacity_snapshot(&snapshot, nationality)?)
    }

    /// Recompute tiers and store them as a new generation when there is enough history.
    pub fn refresh_tiers(&self, nationality: &NationalityCode) -> Result<TierDiscovery, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        let discovery = self.processor.tiers().discover_tiers(&snapshot, nationality);
        match &discovery {
            TierDiscovery::InsufficientData {
                total_requests,
                required,
            } => {
                info!(
                    nationality = %nationality,
                    total_requests,
                    required,
                    "tier discovery skipped: insufficient history"
                );
            }
            TierDiscovery::Classified { tiers, .. } => {
                let changed = tiers.iter().filter(|row| row.changed()).count();
                let rows = TierDiscoveryEngine::assignments(&discovery, nationality, snapshot.now);
                self.classifications
                    .replace_tier_generation(rows, snapshot.now)?;
                info!(
                    nationality = %nationality,
                    professions = tiers.len(),
                    changed,
                    "tier generation stored"
                );
            }
        }
        Ok(discovery)
    }

    pub fn tiers(&self, nationality: &NationalityCode) -> Result<Vec<TierInfo>, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        Ok(self.processor.tiers().get_all_tiers(&snapshot, nationality))
    }

    pub fn tier_for_request(
        &self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
    ) -> Result<TierInfo, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        Ok(self
            .processor
            .tiers()
            .get_tier_for_request(&snapshot, nationality, profession))
    }

    pub fn check_dominance(
        &self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
    ) -> Result<DominanceCheckResult, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        if !snapshot.professions.contains_key(profession) {
            return Err(ValidationError::UnknownProfession(profession.clone()).into());
        }
        Ok(self
            .processor
            .dominance()
            .check_dominance(&snapshot, nationality, profession))
    }

    pub fn alerts_for_nationality(
        &self,
        nationality: &NationalityCode,
    ) -> Result<Vec<DominanceCheckResult>, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        Ok(self
            .processor
            .dominance()
            .alerts_for_nationality(&snapshot, nationality))
    }

    pub fn active_alerts(
        &self,
        nationality: &NationalityCode,
    ) -> Result<Vec<DominanceAlert>, ServiceError> {
        Ok(self.classifications.active_alerts(nationality)?)
    }

    /// Recheck every profession and persist alerts: OK resolves, anything else upserts.
    pub fn refresh_alerts(
        &self,
        nationality: &NationalityCode,
    ) -> Result<Vec<DominanceCheckResult>, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        let engine = self.processor.dominance();
        let mut raised = Vec::new();
        let mut resolved = 0usize;
        for profession in snapshot.professions.keys() {
            let result = engine.check_dominance(&snapshot, nationality, profession);
            if result.level == AlertLevel::Ok {
                if self
                    .classifications
                    .resolve_alert(nationality, profession, snapshot.now)?
                {
                    resolved += 1;
                }
            } else {
                self.classifications
                    .upsert_alert(result.to_alert(snapshot.now))?;
                raised.push(result);
            }
        }
        raised.sort_by(|left, right| {
            right
                .level
                .cmp(&left.level)
                .then_with(|| right.share.total_cmp(&left.share))
        });
        info!(
            nationality = %nationality,
            active = raised.len(),
            resolved,
            "dominance alerts refreshed"
        );
        Ok(raised)
    }

    pub fn queue_status(&self, nationality: &NationalityCode) -> Result<QueueStatus, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        Ok(self.queue.queue_status(&snapshot))
    }

    pub fn queue_entry(&self, id: &RequestId) -> Result<QueueEntryView, ServiceError> {
        let entry = self
            .repository
            .queue_entry(id)?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        Ok(self.queue.entry_view(&entry, self.clock.now()))
    }

    /// Drain one (nationality, tier) queue against freshly computed capacity.
    ///
    /// Drains of the same queue are serialized; the commit re-checks that every planned entry
    /// is still queued and replans from a new snapshot if not.
    pub fn process_queue(
        &self,
        nationality: &NationalityCode,
        tier: TierLevel,
    ) -> Result<DrainReport, ServiceError> {
        self.drain_locks
            .with_lock((nationality.clone(), tier), || self.drain_locked(nationality, tier))
    }

    fn drain_locked(
        &self,
        nationality: &NationalityCode,
        tier: TierLevel,
    ) -> Result<DrainReport, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let snapshot = self.known_snapshot(nationality)?;
            let plan = self.queue.plan_drain(&snapshot, tier)?;
            match self.commit_drain(&snapshot, &plan) {
                Ok(()) => {
                    let resolved = plan.outcomes.len();
                    let remaining_in_queue = snapshot.queue_for_tier(tier).count() - resolved;
                    info!(
                        nationality = %nationality,
                        tier = tier.number(),
                        processed = resolved,
                        capacity_used = plan.capacity_used,
                        remaining_in_queue,
                        "queue drained"
                    );
                    return Ok(Self::drain_report(plan, tier, remaining_in_queue));
                }
                Err(RepositoryError::Conflict(reason)) if attempt < DRAIN_ATTEMPTS => {
                    warn!(
                        nationality = %nationality,
                        tier = tier.number(),
                        attempt,
                        %reason,
                        "queue changed during drain; replanning"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn commit_drain(&self, snapshot: &WorldSnapshot, plan: &DrainPlan) -> Result<(), RepositoryError> {
        if plan.outcomes.is_empty() {
            return Ok(());
        }
        let mut work = UnitOfWork::default();
        for outcome in &plan.outcomes {
            let request = find_request(snapshot, &outcome.request_id)?;
            work.expected
                .push((outcome.request_id.clone(), RequestStatus::Queued));
            work.requests.push(outcome.resolve(request, snapshot.now));
            work.dequeue.push(outcome.request_id.clone());
            work.logs.push(outcome.to_log(
                &plan.context,
                &self.parameter_version,
                snapshot.now,
            ));
        }
        self.repository.commit(work)
    }

    fn drain_report(plan: DrainPlan, tier: TierLevel, remaining_in_queue: usize) -> DrainReport {
        let mut approved_requests = Vec::new();
        let mut blocked_requests = Vec::new();
        for outcome in &plan.outcomes {
            match outcome.resolution {
                QueueResolution::Approved(_) | QueueResolution::Partial(_) => {
                    approved_requests.push(outcome.request_id.clone())
                }
                _ => blocked_requests.push(outcome.request_id.clone()),
            }
        }
        DrainReport {
            nationality: plan.nationality.clone(),
            tier,
            tier_status: plan.context.status,
            capacity: plan.context.capacity,
            processed_count: plan.outcomes.len(),
            approved_requests,
            blocked_requests,
            capacity_used: plan.capacity_used,
            capacity_remaining: plan.capacity_remaining(),
            remaining_in_queue,
        }
    }

    /// Expire and re-check every entry for a nationality. A failing entry is reported and
    /// the rest of the batch still runs.
    pub fn revalidate_queue(
        &self,
        nationality: &NationalityCode,
    ) -> Result<RevalidationReport, ServiceError> {
        let snapshot = self.known_snapshot(nationality)?;
        let mut report = RevalidationReport::default();

        for step in self.queue.plan_revalidation(&snapshot) {
            let (id, result) = match &step {
                RevalidationStep::Resolve(outcome) => (
                    outcome.request_id.clone(),
                    self.commit_resolution(&snapshot, outcome),
                ),
                RevalidationStep::Retain(id) => (id.clone(), self.touch_entry(&snapshot, id)),
            };
            match (result, &step) {
                (Ok(()), RevalidationStep::Resolve(outcome)) => match outcome.resolution {
                    QueueResolution::Expired => report.expired.push(id),
                    _ => report.blocked.push(id),
                },
                (Ok(()), RevalidationStep::Retain(_)) => report.retained.push(id),
                (Err(error), _) => {
                    warn!(request_id = %id, %error, "queue entry revalidation failed");
                    report.failed.push(RevalidationFailure {
                        request_id: id,
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            nationality = %nationality,
            expired = report.expired.len(),
            blocked = report.blocked.len(),
            retained = report.retained.len(),
            failed = report.failed.len(),
            "queue revalidated"
        );
        Ok(report)
    }

    fn commit_resolution(
        &self,
        snapshot: &WorldSnapshot,
        outcome: &QueueOutcome,
    ) -> Result<(), RepositoryError> {
        let request = find_request(snapshot, &outcome.request_id)?;
        let tier = queued_tier(snapshot, &outcome.request_id)?;
        let context = self.audit_context(snapshot, tier);
        self.repository.commit(UnitOfWork {
            expected: vec![(outcome.request_id.clone(), RequestStatus::Queued)],
            requests: vec![outcome.resolve(request, snapshot.now)],
            dequeue: vec![outcome.request_id.clone()],
            logs: vec![outcome.to_log(&context, &self.parameter_version, snapshot.now)],
            ..UnitOfWork::default()
        })
    }

    fn touch_entry(&self, snapshot: &WorldSnapshot, id: &RequestId) -> Result<(), RepositoryError> {
        let entry = snapshot
            .queue
            .iter()
            .find(|entry| &entry.request_id == id)
            .ok_or(RepositoryError::NotFound)?;
        self.repository.commit(UnitOfWork {
            touch: vec![QueueEntry {
                last_revalidated_at: Some(snapshot.now),
                ..entry.clone()
            }],
            ..UnitOfWork::default()
        })
    }

    /// Tier state for audit logs of non-allocating resolutions. A nationality without a cap
    /// has nothing allocatable, which is recorded as a closed tier.
    fn audit_context(&self, snapshot: &WorldSnapshot, tier: TierLevel) -> TierContext {
        self.queue
            .tier_context(snapshot, tier)
            .unwrap_or(TierContext {
                tier,
                status: TierStatus::Closed,
                capacity: 0,
                headroom: 0,
            })
    }

    /// Mark an entry as confirmed by the employer. Expiry is not extended.
    pub fn confirm(&self, id: &RequestId) -> Result<QueueEntryView, ServiceError> {
        let now = self.clock.now();
        let entry = self
            .repository
            .queue_entry(id)?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let confirmed = QueueEntry {
            confirmed_at: Some(now),
            ..entry
        };
        self.repository.commit(UnitOfWork {
            touch: vec![confirmed.clone()],
            ..UnitOfWork::default()
        })?;
        info!(request_id = %id, "queue entry confirmed");
        Ok(self.queue.entry_view(&confirmed, now))
    }

    pub fn withdraw(&self, id: &RequestId) -> Result<QuotaRequest, ServiceError> {
        let entry = self
            .repository
            .queue_entry(id)?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let snapshot = self.snapshot(&entry.nationality)?;
        let outcome = QueueOutcome {
            request_id: id.clone(),
            resolution: QueueResolution::Withdrawn,
            priority_score: entry.priority_score,
            dominance_level: AlertLevel::Ok,
            dominance_share: 0.0,
            reason: "WITHDRAWN: removed from the waiting list by the employer".to_string(),
        };
        self.commit_resolution(&snapshot, &outcome)
            .map_err(|error| match error {
                RepositoryError::NotFound => ServiceError::Queue(QueueError::NotFound(id.clone())),
                other => other.into(),
            })?;
        info!(request_id = %id, nationality = %entry.nationality, "queue entry withdrawn");
        self.get_request(id)
    }
}

fn find_request<'a>(
    snapshot: &'a WorldSnapshot,
    id: &RequestId,
) -> Result<&'a QuotaRequest, RepositoryError> {
    snapshot
        .requests
        .iter()
        .find(|request| &request.id == id)
        .ok_or(RepositoryError::NotFound)
}

fn queued_tier(snapshot: &WorldSnapshot, id: &RequestId) -> Result<TierLevel, RepositoryError> {
    snapshot
        .queue
        .iter()
        .find(|entry| &entry.request_id == id)
        .map(|entry| entry.tier)
        .ok_or(RepositoryError::NotFound)
}

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::{QueueParameters, QuotaParameters};

use super::capacity::{CapacityEngine, ConfigurationError};
use super::decision::covers_partial;
use super::dominance::DominanceAlertEngine;
use super::domain::{
    AlertLevel, DecisionLog, DecisionRule, DecisionType, NationalityCode, QueueEntry,
    QuotaRequest, RequestId, RuleStep, TierLevel, TierStatus,
};
use super::repository::RepositoryError;
use super::snapshot::WorldSnapshot;

/// Errors raised by waiting-list operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue for {nationality} tier {} is full ({max} entries)", .tier.number())]
    CapacityExceeded {
        nationality: NationalityCode,
        tier: TierLevel,
        max: usize,
    },
    #[error("request {0} is not on the waiting list")]
    NotFound(RequestId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Plans waiting-list changes against a snapshot. Persistence is left to the caller.
#[derive(Debug, Clone)]
pub struct QueueProcessor {
    parameters: QueueParameters,
    capacity: CapacityEngine,
    dominance: DominanceAlertEngine,
}

/// Terminal outcome assigned to a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "approved", rename_all = "snake_case")]
pub enum QueueResolution {
    Approved(u32),
    Partial(u32),
    Blocked,
    Expired,
    Withdrawn,
}

impl QueueResolution {
    pub fn approved(self) -> u32 {
        match self {
            QueueResolution::Approved(count) | QueueResolution::Partial(count) => count,
            QueueResolution::Blocked | QueueResolution::Expired | QueueResolution::Withdrawn => 0,
        }
    }

    pub fn decision(self) -> DecisionType {
        match self {
            QueueResolution::Approved(_) => DecisionType::Approved,
            QueueResolution::Partial(_) => DecisionType::Partial,
            QueueResolution::Blocked => DecisionType::Blocked,
            QueueResolution::Expired => DecisionType::Expired,
            QueueResolution::Withdrawn => DecisionType::Withdrawn,
        }
    }

    fn rule(self) -> DecisionRule {
        match self {
            QueueResolution::Approved(_) => DecisionRule::QueueApproved,
            QueueResolution::Partial(_) => DecisionRule::QueuePartial,
            QueueResolution::Blocked => DecisionRule::QueueBlocked,
            QueueResolution::Expired => DecisionRule::QueueExpired,
            QueueResolution::Withdrawn => DecisionRule::QueueWithdrawn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueOutcome {
    pub request_id: RequestId,
    pub resolution: QueueResolution,
    pub priority_score: i32,
    pub dominance_level: AlertLevel,
    pub dominance_share: f64,
    pub reason: String,
}

impl QueueOutcome {
    /// Apply this outcome to the stored request.
    pub fn resolve(&self, request: &QuotaRequest, now: DateTime<Utc>) -> QuotaRequest {
        QuotaRequest {
            approved_count: self.resolution.approved(),
            status: self.resolution.decision().status(),
            decided_at: Some(now),
            decision_reason: Some(self.reason.clone()),
            ..request.clone()
        }
    }

    pub fn to_log(
        &self,
        context: &TierContext,
        parameter_version: &str,
        decided_at: DateTime<Utc>,
    ) -> DecisionLog {
        DecisionLog {
            request_id: self.request_id.clone(),
            decision: self.resolution.decision(),
            approved_count: self.resolution.approved(),
            tier_level: context.tier,
            tier_status: context.status,
            tier_capacity: context.capacity,
            headroom: context.headroom,
            dominance_share: self.dominance_share,
            dominance_level: self.dominance_level,
            priority_score: self.priority_score,
            rule_chain: vec![RuleStep::new(self.resolution.rule(), self.reason.clone())],
            reason: self.reason.clone(),
            parameter_version: parameter_version.to_string(),
            decided_at,
        }
    }
}

/// Tier state that a drain or revalidation observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierContext {
    pub tier: TierLevel,
    pub status: TierStatus,
    pub capacity: u32,
    pub headroom: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainPlan {
    pub nationality: NationalityCode,
    pub context: TierContext,
    pub outcomes: Vec<QueueOutcome>,
    pub capacity_used: u32,
}

impl DrainPlan {
    pub fn capacity_remaining(&self) -> u32 {
        self.context.capacity.saturating_sub(self.capacity_used)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RevalidationStep {
    Resolve(QueueOutcome),
    Retain(RequestId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntryView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub days_queued: i64,
    pub days_until_expiry: i64,
    pub needs_confirmation: bool,
    pub is_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierQueueStatus {
    pub tier: TierLevel,
    pub tier_name: &'static str,
    pub queued_requests: usize,
    pub queued_workers: u32,
    pub entries: Vec<QueueEntryView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub nationality: NationalityCode,
    pub total_requests: usize,
    pub total_workers: u32,
    pub tiers: Vec<TierQueueStatus>,
}

/// Processing order: priority descending, then older entries first.
pub fn drain_order(left: &QueueEntry, right: &QueueEntry) -> Ordering {
    right
        .processing_priority
        .total_cmp(&left.processing_priority)
        .then_with(|| left.queued_at.cmp(&right.queued_at))
        .then_with(|| left.request_id.cmp(&right.request_id))
}

impl QueueProcessor {
    pub fn new(parameters: &QuotaParameters) -> Self {
        Self {
            parameters: parameters.queue.clone(),
            capacity: CapacityEngine::new(parameters.capacity.clone()),
            dominance: DominanceAlertEngine::new(parameters.dominance.clone()),
        }
    }

    pub fn parameters(&self) -> &QueueParameters {
        &self.parameters
    }

    /// Build the entry for a freshly queued request.
    pub fn add_to_queue(
        &self,
        snapshot: &WorldSnapshot,
        request: &QuotaRequest,
        tier: TierLevel,
    ) -> Result<QueueEntry, QueueError> {
        let queued = snapshot.queue_for_tier(tier).count();
        if queued >= self.parameters.max_queue_per_tier {
            return Err(QueueError::CapacityExceeded {
                nationality: request.nationality.clone(),
                tier,
                max: self.parameters.max_queue_per_tier,
            });
        }

        let position = queued as u32 + 1;
        Ok(QueueEntry {
            request_id: request.id.clone(),
            nationality: request.nationality.clone(),
            tier,
            position,
            priority_score: request.priority_score,
            processing_priority: f64::from(request.priority_score) + 1.0 / f64::from(position),
            requested_count: request.requested_count,
            queued_at: snapshot.now,
            expiry_at: snapshot.now + Duration::days(self.parameters.expiry_days),
            confirmed_at: None,
            last_revalidated_at: None,
        })
    }

    pub fn ordered_entries<'a>(
        &self,
        snapshot: &'a WorldSnapshot,
        tier: TierLevel,
    ) -> Vec<&'a QueueEntry> {
        let mut entries: Vec<&QueueEntry> = snapshot.queue_for_tier(tier).collect();
        entries.sort_by(|left, right| drain_order(left, right));
        entries
    }

    pub fn tier_context(
        &self,
        snapshot: &WorldSnapshot,
        tier: TierLevel,
    ) -> Result<TierContext, ConfigurationError> {
        let table = self
            .capacity
            .calculate_tier_status(snapshot, &snapshot.nationality)?;
        Ok(TierContext {
            tier,
            status: table.status_of(tier),
            capacity: table.capacity_of(tier),
            headroom: table.headroom,
        })
    }

    /// Walk the queue head to tail against the tier's current capacity.
    ///
    /// Stops at the first entry that cannot be fully served; a partial fill also stops the
    /// walk. Expired entries are left for revalidation.
    pub fn plan_drain(
        &self,
        snapshot: &WorldSnapshot,
        tier: TierLevel,
    ) -> Result<DrainPlan, ConfigurationError> {
        let context = self.tier_context(snapshot, tier)?;
        let mut plan = DrainPlan {
            nationality: snapshot.nationality.clone(),
            context,
            outcomes: Vec::new(),
            capacity_used: 0,
        };
        if context.status == TierStatus::Closed || context.capacity == 0 {
            return Ok(plan);
        }

        let requests = &snapshot.requests;
        for entry in self.ordered_entries(snapshot, tier) {
            if entry.is_expired(snapshot.now) {
                continue;
            }
            let Some(request) = requests.iter().find(|request| request.id == entry.request_id)
            else {
                continue;
            };

            let dominance =
                self.dominance
                    .check_dominance(snapshot, &request.nationality, &request.profession);
            let outcome = |resolution, reason: String| QueueOutcome {
                request_id: entry.request_id.clone(),
                resolution,
                priority_score: entry.priority_score,
                dominance_level: dominance.level,
                dominance_share: dominance.share,
                reason,
            };

            if dominance.is_blocking {
                plan.outcomes.push(outcome(
                    QueueResolution::Blocked,
                    format!(
                        "BLOCKED: dominance became CRITICAL ({:.1}%) while queued.",
                        dominance.share * 100.0
                    ),
                ));
                continue;
            }

            let remaining = plan.capacity_remaining();
            let requested = entry.requested_count;
            if requested <= remaining {
                plan.outcomes.push(outcome(
                    QueueResolution::Approved(requested),
                    format!("Auto-approved from queue: {requested} workers"),
                ));
                plan.capacity_used += requested;
            } else if remaining > 0
                && covers_partial(remaining, requested, self.parameters.partial_fill_ratio)
            {
                plan.outcomes.push(outcome(
                    QueueResolution::Partial(remaining),
                    format!("Auto-approved from queue (partial): {remaining} of {requested}"),
                ));
                plan.capacity_used += remaining;
                break;
            } else {
                break;
            }
        }
        Ok(plan)
    }

    /// Expire stale entries and block entries whose dominance turned critical.
    pub fn plan_revalidation(&self, snapshot: &WorldSnapshot) -> Vec<RevalidationStep> {
        let mut entries: Vec<&QueueEntry> = snapshot
            .queue
            .iter()
            .filter(|entry| entry.nationality == snapshot.nationality)
            .collect();
        entries.sort_by(|left, right| {
            left.tier
                .cmp(&right.tier)
                .then_with(|| drain_order(left, right))
        });

        entries
            .into_iter()
            .map(|entry| {
                if entry.is_expired(snapshot.now) {
                    return RevalidationStep::Resolve(QueueOutcome {
                        request_id: entry.request_id.clone(),
                        resolution: QueueResolution::Expired,
                        priority_score: entry.priority_score,
                        dominance_level: AlertLevel::Ok,
                        dominance_share: 0.0,
                        reason: format!(
                            "EXPIRED: queued since {} without capacity",
                            entry.queued_at.date_naive()
                        ),
                    });
                }

                let profession = snapshot
                    .requests
                    .iter()
                    .find(|request| request.id == entry.request_id)
                    .map(|request| &request.profession);
                let Some(profession) = profession else {
                    return RevalidationStep::Retain(entry.request_id.clone());
                };
                let dominance =
                    self.dominance
                        .check_dominance(snapshot, &entry.nationality, profession);
                if dominance.is_blocking {
                    RevalidationStep::Resolve(QueueOutcome {
                        request_id: entry.request_id.clone(),
                        resolution: QueueResolution::Blocked,
                        priority_score: entry.priority_score,
                        dominance_level: dominance.level,
                        dominance_share: dominance.share,
                        reason: format!(
                            "BLOCKED: dominance became CRITICAL ({:.1}%) while queued.",
                            dominance.share * 100.0
                        ),
                    })
                } else {
                    RevalidationStep::Retain(entry.request_id.clone())
                }
            })
            .collect()
    }

    pub fn entry_view(&self, entry: &QueueEntry, now: DateTime<Utc>) -> QueueEntryView {
        QueueEntryView {
            days_queued: entry.days_queued(now),
            days_until_expiry: entry.days_until_expiry(now),
            needs_confirmation: entry.needs_confirmation(
                now,
                self.parameters.confirm_days,
                self.parameters.confirm_notice_days,
            ),
            is_confirmed: entry.is_confirmed(),
            entry: entry.clone(),
        }
    }

    pub fn queue_status(&self, snapshot: &WorldSnapshot) -> QueueStatus {
        let tiers: Vec<TierQueueStatus> = TierLevel::ALL
            .iter()
            .map(|&tier| {
                let entries: Vec<QueueEntryView> = self
                    .ordered_entries(snapshot, tier)
                    .into_iter()
                    .map(|entry| self.entry_view(entry, snapshot.now))
                    .collect();
                TierQueueStatus {
                    tier,
                    tier_name: tier.name(),
                    queued_requests: entries.len(),
                    queued_workers: entries.iter().map(|view| view.entry.requested_count).sum(),
                    entries,
                }
            })
            .collect();

        QueueStatus {
            nationality: snapshot.nationality.clone(),
            total_requests: tiers.iter().map(|tier| tier.queued_requests).sum(),
            total_workers: tiers.iter().map(|tier| tier.queued_workers).sum(),
            tiers,
        }
    }
}

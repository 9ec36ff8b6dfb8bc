use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::domain::{
    DecisionLog, DominanceAlert, NationalityCode, ProfessionId, QueueEntry, QuotaRequest,
    RequestId, RequestStatus, TierAssignment,
};
use super::repository::{RepositoryError, UnitOfWork};

/// In-memory quota state that upholds the persistence invariants.
///
/// Storage adapters wrap a ledger behind their own lock. A unit of work is staged against copies
/// of the requests and the waiting list; decision logs are appended only once the stage holds.
#[derive(Debug, Clone, Default)]
pub struct QuotaLedger {
    requests: BTreeMap<RequestId, QuotaRequest>,
    queue: BTreeMap<RequestId, QueueEntry>,
    logs: Vec<DecisionLog>,
    tiers: Vec<TierAssignment>,
    alerts: Vec<DominanceAlert>,
}

impl QuotaLedger {
    pub fn request(&self, id: &RequestId) -> Option<&QuotaRequest> {
        self.requests.get(id)
    }

    pub fn requests_for(&self, nationality: &NationalityCode) -> Vec<QuotaRequest> {
        self.requests
            .values()
            .filter(|request| &request.nationality == nationality)
            .cloned()
            .collect()
    }

    pub fn queue_entry(&self, id: &RequestId) -> Option<&QueueEntry> {
        self.queue.get(id)
    }

    pub fn queue_for(&self, nationality: &NationalityCode) -> Vec<QueueEntry> {
        self.queue
            .values()
            .filter(|entry| &entry.nationality == nationality)
            .cloned()
            .collect()
    }

    pub fn logs_for(&self, id: &RequestId) -> Vec<DecisionLog> {
        self.logs
            .iter()
            .filter(|log| &log.request_id == id)
            .cloned()
            .collect()
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    pub fn current_tiers(&self, nationality: &NationalityCode) -> Vec<TierAssignment> {
        self.tiers
            .iter()
            .filter(|row| row.is_current() && &row.nationality == nationality)
            .cloned()
            .collect()
    }

    pub fn tier_history(
        &self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
    ) -> Vec<TierAssignment> {
        self.tiers
            .iter()
            .filter(|row| &row.nationality == nationality && &row.profession == profession)
            .cloned()
            .collect()
    }

    pub fn active_alerts(&self, nationality: &NationalityCode) -> Vec<DominanceAlert> {
        self.alerts
            .iter()
            .filter(|alert| alert.is_active() && &alert.nationality == nationality)
            .cloned()
            .collect()
    }

    pub fn apply(&mut self, work: UnitOfWork) -> Result<(), RepositoryError> {
        let mut staged = Staged {
            requests: self.requests.clone(),
            queue: self.queue.clone(),
        };
        let logs = staged.apply(work)?;
        staged.check_queue_matches_requests()?;

        self.requests = staged.requests;
        self.queue = staged.queue;
        self.logs.extend(logs);
        Ok(())
    }

    pub fn replace_tier_generation(
        &mut self,
        assignments: Vec<TierAssignment>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut pairs = BTreeSet::new();
        for row in &assignments {
            if !row.is_current() {
                return Err(RepositoryError::Conflict(format!(
                    "new tier row for {}/{} is already closed",
                    row.nationality, row.profession
                )));
            }
            if !pairs.insert((row.nationality.clone(), row.profession.clone())) {
                return Err(RepositoryError::Conflict(format!(
                    "duplicate tier row for {}/{}",
                    row.nationality, row.profession
                )));
            }
        }

        for row in self.tiers.iter_mut().filter(|row| row.is_current()) {
            if pairs.contains(&(row.nationality.clone(), row.profession.clone())) {
                row.valid_to = Some(now);
            }
        }
        self.tiers.extend(assignments);
        Ok(())
    }

    pub fn upsert_alert(&mut self, alert: DominanceAlert) {
        let active = self.alerts.iter_mut().find(|existing| {
            existing.is_active()
                && existing.nationality == alert.nationality
                && existing.profession == alert.profession
        });
        match active {
            Some(existing) => {
                let detected_at = existing.detected_at;
                *existing = DominanceAlert {
                    detected_at,
                    resolved_at: None,
                    ..alert
                };
            }
            None => self.alerts.push(DominanceAlert {
                resolved_at: None,
                ..alert
            }),
        }
    }

    pub fn resolve_alert(
        &mut self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
        now: DateTime<Utc>,
    ) -> bool {
        let mut resolved = false;
        for alert in self.alerts.iter_mut().filter(|alert| {
            alert.is_active() && &alert.nationality == nationality && &alert.profession == profession
        }) {
            alert.resolved_at = Some(now);
            resolved = true;
        }
        resolved
    }
}

/// Requests and waiting list under construction for one unit of work.
struct Staged {
    requests: BTreeMap<RequestId, QuotaRequest>,
    queue: BTreeMap<RequestId, QueueEntry>,
}

impl Staged {
    fn apply(&mut self, work: UnitOfWork) -> Result<Vec<DecisionLog>, RepositoryError> {
        for (id, status) in &work.expected {
            let actual = self.requests.get(id).map(|request| request.status);
            if actual != Some(*status) {
                return Err(RepositoryError::Conflict(format!(
                    "request {id} is no longer {}",
                    status.label()
                )));
            }
        }

        for request in work.requests {
            if let Some(existing) = self.requests.get(&request.id) {
                if existing.status.is_terminal() {
                    return Err(RepositoryError::Conflict(format!(
                        "request {} is already {}",
                        request.id,
                        existing.status.label()
                    )));
                }
            }
            self.requests.insert(request.id.clone(), request);
        }

        for id in work.dequeue {
            if self.queue.remove(&id).is_none() {
                return Err(RepositoryError::Conflict(format!(
                    "request {id} has no queue entry"
                )));
            }
        }

        for entry in work.enqueue {
            if self.queue.contains_key(&entry.request_id) {
                return Err(RepositoryError::Conflict(format!(
                    "request {} is already queued",
                    entry.request_id
                )));
            }
            self.queue.insert(entry.request_id.clone(), entry);
        }

        for entry in work.touch {
            match self.queue.get_mut(&entry.request_id) {
                Some(slot) => *slot = entry,
                None => return Err(RepositoryError::NotFound),
            }
        }

        Ok(work.logs)
    }

    fn check_queue_matches_requests(&self) -> Result<(), RepositoryError> {
        for (id, request) in &self.requests {
            let queued = request.status == RequestStatus::Queued;
            if queued != self.queue.contains_key(id) {
                return Err(RepositoryError::Conflict(format!(
                    "request {id} status {} disagrees with the waiting list",
                    request.status.label()
                )));
            }
        }
        if let Some(orphan) = self
            .queue
            .keys()
            .find(|id| !self.requests.contains_key(*id))
        {
            return Err(RepositoryError::Conflict(format!(
                "queue entry {orphan} has no request"
            )));
        }
        Ok(())
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};

use super::domain::{
    Establishment, EstablishmentId, Nationality, NationalityCap, NationalityCode, Profession,
    ProfessionId, QueueEntry, QuotaRequest, TierAssignment, TierLevel, WorkerRecord, WorkerState,
};
use super::repository::{
    ClassificationStore, QuotaRepository, Registry, RepositoryError, WorkforceRoster,
};

/// Immutable point-in-time view that every engine reads.
///
/// Roster data covers all nationalities; requests, tiers and the waiting list are scoped to
/// the nationality the snapshot was captured for.
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    pub now: DateTime<Utc>,
    pub nationality: NationalityCode,
    pub nationalities: BTreeMap<NationalityCode, Nationality>,
    pub professions: BTreeMap<ProfessionId, Profession>,
    pub establishments: BTreeMap<EstablishmentId, Establishment>,
    pub caps: Vec<NationalityCap>,
    pub workers: Vec<WorkerRecord>,
    pub requests: Vec<QuotaRequest>,
    pub tiers: Vec<TierAssignment>,
    pub queue: Vec<QueueEntry>,
}

impl WorldSnapshot {
    pub fn capture<W, R, C>(
        now: DateTime<Utc>,
        nationality: &NationalityCode,
        roster: &W,
        repository: &R,
        classifications: &C,
    ) -> Result<Self, RepositoryError>
    where
        W: WorkforceRoster + ?Sized,
        R: QuotaRepository + ?Sized,
        C: ClassificationStore + ?Sized,
    {
        let registry = roster.registry()?;
        Ok(Self::from_parts(
            now,
            nationality.clone(),
            registry,
            roster.caps()?,
            roster.workers()?,
            repository.requests_for(nationality)?,
            classifications.current_tiers(nationality)?,
            repository.queue_entries(nationality)?,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        now: DateTime<Utc>,
        nationality: NationalityCode,
        registry: Registry,
        caps: Vec<NationalityCap>,
        workers: Vec<WorkerRecord>,
        requests: Vec<QuotaRequest>,
        tiers: Vec<TierAssignment>,
        queue: Vec<QueueEntry>,
    ) -> Self {
        Self {
            now,
            nationality,
            nationalities: registry
                .nationalities
                .into_iter()
                .map(|row| (row.code.clone(), row))
                .collect(),
            professions: registry
                .professions
                .into_iter()
                .map(|row| (row.id.clone(), row))
                .collect(),
            establishments: registry
                .establishments
                .into_iter()
                .map(|row| (row.id.clone(), row))
                .collect(),
            caps,
            workers,
            requests,
            tiers,
            queue,
        }
    }

    pub fn current_year(&self) -> i32 {
        self.now.year()
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.now.date_naive()
    }

    /// Count workers in `state`, optionally narrowed to a nationality and/or profession.
    pub fn count_workers(
        &self,
        nationality: Option<&NationalityCode>,
        profession: Option<&ProfessionId>,
        state: WorkerState,
    ) -> u32 {
        self.workers
            .iter()
            .filter(|worker| worker.state == state)
            .filter(|worker| nationality.map_or(true, |code| &worker.nationality == code))
            .filter(|worker| profession.map_or(true, |id| &worker.profession == id))
            .count() as u32
    }

    pub fn get_cap(&self, nationality: &NationalityCode, year: i32) -> Option<u32> {
        self.caps
            .iter()
            .find(|cap| &cap.nationality == nationality && cap.year == year)
            .map(|cap| cap.limit)
    }

    /// Workers requested by submissions that have not been decided yet.
    pub fn sum_pending_requests(&self, nationality: &NationalityCode) -> u32 {
        self.requests
            .iter()
            .filter(|request| &request.nationality == nationality && request.status.is_in_flight())
            .map(|request| request.requested_count)
            .sum()
    }

    /// Requested volume per profession for demand-bearing requests inside the window.
    pub fn historical_request_volumes(
        &self,
        nationality: &NationalityCode,
        window_days: i64,
    ) -> BTreeMap<ProfessionId, u32> {
        let since = self.now - Duration::days(window_days);
        let mut volumes = BTreeMap::new();
        for request in self.requests.iter().filter(|request| {
            &request.nationality == nationality
                && request.status.counts_as_demand()
                && request.submitted_at >= since
        }) {
            *volumes.entry(request.profession.clone()).or_insert(0) += request.requested_count;
        }
        volumes
    }

    pub fn current_tier(
        &self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
    ) -> Option<&TierAssignment> {
        self.tiers.iter().find(|row| {
            row.is_current() && &row.nationality == nationality && &row.profession == profession
        })
    }

    pub fn queue_for_tier(&self, tier: TierLevel) -> impl Iterator<Item = &QueueEntry> {
        self.queue
            .iter()
            .filter(move |entry| entry.nationality == self.nationality && entry.tier == tier)
    }
}

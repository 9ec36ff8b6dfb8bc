use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::allocation::{
    allocation_router, ClassificationStore, Clock, DecisionLog, DominanceAlert, Establishment,
    EstablishmentId, Nationality, NationalityCap, NationalityCode, Profession, ProfessionId,
    QueueEntry, QuotaAllocationService, QuotaLedger, QuotaRepository, QuotaRequest, Registry,
    RepositoryError, RequestId, RequestStatus, RequestSubmission, TierAssignment, TierLevel,
    UnitOfWork, WorkerRecord, WorkerState, WorkforceRoster, WorldSnapshot,
};
use crate::config::QuotaParameters;

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn nat(code: &str) -> NationalityCode {
    NationalityCode::new(code)
}

pub(super) fn prof(id: &str) -> ProfessionId {
    ProfessionId(id.to_string())
}

pub(super) fn registry() -> Registry {
    let nationality = |code: &str, name: &str, restricted: bool| Nationality {
        code: nat(code),
        name: name.to_string(),
        restricted,
    };
    let profession = |id: &str, name: &str, high_demand: bool| Profession {
        id: prof(id),
        name: name.to_string(),
        high_demand,
    };
    let establishment = |id: &str, strategic_sector: bool, total_approved: u32, total_used: u32| {
        Establishment {
            id: EstablishmentId(id.to_string()),
            name: format!("{id} Contracting"),
            strategic_sector,
            total_approved,
            total_used,
        }
    };

    Registry {
        nationalities: vec![
            nationality("EGY", "Egyptian", true),
            nationality("IND", "Indian", true),
            nationality("NPL", "Nepali", true),
            nationality("PAK", "Pakistani", true),
            nationality("SAU", "Saudi", false),
        ],
        professions: vec![
            profession("MASON", "Mason", true),
            profession("ELEC", "Electrician", false),
            profession("COOK", "Cook", false),
        ],
        establishments: vec![
            // utilization 0.95, strategic: +30 +20
            establishment("EST-STRAT", true, 100, 95),
            // utilization 0.75: +10
            establishment("EST-MID", false, 200, 150),
            // utilization 0.20, small: -20 +10
            establishment("EST-SMALL", false, 20, 4),
        ],
    }
}

pub(super) fn cap(code: &str, limit: u32) -> NationalityCap {
    NationalityCap {
        nationality: nat(code),
        year: 2025,
        limit,
    }
}

/// Long-tenured workers; they count towards both current and historical share.
pub(super) fn workers(code: &str, profession: &str, count: usize, state: WorkerState) -> Vec<WorkerRecord> {
    let start = NaiveDate::from_ymd_opt(2019, 1, 1).expect("valid date");
    worker_batch(code, profession, count, state, start)
}

/// Workers hired last year; invisible to the historical share.
pub(super) fn recent_workers(code: &str, profession: &str, count: usize) -> Vec<WorkerRecord> {
    let start = NaiveDate::from_ymd_opt(2024, 9, 1).expect("valid date");
    worker_batch(code, profession, count, WorkerState::InCountry, start)
}

fn worker_batch(
    code: &str,
    profession: &str,
    count: usize,
    state: WorkerState,
    start: NaiveDate,
) -> Vec<WorkerRecord> {
    (0..count)
        .map(|index| WorkerRecord {
            worker_id: format!("{code}-{profession}-{start}-{index}"),
            nationality: nat(code),
            profession: prof(profession),
            state,
            employment_start: start,
            employment_end: None,
            departure: None,
        })
        .collect()
}

pub(super) fn history_request(
    id: &str,
    code: &str,
    profession: &str,
    status: RequestStatus,
    requested: u32,
    approved: u32,
    days_ago: i64,
) -> QuotaRequest {
    QuotaRequest {
        id: RequestId(id.to_string()),
        nationality: nat(code),
        profession: prof(profession),
        establishment: EstablishmentId("EST-MID".to_string()),
        requested_count: requested,
        approved_count: approved,
        status,
        priority_score: 10,
        tier_at_submission: None,
        submitted_at: now() - Duration::days(days_ago),
        decided_at: None,
        decision_reason: None,
    }
}

pub(super) fn tier_row(code: &str, profession: &str, tier: TierLevel, share: f64) -> TierAssignment {
    TierAssignment {
        nationality: nat(code),
        profession: prof(profession),
        tier,
        share,
        request_count: 0,
        valid_from: now() - Duration::days(30),
        valid_to: None,
    }
}

pub(super) fn queue_entry(id: &str, tier: TierLevel, priority: f64, queued_days_ago: i64, requested: u32) -> QueueEntry {
    let queued_at = now() - Duration::days(queued_days_ago);
    QueueEntry {
        request_id: RequestId(id.to_string()),
        nationality: nat("EGY"),
        tier,
        position: 1,
        priority_score: priority as i32,
        processing_priority: priority,
        requested_count: requested,
        queued_at,
        expiry_at: queued_at + Duration::days(90),
        confirmed_at: None,
        last_revalidated_at: None,
    }
}

pub(super) fn submission(code: &str, profession: &str, establishment: &str, count: u32) -> RequestSubmission {
    RequestSubmission {
        nationality: nat(code),
        profession: prof(profession),
        establishment: EstablishmentId(establishment.to_string()),
        requested_count: count,
    }
}

/// Builder for engine tests that read a snapshot directly.
#[derive(Default)]
pub(super) struct WorldBuilder {
    pub(super) caps: Vec<NationalityCap>,
    pub(super) workers: Vec<WorkerRecord>,
    pub(super) requests: Vec<QuotaRequest>,
    pub(super) tiers: Vec<TierAssignment>,
    pub(super) queue: Vec<QueueEntry>,
}

impl WorldBuilder {
    pub(super) fn cap(mut self, code: &str, limit: u32) -> Self {
        self.caps.push(cap(code, limit));
        self
    }

    pub(super) fn workers(mut self, batch: Vec<WorkerRecord>) -> Self {
        self.workers.extend(batch);
        self
    }

    pub(super) fn request(mut self, request: QuotaRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub(super) fn tier(mut self, row: TierAssignment) -> Self {
        self.tiers.push(row);
        self
    }

    pub(super) fn queued(mut self, entry: QueueEntry) -> Self {
        self.queue.push(entry);
        self
    }

    pub(super) fn snapshot(&self, code: &str) -> WorldSnapshot {
        WorldSnapshot::from_parts(
            now(),
            nat(code),
            registry(),
            self.caps.clone(),
            self.workers.clone(),
            self.requests.clone(),
            self.tiers.clone(),
            self.queue.clone(),
        )
    }
}

pub(super) struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(super) fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryStore {
    pub(super) ledger: Arc<Mutex<QuotaLedger>>,
}

impl MemoryStore {
    pub(super) fn seed(&self, requests: Vec<QuotaRequest>) {
        self.ledger
            .lock()
            .expect("ledger mutex poisoned")
            .apply(UnitOfWork {
                requests,
                ..UnitOfWork::default()
            })
            .expect("seed requests");
    }

    /// Insert a queued request together with its waiting-list entry.
    pub(super) fn seed_queued(&self, id: &str, profession: &str, requested: u32, days_ago: i64) {
        self.ledger
            .lock()
            .expect("ledger mutex poisoned")
            .apply(UnitOfWork {
                requests: vec![history_request(
                    id,
                    "EGY",
                    profession,
                    RequestStatus::Queued,
                    requested,
                    0,
                    days_ago,
                )],
                enqueue: vec![queue_entry(id, TierLevel::Secondary, 50.0, days_ago, requested)],
                ..UnitOfWork::default()
            })
            .expect("seed queued request");
    }

    pub(super) fn seed_tiers(&self, rows: Vec<TierAssignment>) {
        self.ledger
            .lock()
            .expect("ledger mutex poisoned")
            .replace_tier_generation(rows, now() - Duration::days(30))
            .expect("seed tiers");
    }

    pub(super) fn log_count(&self) -> usize {
        self.ledger.lock().expect("ledger mutex poisoned").log_count()
    }

    pub(super) fn queue_len(&self, code: &str) -> usize {
        self.ledger
            .lock()
            .expect("ledger mutex poisoned")
            .queue_for(&nat(code))
            .len()
    }
}

impl QuotaRepository for MemoryStore {
    fn fetch_request(&self, id: &RequestId) -> Result<Option<QuotaRequest>, RepositoryError> {
        let guard = self.ledger.lock().expect("ledger mutex poisoned");
        Ok(guard.request(id).cloned())
    }

    fn requests_for(&self, nationality: &NationalityCode) -> Result<Vec<QuotaRequest>, RepositoryError> {
        Ok(self.ledger.lock().expect("ledger mutex poisoned").requests_for(nationality))
    }

    fn queue_entries(&self, nationality: &NationalityCode) -> Result<Vec<QueueEntry>, RepositoryError> {
        Ok(self.ledger.lock().expect("ledger mutex poisoned").queue_for(nationality))
    }

    fn queue_entry(&self, id: &RequestId) -> Result<Option<QueueEntry>, RepositoryError> {
        let guard = self.ledger.lock().expect("ledger mutex poisoned");
        Ok(guard.queue_entry(id).cloned())
    }

    fn decision_logs(&self, id: &RequestId) -> Result<Vec<DecisionLog>, RepositoryError> {
        Ok(self.ledger.lock().expect("ledger mutex poisoned").logs_for(id))
    }

    fn commit(&self, work: UnitOfWork) -> Result<(), RepositoryError> {
        self.ledger.lock().expect("ledger mutex poisoned").apply(work)
    }
}

impl ClassificationStore for MemoryStore {
    fn current_tiers(&self, nationality: &NationalityCode) -> Result<Vec<TierAssignment>, RepositoryError> {
        Ok(self.ledger.lock().expect("ledger mutex poisoned").current_tiers(nationality))
    }

    fn replace_tier_generation(
        &self,
        assignments: Vec<TierAssignment>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.ledger
            .lock()
            .expect("ledger mutex poisoned")
            .replace_tier_generation(assignments, now)
    }

    fn active_alerts(&self, nationality: &NationalityCode) -> Result<Vec<DominanceAlert>, RepositoryError> {
        Ok(self.ledger.lock().expect("ledger mutex poisoned").active_alerts(nationality))
    }

    fn upsert_alert(&self, alert: DominanceAlert) -> Result<(), RepositoryError> {
        self.ledger.lock().expect("ledger mutex poisoned").upsert_alert(alert);
        Ok(())
    }

    fn resolve_alert(
        &self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .ledger
            .lock()
            .expect("ledger mutex poisoned")
            .resolve_alert(nationality, profession, now))
    }
}

/// Store whose commits fail whenever they touch one specific request.
pub(super) struct FlakyStore {
    pub(super) inner: MemoryStore,
    pub(super) poisoned: RequestId,
}

impl QuotaRepository for FlakyStore {
    fn fetch_request(&self, id: &RequestId) -> Result<Option<QuotaRequest>, RepositoryError> {
        self.inner.fetch_request(id)
    }

    fn requests_for(&self, nationality: &NationalityCode) -> Result<Vec<QuotaRequest>, RepositoryError> {
        self.inner.requests_for(nationality)
    }

    fn queue_entries(&self, nationality: &NationalityCode) -> Result<Vec<QueueEntry>, RepositoryError> {
        self.inner.queue_entries(nationality)
    }

    fn queue_entry(&self, id: &RequestId) -> Result<Option<QueueEntry>, RepositoryError> {
        self.inner.queue_entry(id)
    }

    fn decision_logs(&self, id: &RequestId) -> Result<Vec<DecisionLog>, RepositoryError> {
        self.inner.decision_logs(id)
    }

    fn commit(&self, work: UnitOfWork) -> Result<(), RepositoryError> {
        let touches_poisoned = work.requests.iter().any(|request| request.id == self.poisoned)
            || work.touch.iter().any(|entry| entry.request_id == self.poisoned);
        if touches_poisoned {
            return Err(RepositoryError::Unavailable("disk quota exceeded".to_string()));
        }
        self.inner.commit(work)
    }
}

pub(super) struct UnavailableRepository;

impl QuotaRepository for UnavailableRepository {
    fn fetch_request(&self, _id: &RequestId) -> Result<Option<QuotaRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn requests_for(&self, _nationality: &NationalityCode) -> Result<Vec<QuotaRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn queue_entries(&self, _nationality: &NationalityCode) -> Result<Vec<QueueEntry>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn queue_entry(&self, _id: &RequestId) -> Result<Option<QueueEntry>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn decision_logs(&self, _id: &RequestId) -> Result<Vec<DecisionLog>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn commit(&self, _work: UnitOfWork) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryRoster {
    pub(super) registry: Mutex<Registry>,
    pub(super) caps: Mutex<Vec<NationalityCap>>,
    pub(super) workers: Mutex<Vec<WorkerRecord>>,
}

impl MemoryRoster {
    pub(super) fn with(caps: Vec<NationalityCap>, workers: Vec<WorkerRecord>) -> Self {
        Self {
            registry: Mutex::new(registry()),
            caps: Mutex::new(caps),
            workers: Mutex::new(workers),
        }
    }

    pub(super) fn set_cap(&self, code: &str, limit: u32) {
        let mut caps = self.caps.lock().expect("roster mutex poisoned");
        caps.retain(|row| row.nationality != nat(code));
        caps.push(cap(code, limit));
    }

    pub(super) fn add_workers(&self, batch: Vec<WorkerRecord>) {
        self.workers
            .lock()
            .expect("roster mutex poisoned")
            .extend(batch);
    }
}

impl WorkforceRoster for MemoryRoster {
    fn registry(&self) -> Result<Registry, RepositoryError> {
        Ok(self.registry.lock().expect("roster mutex poisoned").clone())
    }

    fn caps(&self) -> Result<Vec<NationalityCap>, RepositoryError> {
        Ok(self.caps.lock().expect("roster mutex poisoned").clone())
    }

    fn workers(&self) -> Result<Vec<WorkerRecord>, RepositoryError> {
        Ok(self.workers.lock().expect("roster mutex poisoned").clone())
    }
}

pub(super) type MemoryService = QuotaAllocationService<MemoryStore, MemoryStore, MemoryRoster>;

pub(super) struct Fixture {
    pub(super) service: Arc<MemoryService>,
    pub(super) store: MemoryStore,
    pub(super) roster: Arc<MemoryRoster>,
    pub(super) clock: Arc<FixedClock>,
}

pub(super) fn fixture_with(roster: MemoryRoster, parameters: &QuotaParameters) -> Fixture {
    let store = MemoryStore::default();
    let roster = Arc::new(roster);
    let clock = Arc::new(FixedClock::at(now()));
    let service = Arc::new(QuotaAllocationService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        roster.clone(),
        clock.clone(),
        parameters,
    ));
    Fixture {
        service,
        store,
        roster,
        clock,
    }
}

pub(super) fn fixture(roster: MemoryRoster) -> Fixture {
    fixture_with(roster, &QuotaParameters::default())
}

/// EGY masons at 20% of a 300-strong profession, with `cap` as the EGY limit.
pub(super) fn mason_roster(cap_limit: u32) -> MemoryRoster {
    let mut workforce = workers("EGY", "MASON", 60, WorkerState::InCountry);
    workforce.extend(workers("IND", "MASON", 240, WorkerState::InCountry));
    MemoryRoster::with(vec![cap("EGY", cap_limit), cap("IND", 5000)], workforce)
}

/// Approved EGY history worth 100 workers a month.
pub(super) fn demand_history() -> Vec<QuotaRequest> {
    (0..12)
        .map(|month| {
            history_request(
                &format!("hist-{month:02}"),
                "EGY",
                "ELEC",
                RequestStatus::Approved,
                100,
                100,
                20 + month * 28,
            )
        })
        .collect()
}

/// Tier rows giving EGY a monthly demand of 60 in Tier 1 and 10 in Tier 2.
pub(super) fn demand_tiers() -> Vec<TierAssignment> {
    vec![
        tier_row("EGY", "ELEC", TierLevel::Primary, 0.6),
        tier_row("EGY", "MASON", TierLevel::Secondary, 0.1),
    ]
}

pub(super) fn seed_demand(store: &MemoryStore) {
    store.seed(demand_history());
    store.seed_tiers(demand_tiers());
}

pub(super) fn router(fixture: &Fixture) -> axum::Router {
    allocation_router(fixture.service.clone())
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

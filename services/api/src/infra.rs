use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use nationality_quota::allocation::{
    ClassificationStore, Clock, DecisionLog, DepartureKind, DominanceAlert, Establishment,
    EstablishmentId, Nationality, NationalityCap, NationalityCode, PlannedDeparture, Profession,
    ProfessionId, QueueEntry, QuotaAllocationService, QuotaLedger, QuotaRepository, QuotaRequest,
    Registry, RepositoryError, RequestId, RequestStatus, ServiceError, TierAssignment,
    UnitOfWork, WorkerRecord, WorkerState, WorkforceRoster,
};
use nationality_quota::config::QuotaParameters;
use nationality_quota::error::AppError;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type QuotaService =
    QuotaAllocationService<InMemoryQuotaStore, InMemoryQuotaStore, InMemoryRoster>;

/// Requests, waiting list, audit logs, tiers and alerts behind one ledger lock.
#[derive(Default, Clone)]
pub(crate) struct InMemoryQuotaStore {
    ledger: Arc<Mutex<QuotaLedger>>,
}

impl InMemoryQuotaStore {
    fn ledger(&self) -> Result<MutexGuard<'_, QuotaLedger>, RepositoryError> {
        self.ledger
            .lock()
            .map_err(|_| RepositoryError::Unavailable("ledger mutex poisoned".to_string()))
    }
}

impl QuotaRepository for InMemoryQuotaStore {
    fn fetch_request(&self, id: &RequestId) -> Result<Option<QuotaRequest>, RepositoryError> {
        Ok(self.ledger()?.request(id).cloned())
    }

    fn requests_for(
        &self,
        nationality: &NationalityCode,
    ) -> Result<Vec<QuotaRequest>, RepositoryError> {
        Ok(self.ledger()?.requests_for(nationality))
    }

    fn queue_entries(
        &self,
        nationality: &NationalityCode,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        Ok(self.ledger()?.queue_for(nationality))
    }

    fn queue_entry(&self, id: &RequestId) -> Result<Option<QueueEntry>, RepositoryError> {
        Ok(self.ledger()?.queue_entry(id).cloned())
    }

    fn decision_logs(&self, id: &RequestId) -> Result<Vec<DecisionLog>, RepositoryError> {
        Ok(self.ledger()?.logs_for(id))
    }

    fn commit(&self, work: UnitOfWork) -> Result<(), RepositoryError> {
        self.ledger()?.apply(work)
    }
}

impl ClassificationStore for InMemoryQuotaStore {
    fn current_tiers(
        &self,
        nationality: &NationalityCode,
    ) -> Result<Vec<TierAssignment>, RepositoryError> {
        Ok(self.ledger()?.current_tiers(nationality))
    }

    fn replace_tier_generation(
        &self,
        assignments: Vec<TierAssignment>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.ledger()?.replace_tier_generation(assignments, now)
    }

    fn active_alerts(
        &self,
        nationality: &NationalityCode,
    ) -> Result<Vec<DominanceAlert>, RepositoryError> {
        Ok(self.ledger()?.active_alerts(nationality))
    }

    fn upsert_alert(&self, alert: DominanceAlert) -> Result<(), RepositoryError> {
        self.ledger()?.upsert_alert(alert);
        Ok(())
    }

    fn resolve_alert(
        &self,
        nationality: &NationalityCode,
        profession: &ProfessionId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.ledger()?.resolve_alert(nationality, profession, now))
    }
}

/// Read-only roster loaded at startup. Caps can be raised to simulate a ministry update.
pub(crate) struct InMemoryRoster {
    registry: Registry,
    caps: Mutex<Vec<NationalityCap>>,
    workers: Vec<WorkerRecord>,
}

impl InMemoryRoster {
    fn caps_guard(&self) -> Result<MutexGuard<'_, Vec<NationalityCap>>, RepositoryError> {
        self.caps
            .lock()
            .map_err(|_| RepositoryError::Unavailable("caps mutex poisoned".to_string()))
    }

    /// Returns the new limit.
    pub(crate) fn raise_cap(
        &self,
        nationality: &NationalityCode,
        year: i32,
        by: u32,
    ) -> Result<u32, RepositoryError> {
        let mut caps = self.caps_guard()?;
        let cap = caps
            .iter_mut()
            .find(|cap| &cap.nationality == nationality && cap.year == year)
            .ok_or(RepositoryError::NotFound)?;
        cap.limit = cap.limit.saturating_add(by);
        Ok(cap.limit)
    }
}

impl WorkforceRoster for InMemoryRoster {
    fn registry(&self) -> Result<Registry, RepositoryError> {
        Ok(self.registry.clone())
    }

    fn caps(&self) -> Result<Vec<NationalityCap>, RepositoryError> {
        Ok(self.caps_guard()?.clone())
    }

    fn workers(&self) -> Result<Vec<WorkerRecord>, RepositoryError> {
        Ok(self.workers.clone())
    }
}

/// Roster plus request history used to start the service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SeedRoster {
    #[serde(flatten)]
    pub(crate) registry: Registry,
    pub(crate) caps: Vec<NationalityCap>,
    pub(crate) workers: Vec<WorkerRecord>,
    pub(crate) requests: Vec<QuotaRequest>,
}

pub(crate) struct SeededService {
    pub(crate) service: Arc<QuotaService>,
    pub(crate) roster: Arc<InMemoryRoster>,
    pub(crate) restricted: Vec<NationalityCode>,
}

impl SeedRoster {
    pub(crate) fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw).map_err(std::io::Error::from)?)
    }

    /// `--seed` file when given, otherwise the built-in demo roster.
    pub(crate) fn load(path: Option<&Path>, now: DateTime<Utc>) -> Result<Self, AppError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::demo(now)),
        }
    }

    pub(crate) fn restricted(&self) -> Vec<NationalityCode> {
        self.registry
            .nationalities
            .iter()
            .filter(|nationality| nationality.restricted)
            .map(|nationality| nationality.code.clone())
            .collect()
    }

    pub(crate) fn into_service(
        self,
        parameters: &QuotaParameters,
        clock: Arc<dyn Clock>,
    ) -> Result<SeededService, AppError> {
        let restricted = self.restricted();
        let store = InMemoryQuotaStore::default();
        store
            .ledger()
            .and_then(|mut ledger| {
                ledger.apply(UnitOfWork {
                    requests: self.requests,
                    ..UnitOfWork::default()
                })
            })
            .map_err(ServiceError::from)?;

        let roster = Arc::new(InMemoryRoster {
            registry: self.registry,
            caps: Mutex::new(self.caps),
            workers: self.workers,
        });
        let service = Arc::new(QuotaAllocationService::new(
            Arc::new(store.clone()),
            Arc::new(store),
            roster.clone(),
            clock,
            parameters,
        ));
        Ok(SeededService {
            service,
            roster,
            restricted,
        })
    }

    /// Deterministic roster relative to `now`: five restricted nationalities, a year of
    /// approved history for EGY and NPL, and NPL sitting exactly at its cap.
    pub(crate) fn demo(now: DateTime<Utc>) -> Self {
        let mut world = DemoWorld::new(now);

        world.crew("EGY", "MASON", 180);
        world.crew("EGY", "ELEC", 120);
        world.crew("EGY", "COOK", 40);
        world.expiring("EGY", "ELEC", 12, 60);
        world.leaving("EGY", "MASON", 6, 30);
        world.crew("IND", "MASON", 150);
        world.crew("IND", "ELEC", 200);
        world.crew("IND", "COOK", 150);
        world.crew("IND", "DRIVER", 220);
        world.crew("PAK", "MASON", 20);
        world.crew("PAK", "DRIVER", 40);
        world.crew("NPL", "COOK", 60);
        world.crew("NPL", "DRIVER", 90);
        world.crew("BGD", "WELDER", 30);
        world.crew("BGD", "DRIVER", 30);

        world.history(
            "EGY",
            &[("ELEC", 60), ("MASON", 25), ("COOK", 10), ("TAILOR", 3), ("WELDER", 2)],
        );
        world.history("NPL", &[("COOK", 35), ("DRIVER", 15)]);

        let caps = [("EGY", 400), ("IND", 300), ("PAK", 150), ("NPL", 0), ("BGD", 120)]
            .iter()
            .map(|(code, margin)| world.cap(code, *margin))
            .collect();

        Self {
            registry: demo_registry(),
            caps,
            workers: world.workers,
            requests: world.requests,
        }
    }
}

fn demo_registry() -> Registry {
    let nationality = |code: &str, name: &str, restricted: bool| Nationality {
        code: NationalityCode::new(code),
        name: name.to_string(),
        restricted,
    };
    let profession = |id: &str, name: &str, high_demand: bool| Profession {
        id: ProfessionId(id.to_string()),
        name: name.to_string(),
        high_demand,
    };
    let establishment = |id: &str, name: &str, strategic_sector: bool, approved: u32, used: u32| {
        Establishment {
            id: EstablishmentId(id.to_string()),
            name: name.to_string(),
            strategic_sector,
            total_approved: approved,
            total_used: used,
        }
    };

    Registry {
        nationalities: vec![
            nationality("EGY", "Egyptian", true),
            nationality("IND", "Indian", true),
            nationality("PAK", "Pakistani", true),
            nationality("NPL", "Nepali", true),
            nationality("BGD", "Bangladeshi", true),
            nationality("QAT", "Qatari", false),
        ],
        professions: vec![
            profession("MASON", "Mason", true),
            profession("ELEC", "Electrician", true),
            profession("COOK", "Cook", false),
            profession("DRIVER", "Driver", false),
            profession("WELDER", "Welder", false),
            profession("TAILOR", "Tailor", false),
        ],
        establishments: vec![
            establishment("EST-100", "Al Noor Contracting", true, 400, 372),
            establishment("EST-200", "Pearl Hospitality", false, 120, 60),
            establishment("EST-300", "Corniche Bakery", false, 24, 6),
        ],
    }
}

struct DemoWorld {
    now: DateTime<Utc>,
    hired_on: NaiveDate,
    workers: Vec<WorkerRecord>,
    requests: Vec<QuotaRequest>,
}

impl DemoWorld {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            hired_on: (now - Duration::days(4 * 365)).date_naive(),
            workers: Vec::new(),
            requests: Vec::new(),
        }
    }

    fn hire(&mut self, code: &str, profession: &str, count: usize) -> &mut [WorkerRecord] {
        let start = self.workers.len();
        for _ in 0..count {
            let worker_id = format!("{code}-{profession}-{:05}", self.workers.len());
            self.workers.push(WorkerRecord {
                worker_id,
                nationality: NationalityCode::new(code),
                profession: ProfessionId(profession.to_string()),
                state: WorkerState::InCountry,
                employment_start: self.hired_on,
                employment_end: None,
                departure: None,
            });
        }
        &mut self.workers[start..]
    }

    fn crew(&mut self, code: &str, profession: &str, count: usize) {
        self.hire(code, profession, count);
    }

    fn expiring(&mut self, code: &str, profession: &str, count: usize, in_days: i64) {
        let end = (self.now + Duration::days(in_days)).date_naive();
        for worker in self.hire(code, profession, count) {
            worker.employment_end = Some(end);
        }
    }

    fn leaving(&mut self, code: &str, profession: &str, count: usize, in_days: i64) {
        let on = (self.now + Duration::days(in_days)).date_naive();
        for worker in self.hire(code, profession, count) {
            worker.departure = Some(PlannedDeparture {
                kind: DepartureKind::FinalExit,
                on,
            });
        }
    }

    /// Twelve months of approved requests at the given monthly volumes.
    fn history(&mut self, code: &str, monthly: &[(&str, u32)]) {
        for month in 0..12i64 {
            let submitted_at = self.now - Duration::days(15 + 30 * month);
            for (profession, count) in monthly {
                let id = RequestId(format!("seed-{code}-{:04}", self.requests.len()));
                self.requests.push(QuotaRequest {
                    id,
                    nationality: NationalityCode::new(code),
                    profession: ProfessionId(profession.to_string()),
                    establishment: EstablishmentId("EST-100".to_string()),
                    requested_count: *count,
                    approved_count: *count,
                    status: RequestStatus::Approved,
                    priority_score: 0,
                    tier_at_submission: None,
                    submitted_at,
                    decided_at: Some(submitted_at),
                    decision_reason: Some("seeded history".to_string()),
                });
            }
        }
    }

    fn cap(&self, code: &str, margin: u32) -> NationalityCap {
        let nationality = NationalityCode::new(code);
        let stock = self
            .workers
            .iter()
            .filter(|worker| worker.nationality == nationality)
            .count() as u32;
        NationalityCap {
            nationality,
            year: self.now.year(),
            limit: stock + margin,
        }
    }
}

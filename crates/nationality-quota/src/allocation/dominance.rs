use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::DominanceParameters;

use super::domain::{AlertLevel, DominanceAlert, NationalityCode, ProfessionId, WorkerState};
use super::snapshot::WorldSnapshot;

const MAX_ALTERNATIVES: usize = 3;

/// Detects nationality concentration within a profession.
#[derive(Debug, Clone)]
pub struct DominanceAlertEngine {
    parameters: DominanceParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominanceCheckResult {
    pub nationality: NationalityCode,
    pub profession: ProfessionId,
    pub profession_name: String,
    pub total_in_profession: u32,
    pub nationality_count: u32,
    pub share: f64,
    pub historical_share: f64,
    /// Share change against the start-date cutoff; a heuristic, not a true time series.
    pub velocity: f64,
    pub trend: Trend,
    pub level: AlertLevel,
    pub is_blocking: bool,
    pub requires_review: bool,
    pub message: String,
}

impl DominanceCheckResult {
    pub fn is_partial_only(&self) -> bool {
        self.level == AlertLevel::High
    }

    pub fn to_alert(&self, detected_at: DateTime<Utc>) -> DominanceAlert {
        DominanceAlert {
            nationality: self.nationality.clone(),
            profession: self.profession.clone(),
            share: self.share,
            velocity: self.velocity,
            level: self.level,
            total_in_profession: self.total_in_profession,
            nationality_count: self.nationality_count,
            detected_at,
            resolved_at: None,
        }
    }
}

impl DominanceAlertEngine {
    pub fn new(parameters: DominanceParameters) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &DominanceParameters {
        &self.parameters
    }

    pub fn check_dominance(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
        profession: &ProfessionId,
    ) -> DominanceCheckResult {
        let profession_name = snapshot
            .professions
            .get(profession)
            .map_or_else(|| profession.0.clone(), |row| row.name.clone());
        let total = snapshot.count_workers(None, Some(profession), WorkerState::InCountry);
        let count = snapshot.count_workers(Some(nationality), Some(profession), WorkerState::InCountry);

        if total < self.parameters.min_profession_size {
            let share = if total == 0 {
                0.0
            } else {
                f64::from(count) / f64::from(total)
            };
            return DominanceCheckResult {
                nationality: nationality.clone(),
                profession: profession.clone(),
                message: format!("Profession too small ({total}) for dominance rules"),
                profession_name,
                total_in_profession: total,
                nationality_count: count,
                share,
                historical_share: share,
                velocity: 0.0,
                trend: Trend::Stable,
                level: AlertLevel::Ok,
                is_blocking: false,
                requires_review: false,
            };
        }

        let share = f64::from(count) / f64::from(total);
        let historical_share = self.historical_share(snapshot, nationality, profession, share);
        let velocity = share - historical_share;
        let level = self.alert_level(share, velocity);
        let message = self.message(level, nationality, &profession_name, share, velocity);

        DominanceCheckResult {
            nationality: nationality.clone(),
            profession: profession.clone(),
            profession_name,
            total_in_profession: total,
            nationality_count: count,
            share,
            historical_share,
            velocity,
            trend: self.trend(velocity),
            level,
            is_blocking: level == AlertLevel::Critical,
            requires_review: level == AlertLevel::Watch,
            message,
        }
    }

    /// First match wins; lower bounds are inclusive.
    pub fn alert_level(&self, share: f64, velocity: f64) -> AlertLevel {
        let parameters = &self.parameters;
        if share >= parameters.critical_share {
            AlertLevel::Critical
        } else if share >= parameters.high_share {
            if velocity >= parameters.critical_velocity {
                AlertLevel::Critical
            } else {
                AlertLevel::High
            }
        } else if share >= parameters.watch_share {
            if velocity >= parameters.high_velocity {
                AlertLevel::High
            } else {
                AlertLevel::Watch
            }
        } else {
            AlertLevel::Ok
        }
    }

    pub fn trend(&self, velocity: f64) -> Trend {
        if velocity > self.parameters.trend_band {
            Trend::Increasing
        } else if velocity < -self.parameters.trend_band {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    fn historical_share(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
        profession: &ProfessionId,
        current_share: f64,
    ) -> f64 {
        let cutoff = snapshot.today()
            - Duration::days(365 * i64::from(self.parameters.velocity_years));
        let (total, count) = snapshot
            .workers
            .iter()
            .filter(|worker| {
                worker.state == WorkerState::InCountry
                    && &worker.profession == profession
                    && worker.employment_start <= cutoff
            })
            .fold((0u32, 0u32), |(total, count), worker| {
                let matches = u32::from(&worker.nationality == nationality);
                (total + 1, count + matches)
            });
        if total == 0 {
            current_share
        } else {
            f64::from(count) / f64::from(total)
        }
    }

    fn message(
        &self,
        level: AlertLevel,
        nationality: &NationalityCode,
        profession_name: &str,
        share: f64,
        velocity: f64,
    ) -> String {
        let parameters = &self.parameters;
        let share_pct = share * 100.0;
        let velocity_pct = velocity * 100.0;
        let years = parameters.velocity_years;
        match level {
            AlertLevel::Critical => format!(
                "CRITICAL: {nationality} share in {profession_name} is {share_pct:.1}% (>={:.0}%). Velocity: {velocity_pct:+.1}%/{years}yr. New approvals blocked.",
                parameters.critical_share * 100.0
            ),
            AlertLevel::High => format!(
                "HIGH: {nationality} share in {profession_name} is {share_pct:.1}% ({:.0}%-{:.0}%). Velocity: {velocity_pct:+.1}%/{years}yr. Partial approvals only.",
                parameters.high_share * 100.0,
                parameters.critical_share * 100.0
            ),
            AlertLevel::Watch => format!(
                "WATCH: {nationality} share in {profession_name} is {share_pct:.1}% ({:.0}%-{:.0}%). Velocity: {velocity_pct:+.1}%/{years}yr. Flagged for review.",
                parameters.watch_share * 100.0,
                parameters.high_share * 100.0
            ),
            AlertLevel::Ok => format!(
                "OK: {nationality} share in {profession_name} is {share_pct:.1}% (<{:.0}%). Normal processing.",
                parameters.watch_share * 100.0
            ),
        }
    }

    /// Non-OK results across every known profession, most severe and largest share first.
    pub fn alerts_for_nationality(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
    ) -> Vec<DominanceCheckResult> {
        let mut results: Vec<DominanceCheckResult> = snapshot
            .professions
            .keys()
            .map(|profession| self.check_dominance(snapshot, nationality, profession))
            .filter(|result| result.level != AlertLevel::Ok)
            .collect();
        results.sort_by(|left, right| {
            right
                .level
                .cmp(&left.level)
                .then_with(|| right.share.total_cmp(&left.share))
        });
        results
    }

    /// Other restricted nationalities still below HIGH in the profession, least represented
    /// first. Never empty.
    pub fn alternatives(
        &self,
        snapshot: &WorldSnapshot,
        blocked: &NationalityCode,
        profession: &ProfessionId,
    ) -> Vec<String> {
        let mut candidates: Vec<(String, DominanceCheckResult)> = snapshot
            .nationalities
            .values()
            .filter(|row| row.restricted && &row.code != blocked)
            .map(|row| {
                (
                    row.name.clone(),
                    self.check_dominance(snapshot, &row.code, profession),
                )
            })
            .filter(|(_, result)| result.level < AlertLevel::High)
            .collect();
        candidates.sort_by(|left, right| {
            left.1
                .share
                .total_cmp(&right.1.share)
                .then_with(|| left.1.nationality.cmp(&right.1.nationality))
        });

        let mut alternatives: Vec<String> = candidates
            .into_iter()
            .take(MAX_ALTERNATIVES)
            .map(|(name, result)| {
                format!(
                    "Consider {name} ({}) workers: {:.1}% of {}",
                    result.nationality,
                    result.share * 100.0,
                    result.profession_name
                )
            })
            .collect();

        if alternatives.is_empty() {
            let profession_name = snapshot
                .professions
                .get(profession)
                .map_or_else(|| profession.0.clone(), |row| row.name.clone());
            alternatives.push(format!(
                "Diversify hiring for {profession_name} toward nationalities below the dominance watch level"
            ));
        }
        alternatives
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::CapacityParameters;

use super::domain::{NationalityCode, RequestStatus, TierLevel, TierStatus, WorkerState};
use super::snapshot::WorldSnapshot;

/// Raised when the capacity inputs are incomplete; never replaced by a default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no cap configured for {nationality} in {year}")]
    MissingCap {
        nationality: NationalityCode,
        year: i32,
    },
}

/// Computes headroom under a nationality cap and cascades it across tiers.
#[derive(Debug, Clone)]
pub struct CapacityEngine {
    parameters: CapacityParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadroomResult {
    pub nationality: NationalityCode,
    pub year: i32,
    pub cap: u32,
    pub stock: u32,
    pub committed: u32,
    pub pending: u32,
    pub pending_weighted: u32,
    /// `cap - stock - committed`; negative when the cap is already overrun.
    pub raw_headroom: i64,
    pub outflow_included: bool,
    pub projected_outflow: u32,
    pub effective_headroom: u32,
    pub utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutflowProjection {
    pub nationality: NationalityCode,
    pub horizon_days: i64,
    pub final_exits: u32,
    pub expiring_contracts: u32,
    pub non_renewal_ratio: f64,
    pub expected_non_renewals: u32,
    pub raw_outflow: u32,
    pub adjusted_outflow: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierCapacity {
    pub tier: TierLevel,
    pub status: TierStatus,
    pub demand: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatusResult {
    pub nationality: NationalityCode,
    pub headroom: u32,
    pub tiers: Vec<TierCapacity>,
    pub calculated_at: DateTime<Utc>,
}

impl TierStatusResult {
    pub fn get(&self, tier: TierLevel) -> Option<&TierCapacity> {
        self.tiers.iter().find(|row| row.tier == tier)
    }

    pub fn status_of(&self, tier: TierLevel) -> TierStatus {
        self.get(tier).map_or(TierStatus::Closed, |row| row.status)
    }

    pub fn capacity_of(&self, tier: TierLevel) -> u32 {
        self.get(tier).map_or(0, |row| row.capacity)
    }

    pub fn allocated(&self) -> u32 {
        self.tiers.iter().map(|row| row.capacity).sum()
    }
}

/// Headroom plus tier table, as read by dashboards and audits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacitySnapshot {
    pub headroom: HeadroomResult,
    pub outflow: OutflowProjection,
    pub tier_status: TierStatusResult,
}

impl CapacityEngine {
    pub fn new(parameters: CapacityParameters) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &CapacityParameters {
        &self.parameters
    }

    pub fn calculate_effective_headroom(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
        include_outflow: bool,
    ) -> Result<HeadroomResult, ConfigurationError> {
        let year = snapshot.current_year();
        let cap = snapshot
            .get_cap(nationality, year)
            .ok_or_else(|| ConfigurationError::MissingCap {
                nationality: nationality.clone(),
                year,
            })?;

        let stock = snapshot.count_workers(Some(nationality), None, WorkerState::InCountry);
        let committed = snapshot.count_workers(Some(nationality), None, WorkerState::Committed);
        let pending = snapshot.sum_pending_requests(nationality);
        let pending_weighted = round_scaled(pending, self.parameters.pending_approval_rate);

        let raw_headroom = i64::from(cap) - i64::from(stock) - i64::from(committed);
        let projected_outflow = if include_outflow {
            self.project_outflow(snapshot, nationality, self.parameters.projection_horizon_days)
                .adjusted_outflow
        } else {
            0
        };

        let effective = raw_headroom - i64::from(pending_weighted) + i64::from(projected_outflow);
        let effective_headroom = u32::try_from(effective.max(0)).unwrap_or(u32::MAX);

        let utilization = if cap == 0 {
            0.0
        } else {
            f64::from(stock) / f64::from(cap)
        };

        Ok(HeadroomResult {
            nationality: nationality.clone(),
            year,
            cap,
            stock,
            committed,
            pending,
            pending_weighted,
            raw_headroom,
            outflow_included: include_outflow,
            projected_outflow,
            effective_headroom,
            utilization,
        })
    }

    /// Expected departures within the horizon. Temporary travel never counts as outflow.
    pub fn project_outflow(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
        horizon_days: i64,
    ) -> OutflowProjection {
        let today = snapshot.today();
        let horizon_end = today + Duration::days(horizon_days);

        let mut final_exits = 0u32;
        let mut expiring_contracts = 0u32;
        for worker in snapshot.workers.iter().filter(|worker| {
            &worker.nationality == nationality && worker.state == WorkerState::InCountry
        }) {
            if worker.leaves_for_good_by(horizon_end) {
                final_exits += 1;
            } else if worker
                .employment_end
                .is_some_and(|end| end >= today && end <= horizon_end)
            {
                expiring_contracts += 1;
            }
        }

        let expected_non_renewals = round_scaled(expiring_contracts, self.parameters.non_renewal_ratio);
        let raw_outflow = final_exits + expected_non_renewals;
        let adjusted_outflow = round_scaled(raw_outflow, self.parameters.outflow_confidence_factor);

        OutflowProjection {
            nationality: nationality.clone(),
            horizon_days,
            final_exits,
            expiring_contracts,
            non_renewal_ratio: self.parameters.non_renewal_ratio,
            expected_non_renewals,
            raw_outflow,
            adjusted_outflow,
        }
    }

    /// Average monthly approved inflow split across tiers by historical share.
    pub fn tier_demands(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
    ) -> BTreeMap<TierLevel, u32> {
        let since = snapshot.now - Duration::days(self.parameters.inflow_lookback_days);
        let approved: u32 = snapshot
            .requests
            .iter()
            .filter(|request| {
                &request.nationality == nationality
                    && matches!(request.status, RequestStatus::Approved | RequestStatus::Partial)
                    && request.submitted_at >= since
            })
            .map(|request| request.approved_count)
            .sum();
        let monthly_inflow = f64::from(approved) / 12.0;

        let mut demands: BTreeMap<TierLevel, u32> =
            TierLevel::ALL.iter().map(|tier| (*tier, 0)).collect();
        for row in snapshot
            .tiers
            .iter()
            .filter(|row| row.is_current() && &row.nationality == nationality)
        {
            let demand = (monthly_inflow * row.share).floor() as u32;
            *demands.entry(row.tier).or_insert(0) += demand;
        }
        demands
    }

    pub fn calculate_tier_status(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
    ) -> Result<TierStatusResult, ConfigurationError> {
        let headroom = self
            .calculate_effective_headroom(snapshot, nationality, true)?
            .effective_headroom;
        let demands = self.tier_demands(snapshot, nationality);
        let demand_of = |tier: TierLevel| demands.get(&tier).copied().unwrap_or(0);

        Ok(TierStatusResult {
            nationality: nationality.clone(),
            headroom,
            tiers: cascade(headroom, TierLevel::ALL.map(demand_of)),
            calculated_at: snapshot.now,
        })
    }

    pub fn capacity_snapshot(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
    ) -> Result<CapacitySnapshot, ConfigurationError> {
        Ok(CapacitySnapshot {
            headroom: self.calculate_effective_headroom(snapshot, nationality, true)?,
            outflow: self.project_outflow(
                snapshot,
                nationality,
                self.parameters.projection_horizon_days,
            ),
            tier_status: self.calculate_tier_status(snapshot, nationality)?,
        })
    }
}

/// Hand headroom to tiers 1 through 4 in order; a tier only sees what higher tiers left.
///
/// A tier whose demand fits what is left stays open, so a tier with no demand is never closed.
pub fn cascade(headroom: u32, demands: [u32; 4]) -> Vec<TierCapacity> {
    let mut remaining = headroom;
    TierLevel::ALL
        .iter()
        .zip(demands)
        .map(|(&tier, demand)| {
            let (status, capacity) = if remaining >= demand {
                (TierStatus::Open, demand)
            } else if remaining == 0 {
                (TierStatus::Closed, 0)
            } else if tier == TierLevel::Primary {
                (TierStatus::Rationed, remaining)
            } else {
                (TierStatus::Limited, remaining)
            };
            remaining -= capacity;
            TierCapacity {
                tier,
                status,
                demand,
                capacity,
            }
        })
        .collect()
}

fn round_scaled(value: u32, factor: f64) -> u32 {
    (f64::from(value) * factor).round().max(0.0) as u32
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Engine parameters injected at construction time.
///
/// Every field has a default; a JSON override file only needs to name the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaParameters {
    pub tiers: TierParameters,
    pub capacity: CapacityParameters,
    pub dominance: DominanceParameters,
    pub queue: QueueParameters,
    pub priority: PriorityParameters,
    /// Recorded on every decision log so audits can tie a decision to its rule set.
    pub parameter_version: String,
}

impl Default for QuotaParameters {
    fn default() -> Self {
        Self {
            tiers: TierParameters::default(),
            capacity: CapacityParameters::default(),
            dominance: DominanceParameters::default(),
            queue: QueueParameters::default(),
            priority: PriorityParameters::default(),
            parameter_version: "v2.0".to_string(),
        }
    }
}

impl QuotaParameters {
    pub fn from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::ParametersFile {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::ParametersFormat { path, source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tiers = &self.tiers;
        if !(tiers.tier_1_threshold > tiers.tier_2_threshold
            && tiers.tier_2_threshold > tiers.tier_3_threshold
            && tiers.tier_3_threshold > 0.0
            && tiers.tier_1_threshold <= 1.0)
        {
            return Err(invalid(
                "tiers.tier_*_threshold",
                "thresholds must satisfy 1 >= tier_1 > tier_2 > tier_3 > 0",
            ));
        }
        if !(0.0..tiers.tier_1_threshold).contains(&tiers.hysteresis) {
            return Err(invalid(
                "tiers.hysteresis",
                "must be non-negative and below the tier 1 threshold",
            ));
        }

        let dominance = &self.dominance;
        if !(dominance.critical_share > dominance.high_share
            && dominance.high_share > dominance.watch_share
            && dominance.watch_share > 0.0
            && dominance.critical_share <= 1.0)
        {
            return Err(invalid(
                "dominance.*_share",
                "shares must satisfy 1 >= critical > high > watch > 0",
            ));
        }
        if dominance.high_velocity > dominance.critical_velocity {
            return Err(invalid(
                "dominance.high_velocity",
                "must not exceed critical_velocity",
            ));
        }
        if dominance.velocity_years == 0 {
            return Err(invalid("dominance.velocity_years", "must be at least one year"));
        }

        let capacity = &self.capacity;
        ensure_ratio("capacity.outflow_confidence_factor", capacity.outflow_confidence_factor)?;
        ensure_ratio("capacity.pending_approval_rate", capacity.pending_approval_rate)?;
        ensure_ratio("capacity.non_renewal_ratio", capacity.non_renewal_ratio)?;

        let queue = &self.queue;
        if queue.max_queue_per_tier == 0 {
            return Err(invalid("queue.max_queue_per_tier", "must be positive"));
        }
        if queue.expiry_days == 0 || queue.confirm_days == 0 {
            return Err(invalid(
                "queue.expiry_days",
                "expiry and confirmation windows must be positive",
            ));
        }
        ensure_ratio("queue.partial_fill_ratio", queue.partial_fill_ratio)?;

        let priority = &self.priority;
        if !(priority.utilization_high > priority.utilization_medium
            && priority.utilization_medium > priority.utilization_low)
        {
            return Err(invalid(
                "priority.utilization_*",
                "bands must satisfy high > medium > low",
            ));
        }

        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.to_string(),
    }
}

fn ensure_ratio(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(name, "must lie in (0, 1]"))
    }
}

/// Demand-share thresholds used to classify (nationality, profession) pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierParameters {
    pub tier_1_threshold: f64,
    pub tier_2_threshold: f64,
    pub tier_3_threshold: f64,
    pub hysteresis: f64,
    pub min_requests: u32,
    pub lookback_days: i64,
}

impl Default for TierParameters {
    fn default() -> Self {
        Self {
            tier_1_threshold: 0.15,
            tier_2_threshold: 0.05,
            tier_3_threshold: 0.01,
            hysteresis: 0.02,
            min_requests: 50,
            lookback_days: 360,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityParameters {
    pub projection_horizon_days: i64,
    /// Shrink applied to projected outflow; below one.
    pub outflow_confidence_factor: f64,
    pub pending_approval_rate: f64,
    pub non_renewal_ratio: f64,
    pub inflow_lookback_days: i64,
}

impl Default for CapacityParameters {
    fn default() -> Self {
        Self {
            projection_horizon_days: 180,
            outflow_confidence_factor: 0.75,
            pending_approval_rate: 0.80,
            non_renewal_ratio: 0.25,
            inflow_lookback_days: 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DominanceParameters {
    pub critical_share: f64,
    pub high_share: f64,
    pub watch_share: f64,
    pub critical_velocity: f64,
    pub high_velocity: f64,
    pub min_profession_size: u32,
    pub velocity_years: u32,
    pub trend_band: f64,
}

impl Default for DominanceParameters {
    fn default() -> Self {
        Self {
            critical_share: 0.50,
            high_share: 0.40,
            watch_share: 0.30,
            critical_velocity: 0.10,
            high_velocity: 0.05,
            min_profession_size: 200,
            velocity_years: 3,
            trend_band: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueParameters {
    pub expiry_days: i64,
    pub confirm_days: i64,
    /// Entries are flagged this many days before the confirmation deadline.
    pub confirm_notice_days: i64,
    pub max_queue_per_tier: usize,
    /// Minimum fraction of a request that capacity must cover for a partial fill.
    pub partial_fill_ratio: f64,
}

impl Default for QueueParameters {
    fn default() -> Self {
        Self {
            expiry_days: 90,
            confirm_days: 30,
            confirm_notice_days: 5,
            max_queue_per_tier: 200,
            partial_fill_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityParameters {
    pub high_demand_points: i32,
    pub strategic_sector_points: i32,
    pub high_utilization_points: i32,
    pub medium_utilization_points: i32,
    pub low_utilization_points: i32,
    pub small_establishment_points: i32,
    pub utilization_high: f64,
    pub utilization_medium: f64,
    pub utilization_low: f64,
    pub small_establishment_threshold: u32,
}

impl Default for PriorityParameters {
    fn default() -> Self {
        Self {
            high_demand_points: 50,
            strategic_sector_points: 30,
            high_utilization_points: 20,
            medium_utilization_points: 10,
            low_utilization_points: -20,
            small_establishment_points: 10,
            utilization_high: 0.90,
            utilization_medium: 0.70,
            utilization_low: 0.30,
            small_establishment_threshold: 50,
        }
    }
}

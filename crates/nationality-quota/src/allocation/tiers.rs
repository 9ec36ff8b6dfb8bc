use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TierParameters;

use super::domain::{NationalityCode, ProfessionId, TierAssignment, TierLevel};
use super::snapshot::WorldSnapshot;

/// Classifies (nationality, profession) pairs into demand tiers from request history.
#[derive(Debug, Clone)]
pub struct TierDiscoveryEngine {
    parameters: TierParameters,
}

/// Tier computed for one profession during discovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfessionTier {
    pub profession: ProfessionId,
    pub tier: TierLevel,
    pub share: f64,
    pub request_count: u32,
    pub previous: Option<TierLevel>,
}

impl ProfessionTier {
    pub fn changed(&self) -> bool {
        self.previous.map_or(true, |previous| previous != self.tier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TierDiscovery {
    /// Not enough history; callers fall back to Tier 4 rather than failing.
    InsufficientData { total_requests: u32, required: u32 },
    Classified {
        total_requests: u32,
        tiers: Vec<ProfessionTier>,
    },
}

/// Tier lookup result; `classified == false` means the Tier 4 default applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierInfo {
    pub nationality: NationalityCode,
    pub profession: ProfessionId,
    pub tier: TierLevel,
    pub tier_name: &'static str,
    pub share: f64,
    pub request_count: u32,
    pub classified: bool,
}

impl TierDiscoveryEngine {
    pub fn new(parameters: TierParameters) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &TierParameters {
        &self.parameters
    }

    pub fn discover_tiers(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
    ) -> TierDiscovery {
        self.discover_tiers_over(snapshot, nationality, self.parameters.lookback_days)
    }

    pub fn discover_tiers_over(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
        lookback_days: i64,
    ) -> TierDiscovery {
        let volumes = snapshot.historical_request_volumes(nationality, lookback_days);
        let total: u32 = volumes.values().sum();
        if total < self.parameters.min_requests {
            return TierDiscovery::InsufficientData {
                total_requests: total,
                required: self.parameters.min_requests,
            };
        }

        let tiers = volumes
            .into_iter()
            .map(|(profession, request_count)| {
                let share = request_count as f64 / total as f64;
                let previous = snapshot
                    .current_tier(nationality, &profession)
                    .map(|row| row.tier);
                let tier = self.apply_hysteresis(share, self.base_tier(share), previous);
                ProfessionTier {
                    profession,
                    tier,
                    share,
                    request_count,
                    previous,
                }
            })
            .collect();

        TierDiscovery::Classified {
            total_requests: total,
            tiers,
        }
    }

    pub fn base_tier(&self, share: f64) -> TierLevel {
        let parameters = &self.parameters;
        if share >= parameters.tier_1_threshold {
            TierLevel::Primary
        } else if share >= parameters.tier_2_threshold {
            TierLevel::Secondary
        } else if share >= parameters.tier_3_threshold {
            TierLevel::Minor
        } else {
            TierLevel::Unusual
        }
    }

    /// Hold the stored tier while the share sits inside the hysteresis band around its boundary.
    pub fn apply_hysteresis(
        &self,
        share: f64,
        base: TierLevel,
        previous: Option<TierLevel>,
    ) -> TierLevel {
        let Some(previous) = previous else {
            return base;
        };
        let band = self.parameters.hysteresis;

        if base < previous {
            // Promotion must clear the boundary above the stored tier by the band.
            let boundary = TierLevel::from_number(previous.number() - 1)
                .map(|above| self.lower_bound(above))
                .unwrap_or(f64::INFINITY);
            if share < boundary + band {
                return previous;
            }
        } else if base > previous && share > self.lower_bound(previous) - band {
            return previous;
        }
        base
    }

    fn lower_bound(&self, tier: TierLevel) -> f64 {
        match tier {
            TierLevel::Primary => self.parameters.tier_1_threshold,
            TierLevel::Secondary => self.parameters.tier_2_threshold,
            TierLevel::Minor => self.parameters.tier_3_threshold,
            TierLevel::Unusual => 0.0,
        }
    }

    pub fn get_tier_for_request(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
        profession: &ProfessionId,
    ) -> TierInfo {
        match snapshot.current_tier(nationality, profession) {
            Some(row) => TierInfo {
                nationality: nationality.clone(),
                profession: profession.clone(),
                tier: row.tier,
                tier_name: row.tier.name(),
                share: row.share,
                request_count: row.request_count,
                classified: true,
            },
            None => TierInfo {
                nationality: nationality.clone(),
                profession: profession.clone(),
                tier: TierLevel::Unusual,
                tier_name: TierLevel::Unusual.name(),
                share: 0.0,
                request_count: 0,
                classified: false,
            },
        }
    }

    /// Current tiers for a nationality, highest priority and share first.
    pub fn get_all_tiers(
        &self,
        snapshot: &WorldSnapshot,
        nationality: &NationalityCode,
    ) -> Vec<TierInfo> {
        let mut tiers: Vec<TierInfo> = snapshot
            .tiers
            .iter()
            .filter(|row| row.is_current() && &row.nationality == nationality)
            .map(|row| TierInfo {
                nationality: nationality.clone(),
                profession: row.profession.clone(),
                tier: row.tier,
                tier_name: row.tier.name(),
                share: row.share,
                request_count: row.request_count,
                classified: true,
            })
            .collect();
        tiers.sort_by(|left, right| {
            left.tier
                .cmp(&right.tier)
                .then_with(|| right.share.total_cmp(&left.share))
        });
        tiers
    }

    /// Rows for a new tier generation, ready for `ClassificationStore::replace_tier_generation`.
    pub fn assignments(
        discovery: &TierDiscovery,
        nationality: &NationalityCode,
        now: DateTime<Utc>,
    ) -> Vec<TierAssignment> {
        match discovery {
            TierDiscovery::InsufficientData { .. } => Vec::new(),
            TierDiscovery::Classified { tiers, .. } => tiers
                .iter()
                .map(|row| TierAssignment {
                    nationality: nationality.clone(),
                    profession: row.profession.clone(),
                    tier: row.tier,
                    share: row.share,
                    request_count: row.request_count,
                    valid_from: now,
                    valid_to: None,
                })
                .collect(),
        }
    }
}

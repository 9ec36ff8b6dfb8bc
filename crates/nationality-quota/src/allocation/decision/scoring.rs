use serde::Serialize;

use crate::config::PriorityParameters;

use super::super::domain::{Establishment, Profession};

/// Discrete contribution to a priority score, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreComponent {
    pub factor: &'static str,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityScore {
    pub total: i32,
    pub components: Vec<ScoreComponent>,
}

impl PriorityScore {
    pub fn summary(&self) -> String {
        if self.components.is_empty() {
            return format!("score {}", self.total);
        }
        let parts: Vec<String> = self
            .components
            .iter()
            .map(|component| format!("{} {:+}", component.factor, component.points))
            .collect();
        format!("score {}: {}", self.total, parts.join(", "))
    }
}

pub(crate) fn score_request(
    parameters: &PriorityParameters,
    profession: &Profession,
    establishment: &Establishment,
) -> PriorityScore {
    let mut components = Vec::new();

    if profession.high_demand {
        components.push(ScoreComponent {
            factor: "high-demand profession",
            points: parameters.high_demand_points,
        });
    }

    if establishment.strategic_sector {
        components.push(ScoreComponent {
            factor: "strategic sector",
            points: parameters.strategic_sector_points,
        });
    }

    let utilization = establishment.utilization_rate();
    if utilization >= parameters.utilization_high {
        components.push(ScoreComponent {
            factor: "high utilization",
            points: parameters.high_utilization_points,
        });
    } else if utilization >= parameters.utilization_medium {
        components.push(ScoreComponent {
            factor: "medium utilization",
            points: parameters.medium_utilization_points,
        });
    } else if utilization < parameters.utilization_low {
        components.push(ScoreComponent {
            factor: "low utilization",
            points: parameters.low_utilization_points,
        });
    }

    if establishment.is_small(parameters.small_establishment_threshold) {
        components.push(ScoreComponent {
            factor: "small establishment",
            points: parameters.small_establishment_points,
        });
    }

    PriorityScore {
        total: components.iter().map(|component| component.points).sum(),
        components,
    }
}

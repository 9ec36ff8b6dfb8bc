mod policy;
mod scoring;

pub use scoring::{PriorityScore, ScoreComponent};

pub(crate) use policy::covers_partial;

use serde::Serialize;

use crate::config::{PriorityParameters, QuotaParameters};

use super::capacity::{CapacityEngine, ConfigurationError};
use super::dominance::{DominanceAlertEngine, DominanceCheckResult};
use super::domain::{
    AlertLevel, DecisionLog, DecisionRule, DecisionType, RequestId, RuleStep, TierLevel,
    TierStatus,
};
use super::snapshot::WorldSnapshot;
use super::tiers::TierDiscoveryEngine;
use super::validation::ValidatedSubmission;
use policy::{resolve, PolicyInputs};

/// Outcome of running one submission through the decision pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub decision: DecisionType,
    pub approved_count: u32,
    pub queued_count: u32,
    pub priority_score: i32,
    pub tier_level: TierLevel,
    pub tier_status: TierStatus,
    pub tier_capacity: u32,
    pub headroom: u32,
    pub dominance_level: AlertLevel,
    pub dominance_share: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominance_alert: Option<DominanceCheckResult>,
    pub reason: String,
    pub alternatives: Vec<String>,
    pub requires_review: bool,
    pub rule_chain: Vec<RuleStep>,
}

impl Decision {
    pub fn to_log(
        &self,
        request_id: RequestId,
        parameter_version: &str,
        decided_at: chrono::DateTime<chrono::Utc>,
    ) -> DecisionLog {
        DecisionLog {
            request_id,
            decision: self.decision,
            approved_count: self.approved_count,
            tier_level: self.tier_level,
            tier_status: self.tier_status,
            tier_capacity: self.tier_capacity,
            headroom: self.headroom,
            dominance_share: self.dominance_share,
            dominance_level: self.dominance_level,
            priority_score: self.priority_score,
            rule_chain: self.rule_chain.clone(),
            reason: self.reason.clone(),
            parameter_version: parameter_version.to_string(),
            decided_at,
        }
    }
}

/// Composes tier, capacity and dominance checks into a single deterministic decision.
#[derive(Debug, Clone)]
pub struct RequestProcessor {
    tiers: TierDiscoveryEngine,
    capacity: CapacityEngine,
    dominance: DominanceAlertEngine,
    priority: PriorityParameters,
    partial_fill_ratio: f64,
}

impl RequestProcessor {
    pub fn new(parameters: &QuotaParameters) -> Self {
        Self {
            tiers: TierDiscoveryEngine::new(parameters.tiers.clone()),
            capacity: CapacityEngine::new(parameters.capacity.clone()),
            dominance: DominanceAlertEngine::new(parameters.dominance.clone()),
            priority: parameters.priority.clone(),
            partial_fill_ratio: parameters.queue.partial_fill_ratio,
        }
    }

    pub fn tiers(&self) -> &TierDiscoveryEngine {
        &self.tiers
    }

    pub fn capacity(&self) -> &CapacityEngine {
        &self.capacity
    }

    pub fn dominance(&self) -> &DominanceAlertEngine {
        &self.dominance
    }

    pub fn score(&self, candidate: &ValidatedSubmission<'_>) -> PriorityScore {
        scoring::score_request(&self.priority, candidate.profession, candidate.establishment)
    }

    /// Pure evaluation against one snapshot; nothing is persisted here.
    pub fn evaluate(
        &self,
        snapshot: &WorldSnapshot,
        candidate: &ValidatedSubmission<'_>,
    ) -> Result<Decision, ConfigurationError> {
        let nationality = &candidate.nationality.code;
        let profession = &candidate.profession.id;
        let mut rule_chain = Vec::with_capacity(5);

        let tier = self
            .tiers
            .get_tier_for_request(snapshot, nationality, profession);
        rule_chain.push(RuleStep::new(
            DecisionRule::TierIdentification,
            if tier.classified {
                format!("{} (share {:.1}%)", tier.tier, tier.share * 100.0)
            } else {
                format!("{} (unclassified default)", tier.tier)
            },
        ));

        let tier_table = self.capacity.calculate_tier_status(snapshot, nationality)?;
        let tier_status = tier_table.status_of(tier.tier);
        let tier_capacity = tier_table.capacity_of(tier.tier);
        rule_chain.push(RuleStep::new(
            DecisionRule::TierStatusCheck,
            format!(
                "{} with capacity {tier_capacity} (headroom {})",
                tier_status.label(),
                tier_table.headroom
            ),
        ));

        let dominance = self
            .dominance
            .check_dominance(snapshot, nationality, profession);
        rule_chain.push(RuleStep::new(
            DecisionRule::DominanceCheck,
            format!(
                "{}: share {:.1}%, velocity {:+.1}%",
                dominance.level.label(),
                dominance.share * 100.0,
                dominance.velocity * 100.0
            ),
        ));

        let priority = self.score(candidate);
        rule_chain.push(RuleStep::new(DecisionRule::PriorityScoring, priority.summary()));

        let resolution = resolve(&PolicyInputs {
            nationality: &nationality.0,
            profession_name: &candidate.profession.name,
            requested: candidate.requested_count,
            tier_level: tier.tier,
            tier_status,
            tier_capacity,
            dominance: dominance.level,
            dominance_share: dominance.share,
            priority_score: priority.total,
            partial_fill_ratio: self.partial_fill_ratio,
        });
        rule_chain.push(RuleStep::new(resolution.rule, resolution.reason.clone()));

        let alternatives = if resolution.decision == DecisionType::Blocked {
            self.dominance.alternatives(snapshot, nationality, profession)
        } else {
            Vec::new()
        };

        Ok(Decision {
            decision: resolution.decision,
            approved_count: resolution.approved,
            queued_count: resolution.queued,
            priority_score: priority.total,
            tier_level: tier.tier,
            tier_status,
            tier_capacity,
            headroom: tier_table.headroom,
            dominance_level: dominance.level,
            dominance_share: dominance.share,
            requires_review: dominance.requires_review,
            dominance_alert: (dominance.level != AlertLevel::Ok).then_some(dominance),
            reason: resolution.reason,
            alternatives,
            rule_chain,
        })
    }
}

use super::super::domain::{AlertLevel, DecisionRule, DecisionType, TierLevel, TierStatus};

/// Everything the decision table looks at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PolicyInputs<'a> {
    pub nationality: &'a str,
    pub profession_name: &'a str,
    pub requested: u32,
    pub tier_level: TierLevel,
    pub tier_status: TierStatus,
    pub tier_capacity: u32,
    pub dominance: AlertLevel,
    pub dominance_share: f64,
    pub priority_score: i32,
    pub partial_fill_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolution {
    pub decision: DecisionType,
    pub approved: u32,
    pub queued: u32,
    pub rule: DecisionRule,
    pub reason: String,
}

impl Resolution {
    fn approve(rule: DecisionRule, approved: u32, requested: u32, reason: String) -> Self {
        let decision = if approved >= requested {
            DecisionType::Approved
        } else {
            DecisionType::Partial
        };
        Self {
            decision,
            approved,
            queued: 0,
            rule,
            reason,
        }
    }

    fn queue(rule: DecisionRule, requested: u32, reason: String) -> Self {
        Self {
            decision: DecisionType::Queued,
            approved: 0,
            queued: requested,
            rule,
            reason,
        }
    }
}

pub(crate) fn covers_partial(capacity: u32, requested: u32, ratio: f64) -> bool {
    f64::from(capacity) >= f64::from(requested) * ratio
}

/// Decision table; first matching row wins.
pub(crate) fn resolve(inputs: &PolicyInputs<'_>) -> Resolution {
    let requested = inputs.requested;
    let tier = inputs.tier_level.number();
    let capacity = inputs.tier_capacity;
    let share_pct = inputs.dominance_share * 100.0;

    if inputs.dominance == AlertLevel::Critical {
        return Resolution {
            decision: DecisionType::Blocked,
            approved: 0,
            queued: 0,
            rule: DecisionRule::DominanceBlock,
            reason: format!(
                "BLOCKED: {} dominance in {} is {share_pct:.1}% (CRITICAL). Diversification required.",
                inputs.nationality, inputs.profession_name
            ),
        };
    }

    match inputs.tier_status {
        TierStatus::Open if inputs.dominance == AlertLevel::High => {
            let approved = requested / 2;
            Resolution {
                decision: DecisionType::Partial,
                approved,
                queued: 0,
                rule: DecisionRule::DominancePartial,
                reason: format!(
                    "PARTIAL: Tier {tier} OPEN but dominance HIGH ({share_pct:.1}%). Approved {approved} of {requested}."
                ),
            }
        }
        TierStatus::Open => Resolution::approve(
            DecisionRule::TierOpenApproval,
            requested,
            requested,
            format!(
                "APPROVED: Tier {tier} OPEN, dominance {} ({share_pct:.1}%). All {requested} workers approved.",
                inputs.dominance.label()
            ),
        ),
        TierStatus::Rationed if capacity >= requested => Resolution::approve(
            DecisionRule::RationedSufficient,
            requested,
            requested,
            format!(
                "APPROVED: Tier {tier} RATIONED but capacity {capacity} covers the request. Priority score: {}. Approved {requested}.",
                inputs.priority_score
            ),
        ),
        TierStatus::Rationed
            if covers_partial(capacity, requested, inputs.partial_fill_ratio) =>
        {
            Resolution::approve(
                DecisionRule::RationedPartial,
                capacity,
                requested,
                format!(
                    "PARTIAL: Tier {tier} RATIONED. Capacity {capacity}, requested {requested}. Priority: {}. Approved {capacity}.",
                    inputs.priority_score
                ),
            )
        }
        TierStatus::Rationed => Resolution::queue(
            DecisionRule::RationedQueue,
            requested,
            format!(
                "QUEUED: Tier {tier} RATIONED. Capacity {capacity} insufficient for {requested}. Request queued for auto-processing."
            ),
        ),
        TierStatus::Limited if capacity >= requested => Resolution::approve(
            DecisionRule::LimitedSufficient,
            requested,
            requested,
            format!(
                "APPROVED: Tier {tier} LIMITED with {capacity} slots. Approved {requested} of {requested}."
            ),
        ),
        TierStatus::Limited
            if covers_partial(capacity, requested, inputs.partial_fill_ratio) =>
        {
            Resolution::approve(
                DecisionRule::LimitedPartial,
                capacity,
                requested,
                format!(
                    "PARTIAL: Tier {tier} LIMITED. Only {capacity} slots available. Approved {capacity}, remainder can be resubmitted."
                ),
            )
        }
        TierStatus::Limited => Resolution::queue(
            DecisionRule::LimitedQueue,
            requested,
            format!("QUEUED: Tier {tier} LIMITED. Insufficient capacity. Request queued."),
        ),
        TierStatus::Closed if inputs.tier_level != TierLevel::Unusual => Resolution::queue(
            DecisionRule::ClosedQueue,
            requested,
            format!(
                "QUEUED: Tier {tier} CLOSED. Request queued for auto-processing when capacity opens."
            ),
        ),
        TierStatus::Closed => Resolution {
            decision: DecisionType::Rejected,
            approved: 0,
            queued: 0,
            rule: DecisionRule::UnusualRejected,
            reason: "REJECTED: Tier 4 (Unusual) request while capacity is closed. Business justification required for unusual profession requests.".to_string(),
        },
    }
}

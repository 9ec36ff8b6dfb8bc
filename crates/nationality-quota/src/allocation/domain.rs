use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// ISO-style nationality code, e.g. `EGY`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NationalityCode(pub String);

impl NationalityCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }
}

impl fmt::Display for NationalityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProfessionId(pub String);

impl fmt::Display for ProfessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EstablishmentId(pub String);

impl fmt::Display for EstablishmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for quota requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Restricted-nationality reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nationality {
    pub code: NationalityCode,
    pub name: String,
    /// Only restricted nationalities are subject to caps and may be requested.
    pub restricted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profession {
    pub id: ProfessionId,
    pub name: String,
    pub high_demand: bool,
}

/// Employer as seen by priority scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Establishment {
    pub id: EstablishmentId,
    pub name: String,
    pub strategic_sector: bool,
    pub total_approved: u32,
    pub total_used: u32,
}

impl Establishment {
    pub fn utilization_rate(&self) -> f64 {
        if self.total_approved == 0 {
            return 0.0;
        }
        self.total_used as f64 / self.total_approved as f64
    }

    pub fn is_small(&self, threshold: u32) -> bool {
        self.total_approved < threshold
    }
}

/// Annual admission limit for one nationality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NationalityCap {
    pub nationality: NationalityCode,
    pub year: i32,
    pub limit: u32,
}

/// Roster state of a worker; transitions are owned by the roster system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    InCountry,
    Committed,
    Pending,
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartureKind {
    FinalExit,
    TemporaryTravel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDeparture {
    pub kind: DepartureKind,
    pub on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub nationality: NationalityCode,
    pub profession: ProfessionId,
    pub state: WorkerState,
    pub employment_start: NaiveDate,
    #[serde(default)]
    pub employment_end: Option<NaiveDate>,
    #[serde(default)]
    pub departure: Option<PlannedDeparture>,
}

impl WorkerRecord {
    pub fn leaves_for_good_by(&self, horizon_end: NaiveDate) -> bool {
        matches!(
            self.departure,
            Some(PlannedDeparture {
                kind: DepartureKind::FinalExit,
                on,
            }) if on <= horizon_end
        )
    }
}

/// Demand tier for a (nationality, profession) pair; 1 is the highest priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum TierLevel {
    Primary,
    Secondary,
    Minor,
    Unusual,
}

impl TierLevel {
    pub const ALL: [TierLevel; 4] = [
        TierLevel::Primary,
        TierLevel::Secondary,
        TierLevel::Minor,
        TierLevel::Unusual,
    ];

    pub const fn number(self) -> u8 {
        match self {
            TierLevel::Primary => 1,
            TierLevel::Secondary => 2,
            TierLevel::Minor => 3,
            TierLevel::Unusual => 4,
        }
    }

    pub const fn from_number(value: u8) -> Option<Self> {
        match value {
            1 => Some(TierLevel::Primary),
            2 => Some(TierLevel::Secondary),
            3 => Some(TierLevel::Minor),
            4 => Some(TierLevel::Unusual),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TierLevel::Primary => "Primary",
            TierLevel::Secondary => "Secondary",
            TierLevel::Minor => "Minor",
            TierLevel::Unusual => "Unusual",
        }
    }
}

impl From<TierLevel> for u8 {
    fn from(value: TierLevel) -> Self {
        value.number()
    }
}

impl TryFrom<u8> for TierLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TierLevel::from_number(value).ok_or_else(|| format!("tier must be 1-4, got {value}"))
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier {} ({})", self.number(), self.name())
    }
}

/// Availability of a tier after headroom has cascaded through higher tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierStatus {
    Open,
    Rationed,
    Limited,
    Closed,
}

impl TierStatus {
    pub const fn label(self) -> &'static str {
        match self {
            TierStatus::Open => "OPEN",
            TierStatus::Rationed => "RATIONED",
            TierStatus::Limited => "LIMITED",
            TierStatus::Closed => "CLOSED",
        }
    }
}

/// Concentration alert level, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Ok,
    Watch,
    High,
    Critical,
}

impl AlertLevel {
    pub const fn label(self) -> &'static str {
        match self {
            AlertLevel::Ok => "OK",
            AlertLevel::Watch => "WATCH",
            AlertLevel::High => "HIGH",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    Approved,
    Partial,
    Queued,
    Blocked,
    Rejected,
    Withdrawn,
    Expired,
}

impl DecisionType {
    pub const fn label(self) -> &'static str {
        match self {
            DecisionType::Approved => "APPROVED",
            DecisionType::Partial => "PARTIAL",
            DecisionType::Queued => "QUEUED",
            DecisionType::Blocked => "BLOCKED",
            DecisionType::Rejected => "REJECTED",
            DecisionType::Withdrawn => "WITHDRAWN",
            DecisionType::Expired => "EXPIRED",
        }
    }

    pub const fn status(self) -> RequestStatus {
        match self {
            DecisionType::Approved => RequestStatus::Approved,
            DecisionType::Partial => RequestStatus::Partial,
            DecisionType::Queued => RequestStatus::Queued,
            DecisionType::Blocked => RequestStatus::Blocked,
            DecisionType::Rejected => RequestStatus::Rejected,
            DecisionType::Withdrawn => RequestStatus::Withdrawn,
            DecisionType::Expired => RequestStatus::Expired,
        }
    }
}

/// Request lifecycle. `Queued` is semi-terminal: only the queue may move it on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Submitted,
    Processing,
    Approved,
    Partial,
    Queued,
    Blocked,
    Rejected,
    Withdrawn,
    Expired,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Submitted => "SUBMITTED",
            RequestStatus::Processing => "PROCESSING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Partial => "PARTIAL",
            RequestStatus::Queued => "QUEUED",
            RequestStatus::Blocked => "BLOCKED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Withdrawn => "WITHDRAWN",
            RequestStatus::Expired => "EXPIRED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Approved
                | RequestStatus::Partial
                | RequestStatus::Blocked
                | RequestStatus::Rejected
                | RequestStatus::Withdrawn
                | RequestStatus::Expired
        )
    }

    pub const fn is_in_flight(self) -> bool {
        matches!(self, RequestStatus::Submitted | RequestStatus::Processing)
    }

    /// Statuses that count towards historical demand.
    pub const fn counts_as_demand(self) -> bool {
        matches!(
            self,
            RequestStatus::Approved
                | RequestStatus::Partial
                | RequestStatus::Queued
                | RequestStatus::Blocked
        )
    }
}

/// Employer submission before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSubmission {
    pub nationality: NationalityCode,
    pub profession: ProfessionId,
    pub establishment: EstablishmentId,
    pub requested_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRequest {
    pub id: RequestId,
    pub nationality: NationalityCode,
    pub profession: ProfessionId,
    pub establishment: EstablishmentId,
    pub requested_count: u32,
    pub approved_count: u32,
    pub status: RequestStatus,
    pub priority_score: i32,
    pub tier_at_submission: Option<TierLevel>,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_reason: Option<String>,
}

impl QuotaRequest {
    pub fn approval_rate(&self) -> f64 {
        if self.requested_count == 0 {
            return 0.0;
        }
        self.approved_count as f64 / self.requested_count as f64
    }
}

/// One generation of a tier classification. `valid_to == None` marks the current row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAssignment {
    pub nationality: NationalityCode,
    pub profession: ProfessionId,
    pub tier: TierLevel,
    pub share: f64,
    pub request_count: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl TierAssignment {
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominanceAlert {
    pub nationality: NationalityCode,
    pub profession: ProfessionId,
    pub share: f64,
    pub velocity: f64,
    pub level: AlertLevel,
    pub total_in_profession: u32,
    pub nationality_count: u32,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DominanceAlert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Waiting-list entry; exists only while its request is `Queued`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request_id: RequestId,
    pub nationality: NationalityCode,
    pub tier: TierLevel,
    pub position: u32,
    pub priority_score: i32,
    /// Priority score plus a tie-break that favours earlier positions.
    pub processing_priority: f64,
    pub requested_count: u32,
    pub queued_at: DateTime<Utc>,
    pub expiry_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub last_revalidated_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_at
    }

    pub fn days_queued(&self, now: DateTime<Utc>) -> i64 {
        (now - self.queued_at).num_days()
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expiry_at - now).num_days().max(0)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Advisory only: an unconfirmed entry keeps its original expiry.
    pub fn needs_confirmation(&self, now: DateTime<Utc>, confirm_days: i64, notice_days: i64) -> bool {
        !self.is_confirmed() && self.days_queued(now) >= confirm_days - notice_days
    }
}

/// Named step of a decision rule chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    TierIdentification,
    TierStatusCheck,
    DominanceCheck,
    PriorityScoring,
    DominanceBlock,
    DominancePartial,
    TierOpenApproval,
    RationedSufficient,
    RationedPartial,
    RationedQueue,
    LimitedSufficient,
    LimitedPartial,
    LimitedQueue,
    ClosedQueue,
    UnusualRejected,
    QueueApproved,
    QueuePartial,
    QueueBlocked,
    QueueExpired,
    QueueWithdrawn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStep {
    pub rule: DecisionRule,
    pub result: String,
}

impl RuleStep {
    pub fn new(rule: DecisionRule, result: impl Into<String>) -> Self {
        Self {
            rule,
            result: result.into(),
        }
    }
}

/// Immutable audit record written once per decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLog {
    pub request_id: RequestId,
    pub decision: DecisionType,
    pub approved_count: u32,
    pub tier_level: TierLevel,
    pub tier_status: TierStatus,
    pub tier_capacity: u32,
    pub headroom: u32,
    pub dominance_share: f64,
    pub dominance_level: AlertLevel,
    pub priority_score: i32,
    pub rule_chain: Vec<RuleStep>,
    pub reason: String,
    pub parameter_version: String,
    pub decided_at: DateTime<Utc>,
}

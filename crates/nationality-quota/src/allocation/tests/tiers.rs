use super::common::*;

use crate::allocation::{
    ProfessionTier, RequestStatus, TierDiscovery, TierDiscoveryEngine, TierLevel,
};
use crate::config::TierParameters;

fn engine() -> TierDiscoveryEngine {
    TierDiscoveryEngine::new(TierParameters::default())
}

fn demand_world() -> WorldBuilder {
    WorldBuilder::default()
        .request(history_request("r1", "EGY", "MASON", RequestStatus::Approved, 120, 120, 30))
        .request(history_request("r2", "EGY", "ELEC", RequestStatus::Queued, 60, 0, 60))
        .request(history_request("r3", "EGY", "COOK", RequestStatus::Partial, 16, 8, 90))
        .request(history_request("r4", "EGY", "WELDER", RequestStatus::Blocked, 3, 0, 120))
        .request(history_request("r5", "EGY", "PAINTER", RequestStatus::Approved, 1, 1, 150))
        // neither outcome counts as demand
        .request(history_request("r6", "EGY", "MASON", RequestStatus::Rejected, 500, 0, 10))
        .request(history_request("r7", "EGY", "MASON", RequestStatus::Submitted, 500, 0, 1))
        // outside the lookback window
        .request(history_request("r8", "EGY", "ELEC", RequestStatus::Approved, 900, 900, 400))
}

fn classified(discovery: &TierDiscovery) -> &[ProfessionTier] {
    match discovery {
        TierDiscovery::Classified { tiers, .. } => tiers,
        other => panic!("expected classification, got {other:?}"),
    }
}

fn tier_of(rows: &[ProfessionTier], profession: &str) -> TierLevel {
    rows.iter()
        .find(|row| row.profession == prof(profession))
        .map(|row| row.tier)
        .unwrap_or_else(|| panic!("{profession} not classified"))
}

#[test]
fn thin_history_reports_insufficient_data() {
    let world = WorldBuilder::default()
        .request(history_request("r1", "EGY", "MASON", RequestStatus::Approved, 40, 40, 20));
    let discovery = engine().discover_tiers(&world.snapshot("EGY"), &nat("EGY"));

    assert_eq!(
        discovery,
        TierDiscovery::InsufficientData {
            total_requests: 40,
            required: 50
        }
    );
    assert!(TierDiscoveryEngine::assignments(&discovery, &nat("EGY"), now()).is_empty());
}

#[test]
fn shares_map_onto_tiers_by_threshold() {
    let snapshot = demand_world().snapshot("EGY");
    let discovery = engine().discover_tiers(&snapshot, &nat("EGY"));

    match &discovery {
        TierDiscovery::Classified { total_requests, .. } => assert_eq!(*total_requests, 200),
        other => panic!("expected classification, got {other:?}"),
    }
    let rows = classified(&discovery);
    assert_eq!(tier_of(rows, "MASON"), TierLevel::Primary);
    assert_eq!(tier_of(rows, "ELEC"), TierLevel::Primary);
    assert_eq!(tier_of(rows, "COOK"), TierLevel::Secondary);
    assert_eq!(tier_of(rows, "WELDER"), TierLevel::Minor);
    assert_eq!(tier_of(rows, "PAINTER"), TierLevel::Unusual);
    assert!(rows.iter().all(|row| row.previous.is_none() && row.changed()));
}

#[test]
fn threshold_boundaries_are_inclusive() {
    let engine = engine();
    assert_eq!(engine.base_tier(0.15), TierLevel::Primary);
    assert_eq!(engine.base_tier(0.1499), TierLevel::Secondary);
    assert_eq!(engine.base_tier(0.05), TierLevel::Secondary);
    assert_eq!(engine.base_tier(0.01), TierLevel::Minor);
    assert_eq!(engine.base_tier(0.0099), TierLevel::Unusual);
}

#[test]
fn hysteresis_holds_promotion_inside_the_band() {
    let engine = engine();
    assert_eq!(
        engine.apply_hysteresis(0.16, TierLevel::Primary, Some(TierLevel::Secondary)),
        TierLevel::Secondary
    );
    assert_eq!(
        engine.apply_hysteresis(0.18, TierLevel::Primary, Some(TierLevel::Secondary)),
        TierLevel::Primary
    );
}

#[test]
fn hysteresis_holds_demotion_inside_the_band() {
    let engine = engine();
    assert_eq!(
        engine.apply_hysteresis(0.14, TierLevel::Secondary, Some(TierLevel::Primary)),
        TierLevel::Primary
    );
    assert_eq!(
        engine.apply_hysteresis(0.12, TierLevel::Secondary, Some(TierLevel::Primary)),
        TierLevel::Secondary
    );
    assert_eq!(
        engine.apply_hysteresis(0.12, TierLevel::Secondary, None),
        TierLevel::Secondary
    );
}

#[test]
fn discovery_keeps_previous_tier_near_boundary() {
    // MASON at 16% would be Tier 1 on a fresh classification.
    let world = WorldBuilder::default()
        .request(history_request("r1", "EGY", "MASON", RequestStatus::Approved, 16, 16, 30))
        .request(history_request("r2", "EGY", "ELEC", RequestStatus::Approved, 84, 84, 30))
        .tier(tier_row("EGY", "MASON", TierLevel::Secondary, 0.10));
    let discovery = engine().discover_tiers(&world.snapshot("EGY"), &nat("EGY"));
    let rows = classified(&discovery);

    let mason = rows
        .iter()
        .find(|row| row.profession == prof("MASON"))
        .expect("mason classified");
    assert_eq!(mason.tier, TierLevel::Secondary);
    assert_eq!(mason.previous, Some(TierLevel::Secondary));
    assert!(!mason.changed());
}

#[test]
fn unclassified_pairs_default_to_unusual() {
    let world = WorldBuilder::default().tier(tier_row("EGY", "MASON", TierLevel::Primary, 0.4));
    let snapshot = world.snapshot("EGY");

    let info = engine().get_tier_for_request(&snapshot, &nat("EGY"), &prof("COOK"));
    assert_eq!(info.tier, TierLevel::Unusual);
    assert!(!info.classified);
    assert_eq!(info.share, 0.0);

    let mason = engine().get_tier_for_request(&snapshot, &nat("EGY"), &prof("MASON"));
    assert_eq!(mason.tier, TierLevel::Primary);
    assert!(mason.classified);
}

#[test]
fn all_tiers_sort_by_tier_then_share() {
    let world = WorldBuilder::default()
        .tier(tier_row("EGY", "COOK", TierLevel::Secondary, 0.08))
        .tier(tier_row("EGY", "ELEC", TierLevel::Primary, 0.30))
        .tier(tier_row("EGY", "MASON", TierLevel::Primary, 0.60))
        .tier(tier_row("IND", "MASON", TierLevel::Minor, 0.02));
    let tiers = engine().get_all_tiers(&world.snapshot("EGY"), &nat("EGY"));

    let order: Vec<&str> = tiers.iter().map(|info| info.profession.0.as_str()).collect();
    assert_eq!(order, vec!["MASON", "ELEC", "COOK"]);
    assert_eq!(tiers[0].tier_name, "Primary");
}

#[test]
fn assignments_open_a_fresh_generation() {
    let snapshot = demand_world().snapshot("EGY");
    let discovery = engine().discover_tiers(&snapshot, &nat("EGY"));
    let rows = TierDiscoveryEngine::assignments(&discovery, &nat("EGY"), now());

    assert_eq!(rows.len(), 5);
    assert!(rows
        .iter()
        .all(|row| row.valid_from == now() && row.valid_to.is_none()));
    let mason = rows
        .iter()
        .find(|row| row.profession == prof("MASON"))
        .expect("mason row");
    assert_eq!(mason.request_count, 120);
    assert!((mason.share - 0.6).abs() < 1e-9);
}

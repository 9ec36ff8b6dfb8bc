use crate::infra::{QuotaService, SeedRoster};
use chrono::{Datelike, Utc};
use clap::Args;
use nationality_quota::allocation::{
    DecisionType, EstablishmentId, NationalityCode, ProcessedRequest, ProfessionId,
    RequestSubmission, ServiceError, SystemClock, TierDiscovery, TierLevel, TierStatusResult,
};
use nationality_quota::config::QuotaParameters;
use nationality_quota::error::AppError;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print the rule chain recorded for every decision.
    #[arg(long)]
    pub(crate) show_rules: bool,
}

#[derive(Args, Debug)]
pub(crate) struct HeadroomArgs {
    /// Nationality code, e.g. EGY
    pub(crate) nationality: String,
    /// Leave projected outflow out of effective headroom
    #[arg(long)]
    pub(crate) without_outflow: bool,
    /// JSON roster to load instead of the built-in demo roster
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
}

pub(crate) fn run_headroom(args: HeadroomArgs) -> Result<(), AppError> {
    let HeadroomArgs {
        nationality,
        without_outflow,
        seed,
    } = args;

    let seeded = SeedRoster::load(seed.as_deref(), Utc::now())?
        .into_service(&QuotaParameters::default(), Arc::new(SystemClock))?;
    let nationality = NationalityCode::new(nationality);
    seeded.service.refresh_tiers(&nationality)?;

    let headroom = seeded.service.headroom(&nationality, !without_outflow)?;
    println!("Headroom for {} ({})", headroom.nationality, headroom.year);
    println!(
        "- cap {} | stock {} | committed {} | pending {} (weighted {})",
        headroom.cap, headroom.stock, headroom.committed, headroom.pending, headroom.pending_weighted
    );
    if headroom.outflow_included {
        println!("- projected outflow {}", headroom.projected_outflow);
    }
    println!(
        "- raw {} | effective {} | utilization {:.1}%",
        headroom.raw_headroom,
        headroom.effective_headroom,
        headroom.utilization * 100.0
    );

    render_tier_table(&seeded.service.tier_status(&nationality)?);
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let now = Utc::now();
    let seeded = SeedRoster::demo(now)
        .into_service(&QuotaParameters::default(), Arc::new(SystemClock))?;
    let service = &seeded.service;
    let egy = NationalityCode::new("EGY");
    let npl = NationalityCode::new("NPL");

    println!("Nationality quota demo");
    for nationality in [&egy, &npl] {
        match service.refresh_tiers(nationality)? {
            TierDiscovery::Classified { total_requests, .. } => {
                println!("\nTiers for {nationality} ({total_requests} workers requested in window)");
                for tier in service.tiers(nationality)? {
                    println!(
                        "- {:<7} Tier {} {:<9} {:>5.1}%",
                        tier.profession.0,
                        tier.tier.number(),
                        tier.tier_name,
                        tier.share * 100.0
                    );
                }
            }
            TierDiscovery::InsufficientData {
                total_requests,
                required,
            } => println!(
                "\n{nationality}: {total_requests} of {required} workers requested, tiers default to Unusual"
            ),
        }
    }

    let snapshot = service.capacity_snapshot(&egy)?;
    println!(
        "\nEGY capacity: cap {} | stock {} | outflow {} (exits {}, expiring {}) | effective {}",
        snapshot.headroom.cap,
        snapshot.headroom.stock,
        snapshot.outflow.adjusted_outflow,
        snapshot.outflow.final_exits,
        snapshot.outflow.expiring_contracts,
        snapshot.headroom.effective_headroom
    );
    render_tier_table(&snapshot.tier_status);

    println!("\nRequests");
    let electricians = service.process_request(submission("EGY", "ELEC", "EST-100", 8))?;
    render_decision(service, "EGY electricians x8", &electricians, args.show_rules)?;
    let masons = service.process_request(submission("EGY", "MASON", "EST-100", 5))?;
    render_decision(service, "EGY masons x5", &masons, args.show_rules)?;
    let tailors = service.process_request(submission("EGY", "TAILOR", "EST-300", 2))?;
    render_decision(service, "EGY tailors x2", &tailors, args.show_rules)?;
    let cooks = service.process_request(submission("NPL", "COOK", "EST-200", 12))?;
    render_decision(service, "NPL cooks x12", &cooks, args.show_rules)?;
    let drivers = service.process_request(submission("NPL", "DRIVER", "EST-300", 6))?;
    render_decision(service, "NPL drivers x6", &drivers, args.show_rules)?;

    let queue = service.queue_status(&npl)?;
    println!(
        "\nNPL waiting list: {} requests, {} workers",
        queue.total_requests, queue.total_workers
    );

    let limit = seeded
        .roster
        .raise_cap(&npl, now.year(), 40)
        .map_err(ServiceError::from)?;
    println!("NPL cap raised to {limit}");
    let report = service.process_queue(&npl, TierLevel::Primary)?;
    println!(
        "- drained {} tier {}: {} approved, {} blocked, {} of {} slots used, {} still queued",
        report.nationality,
        report.tier.number(),
        report.approved_requests.len(),
        report.blocked_requests.len(),
        report.capacity_used,
        report.capacity,
        report.remaining_in_queue
    );
    for id in &report.approved_requests {
        let request = service.get_request(id)?;
        println!(
            "  - {id}: {} {} of {}",
            request.status.label(),
            request.approved_count,
            request.requested_count
        );
    }

    println!("\nDominance alerts for EGY");
    for alert in service.refresh_alerts(&egy)? {
        println!(
            "- {:<7} {:<8} {:>5.1}% of {} | {}",
            alert.profession.0,
            alert.level.label(),
            alert.share * 100.0,
            alert.total_in_profession,
            alert.message
        );
    }

    Ok(())
}

fn submission(nationality: &str, profession: &str, establishment: &str, count: u32) -> RequestSubmission {
    RequestSubmission {
        nationality: NationalityCode::new(nationality),
        profession: ProfessionId(profession.to_string()),
        establishment: EstablishmentId(establishment.to_string()),
        requested_count: count,
    }
}

fn render_tier_table(table: &TierStatusResult) {
    println!("Tier cascade (headroom {})", table.headroom);
    for row in &table.tiers {
        println!(
            "- Tier {} {:<8} demand {:>4} | capacity {:>4}",
            row.tier.number(),
            row.status.label(),
            row.demand,
            row.capacity
        );
    }
}

fn render_decision(
    service: &QuotaService,
    label: &str,
    processed: &ProcessedRequest,
    show_rules: bool,
) -> Result<(), AppError> {
    let decision = &processed.decision;
    println!(
        "- {label}: {} (approved {}, queued {}) tier {} {} | priority {}",
        decision.decision.label(),
        decision.approved_count,
        decision.queued_count,
        decision.tier_level.number(),
        decision.tier_status.label(),
        decision.priority_score
    );
    println!("  {}", decision.reason);
    if decision.requires_review {
        println!("  flagged for review ({} dominance)", decision.dominance_level.label());
    }
    if decision.decision == DecisionType::Blocked {
        for alternative in &decision.alternatives {
            println!("  alternative: {alternative}");
        }
    }
    if let Some(entry) = &processed.queue_entry {
        println!(
            "  queued at position {} until {}",
            entry.position,
            entry.expiry_at.date_naive()
        );
    }
    if show_rules {
        for log in service.decision_history(&processed.request.id)? {
            for step in &log.rule_chain {
                println!("    {:?}: {}", step.rule, step.result);
            }
        }
    }
    Ok(())
}

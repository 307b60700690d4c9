//! Output formatting for CLI commands.
//!
//! This module handles formatting output as either JSON or human-readable text.

use std::collections::BTreeMap;

use anyhow::Result;
use casegate::acl::{
    AccessMap, BootstrapReport, CaseAccessLevel, CaseId, Drift, Resolution, SyncReport,
    SyncSummary, UserId,
};
use serde::Serialize;

#[derive(Serialize)]
struct AccessRow {
    case_id: CaseId,
    access_level: Vec<&'static str>,
}

#[derive(Serialize)]
struct CheckResult {
    user_id: UserId,
    case_id: CaseId,
    required: Vec<&'static str>,
    allowed: bool,
    granted: Option<Vec<&'static str>>,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn level_text(level: Option<CaseAccessLevel>) -> String {
    level.map_or_else(|| "-".to_string(), |l| l.to_string())
}

/// Print a user's resolved access.
pub fn print_access_map(user_id: UserId, access: &AccessMap, json: bool) -> Result<()> {
    if json {
        let rows: Vec<AccessRow> = access
            .iter()
            .map(|(case_id, level)| AccessRow {
                case_id: *case_id,
                access_level: level.names(),
            })
            .collect();
        return print_json(&rows);
    }

    if access.is_empty() {
        println!("User {} has no case access.", user_id);
        return Ok(());
    }
    println!("Effective access for user {}:\n", user_id);
    for (case_id, level) in access {
        println!("  case {:>6}  {}", case_id, level);
    }
    Ok(())
}

/// Print how one case resolved for a user.
pub fn print_resolution(
    user_id: UserId,
    case_id: CaseId,
    resolution: &Option<Resolution>,
    json: bool,
) -> Result<()> {
    if json {
        return print_json(resolution);
    }

    match resolution {
        Some(r) => {
            println!("User {} on case {}", user_id, case_id);
            println!("Source: {:?}", r.source);
            println!("Granted: {}", r.granted);
            println!("Effective: {}", r.effective);
        }
        None => println!("No grant reaches user {} on case {}.", user_id, case_id),
    }
    Ok(())
}

/// Print an access check decision.
pub fn print_check(
    user_id: UserId,
    case_id: CaseId,
    required: CaseAccessLevel,
    granted: Option<CaseAccessLevel>,
    json: bool,
) -> Result<()> {
    if json {
        return print_json(&CheckResult {
            user_id,
            case_id,
            required: required.names(),
            allowed: granted.is_some(),
            granted: granted.map(|l| l.names()),
        });
    }

    match granted {
        Some(level) => println!("ALLOWED: user {} has {} on case {}", user_id, level, case_id),
        None => println!(
            "DENIED: user {} does not have {} on case {}",
            user_id,
            if required.is_empty() {
                "any access".to_string()
            } else {
                required.to_string()
            },
            case_id
        ),
    }
    Ok(())
}

/// Print a single-user sync report.
pub fn print_sync_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    if report.is_noop() {
        println!("User {} already up to date.", report.user_id);
    } else {
        println!(
            "Synchronized user {}: {} inserted, {} updated, {} deleted",
            report.user_id, report.inserted, report.updated, report.deleted
        );
    }
    Ok(())
}

/// Print a multi-user sync summary.
pub fn print_sync_summary(summary: &SyncSummary, json: bool) -> Result<()> {
    if json {
        return print_json(summary);
    }
    println!("Synchronized {} users", summary.users);
    println!("Inserted: {}", summary.inserted);
    println!("Updated: {}", summary.updated);
    println!("Deleted: {}", summary.deleted);
    Ok(())
}

/// Print cache drift.
pub fn print_drift(drift: &BTreeMap<UserId, Vec<Drift>>, json: bool) -> Result<()> {
    if json {
        let rows: Vec<_> = drift
            .iter()
            .flat_map(|(user_id, cases)| {
                cases.iter().map(move |d| {
                    serde_json::json!({
                        "user_id": user_id,
                        "case_id": d.case_id,
                        "cached": d.cached.map(|l| l.names()),
                        "expected": d.expected.map(|l| l.names()),
                    })
                })
            })
            .collect();
        return print_json(&rows);
    }

    if drift.is_empty() {
        println!("Effective access cache is consistent.");
        return Ok(());
    }
    for (user_id, cases) in drift {
        println!("User {}:", user_id);
        for d in cases {
            println!(
                "  case {:>6}  cached {}  expected {}",
                d.case_id,
                level_text(d.cached),
                level_text(d.expected)
            );
        }
    }
    Ok(())
}

/// Print bootstrap results.
pub fn print_bootstrap(report: &BootstrapReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    if report.created_groups.is_empty() {
        println!("Default groups already present.");
    } else {
        println!("Created groups: {}", report.created_groups.join(", "));
    }
    if let Some(summary) = &report.rebuild {
        println!(
            "Rebuilt cache for {} users ({} rows written)",
            summary.users,
            summary.writes()
        );
    }
    Ok(())
}

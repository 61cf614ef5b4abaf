//! `roster sync`: one reconciliation run.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use roster_core::{Config, UnitKey};
use roster_sync::{pipeline, ChangeCounts, RunOptions, RunReport};

/// Arguments for `roster sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Ignore stored watermarks for this run (they are still advanced).
    #[arg(long)]
    pub full: bool,

    /// Drop cohort members not seen during this run. Implies `--full`.
    #[arg(long)]
    pub purge_cohorts: bool,

    /// Run everything, then roll back and leave the watermarks alone.
    #[arg(long)]
    pub dry_run: bool,

    /// Restrict the run to this configured unit (repeatable).
    #[arg(long = "unit", value_name = "KEY")]
    pub units: Vec<String>,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, config: &Config) -> Result<()> {
        let options = RunOptions {
            full: self.full,
            purge_cohorts: self.purge_cohorts,
            dry_run: self.dry_run,
            units: self.units.into_iter().map(UnitKey::from).collect(),
        };
        let report = pipeline::run(config, &options).context("sync failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize run report")?
            );
            return Ok(());
        }
        print_summary(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct UnitRow {
    #[tabled(rename = "unit")]
    unit: String,
    #[tabled(rename = "scan")]
    scan: String,
    #[tabled(rename = "persons")]
    persons: usize,
    #[tabled(rename = "created")]
    created: usize,
    #[tabled(rename = "updated")]
    updated: usize,
    #[tabled(rename = "grants +/-")]
    grants: String,
    #[tabled(rename = "cohorts +/-")]
    cohorts: String,
}

fn row(unit: String, scan: String, counts: &ChangeCounts) -> UnitRow {
    UnitRow {
        unit,
        scan,
        persons: counts.seen,
        created: counts.created,
        updated: counts.updated,
        grants: format!("+{} -{}", counts.grants_added, counts.grants_revoked),
        cohorts: format!("+{} -{}", counts.memberships_added, counts.memberships_removed),
    }
}

fn scan_label(since: Option<roster_core::DirectoryTimestamp>, skipped: bool) -> String {
    match (skipped, since) {
        (true, _) => "skipped".yellow().to_string(),
        (false, Some(ts)) => format!("since {ts}"),
        (false, None) => "full".to_string(),
    }
}

fn print_summary(report: &RunReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let mut rows = Vec::new();
    for unit in &report.units {
        let counts = unit.persons();
        let name = match &unit.canonical_key {
            Some(canonical) if canonical != &unit.key => format!("{} → {canonical}", unit.key),
            _ => unit.key.to_string(),
        };
        rows.push(row(name, scan_label(unit.since, unit.skipped), &counts));
    }
    for pass in &report.cross_unit {
        rows.push(row(
            format!("{} (cross-unit)", pass.key),
            scan_label(pass.since, false),
            &pass.persons,
        ));
    }

    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let totals = report.totals();
    println!(
        "{prefix}{} {} persons ({} created, {} updated), {} grants added, {} revoked ({} local admin), {} purged memberships",
        "✓".green(),
        totals.seen,
        totals.created,
        totals.updated,
        totals.grants_added,
        totals.grants_revoked + report.admin_grants_revoked,
        report.admin_grants_revoked,
        report.memberships_purged,
    );
    if report.dry_run {
        println!("{prefix}transaction rolled back; watermarks unchanged");
    }
    if !report.warnings.is_empty() {
        println!("{} {} warning(s):", "!".yellow(), report.warnings.len());
        for warning in &report.warnings {
            println!("  · {warning}");
        }
    }
}

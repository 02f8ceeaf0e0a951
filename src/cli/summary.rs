//! Human-readable run summary

use console::style;
use tabled::{builder::Builder, settings::Style};

use crate::cli::helpers::{plural, truncate_str};
use crate::core::ReconcileReport;

const TEST_NAME_WIDTH: usize = 72;

/// Table of the validated associations a dry run would write
pub fn plan_table(report: &ReconcileReport) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Test Case", "Automated Test"]);
    for (test_name, test_case_id) in &report.planned {
        builder.push_record([
            test_case_id.clone(),
            truncate_str(test_name, TEST_NAME_WIDTH),
        ]);
    }
    builder.build().with(Style::markdown()).to_string()
}

/// Counts table for a completed run
pub fn counts_table(report: &ReconcileReport) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Metric", "Count"]);
    builder.push_record([
        "Known before run".to_string(),
        report.known_before.len().to_string(),
    ]);
    builder.push_record(["Validated".to_string(), report.planned.len().to_string()]);
    builder.push_record(["Associated".to_string(), report.associated.len().to_string()]);
    builder.push_record(["Unchanged".to_string(), report.unchanged.len().to_string()]);
    builder.push_record(["Cleared".to_string(), report.cleared.len().to_string()]);
    builder.push_record([
        "Missing [TestCaseId]".to_string(),
        report.missing.len().to_string(),
    ]);
    builder.build().with(Style::markdown()).to_string()
}

/// Print the summary to stdout
pub fn print(report: &ReconcileReport, quiet: bool) {
    if report.dry_run {
        println!(
            "{} Dry run: {} validated, no work items changed",
            style("✓").green(),
            plural(report.planned.len(), "association")
        );
    } else {
        println!(
            "{} Associated {}, {} unchanged, cleared {}",
            style("✓").green(),
            plural(report.associated.len(), "test case"),
            report.unchanged.len(),
            plural(report.cleared.len(), "orphan")
        );
    }

    if !report.missing.is_empty() {
        println!(
            "{} {} without [TestCaseId] (within threshold)",
            style("!").yellow(),
            plural(report.missing.len(), "test")
        );
    }

    if quiet {
        return;
    }

    println!();
    if report.dry_run {
        println!("{}", plan_table(report));
    } else {
        println!("{}", counts_table(report));
    }
}

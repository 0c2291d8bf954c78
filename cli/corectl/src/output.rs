//! Output formatting for verb results.

use colored::Colorize;
use tabled::{Table, Tabled};

use crate::report::VerbReport;

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "ACTION")]
    action: String,
    #[tabled(rename = "RESULT")]
    result: String,
}

/// Print a verb's per-node outcomes as a table.
pub fn print_report(report: &VerbReport) {
    if report.outcomes().is_empty() {
        println!("{}", "Nothing to do.".dimmed());
        return;
    }

    let rows: Vec<OutcomeRow> = report
        .outcomes()
        .iter()
        .map(|o| OutcomeRow {
            target: o.target.clone(),
            action: o.action.clone(),
            result: match &o.result {
                Ok(()) => "ok".to_string(),
                Err(e) => format!("failed: {e}"),
            },
        })
        .collect();
    println!("{}", Table::new(rows));

    let failures = report.failures().count();
    if failures == 0 {
        print_success(&format!("{} completed", report.verb()));
    } else {
        eprintln!(
            "{} {} finished with {} failure(s)",
            "Warning:".yellow().bold(),
            report.verb(),
            failures
        );
    }
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Human-readable rendering of link operation results.

use pcie_link::LinkReport;
use pcie_link::Outcome;

/// Prints one endpoint's report, devices in path order.
pub fn print(report: &LinkReport) {
    println!("{} for {}:", report.operation, report.endpoint);
    for d in &report.devices {
        let values = match (d.prior, d.updated) {
            (Some(prior), Some(updated)) => format!(" ({prior:#06x} -> {updated:#06x})"),
            (Some(prior), None) => format!(" ({prior:#06x})"),
            _ => String::new(),
        };
        let what = match &d.outcome {
            Outcome::Applied => "applied".to_owned(),
            Outcome::AlreadyCorrect => "already set".to_owned(),
            Outcome::Excluded { reason } => format!("not in scope: {reason}"),
            Outcome::Skipped { reason } => format!("skipped: {reason}"),
            Outcome::Failed { reason } => format!("FAILED: {reason}"),
        };
        println!("  {} ({}): {what}{values}", d.bdf, d.role);
    }
    if let Some(failure) = &report.failure {
        println!("  Error: {failure}");
    }
}

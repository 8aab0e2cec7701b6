//! Plain text report for terminals

use super::ReconcileReport;
use std::fmt::Write;

pub fn generate(report: &ReconcileReport) -> String {
    let mut out = String::new();
    let rule = "=".repeat(50);

    let _ = writeln!(out, "Reconciliation Report\n{}", rule);
    if let Some(key) = &report.record_key {
        let _ = writeln!(out, "Receipt: {}", key);
    }
    let _ = writeln!(out, "Expected items: {}", report.outcome.expected.len());
    let _ = writeln!(out, "Scanned items: {}", report.outcome.scanned.len());
    let _ = writeln!(
        out,
        "Result: {}",
        if report.outcome.matched { "VERIFIED" } else { "MISMATCH" }
    );

    if report.outcome.matched {
        let _ = writeln!(out, "\nDeactivation:");
        for result in &report.deactivations {
            let status = if result.succeeded { "OK" } else { "FAILED" };
            let _ = writeln!(out, "  {:<6} {} ({})", status, result.identifier, result.detail);
        }
    } else {
        let _ = writeln!(out, "\nExpected: {}", join(&report.outcome.expected));
        let _ = writeln!(out, "Scanned:  {}", join(&report.outcome.scanned));
    }

    let _ = writeln!(out, "{}\n{}", rule, report.message);
    out
}

fn join(ids: &[crate::Identifier]) -> String {
    if ids.is_empty() {
        return "(none)".to_string();
    }
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

//! JSON report generation

use super::{ReconcileReport, ReportError};

pub fn generate(report: &ReconcileReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

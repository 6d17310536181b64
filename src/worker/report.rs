//! Line protocol spoken by command workers on stdout.
//!
//! Each line is a list of whitespace separated `key=value` tokens, e.g.
//! `coverage=137.25 errors=0` or `status=stopping`. Unknown keys are ignored
//! so workers can print extra diagnostics on the same stream.

use super::types::Snapshot;

/// Information extracted from one stdout line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportLine {
    Progress(Snapshot),
    Stopping,
}

pub fn parse_report_line(line: &str) -> Option<ReportLine> {
    let mut coverage = None;
    let mut errors = None;
    let mut stopping = false;

    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "coverage" => coverage = parse_coverage(value),
            "errors" => errors = value.parse::<u64>().ok(),
            "status" => stopping = value.eq_ignore_ascii_case("stopping"),
            _ => {}
        }
    }

    if let (Some(coverage), Some(errors)) = (coverage, errors) {
        return Some(ReportLine::Progress(Snapshot::new(coverage, errors)));
    }
    if stopping {
        return Some(ReportLine::Stopping);
    }
    None
}

fn parse_coverage(value: &str) -> Option<f64> {
    let value = value.strip_suffix('%').unwrap_or(value);
    value
        .parse::<f64>()
        .ok()
        .filter(|coverage| coverage.is_finite() && *coverage >= 0.0)
}

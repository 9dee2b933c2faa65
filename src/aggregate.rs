//! Turns raw per-port outcomes into the ordered, service-tagged scan summary.
use std::time::Duration;

use crate::types::{now_rfc3339, PortOutcome, PortRecord, ScanSpec, ScanSummary};

/// Keep reachable ports, tag each with its service name, and sort ascending by port.
pub fn open_records(outcomes: &[PortOutcome]) -> Vec<PortRecord> {
    let mut open: Vec<PortRecord> = outcomes
        .iter()
        .filter(|o| o.reachable)
        .map(|o| PortRecord::open(o.port))
        .collect();
    open.sort_unstable_by_key(|r| r.port);
    open
}

/// Build the summary for a finished scan.
///
/// # Panics
///
/// If `outcomes` does not hold exactly one outcome per port of `spec`. The
/// engine guarantees this, so a mismatch is a bug rather than a runtime condition.
pub fn aggregate(spec: &ScanSpec, outcomes: Vec<PortOutcome>, elapsed: Duration) -> ScanSummary {
    let total = spec.total_ports();
    assert_eq!(
        outcomes.len(),
        total,
        "expected one outcome per port in {}-{}",
        spec.start_port(),
        spec.end_port()
    );
    let mut seen = vec![false; total];
    for o in &outcomes {
        assert!(
            spec.ports().contains(&o.port),
            "outcome for port {} outside {}-{}",
            o.port,
            spec.start_port(),
            spec.end_port()
        );
        let slot = &mut seen[usize::from(o.port - spec.start_port())];
        assert!(!*slot, "duplicate outcome for port {}", o.port);
        *slot = true;
    }

    let open_ports = open_records(&outcomes);

    ScanSummary {
        target: spec.host().to_string(),
        start_port: spec.start_port(),
        end_port: spec.end_port(),
        closed_ports: total - open_ports.len(),
        total_ports: total,
        open_ports,
        elapsed,
        timestamp: now_rfc3339(),
        error: None,
    }
}

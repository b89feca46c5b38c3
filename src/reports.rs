use std::collections::HashSet;

use crate::types::ProbeResult;

/// Accumulates every probe result of the current scan (full report) and a
/// filtered view of it selected by accepted outcome codes.
///
/// Both reports are ordered by arrival, which is completion order, not
/// address order. The filter is a whitelist: an empty accepted set yields an
/// always-empty filtered report. Changing the filter never requires
/// re-running probes; the filtered report is recomputed from the
/// accumulated full report.
#[derive(Debug, Default)]
pub struct Reports {
    accepted: HashSet<i32>,
    full: Vec<ProbeResult>,
    filtered: Vec<ProbeResult>,
}

impl Reports {
    pub fn new(accepted: HashSet<i32>) -> Self {
        Self {
            accepted,
            full: Vec::new(),
            filtered: Vec::new(),
        }
    }

    /// Append one result; returns true when it also entered the filtered
    /// report.
    pub fn record(&mut self, result: ProbeResult) -> bool {
        let matches = self.accepted.contains(&result.code);
        if matches {
            self.filtered.push(result.clone());
        }
        self.full.push(result);
        matches
    }

    /// Replace the accepted-code set and synchronously recompute the
    /// filtered report with a full pass over the accumulated results.
    pub fn set_accepted(&mut self, accepted: HashSet<i32>) {
        self.accepted = accepted;
        self.filtered = self
            .full
            .iter()
            .filter(|r| self.accepted.contains(&r.code))
            .cloned()
            .collect();
    }

    pub fn clear(&mut self) {
        self.full.clear();
        self.filtered.clear();
    }

    pub fn accepted(&self) -> &HashSet<i32> {
        &self.accepted
    }

    pub fn full(&self) -> &[ProbeResult] {
        &self.full
    }

    pub fn filtered(&self) -> &[ProbeResult] {
        &self.filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn result(last_octet: u8, code: i32) -> ProbeResult {
        ProbeResult {
            address: Ipv4Addr::new(10, 0, 0, last_octet),
            port: 8080,
            code,
            message: String::new(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn record_routes_by_accepted_code() {
        let mut reports = Reports::new([0].into_iter().collect());
        assert!(reports.record(result(1, 0)));
        assert!(!reports.record(result(2, 7)));
        assert_eq!(reports.full().len(), 2);
        assert_eq!(reports.filtered().len(), 1);
    }

    #[test]
    fn refilter_recomputes_from_full_report() {
        let mut reports = Reports::new([0].into_iter().collect());
        reports.record(result(1, 0));
        reports.record(result(2, 7));
        reports.record(result(3, 0));

        reports.set_accepted([7].into_iter().collect());
        assert_eq!(reports.filtered().len(), 1);
        assert_eq!(reports.filtered()[0].address, Ipv4Addr::new(10, 0, 0, 2));

        // Idempotent: same set, same view.
        reports.set_accepted([7].into_iter().collect());
        assert_eq!(reports.filtered().len(), 1);
        assert_eq!(reports.full().len(), 3);
    }

    #[test]
    fn empty_accepted_set_filters_everything_out() {
        let mut reports = Reports::new(HashSet::new());
        reports.record(result(1, 0));
        assert!(reports.filtered().is_empty());
        assert_eq!(reports.full().len(), 1);
    }

    #[test]
    fn filtered_preserves_arrival_order() {
        let mut reports = Reports::new([0].into_iter().collect());
        reports.record(result(4, 0));
        reports.record(result(1, 0));
        let octets: Vec<u8> = reports
            .filtered()
            .iter()
            .map(|r| r.address.octets()[3])
            .collect();
        assert_eq!(octets, vec![4, 1]);
    }

    #[test]
    fn clear_empties_both_reports() {
        let mut reports = Reports::new([0].into_iter().collect());
        reports.record(result(1, 0));
        reports.clear();
        assert!(reports.full().is_empty());
        assert!(reports.filtered().is_empty());
    }
}

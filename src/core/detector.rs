//! Rate-based DoS/DDoS detection.
//!
//! The detector keeps one rolling window of per-source and aggregate
//! packet counts. Evaluation is opportunistic: it happens on packet
//! arrival once at least one window length has elapsed, so under sparse
//! traffic the real window can exceed the configured length. That
//! approximation is intentional and must be preserved.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::events::Alert;
use crate::models::DetectionConfig;

/// Rate detector owned by the ingestion worker.
///
/// Counter mutation is single-threaded by construction; the detector is
/// not shared across tasks.
pub struct RateDetector {
    per_source: HashMap<String, u32>,
    total: u32,
    window_start: Instant,
    window: Duration,
    per_source_threshold: u32,
    aggregate_threshold: u32,
}

impl RateDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            per_source: HashMap::new(),
            total: 0,
            window_start: Instant::now(),
            window: Duration::from_millis(config.window_millis),
            per_source_threshold: config.per_source_threshold,
            aggregate_threshold: config.aggregate_threshold,
        }
    }

    /// Count one packet and evaluate the window if it has elapsed.
    ///
    /// Records without a usable source IP are ignored entirely; they
    /// neither count nor trigger an evaluation.
    pub fn observe(&mut self, source_ip: &str) -> Vec<Alert> {
        if source_ip.is_empty() || source_ip == crate::core::parser::FIELD_PLACEHOLDER {
            return Vec::new();
        }
        self.total += 1;
        *self.per_source.entry(source_ip.to_string()).or_insert(0) += 1;

        if self.window_start.elapsed() >= self.window {
            self.evaluate()
        } else {
            Vec::new()
        }
    }

    /// Evaluate every counter against the thresholds, then reset the window.
    ///
    /// Exactly one DoS alert per qualifying IP and at most one DDoS alert
    /// are produced per evaluation. No deduplication is carried across
    /// evaluations: a persistently noisy IP is re-alerted every window.
    fn evaluate(&mut self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for (ip, count) in &self.per_source {
            if *count > self.per_source_threshold {
                alerts.push(Alert::dos(
                    ip,
                    format!("Possible DoS from IP {}: {} pkts/sec", ip, count),
                ));
            }
        }
        if self.total > self.aggregate_threshold {
            alerts.push(Alert::ddos(format!(
                "Possible DDoS: total packet surge ({} pkts/sec)",
                self.total
            )));
        }
        self.per_source.clear();
        self.total = 0;
        self.window_start = Instant::now();
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AlertKind;

    fn detector(per_source: u32, aggregate: u32, window_millis: u64) -> RateDetector {
        RateDetector::new(&DetectionConfig {
            per_source_threshold: per_source,
            aggregate_threshold: aggregate,
            window_millis,
        })
    }

    fn feed(det: &mut RateDetector, ip: &str, n: usize) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for _ in 0..n {
            alerts.extend(det.observe(ip));
        }
        alerts
    }

    #[test]
    fn test_dos_alert_over_threshold() {
        let mut det = detector(100, 1000, 10);
        assert!(feed(&mut det, "9.9.9.9", 149).is_empty());
        std::thread::sleep(Duration::from_millis(20));
        // The 150th packet arrives after the window elapsed and triggers
        // the evaluation that sees all 150.
        let alerts = det.observe("9.9.9.9");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Dos);
        assert_eq!(alerts[0].source_ip.as_deref(), Some("9.9.9.9"));
        assert!(alerts[0].message.contains("9.9.9.9: 150 pkts/sec"));
    }

    #[test]
    fn test_no_alert_at_threshold() {
        let mut det = detector(100, 1000, 10);
        feed(&mut det, "10.0.0.1", 99);
        std::thread::sleep(Duration::from_millis(20));
        // 100th packet: count == threshold, strictly-greater semantics.
        assert!(det.observe("10.0.0.1").is_empty());
    }

    #[test]
    fn test_ddos_alert_independent_of_per_source() {
        // Spread traffic across many sources so no single one qualifies.
        let mut det = detector(100, 120, 10);
        for i in 0..125 {
            let ip = format!("10.1.{}.{}", i % 50, i / 50);
            det.observe(&ip);
        }
        std::thread::sleep(Duration::from_millis(20));
        let alerts = det.observe("10.9.9.9");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Ddos);
        assert!(alerts[0].message.contains("126"));
    }

    #[test]
    fn test_counts_reset_after_evaluation() {
        let mut det = detector(5, 1000, 10);
        feed(&mut det, "1.2.3.4", 10);
        std::thread::sleep(Duration::from_millis(20));
        let alerts = det.observe("1.2.3.4");
        assert_eq!(alerts.len(), 1);
        // A fresh window starts from zero: the same volume below the
        // threshold produces nothing.
        feed(&mut det, "1.2.3.4", 3);
        std::thread::sleep(Duration::from_millis(20));
        assert!(det.observe("5.6.7.8").is_empty());
    }

    #[test]
    fn test_placeholder_source_ignored() {
        let mut det = detector(0, 1000, 0);
        assert!(det.observe("-").is_empty());
        assert!(det.observe("").is_empty());
    }
}

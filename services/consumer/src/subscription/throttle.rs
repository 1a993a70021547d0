//! Decode-failure log throttling
//!
//! A misbehaving item can fail on every update. The throttle lets the first
//! failure through and then at most one report per interval, carrying the
//! running total and the count since the previous report.

use std::time::{Duration, Instant};

/// Default report interval
pub const FAILURE_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureReport {
    pub total: u64,
    pub since_last: u64,
}

#[derive(Debug, Clone)]
pub struct FailureThrottle {
    interval: Duration,
    total: u64,
    since_last: u64,
    last_report: Option<Instant>,
}

impl Default for FailureThrottle {
    fn default() -> Self {
        Self::new(FAILURE_REPORT_INTERVAL)
    }
}

impl FailureThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            total: 0,
            since_last: 0,
            last_report: None,
        }
    }

    /// Count `failures` and decide whether to log now
    pub fn record(&mut self, now: Instant, failures: u64) -> Option<FailureReport> {
        if failures == 0 {
            return None;
        }
        self.total += failures;
        self.since_last += failures;
        let due = match self.last_report {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if !due {
            return None;
        }
        self.last_report = Some(now);
        let report = FailureReport {
            total: self.total,
            since_last: self.since_last,
        };
        self.since_last = 0;
        Some(report)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_then_once_per_interval() {
        let start = Instant::now();
        let mut throttle = FailureThrottle::new(Duration::from_secs(60));
        assert_eq!(
            throttle.record(start, 1),
            Some(FailureReport { total: 1, since_last: 1 })
        );
        assert_eq!(throttle.record(start + Duration::from_secs(1), 2), None);
        assert_eq!(throttle.record(start + Duration::from_secs(59), 1), None);
        assert_eq!(
            throttle.record(start + Duration::from_secs(60), 1),
            Some(FailureReport { total: 5, since_last: 4 })
        );
        assert_eq!(throttle.record(start + Duration::from_secs(61), 0), None);
        assert_eq!(throttle.total(), 5);
    }
}

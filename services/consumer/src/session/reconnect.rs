//! Connection attempt policy
//!
//! Each attempt takes the next delay from the configured schedule and the
//! next host in rotation. The schedule position only resets on the first
//! failure after a session reached Live, so a flapping connection keeps
//! backing off.

use std::time::Duration;

use feed_config::ReconnectSchedule;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub host: String,
    pub delay: Duration,
    /// Position in the current failure sequence, from zero
    pub number: u32,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    schedule: ReconnectSchedule,
    hosts: Vec<String>,
    attempt: u32,
    next_host: usize,
    succeeded: bool,
}

impl ReconnectPolicy {
    pub fn new(schedule: ReconnectSchedule, hosts: Vec<String>) -> Self {
        Self {
            schedule,
            hosts,
            attempt: 0,
            next_host: 0,
            succeeded: false,
        }
    }

    /// Next host and the delay to wait before connecting; `None` without hosts
    pub fn next_attempt(&mut self) -> Option<Attempt> {
        if self.hosts.is_empty() {
            return None;
        }
        if self.succeeded {
            self.succeeded = false;
            self.attempt = 0;
        }
        let host = self.hosts[self.next_host % self.hosts.len()].clone();
        self.next_host = (self.next_host + 1) % self.hosts.len();
        let attempt = Attempt {
            host,
            delay: self.schedule.delay_for_attempt(self.attempt),
            number: self.attempt,
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(attempt)
    }

    /// The session reached Live on the current connection
    pub fn on_success(&mut self) {
        self.succeeded = true;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(policy: &mut ReconnectPolicy, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| policy.next_attempt().unwrap().delay.as_secs())
            .collect()
    }

    #[test]
    fn test_schedule_replays_and_sticks_on_last_entry() {
        let schedule = ReconnectSchedule::parse("0,3(3),10(3),30(6)").unwrap();
        let mut policy = ReconnectPolicy::new(schedule, vec!["a:1".into()]);
        assert_eq!(
            delays(&mut policy, 14),
            vec![0, 3, 3, 3, 10, 10, 10, 30, 30, 30, 30, 30, 30, 30]
        );
    }

    #[test]
    fn test_success_resets_on_next_failure_only() {
        let schedule = ReconnectSchedule::parse("0,5(2)").unwrap();
        let mut policy = ReconnectPolicy::new(schedule, vec!["a:1".into()]);
        assert_eq!(delays(&mut policy, 2), vec![0, 5]);
        policy.on_success();
        assert_eq!(policy.attempts(), 2);
        assert_eq!(delays(&mut policy, 3), vec![0, 5, 5]);
    }

    #[test]
    fn test_hosts_rotate() {
        let mut policy = ReconnectPolicy::new(
            ReconnectSchedule::default(),
            vec!["a:1".into(), "b:2".into()],
        );
        let hosts: Vec<_> = (0..3).map(|_| policy.next_attempt().unwrap().host).collect();
        assert_eq!(hosts, vec!["a:1", "b:2", "a:1"]);
    }

    #[test]
    fn test_no_hosts_no_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectSchedule::default(), Vec::new());
        assert!(policy.next_attempt().is_none());
    }
}

//! Reconnection schedule grammar
//!
//! A schedule is a comma-separated list of entries. Each entry is a delay in
//! seconds, optionally followed by a repeat count in parentheses:
//!
//! ```text
//! 0,3(3),10(3),30(6)
//! ```
//!
//! reads as: retry at once, then three times after 3s, three times after 10s,
//! then every 30s. The last entry keeps applying once the list is exhausted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid reconnect schedule entry '{entry}': {reason}")]
    InvalidEntry { entry: String, reason: &'static str },
}

/// One `delay(count)` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub delay: Duration,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSchedule {
    entries: Vec<ScheduleEntry>,
}

impl ReconnectSchedule {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        if entries.is_empty() {
            return Self::default();
        }
        Self { entries }
    }

    pub fn parse(input: &str) -> Result<Self, ScheduleError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let entries = trimmed
            .split(',')
            .map(parse_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Delay before the `attempt`-th connection attempt of a failure sequence (0-based)
    ///
    /// Attempts past the end of the schedule keep using the last entry.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut remaining = attempt;
        for entry in &self.entries {
            if remaining < entry.count {
                return entry.delay;
            }
            remaining -= entry.count;
        }
        self.entries.last().map(|e| e.delay).unwrap_or_default()
    }
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self {
            entries: vec![ScheduleEntry {
                delay: Duration::ZERO,
                count: 1,
            }],
        }
    }
}

fn parse_entry(raw: &str) -> Result<ScheduleEntry, ScheduleError> {
    let entry = raw.trim();
    let invalid = |reason| ScheduleError::InvalidEntry {
        entry: entry.to_string(),
        reason,
    };
    if entry.is_empty() {
        return Err(invalid("empty entry"));
    }

    let (delay_part, count) = match entry.find('(') {
        Some(open) => {
            let close = entry.strip_suffix(')').ok_or_else(|| invalid("missing ')'"))?;
            let count_str = close[open + 1..].trim();
            let count: u32 = count_str
                .parse()
                .map_err(|_| invalid("repeat count is not a number"))?;
            if count == 0 {
                return Err(invalid("repeat count must be at least 1"));
            }
            (entry[..open].trim(), count)
        }
        None => (entry, 1),
    };

    let secs: u64 = delay_part
        .parse()
        .map_err(|_| invalid("delay is not a whole number of seconds"))?;
    Ok(ScheduleEntry {
        delay: Duration::from_secs(secs),
        count,
    })
}

impl FromStr for ReconnectSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ReconnectSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", entry.delay.as_secs())?;
            if entry.count != 1 {
                write!(f, "({})", entry.count)?;
            }
        }
        Ok(())
    }
}

impl Serialize for ReconnectSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReconnectSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

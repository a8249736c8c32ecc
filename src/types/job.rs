//! Production job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, MachineId};

/// A time range; `end: None` means the range is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn open(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Whether `ts` falls inside the range (inclusive on both bounds;
    /// an open range has no upper bound).
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && self.end.is_none_or(|end| ts <= end)
    }
}

/// A production job (order run) on one machine.
///
/// A job may run over several disjoint time ranges (interruptions,
/// shift breaks); the currently active job's final range is open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionJob {
    pub id: JobId,
    pub machine: MachineId,
    /// Order or article reference from the production registry, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    /// Time ranges in chronological order; only the last may be open.
    pub ranges: Vec<TimeRange>,
}

impl ProductionJob {
    pub fn new(id: impl Into<JobId>, machine: impl Into<MachineId>) -> Self {
        Self {
            id: id.into(),
            machine: machine.into(),
            order: None,
            ranges: Vec::new(),
        }
    }

    /// Builder-style range appending, mainly for tests and adapters.
    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Whether every range has ended (the job is no longer running).
    pub fn is_closed(&self) -> bool {
        self.ranges.last().is_none_or(|r| !r.is_open())
    }

    /// Copy of this job with an open final range provisionally ended at
    /// `now`. The original is untouched; stored jobs keep their open end
    /// so later resolutions synthesize against fresher clocks.
    pub fn provisionally_ended(&self, now: DateTime<Utc>) -> Self {
        let mut job = self.clone();
        if let Some(last) = job.ranges.last_mut()
            && last.is_open()
        {
            last.end = Some(now);
        }
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, minute, 0).unwrap()
    }

    #[test]
    fn open_range_contains_later_times() {
        let range = TimeRange::open(ts(10));
        assert!(range.contains(ts(59)));
        assert!(!range.contains(ts(5)));
    }

    #[test]
    fn provisional_end_does_not_mutate_original() {
        let job = ProductionJob::new("job-7", "press-01").with_range(TimeRange::open(ts(0)));
        let ended = job.provisionally_ended(ts(42));

        assert_eq!(ended.ranges.last().unwrap().end, Some(ts(42)));
        assert!(job.ranges.last().unwrap().is_open());
    }

    #[test]
    fn provisional_end_leaves_closed_ranges_alone() {
        let job = ProductionJob::new("job-7", "press-01")
            .with_range(TimeRange::closed(ts(0), ts(10)));
        let ended = job.provisionally_ended(ts(42));
        assert_eq!(ended, job);
    }
}

//! Reminder timing strategies and fire-time resolution
//!
//! Supports three strategies:
//! - FixedTime: daily at a fixed local wall-clock time
//! - AfterDue: a fixed delay after a per-definition due instant
//! - RelativeOffset: minutes before a per-weekday anchor time
//!
//! Resolution is a pure function over the current instant, the local UTC
//! offset, and the anchors a module supplies, so callers control the clock.
//! It never yields an instant in the past: fixed and anchored times roll
//! forward to the next matching local day, and an elapsed due delay resolves
//! to `None`.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Unit for after-due delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    /// Delay in minutes
    Minutes,
    /// Delay in hours
    Hours,
    /// Delay in days
    Days,
}

impl DelayUnit {
    /// Convert a delay value in this unit to a duration
    pub fn duration(&self, value: i64) -> Duration {
        match self {
            DelayUnit::Minutes => Duration::minutes(value),
            DelayUnit::Hours => Duration::hours(value),
            DelayUnit::Days => Duration::days(value),
        }
    }
}

/// When a reminder fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Timing {
    /// Daily at a fixed local wall-clock time
    FixedTime {
        /// Hour of day (0-23)
        hour: u32,
        /// Minute of hour (0-59)
        minute: u32,
    },
    /// A delay after the definition's due instant
    AfterDue {
        /// Delay value
        value: i64,
        /// Delay unit
        unit: DelayUnit,
    },
    /// Minutes before the fire day's weekday anchor time
    RelativeOffset {
        /// Minutes before the anchor
        minutes_before: i64,
    },
}

impl Timing {
    /// Create a fixed daily time
    pub fn fixed_time(hour: u32, minute: u32) -> Self {
        Self::FixedTime { hour, minute }
    }

    /// Create a delay after the due instant
    pub fn after_due(value: i64, unit: DelayUnit) -> Self {
        Self::AfterDue { value, unit }
    }

    /// Create an offset before the weekday anchor
    pub fn relative_offset(minutes_before: i64) -> Self {
        Self::RelativeOffset { minutes_before }
    }

    /// Resolve the next fire instant strictly after `now`.
    ///
    /// `None` means the timing cannot fire right now: the due instant is
    /// missing or elapsed, no weekday anchor is set, or the wall-clock time
    /// is invalid.
    pub fn next_fire_at(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
        anchors: &TimingAnchors,
    ) -> Option<DateTime<Utc>> {
        match self {
            Timing::FixedTime { hour, minute } => {
                let local_now = now.with_timezone(&offset);
                let time = NaiveTime::from_hms_opt(*hour, *minute, 0)?;
                let mut date = local_now.date_naive();
                if local_now.time() >= time {
                    date = date.succ_opt()?;
                }
                let fire = date.and_time(time).and_local_timezone(offset).single()?;
                Some(fire.with_timezone(&Utc))
            }
            Timing::AfterDue { value, unit } => {
                let due = anchors.due_at?;
                let fire = due + unit.duration(*value);
                if fire > now {
                    Some(fire)
                } else {
                    None
                }
            }
            Timing::RelativeOffset { minutes_before } => {
                if anchors.weekday_anchors.is_empty() {
                    return None;
                }
                let local_now = now.with_timezone(&offset);
                let base = local_now.date_naive();
                // Large offsets can push candidates several days back, so
                // search far enough past one week to cover them.
                let span = (*minutes_before).max(0) / (24 * 60) + 8;
                for day in 0..=span {
                    let date = base + Duration::days(day);
                    let Some(anchor) = anchors.weekday_anchors.get(&date.weekday()) else {
                        continue;
                    };
                    let anchored = date.and_time(*anchor).and_local_timezone(offset).single()?;
                    let fire = (anchored - Duration::minutes(*minutes_before)).with_timezone(&Utc);
                    if fire > now {
                        return Some(fire);
                    }
                }
                None
            }
        }
    }
}

/// Per-definition inputs a module supplies for resolution
#[derive(Debug, Clone, Default)]
pub struct TimingAnchors {
    /// Due instant for after-due timings
    pub due_at: Option<DateTime<Utc>>,
    /// Anchor wall-clock time per weekday for relative-offset timings
    pub weekday_anchors: HashMap<Weekday, NaiveTime>,
}

impl TimingAnchors {
    /// Create empty anchors
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the due instant
    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    /// Set one weekday's anchor time
    pub fn with_weekday_anchor(mut self, weekday: Weekday, at: NaiveTime) -> Self {
        self.weekday_anchors.insert(weekday, at);
        self
    }

    /// Set the same anchor time for every weekday
    pub fn with_daily_anchor(mut self, at: NaiveTime) -> Self {
        for weekday in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            self.weekday_anchors.insert(weekday, at);
        }
        self
    }
}

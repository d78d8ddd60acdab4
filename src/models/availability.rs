use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::slot::TimeInterval;

pub const MINUTES_PER_DAY: u32 = 24 * 60;
const MAX_RANGE_DAYS: i64 = 62;

/// Inclusive range of calendar dates, interpreted in the organizer's timezone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.end < self.start {
            return Err(AppError::validation("date range end precedes its start"));
        }
        if self.len_days() > MAX_RANGE_DAYS {
            return Err(AppError::validation(format!(
                "date range spans {} days, limit is {MAX_RANGE_DAYS}",
                self.len_days()
            )));
        }
        Ok(())
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }

    /// The same range padded by `days` on each side.
    pub fn widened(&self, days: i64) -> Self {
        Self {
            start: self.start - Duration::days(days),
            end: self.end + Duration::days(days),
        }
    }
}

/// Daily working window as minutes from local midnight, `start < end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHours {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start_minute: 9 * 60,
            end_minute: 17 * 60,
        }
    }
}

impl WorkingHours {
    pub fn new(start_minute: u32, end_minute: u32) -> AppResult<Self> {
        let hours = Self {
            start_minute,
            end_minute,
        };
        hours.validate()?;
        Ok(hours)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.end_minute > MINUTES_PER_DAY {
            return Err(AppError::validation("working hours must end by midnight"));
        }
        if self.start_minute >= self.end_minute {
            return Err(AppError::validation(
                "working hours start must be earlier than their end",
            ));
        }
        Ok(())
    }

    /// Extends the window by `minutes` on both sides, clamped to the day.
    pub fn relaxed(&self, minutes: u32) -> Self {
        Self {
            start_minute: self.start_minute.saturating_sub(minutes),
            end_minute: (self.end_minute + minutes).min(MINUTES_PER_DAY),
        }
    }
}

/// Busy data for one calendar owner. `Unknown` means the calendar could not be
/// read and the owner is treated as fully open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "mode", content = "busy")]
pub enum ContactAvailability {
    Known(Vec<TimeInterval>),
    Unknown,
}

impl ContactAvailability {
    pub fn busy(&self) -> &[TimeInterval] {
        match self {
            ContactAvailability::Known(intervals) => intervals,
            ContactAvailability::Unknown => &[],
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ContactAvailability::Unknown)
    }
}

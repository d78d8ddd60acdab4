use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::models::availability::WorkingHours;

pub const DEFAULT_BUFFER_MINUTES: i64 = 15;
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// How long finished reservations are kept before hard deletion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "days")]
pub enum RetentionPolicy {
    KeepForever,
    Days(u32),
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Days(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    pub fn from_days(days: Option<i64>) -> Self {
        match days {
            Some(value) if value >= 0 => RetentionPolicy::Days(value as u32),
            _ => RetentionPolicy::KeepForever,
        }
    }

    pub fn as_days(self) -> Option<i64> {
        match self {
            RetentionPolicy::KeepForever => None,
            RetentionPolicy::Days(days) => Some(days as i64),
        }
    }

    pub fn window(self) -> Option<Duration> {
        self.as_days().map(Duration::days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerSettings {
    pub organizer_id: String,
    pub timezone: Tz,
    pub working_hours: WorkingHours,
    pub buffer_minutes: i64,
    pub include_weekends: bool,
    pub retention: RetentionPolicy,
    pub updated_at: DateTime<Utc>,
}

impl OrganizerSettings {
    pub fn defaults_for(organizer_id: impl Into<String>, timezone: Tz) -> Self {
        Self {
            organizer_id: organizer_id.into(),
            timezone,
            working_hours: WorkingHours::default(),
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
            include_weekends: false,
            retention: RetentionPolicy::default(),
            updated_at: Utc::now(),
        }
    }
}

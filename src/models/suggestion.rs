use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::slot::{ScoreFactor, TimeInterval};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Active,
    Expired,
    MeetingScheduled,
    Cleared,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Active => "active",
            SuggestionStatus::Expired => "expired",
            SuggestionStatus::MeetingScheduled => "meeting_scheduled",
            SuggestionStatus::Cleared => "cleared",
        }
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestionStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(SuggestionStatus::Active),
            "expired" => Ok(SuggestionStatus::Expired),
            "meeting_scheduled" => Ok(SuggestionStatus::MeetingScheduled),
            "cleared" => Ok(SuggestionStatus::Cleared),
            other => Err(AppError::database(format!(
                "unknown suggestion status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedSlot {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub score: f64,
    #[serde(default)]
    pub score_factors: Vec<ScoreFactor>,
    pub selected: bool,
    pub expires_at: DateTime<Utc>,
}

impl SuggestedSlot {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            start: self.start,
            end: self.end,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionSetRecord {
    pub id: String,
    pub batch_id: String,
    pub organizer_id: String,
    pub contact_id: String,
    pub contact_timezone: String,
    pub status: SuggestionStatus,
    pub slots: Vec<SuggestedSlot>,
    #[serde(default)]
    pub quarantine_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SuggestionSetRecord {
    pub fn all_slots_expired(&self, now: DateTime<Utc>) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|slot| slot.is_expired(now))
    }

    pub fn latest_expiry(&self) -> Option<DateTime<Utc>> {
        self.slots.iter().map(|slot| slot.expires_at).max()
    }

    pub fn find_slot(&self, interval: &TimeInterval) -> Option<&SuggestedSlot> {
        self.slots
            .iter()
            .find(|slot| slot.start == interval.start && slot.end == interval.end)
    }
}

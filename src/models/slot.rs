use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Half-open `[start, end)` interval in absolute time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Self> {
        if end <= start {
            return Err(AppError::validation("interval end must be after its start"));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `other`, padded by `buffer` on both sides, touches this interval.
    pub fn within_buffer_of(&self, other: &TimeInterval, buffer: Duration) -> bool {
        self.start < other.end + buffer && other.start - buffer < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSlot {
    pub contact_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone_of_contact: Tz,
}

impl CandidateSlot {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreFactor {
    pub name: String,
    pub weight: f64,
    /// Raw factor value in `[0, 1]`.
    pub value: f64,
    /// Points this factor adds to the final score.
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSlot {
    #[serde(flatten)]
    pub candidate: CandidateSlot,
    pub score: f64,
    pub score_factors: Vec<ScoreFactor>,
}

impl ScoredSlot {
    pub fn interval(&self) -> TimeInterval {
        self.candidate.interval()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.candidate.start
    }

    pub fn factor(&self, name: &str) -> Option<&ScoreFactor> {
        self.score_factors.iter().find(|factor| factor.name == name)
    }
}

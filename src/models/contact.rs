use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::models::availability::WorkingHours;

/// Read-only view of a contact as supplied by the contact directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactProfile {
    pub id: String,
    pub timezone: Tz,
    /// Reference used to query the contact's calendar, when one is linked.
    #[serde(default)]
    pub calendar_ref: Option<String>,
    /// Contact-local working window. Falls back to the organizer's window
    /// minutes, read in the contact's timezone.
    #[serde(default)]
    pub working_hours: Option<WorkingHours>,
    #[serde(default)]
    pub preferences: ContactPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactPreferences {
    /// Preferred band start, minutes from contact-local midnight.
    #[serde(default = "default_preferred_start")]
    pub preferred_start_minute: u32,
    #[serde(default = "default_preferred_end")]
    pub preferred_end_minute: u32,
    #[serde(default)]
    pub preferred_weekdays: Vec<Weekday>,
}

impl Default for ContactPreferences {
    fn default() -> Self {
        Self {
            preferred_start_minute: default_preferred_start(),
            preferred_end_minute: default_preferred_end(),
            preferred_weekdays: Vec::new(),
        }
    }
}

fn default_preferred_start() -> u32 {
    10 * 60
}

fn default_preferred_end() -> u32 {
    16 * 60
}

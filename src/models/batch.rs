use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::AllocationOptions;
use crate::error::NoViableReason;
use crate::models::availability::DateRange;
use crate::models::contact::ContactProfile;
use crate::models::suggestion::SuggestedSlot;

pub const MIN_DURATION_MINUTES: i64 = 15;
pub const MAX_DURATION_MINUTES: i64 = 8 * 60;
pub const MAX_SLOTS_PER_CONTACT: usize = 10;
pub const MAX_CONTACTS_PER_BATCH: usize = 200;

/// Identity context handed in by the session layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerContext {
    pub organizer_id: String,
    pub account_ref: String,
    pub timezone: Tz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub organizer: OrganizerContext,
    pub contacts: Vec<ContactProfile>,
    pub duration_minutes: i64,
    pub slots_per_contact: usize,
    pub date_range: DateRange,
    #[serde(default)]
    pub options: Option<AllocationOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactSuggestions {
    pub contact_id: String,
    pub suggestion_set_id: String,
    pub suggested_slots: Vec<SuggestedSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnsatisfiedContact {
    pub contact_id: String,
    pub reason: NoViableReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FairnessReport {
    pub greedy_std_dev: f64,
    pub final_std_dev: f64,
    pub min_satisfaction: f64,
    pub iterations: usize,
    pub swaps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSuggestions {
    pub batch_id: String,
    pub per_contact: Vec<ContactSuggestions>,
    pub unsatisfied_contacts: Vec<UnsatisfiedContact>,
    pub fairness: FairnessReport,
}

impl BatchSuggestions {
    pub fn for_contact(&self, contact_id: &str) -> Option<&ContactSuggestions> {
        self.per_contact
            .iter()
            .find(|entry| entry.contact_id == contact_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub id: String,
    pub organizer_id: String,
    pub duration_minutes: i64,
    pub slots_per_contact: usize,
    pub date_range: DateRange,
    pub options: AllocationOptions,
    pub unsatisfied_contacts: Vec<UnsatisfiedContact>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClearOutcome {
    pub cleared_sets: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Retention is "keep forever", nothing was touched.
    pub skipped: bool,
    pub expired_reservations: usize,
    pub expired_sets: usize,
    pub deleted_sets: usize,
    pub deleted_reservations: usize,
    pub quarantined_sets: usize,
}

impl CleanupReport {
    pub fn changed_anything(&self) -> bool {
        self.expired_reservations
            + self.expired_sets
            + self.deleted_sets
            + self.deleted_reservations
            + self.quarantined_sets
            > 0
    }
}

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use slotwise_lib::config::{AllocationOptions, EngineConfig};
use slotwise_lib::db::DbPool;
use slotwise_lib::models::availability::DateRange;
use slotwise_lib::models::batch::{BatchRecord, BatchRequest, ContactSuggestions, OrganizerContext};
use slotwise_lib::models::contact::{ContactPreferences, ContactProfile};
use slotwise_lib::models::slot::{CandidateSlot, ScoredSlot, TimeInterval};
use slotwise_lib::services::reservation_service::{PendingSuggestionSet, ReservationService};
use slotwise_lib::services::settings_service::SettingsService;
use tempfile::TempDir;

pub const ORGANIZER: &str = "org-1";
pub const ORGANIZER_CALENDAR: &str = "org-calendar";

pub fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, minute, 0)
        .single()
        .expect("valid datetime")
}

/// Monday 2 June to Friday 6 June 2025.
pub fn work_week() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2025, 6, 2).expect("date"),
        NaiveDate::from_ymd_opt(2025, 6, 6).expect("date"),
    )
    .expect("range")
}

pub fn temp_pool(dir: &TempDir) -> DbPool {
    DbPool::new(dir.path().join("slotwise.sqlite")).expect("db pool")
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        provider_timeout: StdDuration::from_millis(500),
        provider_backoff: vec![StdDuration::from_millis(0), StdDuration::from_millis(5)],
        ..EngineConfig::default()
    }
}

pub fn contact(id: &str, timezone: Tz) -> ContactProfile {
    ContactProfile {
        id: id.to_string(),
        timezone,
        calendar_ref: None,
        working_hours: None,
        preferences: ContactPreferences::default(),
    }
}

pub fn batch_request(contacts: Vec<ContactProfile>, slots_per_contact: usize) -> BatchRequest {
    BatchRequest {
        organizer: OrganizerContext {
            organizer_id: ORGANIZER.to_string(),
            account_ref: ORGANIZER_CALENDAR.to_string(),
            timezone: chrono_tz::UTC,
        },
        contacts,
        duration_minutes: 60,
        slots_per_contact,
        date_range: work_week(),
        options: None,
    }
}

pub fn reservation_service(pool: &DbPool) -> ReservationService {
    let settings = Arc::new(SettingsService::new(pool.clone()));
    ReservationService::new(pool.clone(), settings, Duration::hours(24), Duration::hours(24))
}

pub fn hour_slot(contact_id: &str, start: DateTime<Utc>, score: f64) -> ScoredSlot {
    ScoredSlot {
        candidate: CandidateSlot {
            contact_id: contact_id.to_string(),
            start,
            end: start + Duration::hours(1),
            timezone_of_contact: chrono_tz::UTC,
        },
        score,
        score_factors: Vec::new(),
    }
}

pub fn hour(start: DateTime<Utc>) -> TimeInterval {
    TimeInterval::new(start, start + Duration::hours(1)).expect("interval")
}

/// Stores a batch whose contacts were offered the given one-hour starts.
pub fn seed_batch(
    service: &ReservationService,
    batch_id: &str,
    offers: &[(&str, Vec<DateTime<Utc>>)],
    now: DateTime<Utc>,
) -> Vec<ContactSuggestions> {
    let batch = BatchRecord {
        id: batch_id.to_string(),
        organizer_id: ORGANIZER.to_string(),
        duration_minutes: 60,
        slots_per_contact: 3,
        date_range: work_week(),
        options: AllocationOptions::default(),
        unsatisfied_contacts: Vec::new(),
        created_at: now,
    };
    let sets: Vec<PendingSuggestionSet> = offers
        .iter()
        .map(|(contact_id, starts)| PendingSuggestionSet {
            contact_id: contact_id.to_string(),
            contact_timezone: chrono_tz::UTC,
            slots: starts
                .iter()
                .map(|start| hour_slot(contact_id, *start, 70.0))
                .collect(),
        })
        .collect();
    service
        .persist_batch(&batch, &sets, now)
        .expect("persist batch")
}

// Error mapping at the command surface and edge cases

mod support;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use slotwise_lib::commands::batch::{
    batch_generate_suggestions, suggestions_clear, suggestions_confirm_slot, ConfirmSlotPayload,
};
use slotwise_lib::commands::reservations::{reservations_run_cleanup, reservations_sync};
use slotwise_lib::commands::{AppState, CommandError};
use slotwise_lib::error::{AppError, ProviderErrorKind};
use slotwise_lib::services::calendar_provider::{ProviderError, StaticCalendarProvider};
use support::*;
use tempfile::{tempdir, TempDir};

fn setup_test_environment(provider: Arc<StaticCalendarProvider>) -> (AppState, TempDir) {
    let dir = tempdir().expect("temp dir");
    let state = AppState::new(temp_pool(&dir), provider, None, fast_config());
    (state, dir)
}

/// Whole-hour start a few days ahead of the wall clock, so freshly seeded
/// slots are not expired yet.
fn upcoming(days: i64, hour: u32) -> DateTime<Utc> {
    let date = (Utc::now() + Duration::days(days)).date_naive();
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).expect("time"))
}

fn payload(contact_id: &str, batch_id: &str, start: DateTime<Utc>) -> ConfirmSlotPayload {
    ConfirmSlotPayload {
        contact_id: contact_id.to_string(),
        batch_id: batch_id.to_string(),
        start,
        end: start + Duration::hours(1),
    }
}

#[tokio::test]
async fn invalid_batch_request_maps_to_validation_error() {
    let (state, _dir) = setup_test_environment(Arc::new(StaticCalendarProvider::new()));
    let mut request = batch_request(vec![contact("alice", chrono_tz::UTC)], 2);
    request.slots_per_contact = 0;

    let error = batch_generate_suggestions(&state, request)
        .await
        .expect_err("rejected");
    assert_eq!(error.code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn oversized_overcommit_margin_is_a_validation_error() {
    let (state, _dir) = setup_test_environment(Arc::new(StaticCalendarProvider::new()));
    let mut request = batch_request(vec![contact("alice", chrono_tz::UTC)], 2);
    request.options = Some(
        serde_json::from_str(r#"{"overcommitMargin": 18446744073709551615}"#).expect("options"),
    );

    let error = batch_generate_suggestions(&state, request)
        .await
        .expect_err("rejected");
    assert_eq!(error.code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn organizer_calendar_outage_maps_to_provider_error() {
    let provider = Arc::new(StaticCalendarProvider::new().with_failures(
        ORGANIZER_CALENDAR,
        vec![ProviderError::Permanent("token revoked".into())],
    ));
    let (state, _dir) = setup_test_environment(provider);

    let error = batch_generate_suggestions(
        &state,
        batch_request(vec![contact("alice", chrono_tz::UTC)], 2),
    )
    .await
    .expect_err("provider failure");
    assert_eq!(error.code, "PROVIDER_ERROR");
    assert_eq!(
        error.details,
        Some(serde_json::json!({ "kind": "PERMANENT" }))
    );
}

#[tokio::test]
async fn confirming_against_an_unknown_batch_is_not_found() {
    let (state, _dir) = setup_test_environment(Arc::new(StaticCalendarProvider::new()));
    let error = suggestions_confirm_slot(&state, payload("alice", "missing", upcoming(3, 10)))
        .await
        .expect_err("unknown batch");
    assert_eq!(error.code, "NOT_FOUND");
}

#[tokio::test]
async fn inverted_interval_is_rejected() {
    let (state, _dir) = setup_test_environment(Arc::new(StaticCalendarProvider::new()));
    let start = upcoming(3, 10);
    let error = suggestions_confirm_slot(
        &state,
        ConfirmSlotPayload {
            contact_id: "alice".into(),
            batch_id: "batch-1".into(),
            start,
            end: start - Duration::hours(1),
        },
    )
    .await
    .expect_err("inverted interval");
    assert_eq!(error.code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn slot_taken_carries_remaining_slots() {
    let (state, _dir) = setup_test_environment(Arc::new(StaticCalendarProvider::new()));
    let contested = upcoming(3, 10);
    let spare = upcoming(3, 15);
    let now = Utc::now();
    seed_batch(&state.reservations(), "batch-1", &[("alice", vec![contested])], now);
    seed_batch(
        &state.reservations(),
        "batch-2",
        &[("bob", vec![contested, spare])],
        now,
    );

    suggestions_confirm_slot(&state, payload("alice", "batch-1", contested))
        .await
        .expect("alice wins");
    let error = suggestions_confirm_slot(&state, payload("bob", "batch-2", contested))
        .await
        .expect_err("bob loses");

    assert_eq!(error.code, "SLOT_TAKEN");
    let details = error.details.expect("details");
    let remaining = details["remainingSlots"].as_array().expect("array");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["start"], serde_json::to_value(spare).expect("json"));
}

#[tokio::test]
async fn clear_and_cleanup_commands_report_counts() {
    let (state, _dir) = setup_test_environment(Arc::new(StaticCalendarProvider::new()));
    seed_batch(
        &state.reservations(),
        "batch-1",
        &[("alice", vec![upcoming(3, 10)]), ("bob", vec![upcoming(3, 11)])],
        Utc::now(),
    );

    let cleared = suggestions_clear(&state, "batch-1".into()).await.expect("clear");
    assert_eq!(cleared.cleared_sets, 2);
    let again = suggestions_clear(&state, "batch-1".into()).await.expect("clear");
    assert_eq!(again.cleared_sets, 0);

    let report = reservations_run_cleanup(&state, ORGANIZER.into())
        .await
        .expect("cleanup");
    assert!(!report.skipped);
    assert!(!report.changed_anything());

    let missing = suggestions_clear(&state, "nope".into()).await.expect_err("missing");
    assert_eq!(missing.code, "NOT_FOUND");
}

#[tokio::test]
async fn sync_creates_the_external_event_once() {
    let provider = Arc::new(StaticCalendarProvider::new());
    let (state, _dir) = setup_test_environment(Arc::clone(&provider));
    let start = upcoming(4, 9);
    seed_batch(&state.reservations(), "batch-1", &[("alice", vec![start])], Utc::now());
    let reservation = suggestions_confirm_slot(&state, payload("alice", "batch-1", start))
        .await
        .expect("confirmed");

    let synced = reservations_sync(&state, reservation.id.clone(), ORGANIZER_CALENDAR.into())
        .await
        .expect("synced");
    assert!(synced.synced_to_external_calendar);
    assert_eq!(synced.external_event_ref.as_deref(), Some("evt-1"));

    reservations_sync(&state, reservation.id, ORGANIZER_CALENDAR.into())
        .await
        .expect("second sync");
    let events = provider.created_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].attendee, "alice");
    assert_eq!(events[0].interval, hour(start));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_syncs_create_one_external_event() {
    let provider = Arc::new(
        StaticCalendarProvider::new().with_delay(ORGANIZER_CALENDAR, StdDuration::from_millis(100)),
    );
    let (state, _dir) = setup_test_environment(Arc::clone(&provider));
    let start = upcoming(4, 9);
    seed_batch(&state.reservations(), "batch-1", &[("alice", vec![start])], Utc::now());
    let reservation = suggestions_confirm_slot(&state, payload("alice", "batch-1", start))
        .await
        .expect("confirmed");

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            let reservation_id = reservation.id.clone();
            tokio::spawn(async move {
                reservations_sync(&state, reservation_id, ORGANIZER_CALENDAR.into()).await
            })
        })
        .collect();

    let mut synced = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(record) => {
                assert_eq!(record.external_event_ref.as_deref(), Some("evt-1"));
                synced += 1;
            }
            Err(error) => assert_eq!(error.code, "CONFLICT"),
        }
    }
    assert!(synced >= 1);
    assert_eq!(provider.created_events().len(), 1);

    let stored = state
        .reservations()
        .get_reservation(&reservation.id)
        .expect("stored");
    assert!(stored.synced_to_external_calendar);
    assert_eq!(stored.external_event_ref.as_deref(), Some("evt-1"));
}

#[tokio::test]
async fn failed_sync_releases_its_claim() {
    let provider = Arc::new(StaticCalendarProvider::new().with_failures(
        ORGANIZER_CALENDAR,
        vec![ProviderError::Permanent("calendar is read-only".into())],
    ));
    let (state, _dir) = setup_test_environment(Arc::clone(&provider));
    let start = upcoming(4, 9);
    seed_batch(&state.reservations(), "batch-1", &[("alice", vec![start])], Utc::now());
    let reservation = suggestions_confirm_slot(&state, payload("alice", "batch-1", start))
        .await
        .expect("confirmed");

    let error = reservations_sync(&state, reservation.id.clone(), ORGANIZER_CALENDAR.into())
        .await
        .expect_err("provider refused");
    assert_eq!(error.code, "PROVIDER_ERROR");

    let synced = reservations_sync(&state, reservation.id, ORGANIZER_CALENDAR.into())
        .await
        .expect("retried sync");
    assert_eq!(synced.external_event_ref.as_deref(), Some("evt-1"));
    assert_eq!(provider.created_events().len(), 1);
}

#[test]
fn transient_errors_are_flagged() {
    assert!(AppError::timeout("get_busy_intervals").is_transient());
    assert!(AppError::provider(ProviderErrorKind::Transient, "503").is_transient());
    assert!(!AppError::provider(ProviderErrorKind::Permanent, "revoked").is_transient());
    assert!(!AppError::cancelled().is_transient());
}

#[test]
fn command_errors_serialize_without_empty_details() {
    let error = CommandError::from(AppError::invalid_state("suggestion set is cleared"));
    let value = serde_json::to_value(&error).expect("json");
    assert_eq!(value["code"], "INVALID_STATE");
    assert!(value.get("details").is_none());
}

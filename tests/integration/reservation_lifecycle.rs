mod support;

use std::sync::Arc;

use chrono::Duration;
use slotwise_lib::error::AppError;
use slotwise_lib::models::reservation::ReservationStatus;
use slotwise_lib::models::settings::RetentionPolicy;
use slotwise_lib::models::suggestion::SuggestionStatus;
use slotwise_lib::services::contact_directory::StaticContactDirectory;
use slotwise_lib::services::reservation_service::ReservationService;
use slotwise_lib::services::settings_service::{SettingsService, SettingsUpdateInput};
use support::*;
use tempfile::tempdir;

#[test]
fn confirmed_slot_survives_cleanup_after_its_expiry() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    let now = utc(1, 12, 0);
    seed_batch(
        &service,
        "batch-1",
        &[
            ("alice", vec![utc(3, 10, 0), utc(3, 14, 0)]),
            ("bob", vec![utc(3, 9, 0)]),
        ],
        now,
    );

    let reservation = service
        .confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), now)
        .expect("confirmed");
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(reservation.interval.start, utc(3, 10, 0));
    assert_eq!(reservation.interval.timezone, "UTC");

    let alice = service.get_suggestion_set("batch-1", "alice").expect("set");
    assert_eq!(alice.status, SuggestionStatus::MeetingScheduled);
    let chosen = alice.find_slot(&hour(utc(3, 10, 0))).expect("slot");
    assert!(chosen.selected);
    assert_eq!(chosen.expires_at, utc(2, 10, 0));

    let confirmed = service
        .confirm_reservation(&reservation.id)
        .expect("organizer confirms");
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);

    let report = service
        .run_expiry_cleanup_at(ORGANIZER, chosen.expires_at + Duration::seconds(1))
        .expect("cleanup");
    assert_eq!(report.expired_sets, 1);
    assert_eq!(report.deleted_sets, 0);
    assert_eq!(report.expired_reservations, 0);

    let stored = service.get_reservation(&reservation.id).expect("reservation");
    assert_eq!(stored.status, ReservationStatus::Confirmed);
    assert_eq!(stored.interval, confirmed.interval);
    assert_eq!(stored.expires_at, confirmed.expires_at);
    assert_eq!(stored.suggestion_set_id, confirmed.suggestion_set_id);
    assert_eq!(
        service.get_suggestion_set("batch-1", "alice").expect("set").status,
        SuggestionStatus::MeetingScheduled
    );
    assert_eq!(
        service.get_suggestion_set("batch-1", "bob").expect("set").status,
        SuggestionStatus::Expired
    );
}

#[test]
fn clearing_twice_is_a_no_op() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    let now = utc(1, 12, 0);
    seed_batch(
        &service,
        "batch-1",
        &[("alice", vec![utc(3, 10, 0)]), ("bob", vec![utc(3, 11, 0)])],
        now,
    );

    assert_eq!(service.clear_suggestions("batch-1").expect("clear").cleared_sets, 2);
    assert_eq!(service.clear_suggestions("batch-1").expect("clear").cleared_sets, 0);

    let result = service.confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), now);
    assert!(matches!(result, Err(AppError::InvalidState { .. })));
}

#[test]
fn clearing_an_unknown_batch_is_not_found() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    assert!(matches!(
        service.clear_suggestions("missing"),
        Err(AppError::NotFound)
    ));
}

#[test]
fn cleanup_on_a_quiet_store_changes_nothing() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    let now = utc(1, 12, 0);
    seed_batch(&service, "batch-1", &[("alice", vec![utc(3, 10, 0)])], now);

    let first = service.run_expiry_cleanup_at(ORGANIZER, now).expect("cleanup");
    assert!(!first.changed_anything());
    let second = service.run_expiry_cleanup_at(ORGANIZER, now).expect("cleanup");
    assert_eq!(first, second);
    assert_eq!(
        service.get_suggestion_set("batch-1", "alice").expect("set").status,
        SuggestionStatus::Active
    );
}

#[test]
fn keep_forever_skips_cleanup_entirely() {
    let dir = tempdir().expect("temp dir");
    let pool = temp_pool(&dir);
    let settings = Arc::new(SettingsService::new(pool.clone()));
    settings
        .update(
            ORGANIZER,
            chrono_tz::UTC,
            SettingsUpdateInput {
                retention: Some(RetentionPolicy::KeepForever),
                ..Default::default()
            },
        )
        .expect("settings");
    let service = ReservationService::new(
        pool,
        Arc::clone(&settings),
        Duration::hours(24),
        Duration::hours(24),
    );
    seed_batch(&service, "batch-1", &[("alice", vec![utc(3, 10, 0)])], utc(1, 12, 0));

    let report = service
        .run_expiry_cleanup_at(ORGANIZER, utc(20, 0, 0))
        .expect("cleanup");
    assert!(report.skipped);
    assert!(!report.changed_anything());
    assert_eq!(
        service.get_suggestion_set("batch-1", "alice").expect("set").status,
        SuggestionStatus::Active
    );
}

#[test]
fn ended_reservations_expire_and_are_deleted_after_retention() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    let now = utc(1, 12, 0);
    seed_batch(
        &service,
        "batch-1",
        &[("alice", vec![utc(3, 10, 0)]), ("bob", vec![utc(3, 14, 0)])],
        now,
    );
    let kept = service
        .confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), now)
        .expect("alice confirmed");
    let cancelled = service
        .confirm_slot_at("bob", "batch-1", hour(utc(3, 14, 0)), now)
        .expect("bob confirmed");
    service.cancel_reservation(&cancelled.id).expect("cancelled");

    let after_meeting = service
        .run_expiry_cleanup_at(ORGANIZER, utc(3, 12, 0))
        .expect("cleanup");
    assert_eq!(after_meeting.expired_reservations, 1);
    assert_eq!(
        service.get_reservation(&kept.id).expect("kept").status,
        ReservationStatus::Expired
    );

    let past_retention = utc(3, 15, 0) + Duration::days(91);
    let report = service
        .run_expiry_cleanup_at(ORGANIZER, past_retention)
        .expect("cleanup");
    assert_eq!(report.deleted_reservations, 2);
    assert_eq!(report.deleted_sets, 2);
    assert!(service
        .list_reservations(ORGANIZER, None)
        .expect("list")
        .is_empty());
    assert!(matches!(
        service.get_suggestion_set("batch-1", "alice"),
        Err(AppError::NotFound)
    ));
}

#[test]
fn sets_of_missing_contacts_are_quarantined() {
    let dir = tempdir().expect("temp dir");
    let directory = Arc::new(StaticContactDirectory::new(["alice"]));
    let service = reservation_service(&temp_pool(&dir)).with_directory(directory);
    let now = utc(1, 12, 0);
    seed_batch(
        &service,
        "batch-1",
        &[("alice", vec![utc(3, 10, 0)]), ("ghost", vec![utc(3, 11, 0)])],
        now,
    );

    let report = service.run_expiry_cleanup_at(ORGANIZER, now).expect("cleanup");
    assert_eq!(report.quarantined_sets, 1);

    let ghost = service.get_suggestion_set("batch-1", "ghost").expect("set");
    assert_eq!(ghost.status, SuggestionStatus::Cleared);
    assert!(ghost.quarantine_reason.is_some());
    assert_eq!(
        service.get_suggestion_set("batch-1", "alice").expect("set").status,
        SuggestionStatus::Active
    );

    let again = service.run_expiry_cleanup_at(ORGANIZER, now).expect("cleanup");
    assert_eq!(again.quarantined_sets, 0);
}

#[test]
fn only_offered_unexpired_slots_can_be_confirmed() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    seed_batch(&service, "batch-1", &[("alice", vec![utc(3, 10, 0)])], utc(1, 12, 0));

    let unoffered = service.confirm_slot_at("alice", "batch-1", hour(utc(3, 12, 0)), utc(1, 12, 0));
    assert!(matches!(unoffered, Err(AppError::Validation { .. })));

    let unknown = service.confirm_slot_at("nobody", "batch-1", hour(utc(3, 10, 0)), utc(1, 12, 0));
    assert!(matches!(unknown, Err(AppError::NotFound)));

    let late = service.confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), utc(2, 10, 0));
    assert!(matches!(late, Err(AppError::InvalidState { .. })));

    assert!(service
        .list_reservations(ORGANIZER, None)
        .expect("list")
        .is_empty());
}

#[test]
fn reservation_status_transitions() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    let now = utc(1, 12, 0);
    seed_batch(&service, "batch-1", &[("alice", vec![utc(3, 10, 0)])], now);
    let reservation = service
        .confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), now)
        .expect("confirmed");

    let confirmed = service.confirm_reservation(&reservation.id).expect("confirm");
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    assert!(matches!(
        service.confirm_reservation(&reservation.id),
        Err(AppError::InvalidState { .. })
    ));

    let synced = service.mark_synced(&reservation.id, "evt-42").expect("synced");
    assert!(synced.synced_to_external_calendar);
    assert_eq!(synced.external_event_ref.as_deref(), Some("evt-42"));

    let cancelled = service.cancel_reservation(&reservation.id).expect("cancel");
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert!(matches!(
        service.cancel_reservation(&reservation.id),
        Err(AppError::InvalidState { .. })
    ));
    assert_eq!(
        service
            .list_reservations(ORGANIZER, Some(ReservationStatus::Cancelled))
            .expect("list")
            .len(),
        1
    );
}

#[test]
fn taken_slot_reports_the_remaining_choices() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    let now = utc(1, 12, 0);
    seed_batch(&service, "batch-1", &[("alice", vec![utc(3, 10, 0)])], now);
    seed_batch(
        &service,
        "batch-2",
        &[("carol", vec![utc(3, 10, 0), utc(3, 10, 30), utc(3, 15, 0)])],
        now,
    );

    service
        .confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), now)
        .expect("alice confirmed");

    let error = service
        .confirm_slot_at("carol", "batch-2", hour(utc(3, 10, 0)), now)
        .expect_err("slot already held");
    assert!(error.is_slot_taken());
    let remaining = error.remaining_slots().expect("remaining slots");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].start, utc(3, 15, 0));

    assert_eq!(
        service.get_suggestion_set("batch-2", "carol").expect("set").status,
        SuggestionStatus::Active
    );
    service
        .confirm_slot_at("carol", "batch-2", hour(utc(3, 15, 0)), now)
        .expect("carol takes the remaining slot");
}

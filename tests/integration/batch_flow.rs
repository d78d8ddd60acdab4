mod support;

use std::sync::Arc;

use chrono::{Datelike, Duration, Timelike, Weekday};
use slotwise_lib::commands::AppState;
use slotwise_lib::error::{AppError, NoViableReason, ProviderErrorKind};
use slotwise_lib::models::slot::TimeInterval;
use slotwise_lib::services::calendar_provider::{ProviderError, StaticCalendarProvider};
use slotwise_lib::services::greedy_allocator::CancellationToken;
use support::*;
use tempfile::tempdir;

fn app_state(pool: slotwise_lib::db::DbPool, provider: StaticCalendarProvider) -> AppState {
    AppState::new(pool, Arc::new(provider), None, fast_config())
}

#[tokio::test]
async fn twelve_hour_offset_contacts_are_reported_unsatisfied() {
    let dir = tempdir().expect("temp dir");
    let state = app_state(temp_pool(&dir), StaticCalendarProvider::new());

    let request = batch_request(
        vec![
            contact("east", chrono_tz::Etc::GMTMinus12),
            contact("west", chrono_tz::Etc::GMTPlus12),
        ],
        3,
    );
    let result = state
        .batches()
        .generate_batch_suggestions_at(request, utc(1, 0, 0), &CancellationToken::new())
        .await
        .expect("batch generated");

    assert!(result.per_contact.is_empty());
    assert_eq!(result.unsatisfied_contacts.len(), 2);
    assert!(result
        .unsatisfied_contacts
        .iter()
        .all(|entry| entry.reason == NoViableReason::NoOverlap));

    let stored = state.reservations().get_batch(&result.batch_id).expect("batch row");
    assert_eq!(stored.unsatisfied_contacts, result.unsatisfied_contacts);
}

#[tokio::test]
async fn mixed_timezones_get_disjoint_viable_slots() {
    let dir = tempdir().expect("temp dir");
    let organizer_busy = vec![hour(utc(2, 10, 0)), hour(utc(3, 13, 0))];
    let provider = StaticCalendarProvider::new()
        .with_busy(ORGANIZER_CALENDAR, organizer_busy.clone())
        .with_busy(
            "alice-cal",
            vec![TimeInterval::new(utc(2, 0, 0), utc(3, 0, 0)).expect("interval")],
        );
    let state = app_state(temp_pool(&dir), provider);

    let mut alice = contact("alice", chrono_tz::UTC);
    alice.calendar_ref = Some("alice-cal".into());
    let request = batch_request(
        vec![
            alice,
            contact("bob", chrono_tz::Europe::London),
            contact("carol", chrono_tz::Europe::Berlin),
            contact("dave", chrono_tz::America::New_York),
        ],
        3,
    );
    let floor = slotwise_lib::config::AllocationOptions::default().viability_floor;

    let result = state
        .batches()
        .generate_batch_suggestions_at(request, utc(1, 0, 0), &CancellationToken::new())
        .await
        .expect("batch generated");

    assert!(result.unsatisfied_contacts.is_empty());
    assert_eq!(result.per_contact.len(), 4);

    let mut all: Vec<TimeInterval> = Vec::new();
    for entry in &result.per_contact {
        assert!(!entry.suggested_slots.is_empty());
        assert!(entry.suggested_slots.len() <= 3);
        for slot in &entry.suggested_slots {
            assert!(slot.score >= floor);
            assert!(slot.score <= 100.0);
            assert_eq!(slot.expires_at, slot.start - Duration::hours(24));
            assert_eq!(slot.end - slot.start, Duration::minutes(60));
            assert!(!matches!(slot.start.weekday(), Weekday::Sat | Weekday::Sun));
            assert!(slot.start.hour() >= 9);
            assert!(slot.end <= utc(slot.start.day(), 17, 0));
            for busy in &organizer_busy {
                assert!(!slot.interval().within_buffer_of(busy, Duration::minutes(15)));
            }
            all.push(slot.interval());
        }
    }
    for (index, a) in all.iter().enumerate() {
        for b in all.iter().skip(index + 1) {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }

    let alice = result.for_contact("alice").expect("alice suggestions");
    assert!(alice
        .suggested_slots
        .iter()
        .all(|slot| slot.start >= utc(3, 0, 0)));

    assert!(result.fairness.final_std_dev <= result.fairness.greedy_std_dev + 1e-9);

    let sets = state
        .reservations()
        .list_suggestion_sets(&result.batch_id)
        .expect("sets");
    assert_eq!(sets.len(), 4);
}

#[tokio::test]
async fn committed_reservations_block_later_batches() {
    let dir = tempdir().expect("temp dir");
    let state = app_state(temp_pool(&dir), StaticCalendarProvider::new());
    let now = utc(1, 0, 0);

    let first = state
        .batches()
        .generate_batch_suggestions_at(
            batch_request(vec![contact("alice", chrono_tz::UTC)], 1),
            now,
            &CancellationToken::new(),
        )
        .await
        .expect("first batch");
    let offered = first.per_contact[0].suggested_slots[0].interval();
    state
        .reservations()
        .confirm_slot_at("alice", &first.batch_id, offered, now)
        .expect("confirmed");

    let second = state
        .batches()
        .generate_batch_suggestions_at(
            batch_request(vec![contact("bob", chrono_tz::UTC)], 3),
            now,
            &CancellationToken::new(),
        )
        .await
        .expect("second batch");

    for slot in &second.per_contact[0].suggested_slots {
        assert!(!slot.interval().within_buffer_of(&offered, Duration::minutes(15)));
    }
}

#[tokio::test]
async fn cancelled_batch_persists_nothing() {
    let dir = tempdir().expect("temp dir");
    let state = app_state(temp_pool(&dir), StaticCalendarProvider::new());
    let token = CancellationToken::new();
    token.cancel();

    let result = state
        .batches()
        .generate_batch_suggestions_at(
            batch_request(vec![contact("alice", chrono_tz::UTC)], 2),
            utc(1, 0, 0),
            &token,
        )
        .await;

    assert!(matches!(result, Err(AppError::Cancelled)));
    assert!(state
        .reservations()
        .list_batches(ORGANIZER, 10)
        .expect("batches")
        .is_empty());
}

#[tokio::test]
async fn organizer_calendar_failure_fails_the_batch() {
    let dir = tempdir().expect("temp dir");
    let provider = StaticCalendarProvider::new().with_failures(
        ORGANIZER_CALENDAR,
        vec![ProviderError::Permanent("access revoked".into())],
    );
    let state = app_state(temp_pool(&dir), provider);

    let result = state
        .batches()
        .generate_batch_suggestions_at(
            batch_request(vec![contact("alice", chrono_tz::UTC)], 2),
            utc(1, 0, 0),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(AppError::Provider {
            kind: ProviderErrorKind::Permanent,
            ..
        })
    ));
}

#[tokio::test]
async fn failing_contact_calendar_is_treated_as_open() {
    let dir = tempdir().expect("temp dir");
    let provider = StaticCalendarProvider::new().with_failures(
        "alice-cal",
        vec![
            ProviderError::Transient("503".into()),
            ProviderError::Transient("503".into()),
            ProviderError::Transient("503".into()),
        ],
    );
    let state = app_state(temp_pool(&dir), provider);
    let mut alice = contact("alice", chrono_tz::UTC);
    alice.calendar_ref = Some("alice-cal".into());

    let result = state
        .batches()
        .generate_batch_suggestions_at(
            batch_request(vec![alice], 2),
            utc(1, 0, 0),
            &CancellationToken::new(),
        )
        .await
        .expect("batch generated");

    assert_eq!(result.per_contact.len(), 1);
    assert_eq!(result.per_contact[0].suggested_slots.len(), 2);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_work() {
    let dir = tempdir().expect("temp dir");
    let state = app_state(temp_pool(&dir), StaticCalendarProvider::new());

    let mut request = batch_request(vec![contact("alice", chrono_tz::UTC)], 2);
    request.duration_minutes = 5;

    let result = state.batches().generate_batch_suggestions(request).await;
    assert!(matches!(result, Err(AppError::Validation { .. })));
    assert!(state
        .reservations()
        .list_batches(ORGANIZER, 10)
        .expect("batches")
        .is_empty());
}

#[tokio::test]
async fn independent_organizers_run_in_parallel() {
    let dir = tempdir().expect("temp dir");
    let state = app_state(temp_pool(&dir), StaticCalendarProvider::new());
    let service = state.batches();

    let requests: Vec<_> = ["org-a", "org-b", "org-c"]
        .iter()
        .map(|organizer_id| {
            let mut request = batch_request(
                vec![
                    contact("alice", chrono_tz::UTC),
                    contact("bob", chrono_tz::Europe::Paris),
                ],
                2,
            );
            request.organizer.organizer_id = organizer_id.to_string();
            request
        })
        .collect();

    let token = CancellationToken::new();
    let results = futures::future::join_all(requests.into_iter().map(|request| {
        service.generate_batch_suggestions_at(request, utc(1, 0, 0), &token)
    }))
    .await;

    for result in results {
        let batch = result.expect("batch generated");
        assert_eq!(batch.per_contact.len(), 2);
    }
    for organizer_id in ["org-a", "org-b", "org-c"] {
        assert_eq!(
            state
                .reservations()
                .list_batches(organizer_id, 10)
                .expect("batches")
                .len(),
            1
        );
    }
}

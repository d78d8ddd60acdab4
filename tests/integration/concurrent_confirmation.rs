mod support;

use std::sync::{Arc, Barrier};
use std::thread;

use slotwise_lib::error::AppError;
use slotwise_lib::models::reservation::ReservationStatus;
use support::*;
use tempfile::tempdir;

/// Several contacts from separate batches were offered the same hour. Exactly
/// one confirmation may win, every other one must see `SlotTaken`.
fn race_for_the_same_hour(contenders: usize) {
    let dir = tempdir().expect("temp dir");
    let pool = temp_pool(&dir);
    let service = Arc::new(reservation_service(&pool));
    let now = utc(1, 12, 0);
    let contested = utc(3, 10, 0);

    for index in 0..contenders {
        let contact_id = format!("contact-{index}");
        seed_batch(
            &service,
            &format!("batch-{index}"),
            &[(contact_id.as_str(), vec![contested, utc(3, 14 + index as u32 % 3, 0)])],
            now,
        );
    }

    let barrier = Arc::new(Barrier::new(contenders));
    let handles: Vec<_> = (0..contenders)
        .map(|index| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.confirm_slot_at(
                    &format!("contact-{index}"),
                    &format!("batch-{index}"),
                    hour(contested),
                    now,
                )
            })
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread finished"))
        .collect();

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let taken = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(AppError::SlotTaken { .. })))
        .count();
    assert_eq!(winners, 1, "outcomes: {outcomes:?}");
    assert_eq!(taken, contenders - 1, "outcomes: {outcomes:?}");

    for outcome in &outcomes {
        if let Err(error) = outcome {
            let remaining = error.remaining_slots().expect("remaining slots");
            assert_eq!(remaining.len(), 1);
            assert_ne!(remaining[0].start, contested);
        }
    }

    let active: Vec<_> = service
        .list_reservations(ORGANIZER, None)
        .expect("reservations")
        .into_iter()
        .filter(|reservation| reservation.status == ReservationStatus::Pending)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].interval.start, contested);
}

#[test]
fn two_confirmations_race_for_one_hour() {
    race_for_the_same_hour(2);
}

#[test]
fn many_confirmations_race_for_one_hour() {
    race_for_the_same_hour(8);
}

#[test]
fn repeated_confirmation_of_the_same_slot_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let service = reservation_service(&temp_pool(&dir));
    let now = utc(1, 12, 0);
    seed_batch(&service, "batch-1", &[("alice", vec![utc(3, 10, 0)])], now);

    service
        .confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), now)
        .expect("first confirmation");
    let second = service.confirm_slot_at("alice", "batch-1", hour(utc(3, 10, 0)), now);
    assert!(matches!(second, Err(AppError::SlotTaken { .. })));
    assert_eq!(
        service
            .list_reservations(ORGANIZER, None)
            .expect("reservations")
            .len(),
        1
    );
}

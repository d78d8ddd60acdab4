use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::repositories::batch_repository::{BatchRepository, BatchRow};
use crate::db::repositories::reservation_repository::{ReservationRepository, ReservationRow};
use crate::db::repositories::suggestion_repository::{
    SuggestionRepository, SuggestionSetRow, SuggestionSlotRow,
};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::batch::{BatchRecord, CleanupReport, ClearOutcome, ContactSuggestions};
use crate::models::reservation::{ReservationInterval, ReservationRecord, ReservationStatus};
use crate::models::settings::RetentionPolicy;
use crate::models::slot::{ScoredSlot, TimeInterval};
use crate::models::suggestion::{SuggestedSlot, SuggestionSetRecord, SuggestionStatus};
use crate::services::contact_directory::ContactDirectory;
use crate::services::schedule_utils::format_utc;
use crate::services::settings_service::SettingsService;

/// Allocated slots for one contact, ready to be stored as a suggestion set.
#[derive(Debug, Clone)]
pub struct PendingSuggestionSet {
    pub contact_id: String,
    pub contact_timezone: Tz,
    pub slots: Vec<ScoredSlot>,
}

/// A sync claim older than this is treated as abandoned.
const SYNC_CLAIM_TTL_MINUTES: i64 = 10;

/// Outcome of trying to take the calendar-sync claim on a reservation.
#[derive(Debug, Clone)]
pub enum SyncClaim {
    /// The caller holds the claim and must create the external event.
    Claimed(ReservationRecord),
    AlreadySynced(ReservationRecord),
}

/// Owns suggestion sets and reservations from persistence to cleanup.
pub struct ReservationService {
    db: DbPool,
    settings: Arc<SettingsService>,
    directory: Option<Arc<dyn ContactDirectory>>,
    expiry_offset: Duration,
    cleanup_grace: Duration,
}

impl ReservationService {
    pub fn new(
        db: DbPool,
        settings: Arc<SettingsService>,
        expiry_offset: Duration,
        cleanup_grace: Duration,
    ) -> Self {
        Self {
            db,
            settings,
            directory: None,
            expiry_offset,
            cleanup_grace,
        }
    }

    /// Enables the consistency sweep against a contact directory.
    pub fn with_directory(mut self, directory: Arc<dyn ContactDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Stores the batch and one active suggestion set per contact in a single
    /// transaction. Each slot expires `expiry_offset` before it starts.
    pub fn persist_batch(
        &self,
        batch: &BatchRecord,
        sets: &[PendingSuggestionSet],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ContactSuggestions>> {
        let batch_row = BatchRow::from_record(batch)?;

        let mut records = Vec::with_capacity(sets.len());
        for pending in sets {
            let slots = pending
                .slots
                .iter()
                .map(|slot| SuggestedSlot {
                    id: Uuid::new_v4().to_string(),
                    start: slot.start(),
                    end: slot.candidate.end,
                    score: slot.score,
                    score_factors: slot.score_factors.clone(),
                    selected: false,
                    expires_at: slot.start() - self.expiry_offset,
                })
                .collect();
            records.push(SuggestionSetRecord {
                id: Uuid::new_v4().to_string(),
                batch_id: batch.id.clone(),
                organizer_id: batch.organizer_id.clone(),
                contact_id: pending.contact_id.clone(),
                contact_timezone: pending.contact_timezone.name().to_string(),
                status: SuggestionStatus::Active,
                slots,
                quarantine_reason: None,
                created_at: now,
                updated_at: now,
            });
        }

        self.db.with_write_transaction(|tx| {
            BatchRepository::insert(tx, &batch_row)?;
            for record in &records {
                SuggestionRepository::insert_set(tx, &SuggestionSetRow::from_record(record))?;
                for (position, slot) in record.slots.iter().enumerate() {
                    let row = SuggestionSlotRow::from_record(&record.id, position, slot)?;
                    SuggestionRepository::insert_slot(tx, &row)?;
                }
            }
            Ok(())
        })?;

        info!(
            target: "app::reservation",
            batch_id = %batch.id,
            sets = records.len(),
            "suggestion sets persisted"
        );

        Ok(records
            .into_iter()
            .map(|record| ContactSuggestions {
                contact_id: record.contact_id,
                suggestion_set_id: record.id,
                suggested_slots: record.slots,
            })
            .collect())
    }

    pub fn confirm_slot(
        &self,
        contact_id: &str,
        batch_id: &str,
        chosen: TimeInterval,
    ) -> AppResult<ReservationRecord> {
        self.confirm_slot_at(contact_id, batch_id, chosen, Utc::now())
    }

    /// Atomic commit of one suggested slot. The overlap check and the insert
    /// share one IMMEDIATE transaction, and the active-interval unique index
    /// backs it up, so of two racing confirmations exactly one wins and the
    /// other gets `SlotTaken` with the contact's remaining slots.
    pub fn confirm_slot_at(
        &self,
        contact_id: &str,
        batch_id: &str,
        chosen: TimeInterval,
        now: DateTime<Utc>,
    ) -> AppResult<ReservationRecord> {
        let result = self.db.with_write_transaction(|tx| {
            let set_row = SuggestionRepository::find_set(tx, batch_id, contact_id)?
                .ok_or_else(AppError::not_found)?;
            let set = SuggestionRepository::load_record(tx, set_row)?;

            if matches!(set.status, SuggestionStatus::Expired | SuggestionStatus::Cleared) {
                return Err(AppError::invalid_state(format!(
                    "suggestion set is {}",
                    set.status
                )));
            }

            let slot = set.find_slot(&chosen).cloned().ok_or_else(|| {
                AppError::validation("chosen interval was not suggested to this contact")
            })?;

            let overlapping = ReservationRepository::find_overlapping(
                tx,
                &set.organizer_id,
                &format_utc(chosen.start),
                &format_utc(chosen.end),
            )?;
            if !overlapping.is_empty() {
                let remaining = remaining_slots(tx, &set, &slot, now)?;
                return Err(AppError::slot_taken(
                    "another confirmation already holds this time",
                    remaining,
                ));
            }

            if set.status == SuggestionStatus::MeetingScheduled {
                return Err(AppError::invalid_state(
                    "a meeting is already scheduled from this suggestion set",
                ));
            }
            if slot.is_expired(now) {
                return Err(AppError::invalid_state("chosen slot has expired"));
            }

            let record = ReservationRecord {
                id: Uuid::new_v4().to_string(),
                organizer_id: set.organizer_id.clone(),
                contact_id: set.contact_id.clone(),
                batch_id: set.batch_id.clone(),
                suggestion_set_id: set.id.clone(),
                interval: ReservationInterval {
                    start: chosen.start,
                    end: chosen.end,
                    timezone: set.contact_timezone.clone(),
                },
                status: ReservationStatus::Pending,
                synced_to_external_calendar: false,
                external_event_ref: None,
                expires_at: chosen.end,
                created_at: now,
                updated_at: now,
            };

            match ReservationRepository::insert(tx, &ReservationRow::from_record(&record)) {
                Ok(()) => {}
                Err(AppError::Conflict { .. }) => {
                    let remaining = remaining_slots(tx, &set, &slot, now)?;
                    return Err(AppError::slot_taken(
                        "another confirmation already holds this time",
                        remaining,
                    ));
                }
                Err(error) => return Err(error),
            }

            SuggestionRepository::mark_slot_selected(tx, &slot.id)?;
            let moved = SuggestionRepository::transition_status(
                tx,
                &set.id,
                SuggestionStatus::Active,
                SuggestionStatus::MeetingScheduled,
                &format_utc(now),
            )?;
            if !moved {
                return Err(AppError::consistency(format!(
                    "suggestion set {} changed state during confirmation",
                    set.id
                )));
            }

            Ok(record)
        });

        if let Ok(record) = result.as_ref() {
            info!(
                target: "app::reservation",
                reservation_id = %record.id,
                organizer_id = %record.organizer_id,
                contact_id = %record.contact_id,
                start = %format_utc(record.interval.start),
                "slot confirmed"
            );
        }
        result
    }

    /// Clears every active suggestion set of the batch. Calling it again is
    /// a no-op.
    pub fn clear_suggestions(&self, batch_id: &str) -> AppResult<ClearOutcome> {
        let now = format_utc(Utc::now());
        let cleared_sets = self.db.with_write_transaction(|tx| {
            if BatchRepository::find_by_id(tx, batch_id)?.is_none() {
                return Err(AppError::not_found());
            }
            SuggestionRepository::clear_active_for_batch(tx, batch_id, &now)
        })?;

        info!(target: "app::reservation", %batch_id, cleared_sets, "suggestions cleared");
        Ok(ClearOutcome { cleared_sets })
    }

    pub fn run_expiry_cleanup(&self, organizer_id: &str) -> AppResult<CleanupReport> {
        self.run_expiry_cleanup_at(organizer_id, Utc::now())
    }

    pub fn run_expiry_cleanup_at(
        &self,
        organizer_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<CleanupReport> {
        let retention = self
            .settings
            .get(organizer_id)?
            .map(|settings| settings.retention)
            .unwrap_or_default();

        if retention == RetentionPolicy::KeepForever {
            debug!(target: "app::cleanup", %organizer_id, "retention is keep-forever, skipping cleanup");
            return Ok(CleanupReport {
                skipped: true,
                ..CleanupReport::default()
            });
        }

        let now_text = format_utc(now);
        let directory = self.directory.clone();
        let grace = self.cleanup_grace;

        let report = self.db.with_write_transaction(|tx| {
            let mut report = CleanupReport::default();
            report.expired_reservations =
                ReservationRepository::expire_ended(tx, organizer_id, &now_text)?;
            if let Some(window) = retention.window() {
                let cutoff = format_utc(now - window);
                report.deleted_reservations =
                    ReservationRepository::delete_finished_before(tx, organizer_id, &cutoff)?;
            }

            for row in SuggestionRepository::list_sets_for_organizer(tx, organizer_id)? {
                let mut set = SuggestionRepository::load_record(tx, row)?;

                if set.status == SuggestionStatus::Active {
                    if let Some(directory) = directory.as_ref() {
                        if !directory.contact_exists(&set.contact_id)? {
                            let error = AppError::consistency(format!(
                                "suggestion set {} references missing contact {}",
                                set.id, set.contact_id
                            ));
                            SuggestionRepository::quarantine(
                                tx,
                                &set.id,
                                &error.to_string(),
                                &now_text,
                            )?;
                            report.quarantined_sets += 1;
                            continue;
                        }
                    }

                    if set.all_slots_expired(now)
                        && SuggestionRepository::transition_status(
                            tx,
                            &set.id,
                            SuggestionStatus::Active,
                            SuggestionStatus::Expired,
                            &now_text,
                        )?
                    {
                        report.expired_sets += 1;
                        set.status = SuggestionStatus::Expired;
                    }
                }

                if is_past_grace(&set, now, grace) && deletable(tx, &set)? {
                    SuggestionRepository::delete_set(tx, &set.id)?;
                    report.deleted_sets += 1;
                }
            }

            Ok(report)
        })?;

        if report.changed_anything() {
            info!(
                target: "app::cleanup",
                %organizer_id,
                expired_reservations = report.expired_reservations,
                expired_sets = report.expired_sets,
                deleted_sets = report.deleted_sets,
                deleted_reservations = report.deleted_reservations,
                quarantined_sets = report.quarantined_sets,
                "expiry cleanup finished"
            );
        } else {
            debug!(target: "app::cleanup", %organizer_id, "expiry cleanup found nothing to do");
        }

        Ok(report)
    }

    /// Pending to confirmed.
    pub fn confirm_reservation(&self, reservation_id: &str) -> AppResult<ReservationRecord> {
        self.transition_reservation(reservation_id, |record| match record.status {
            ReservationStatus::Pending => {
                record.status = ReservationStatus::Confirmed;
                Ok(())
            }
            other => Err(AppError::invalid_state(format!(
                "cannot confirm a {other} reservation"
            ))),
        })
    }

    /// Releases the organizer's time. Only pending or confirmed reservations
    /// can be cancelled.
    pub fn cancel_reservation(&self, reservation_id: &str) -> AppResult<ReservationRecord> {
        self.transition_reservation(reservation_id, |record| {
            if !record.status.holds_time() {
                return Err(AppError::invalid_state(format!(
                    "cannot cancel a {} reservation",
                    record.status
                )));
            }
            record.status = ReservationStatus::Cancelled;
            Ok(())
        })
    }

    /// Records that the meeting exists on the external calendar.
    pub fn mark_synced(
        &self,
        reservation_id: &str,
        external_event_ref: &str,
    ) -> AppResult<ReservationRecord> {
        let external_event_ref = external_event_ref.trim();
        if external_event_ref.is_empty() {
            return Err(AppError::validation("external event reference is required"));
        }
        self.transition_reservation(reservation_id, |record| {
            if !record.status.holds_time() {
                return Err(AppError::invalid_state(format!(
                    "cannot sync a {} reservation",
                    record.status
                )));
            }
            record.synced_to_external_calendar = true;
            record.external_event_ref = Some(external_event_ref.to_string());
            Ok(())
        })
    }

    /// Takes the exclusive right to create the external event. A second
    /// caller while the claim is live gets `Conflict`.
    pub fn claim_sync(&self, reservation_id: &str, now: DateTime<Utc>) -> AppResult<SyncClaim> {
        let stale_before = format_utc(now - Duration::minutes(SYNC_CLAIM_TTL_MINUTES));
        self.db.with_write_transaction(|tx| {
            let record = ReservationRepository::find_by_id(tx, reservation_id)?
                .ok_or_else(AppError::not_found)?
                .into_record()?;
            if record.synced_to_external_calendar {
                return Ok(SyncClaim::AlreadySynced(record));
            }
            if !record.status.holds_time() {
                return Err(AppError::invalid_state(format!(
                    "cannot sync a {} reservation",
                    record.status
                )));
            }
            if !ReservationRepository::claim_sync(
                tx,
                reservation_id,
                &format_utc(now),
                &stale_before,
            )? {
                return Err(AppError::conflict(format!(
                    "reservation {reservation_id} is already being synced"
                )));
            }
            debug!(target: "app::reservation", %reservation_id, "sync claim taken");
            Ok(SyncClaim::Claimed(record))
        })
    }

    /// Gives the claim back after a failed sync so a later call can retry.
    pub fn release_sync_claim(&self, reservation_id: &str) -> AppResult<()> {
        self.db
            .with_connection(|conn| ReservationRepository::release_sync_claim(conn, reservation_id))
    }

    pub fn get_reservation(&self, reservation_id: &str) -> AppResult<ReservationRecord> {
        self.db.with_connection(|conn| {
            ReservationRepository::find_by_id(conn, reservation_id)?
                .ok_or_else(AppError::not_found)?
                .into_record()
        })
    }

    pub fn list_reservations(
        &self,
        organizer_id: &str,
        status: Option<ReservationStatus>,
    ) -> AppResult<Vec<ReservationRecord>> {
        self.db.with_connection(|conn| {
            ReservationRepository::list_for_organizer(conn, organizer_id, status)?
                .into_iter()
                .map(ReservationRow::into_record)
                .collect()
        })
    }

    /// Intervals of the organizer's pending and confirmed reservations that
    /// end after `from`. These are busy time for every later batch.
    pub fn active_intervals(
        &self,
        organizer_id: &str,
        from: DateTime<Utc>,
    ) -> AppResult<Vec<TimeInterval>> {
        self.db.with_connection(|conn| {
            ReservationRepository::list_active_after(conn, organizer_id, &format_utc(from))?
                .into_iter()
                .map(|row| row.into_record().map(|record| record.interval.as_interval()))
                .collect()
        })
    }

    pub fn get_suggestion_set(
        &self,
        batch_id: &str,
        contact_id: &str,
    ) -> AppResult<SuggestionSetRecord> {
        self.db.with_connection(|conn| {
            let row = SuggestionRepository::find_set(conn, batch_id, contact_id)?
                .ok_or_else(AppError::not_found)?;
            SuggestionRepository::load_record(conn, row)
        })
    }

    pub fn list_suggestion_sets(&self, batch_id: &str) -> AppResult<Vec<SuggestionSetRecord>> {
        self.db.with_connection(|conn| {
            SuggestionRepository::list_sets_for_batch(conn, batch_id)?
                .into_iter()
                .map(|row| SuggestionRepository::load_record(conn, row))
                .collect()
        })
    }

    pub fn get_batch(&self, batch_id: &str) -> AppResult<BatchRecord> {
        self.db.with_connection(|conn| {
            BatchRepository::find_by_id(conn, batch_id)?
                .ok_or_else(AppError::not_found)?
                .into_record()
        })
    }

    pub fn list_batches(&self, organizer_id: &str, limit: usize) -> AppResult<Vec<BatchRecord>> {
        self.db.with_connection(|conn| {
            BatchRepository::list_for_organizer(conn, organizer_id, limit)?
                .into_iter()
                .map(BatchRow::into_record)
                .collect()
        })
    }

    fn transition_reservation<F>(
        &self,
        reservation_id: &str,
        change: F,
    ) -> AppResult<ReservationRecord>
    where
        F: FnOnce(&mut ReservationRecord) -> AppResult<()>,
    {
        let record = self.db.with_write_transaction(|tx| {
            let mut record = ReservationRepository::find_by_id(tx, reservation_id)?
                .ok_or_else(AppError::not_found)?
                .into_record()?;
            change(&mut record)?;
            record.updated_at = Utc::now();
            ReservationRepository::update(tx, &ReservationRow::from_record(&record))?;
            Ok(record)
        })?;

        info!(
            target: "app::reservation",
            reservation_id = %record.id,
            status = %record.status,
            synced = record.synced_to_external_calendar,
            "reservation updated"
        );
        Ok(record)
    }
}

/// Unexpired slots of `set`, other than `taken`, that no pending or confirmed
/// reservation of the organizer overlaps.
fn remaining_slots(
    conn: &Connection,
    set: &SuggestionSetRecord,
    taken: &SuggestedSlot,
    now: DateTime<Utc>,
) -> AppResult<Vec<SuggestedSlot>> {
    let mut remaining = Vec::new();
    for slot in &set.slots {
        if slot.id == taken.id || slot.is_expired(now) {
            continue;
        }
        let blocked = !ReservationRepository::find_overlapping(
            conn,
            &set.organizer_id,
            &format_utc(slot.start),
            &format_utc(slot.end),
        )?
        .is_empty();
        if !blocked {
            remaining.push(slot.clone());
        }
    }
    Ok(remaining)
}

fn is_past_grace(set: &SuggestionSetRecord, now: DateTime<Utc>, grace: Duration) -> bool {
    set.all_slots_expired(now)
        && set
            .latest_expiry()
            .map_or(false, |latest| latest + grace <= now)
}

/// Scheduled sets stay while a reservation still points at them.
fn deletable(conn: &Connection, set: &SuggestionSetRecord) -> AppResult<bool> {
    match set.status {
        SuggestionStatus::Active => Ok(false),
        SuggestionStatus::Expired | SuggestionStatus::Cleared => Ok(true),
        SuggestionStatus::MeetingScheduled => {
            let linked = ReservationRepository::list_for_suggestion_set(conn, &set.id)?;
            if linked.is_empty() {
                debug!(target: "app::cleanup", set_id = %set.id, "reservation gone, dropping scheduled set");
            }
            Ok(linked.is_empty())
        }
    }
}

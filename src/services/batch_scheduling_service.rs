use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AllocationOptions, EngineConfig};
use crate::error::{AppError, AppResult};
use crate::models::availability::ContactAvailability;
use crate::models::batch::{
    BatchRecord, BatchRequest, BatchSuggestions, MAX_CONTACTS_PER_BATCH, MAX_DURATION_MINUTES,
    MAX_SLOTS_PER_CONTACT, MIN_DURATION_MINUTES,
};
use crate::models::reservation::ReservationRecord;
use crate::models::settings::OrganizerSettings;
use crate::models::slot::TimeInterval;
use crate::services::availability_normalizer::{AvailabilityNormalizer, NormalizerParams};
use crate::services::calendar_provider::{
    call_with_retry, fetch_contact_availability, BusyWindow, CalendarProvider, RetryPolicy,
};
use crate::services::fairness_search::improve_fairness;
use crate::services::greedy_allocator::{allocate, CancellationToken};
use crate::services::quality_matrix::{build_quality_matrix, ContactInput};
use crate::services::quality_scorer::FairnessState;
use crate::services::reservation_service::{PendingSuggestionSet, ReservationService, SyncClaim};
use crate::services::settings_service::SettingsService;

/// Contact calendars fetched at once.
const PROVIDER_CONCURRENCY: usize = 8;

/// Entry point for batch suggestion generation. Owns the provider port and
/// drives normalizing, scoring, allocation, fairness search and persistence.
pub struct BatchSchedulingService {
    provider: Arc<dyn CalendarProvider>,
    settings: Arc<SettingsService>,
    reservations: Arc<ReservationService>,
    config: EngineConfig,
    retry: RetryPolicy,
}

impl BatchSchedulingService {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        settings: Arc<SettingsService>,
        reservations: Arc<ReservationService>,
        config: EngineConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.provider_timeout, config.provider_backoff.clone());
        Self {
            provider,
            settings,
            reservations,
            config,
            retry,
        }
    }

    pub fn reservations(&self) -> &ReservationService {
        &self.reservations
    }

    pub async fn generate_batch_suggestions(
        &self,
        request: BatchRequest,
    ) -> AppResult<BatchSuggestions> {
        self.generate_batch_suggestions_at(request, Utc::now(), &CancellationToken::new())
            .await
    }

    /// Runs the whole pipeline as of `now`. A cancelled token stops the run
    /// at the next contact boundary and nothing is persisted.
    pub async fn generate_batch_suggestions_at(
        &self,
        request: BatchRequest,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AppResult<BatchSuggestions> {
        let options = request
            .options
            .clone()
            .unwrap_or_else(|| self.config.default_options.clone());
        validate_request(&request, &options)?;

        let organizer = &request.organizer;
        let settings = self
            .settings
            .get_or_default(&organizer.organizer_id, organizer.timezone)?;
        let normalizer = AvailabilityNormalizer::new(self.normalizer_params(
            &request, &options, &settings, now,
        ))?;

        info!(
            target: "app::batch",
            organizer_id = %organizer.organizer_id,
            contacts = request.contacts.len(),
            duration_minutes = request.duration_minutes,
            slots_per_contact = request.slots_per_contact,
            "generating batch suggestions"
        );

        let Some(window) = normalizer.lookup_window() else {
            return Err(AppError::validation(
                "date range cannot be resolved in the organizer's timezone",
            ));
        };
        let window = BusyWindow {
            start: window.start,
            end: window.end,
        };

        let organizer_busy = self
            .organizer_busy(&organizer.organizer_id, &organizer.account_ref, window)
            .await?;
        cancel.check()?;

        let availability = self.contact_availability(&request, window).await;
        cancel.check()?;

        let inputs: Vec<ContactInput<'_>> = request
            .contacts
            .iter()
            .map(|profile| ContactInput {
                profile,
                availability: availability
                    .get(&profile.id)
                    .cloned()
                    .unwrap_or(ContactAvailability::Unknown),
            })
            .collect();

        let mut fairness = FairnessState::new(settings.timezone);
        let matrix = build_quality_matrix(
            &normalizer,
            &options,
            &inputs,
            &organizer_busy,
            request.slots_per_contact,
            &mut fairness,
        );
        cancel.check()?;

        let mut allocation = allocate(&matrix, request.slots_per_contact, &options, cancel)?;
        let budget = options.local_search_budget(allocation.assignments.len());
        let fairness_report = improve_fairness(&mut allocation, &matrix, budget);
        cancel.check()?;

        let mut unsatisfied = matrix.unsatisfied.clone();
        unsatisfied.extend(allocation.exhausted.iter().cloned());
        unsatisfied.sort_by(|a, b| a.contact_id.cmp(&b.contact_id));

        let timezones: HashMap<&str, _> = request
            .contacts
            .iter()
            .map(|contact| (contact.id.as_str(), contact.timezone))
            .collect();
        let pending: Vec<PendingSuggestionSet> = allocation
            .assignments
            .into_iter()
            .filter(|assignment| !assignment.slots.is_empty())
            .map(|assignment| PendingSuggestionSet {
                contact_timezone: timezones
                    .get(assignment.contact_id.as_str())
                    .copied()
                    .unwrap_or(chrono_tz::UTC),
                contact_id: assignment.contact_id,
                slots: assignment.slots,
            })
            .collect();

        let batch = BatchRecord {
            id: Uuid::new_v4().to_string(),
            organizer_id: organizer.organizer_id.clone(),
            duration_minutes: request.duration_minutes,
            slots_per_contact: request.slots_per_contact,
            date_range: request.date_range,
            options,
            unsatisfied_contacts: unsatisfied.clone(),
            created_at: now,
        };
        let per_contact = self.reservations.persist_batch(&batch, &pending, now)?;

        info!(
            target: "app::batch",
            batch_id = %batch.id,
            suggested = per_contact.len(),
            unsatisfied = unsatisfied.len(),
            greedy_std_dev = fairness_report.greedy_std_dev,
            final_std_dev = fairness_report.final_std_dev,
            "batch suggestions generated"
        );

        Ok(BatchSuggestions {
            batch_id: batch.id,
            per_contact,
            unsatisfied_contacts: unsatisfied,
            fairness: fairness_report,
        })
    }

    /// Creates the reserved meeting on the organizer's external calendar and
    /// records the event reference. Already synced reservations are returned
    /// unchanged; a sync already in flight for the same reservation yields
    /// `Conflict`. The reservation id is the provider idempotency key, so a
    /// retried call never creates a second event.
    pub async fn sync_reservation(
        &self,
        reservation_id: &str,
        account_ref: &str,
    ) -> AppResult<ReservationRecord> {
        let reservation = match self.reservations.claim_sync(reservation_id, Utc::now())? {
            SyncClaim::AlreadySynced(record) => {
                debug!(target: "app::reservation", %reservation_id, "reservation already synced");
                return Ok(record);
            }
            SyncClaim::Claimed(record) => record,
        };

        let interval = reservation.interval.as_interval();
        let attendee = reservation.contact_id.as_str();
        let provider = self.provider.as_ref();
        let created = call_with_retry(&self.retry, "create_event", || {
            provider.create_event(account_ref, interval, attendee, reservation_id)
        })
        .await;

        match created {
            Ok(event_ref) => self.reservations.mark_synced(reservation_id, &event_ref),
            Err(error) => {
                if let Err(release_error) = self.reservations.release_sync_claim(reservation_id) {
                    warn!(
                        target: "app::reservation",
                        %reservation_id,
                        error = %release_error,
                        "failed to release sync claim"
                    );
                }
                Err(error.into())
            }
        }
    }

    fn normalizer_params(
        &self,
        request: &BatchRequest,
        options: &AllocationOptions,
        settings: &OrganizerSettings,
        now: DateTime<Utc>,
    ) -> NormalizerParams {
        NormalizerParams {
            organizer_timezone: settings.timezone,
            working_hours: settings.working_hours,
            buffer: Duration::minutes(options.buffer_minutes.unwrap_or(settings.buffer_minutes)),
            include_weekends: options.include_weekends.unwrap_or(settings.include_weekends),
            date_range: request.date_range,
            duration: Duration::minutes(request.duration_minutes),
            step_minutes: options.slot_step_minutes,
            not_before: now + self.config.suggestion_lead_time,
            relaxed_extension_minutes: options.relaxed_extension_minutes,
        }
    }

    /// Provider busy time plus every reservation still holding the
    /// organizer's time. Unlike contacts, a failing organizer calendar fails
    /// the batch.
    async fn organizer_busy(
        &self,
        organizer_id: &str,
        account_ref: &str,
        window: BusyWindow,
    ) -> AppResult<Vec<TimeInterval>> {
        let provider = self.provider.as_ref();
        let mut busy = call_with_retry(&self.retry, "get_busy_intervals", || {
            provider.get_busy_intervals(account_ref, window)
        })
        .await
        .map_err(|error| {
            warn!(
                target: "app::batch",
                %organizer_id,
                error = %error,
                "organizer calendar unavailable"
            );
            AppError::from(error)
        })?;

        let reserved = self.reservations.active_intervals(organizer_id, window.start)?;
        debug!(
            target: "app::batch",
            %organizer_id,
            provider_busy = busy.len(),
            reserved = reserved.len(),
            "organizer busy time loaded"
        );
        busy.extend(reserved);
        busy.sort();
        Ok(busy)
    }

    async fn contact_availability(
        &self,
        request: &BatchRequest,
        window: BusyWindow,
    ) -> HashMap<String, ContactAvailability> {
        let provider = self.provider.as_ref();
        let retry = &self.retry;

        stream::iter(request.contacts.iter())
            .map(|contact| async move {
                let availability = fetch_contact_availability(
                    provider,
                    retry,
                    &contact.id,
                    contact.calendar_ref.as_deref(),
                    window,
                )
                .await;
                (contact.id.clone(), availability)
            })
            .buffer_unordered(PROVIDER_CONCURRENCY)
            .collect()
            .await
    }
}

fn validate_request(request: &BatchRequest, options: &AllocationOptions) -> AppResult<()> {
    if request.organizer.organizer_id.trim().is_empty() {
        return Err(AppError::validation("organizer id is required"));
    }
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&request.duration_minutes) {
        return Err(AppError::validation(format!(
            "duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    if !(1..=MAX_SLOTS_PER_CONTACT).contains(&request.slots_per_contact) {
        return Err(AppError::validation(format!(
            "slots per contact must be between 1 and {MAX_SLOTS_PER_CONTACT}"
        )));
    }
    if request.contacts.is_empty() {
        return Err(AppError::validation("at least one contact is required"));
    }
    if request.contacts.len() > MAX_CONTACTS_PER_BATCH {
        return Err(AppError::validation(format!(
            "a batch holds at most {MAX_CONTACTS_PER_BATCH} contacts"
        )));
    }

    let mut seen = HashSet::new();
    let duplicates: Vec<&str> = request
        .contacts
        .iter()
        .filter(|contact| !seen.insert(contact.id.as_str()))
        .map(|contact| contact.id.as_str())
        .collect();
    if !duplicates.is_empty() {
        return Err(AppError::validation_with_details(
            "contact ids must be unique within a batch",
            serde_json::json!({ "duplicates": duplicates }),
        ));
    }
    if request.contacts.iter().any(|contact| contact.id.trim().is_empty()) {
        return Err(AppError::validation("contact id is required"));
    }
    for contact in &request.contacts {
        if let Some(hours) = contact.working_hours {
            hours.validate()?;
        }
    }

    request.date_range.validate()?;
    options.validate()
}

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::availability::{ContactAvailability, DateRange, WorkingHours};
use crate::models::contact::ContactProfile;
use crate::models::slot::{CandidateSlot, TimeInterval};
use crate::services::schedule_utils::{align_up, is_weekend, local_date, local_instant};

/// Organizer-side inputs shared by every contact of one batch.
#[derive(Debug, Clone)]
pub struct NormalizerParams {
    pub organizer_timezone: Tz,
    pub working_hours: WorkingHours,
    pub buffer: Duration,
    pub include_weekends: bool,
    pub date_range: DateRange,
    pub duration: Duration,
    pub step_minutes: i64,
    /// Candidates may not start before this instant.
    pub not_before: DateTime<Utc>,
    pub relaxed_extension_minutes: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedAvailability {
    Open {
        candidates: Vec<CandidateSlot>,
        relaxed: bool,
    },
    /// The working windows never intersect on any day in range.
    NoOverlap,
}

impl NormalizedAvailability {
    pub fn candidates(&self) -> &[CandidateSlot] {
        match self {
            NormalizedAvailability::Open { candidates, .. } => candidates,
            NormalizedAvailability::NoOverlap => &[],
        }
    }

    pub fn is_no_overlap(&self) -> bool {
        matches!(self, NormalizedAvailability::NoOverlap)
    }
}

pub struct AvailabilityNormalizer {
    params: NormalizerParams,
}

impl AvailabilityNormalizer {
    pub fn new(params: NormalizerParams) -> AppResult<Self> {
        params.working_hours.validate()?;
        params.date_range.validate()?;
        if params.duration <= Duration::zero() {
            return Err(AppError::validation("meeting duration must be positive"));
        }
        if params.step_minutes <= 0 {
            return Err(AppError::validation("slot step must be positive"));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &NormalizerParams {
        &self.params
    }

    /// Absolute window covering every organizer-local day in range, padded by
    /// a day on each side so busy lookups see cross-midnight meetings.
    pub fn lookup_window(&self) -> Option<TimeInterval> {
        let range = self.params.date_range.widened(1);
        let tz = self.params.organizer_timezone;
        let start = local_instant(tz, range.start, 0)?;
        let end = local_instant(tz, range.end.succ_opt()?, 0)?;
        Some(TimeInterval { start, end })
    }

    /// Strict pass first; when the strict windows never meet, retries with the
    /// contact's window stretched by the relaxed extension.
    pub fn normalize_with_fallback(
        &self,
        contact: &ContactProfile,
        contact_availability: &ContactAvailability,
        organizer_busy: &[TimeInterval],
    ) -> NormalizedAvailability {
        let contact_hours = self.contact_hours(contact);
        let strict = self.normalize(contact, contact_hours, contact_availability, organizer_busy);
        if !strict.is_no_overlap() || self.params.relaxed_extension_minutes == 0 {
            return strict;
        }

        debug!(
            target: "app::normalizer",
            contact_id = %contact.id,
            extension_minutes = self.params.relaxed_extension_minutes,
            "no overlapping working hours, retrying with relaxed window"
        );
        let relaxed_hours = contact_hours.relaxed(self.params.relaxed_extension_minutes);
        match self.normalize(contact, relaxed_hours, contact_availability, organizer_busy) {
            NormalizedAvailability::Open { candidates, .. } => NormalizedAvailability::Open {
                candidates,
                relaxed: true,
            },
            NormalizedAvailability::NoOverlap => NormalizedAvailability::NoOverlap,
        }
    }

    /// Open intervals of exactly the meeting duration for one contact.
    pub fn normalize(
        &self,
        contact: &ContactProfile,
        contact_hours: WorkingHours,
        contact_availability: &ContactAvailability,
        organizer_busy: &[TimeInterval],
    ) -> NormalizedAvailability {
        let params = &self.params;
        let mut any_overlap = false;
        let mut candidates = Vec::new();

        for day in params.date_range.days() {
            if !params.include_weekends && is_weekend(day.weekday()) {
                continue;
            }
            let Some(organizer_window) =
                day_window(params.organizer_timezone, day, params.working_hours)
            else {
                continue;
            };

            for shared in self.shared_windows(contact, contact_hours, &organizer_window) {
                any_overlap = true;
                self.fill_window(
                    contact,
                    &shared,
                    contact_availability.busy(),
                    organizer_busy,
                    &mut candidates,
                );
            }
        }

        if !any_overlap {
            debug!(target: "app::normalizer", contact_id = %contact.id, "working hours never overlap");
            return NormalizedAvailability::NoOverlap;
        }

        candidates.sort_by(|a, b| a.start.cmp(&b.start));
        candidates.dedup_by(|a, b| a.start == b.start);

        debug!(
            target: "app::normalizer",
            contact_id = %contact.id,
            candidates = candidates.len(),
            unknown_availability = contact_availability.is_unknown(),
            "normalized availability"
        );

        NormalizedAvailability::Open {
            candidates,
            relaxed: false,
        }
    }

    /// Contact hours default to the organizer's window minutes read on the
    /// contact's clock.
    pub fn contact_hours(&self, contact: &ContactProfile) -> WorkingHours {
        contact.working_hours.unwrap_or(self.params.working_hours)
    }

    /// Intersections, at least one meeting long, of the organizer window with
    /// the contact's windows on the contact-local days it touches.
    fn shared_windows(
        &self,
        contact: &ContactProfile,
        contact_hours: WorkingHours,
        organizer_window: &TimeInterval,
    ) -> Vec<TimeInterval> {
        let params = &self.params;
        let first = local_date(contact.timezone, organizer_window.start) - Duration::days(1);
        let last = local_date(contact.timezone, organizer_window.end) + Duration::days(1);

        first
            .iter_days()
            .take_while(|day| *day <= last)
            .filter(|day| params.include_weekends || !is_weekend(day.weekday()))
            .filter_map(|day| day_window(contact.timezone, day, contact_hours))
            .filter_map(|contact_window| {
                let start = organizer_window.start.max(contact_window.start);
                let end = organizer_window.end.min(contact_window.end);
                (end - start >= params.duration).then_some(TimeInterval { start, end })
            })
            .collect()
    }

    fn fill_window(
        &self,
        contact: &ContactProfile,
        window: &TimeInterval,
        contact_busy: &[TimeInterval],
        organizer_busy: &[TimeInterval],
        out: &mut Vec<CandidateSlot>,
    ) {
        let params = &self.params;
        let step = Duration::minutes(params.step_minutes);
        let mut cursor = align_up(window.start.max(params.not_before), params.step_minutes);

        while cursor + params.duration <= window.end {
            let slot = TimeInterval {
                start: cursor,
                end: cursor + params.duration,
            };
            let organizer_clear = organizer_busy
                .iter()
                .all(|busy| !slot.within_buffer_of(busy, params.buffer));
            let contact_clear = contact_busy
                .iter()
                .all(|busy| !slot.within_buffer_of(busy, params.buffer));

            if organizer_clear && contact_clear {
                out.push(CandidateSlot {
                    contact_id: contact.id.clone(),
                    start: slot.start,
                    end: slot.end,
                    timezone_of_contact: contact.timezone,
                });
            }
            cursor += step;
        }
    }
}

fn day_window(tz: Tz, day: NaiveDate, hours: WorkingHours) -> Option<TimeInterval> {
    let start = local_instant(tz, day, hours.start_minute)?;
    let end = if hours.end_minute >= crate::models::availability::MINUTES_PER_DAY {
        local_instant(tz, day.succ_opt()?, 0)?
    } else {
        local_instant(tz, day, hours.end_minute)?
    };
    (end > start).then_some(TimeInterval { start, end })
}

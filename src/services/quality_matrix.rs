use std::cmp::Ordering;

use chrono_tz::Tz;
use tracing::{debug, info};

use crate::config::AllocationOptions;
use crate::error::{AppError, NoViableReason};
use crate::models::availability::ContactAvailability;
use crate::models::batch::UnsatisfiedContact;
use crate::models::contact::ContactProfile;
use crate::models::slot::{ScoredSlot, TimeInterval};
use crate::services::availability_normalizer::{AvailabilityNormalizer, NormalizedAvailability};
use crate::services::quality_scorer::{penalize_relaxed, FairnessState, QualityScorer};

/// Viable candidates of one contact, best first.
#[derive(Debug, Clone)]
pub struct MatrixRow {
    pub contact_id: String,
    pub timezone: Tz,
    pub candidates: Vec<ScoredSlot>,
}

impl MatrixRow {
    /// Score this contact gives `interval`, if it is one of its candidates.
    pub fn score_of(&self, interval: &TimeInterval) -> Option<f64> {
        self.find(interval).map(|slot| slot.score)
    }

    pub fn find(&self, interval: &TimeInterval) -> Option<&ScoredSlot> {
        self.candidates
            .iter()
            .find(|slot| slot.start() == interval.start && slot.candidate.end == interval.end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityMatrix {
    pub rows: Vec<MatrixRow>,
    pub unsatisfied: Vec<UnsatisfiedContact>,
}

impl QualityMatrix {
    pub fn row(&self, contact_id: &str) -> Option<&MatrixRow> {
        self.rows.iter().find(|row| row.contact_id == contact_id)
    }
}

pub struct ContactInput<'a> {
    pub profile: &'a ContactProfile,
    pub availability: ContactAvailability,
}

/// Scores every contact's candidates in contact-id order, threading the
/// batch's fairness state so later contacts see earlier contacts' demand.
/// Contacts left without viable candidates are reported, not returned as
/// empty rows.
pub fn build_quality_matrix(
    normalizer: &AvailabilityNormalizer,
    options: &AllocationOptions,
    contacts: &[ContactInput<'_>],
    organizer_busy: &[TimeInterval],
    slots_per_contact: usize,
    fairness: &mut FairnessState,
) -> QualityMatrix {
    let scorer = QualityScorer::new(options, organizer_busy);
    let mut ordered: Vec<&ContactInput<'_>> = contacts.iter().collect();
    ordered.sort_by(|a, b| a.profile.id.cmp(&b.profile.id));

    let mut matrix = QualityMatrix::default();

    for input in ordered {
        let contact = input.profile;
        let normalized =
            normalizer.normalize_with_fallback(contact, &input.availability, organizer_busy);

        let (candidates, relaxed) = match normalized {
            NormalizedAvailability::NoOverlap => {
                let error = AppError::no_viable_slots(&contact.id, NoViableReason::NoOverlap);
                debug!(target: "app::batch", error = %error, "excluding contact from matrix");
                matrix.unsatisfied.push(UnsatisfiedContact {
                    contact_id: contact.id.clone(),
                    reason: NoViableReason::NoOverlap,
                });
                continue;
            }
            NormalizedAvailability::Open {
                candidates,
                relaxed,
            } => (candidates, relaxed),
        };

        let strict_hours = relaxed.then(|| normalizer.contact_hours(contact));
        let mut viable: Vec<ScoredSlot> = candidates
            .into_iter()
            .map(|candidate| {
                let slot = scorer.score(candidate, &contact.preferences, fairness);
                match strict_hours {
                    Some(hours) => penalize_relaxed(slot, hours),
                    None => slot,
                }
            })
            .filter(|slot| slot.score >= options.viability_floor)
            .collect();
        viable.sort_by(compare_scored);
        viable.truncate(options.max_candidates_per_contact);

        if viable.is_empty() {
            let error =
                AppError::no_viable_slots(&contact.id, NoViableReason::BelowViabilityFloor);
            debug!(target: "app::batch", error = %error, "excluding contact from matrix");
            matrix.unsatisfied.push(UnsatisfiedContact {
                contact_id: contact.id.clone(),
                reason: NoViableReason::BelowViabilityFloor,
            });
            continue;
        }

        let likely: Vec<TimeInterval> = viable
            .iter()
            .take(slots_per_contact)
            .map(ScoredSlot::interval)
            .collect();
        fairness.record(likely.iter());

        matrix.rows.push(MatrixRow {
            contact_id: contact.id.clone(),
            timezone: contact.timezone,
            candidates: viable,
        });
    }

    info!(
        target: "app::batch",
        rows = matrix.rows.len(),
        unsatisfied = matrix.unsatisfied.len(),
        "quality matrix built"
    );

    matrix
}

/// Score descending, earliest start first on ties.
pub fn compare_scored(a: &ScoredSlot, b: &ScoredSlot) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.start().cmp(&b.start()))
}

use chrono::{Duration, Weekday};
use chrono_tz::Tz;

use crate::config::{AllocationOptions, ScoringWeights};
use crate::models::availability::WorkingHours;
use crate::models::contact::ContactPreferences;
use crate::models::slot::{CandidateSlot, ScoreFactor, ScoredSlot, TimeInterval};
use crate::services::schedule_utils::{minutes_of_day_in, weekday_in};

pub const FACTOR_TIME_OF_DAY: &str = "timeOfDay";
pub const FACTOR_WEEKDAY: &str = "weekday";
pub const FACTOR_DENSITY: &str = "density";
pub const FACTOR_FAIRNESS: &str = "fairness";
pub const FACTOR_RELAXED: &str = "relaxed";

pub const MAX_SCORE: f64 = 100.0;

const DECAY_MINUTES: f64 = 120.0;
const PREFERRED_WEEKDAY: f64 = 1.0;
const OTHER_WEEKDAY: f64 = 0.4;
const NO_WEEKDAY_PREFERENCE: f64 = 0.7;
const DENSITY_RADIUS_MINUTES: i64 = 120;
const DENSITY_SATURATION: usize = 4;
const SLOT_CLASS_MINUTES: u32 = 120;
const SLOT_CLASSES: usize = (24 * 60 / SLOT_CLASS_MINUTES) as usize;
const NEUTRAL_FAIRNESS: f64 = 0.5;
/// Points taken from a slot lying wholly outside the contact's own hours.
const RELAXED_PENALTY: f64 = 25.0;

/// Running tally of which slot classes (organizer-local two-hour bands) the
/// contacts processed so far in a batch are leaning on. Owned by one batch
/// and threaded through matrix construction.
#[derive(Debug, Clone)]
pub struct FairnessState {
    timezone: Tz,
    counts: [usize; SLOT_CLASSES],
    total: usize,
}

impl FairnessState {
    pub fn new(organizer_timezone: Tz) -> Self {
        Self {
            timezone: organizer_timezone,
            counts: [0; SLOT_CLASSES],
            total: 0,
        }
    }

    pub fn slot_class(&self, interval: &TimeInterval) -> usize {
        (minutes_of_day_in(self.timezone, interval.start) / SLOT_CLASS_MINUTES) as usize
            % SLOT_CLASSES
    }

    /// 0.5 when nothing is recorded; above it for under-represented classes,
    /// below it for classes already claimed more than their even share.
    pub fn adjustment(&self, interval: &TimeInterval) -> f64 {
        if self.total == 0 {
            return NEUTRAL_FAIRNESS;
        }
        let used_classes = self.counts.iter().filter(|count| **count > 0).count().max(1);
        let expected_share = 1.0 / used_classes as f64;
        let share = self.counts[self.slot_class(interval)] as f64 / self.total as f64;
        (NEUTRAL_FAIRNESS + expected_share - share).clamp(0.0, 1.0)
    }

    /// Records the classes a processed contact is likely to receive.
    pub fn record<'a, I>(&mut self, intervals: I)
    where
        I: IntoIterator<Item = &'a TimeInterval>,
    {
        for interval in intervals {
            let class = self.slot_class(interval);
            self.counts[class] += 1;
            self.total += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

pub struct QualityScorer<'a> {
    weights: ScoringWeights,
    consultant_mode: bool,
    friday_boost: f64,
    organizer_busy: &'a [TimeInterval],
}

impl<'a> QualityScorer<'a> {
    pub fn new(options: &AllocationOptions, organizer_busy: &'a [TimeInterval]) -> Self {
        Self {
            weights: options.weights.clone(),
            consultant_mode: options.consultant_mode,
            friday_boost: options.friday_boost,
            organizer_busy,
        }
    }

    pub fn score(
        &self,
        candidate: CandidateSlot,
        preferences: &ContactPreferences,
        fairness: &FairnessState,
    ) -> ScoredSlot {
        let interval = candidate.interval();
        let tz = candidate.timezone_of_contact;

        let raw = [
            (
                FACTOR_TIME_OF_DAY,
                self.weights.time_of_day,
                time_of_day_value(tz, &interval, preferences),
            ),
            (
                FACTOR_WEEKDAY,
                self.weights.weekday,
                self.weekday_value(weekday_in(tz, interval.start), preferences),
            ),
            (
                FACTOR_DENSITY,
                self.weights.density,
                density_value(&interval, self.organizer_busy),
            ),
            (
                FACTOR_FAIRNESS,
                self.weights.fairness,
                fairness.adjustment(&interval),
            ),
        ];

        let total_weight = self.weights.total();
        let score_factors: Vec<ScoreFactor> = raw
            .iter()
            .map(|(name, weight, value)| ScoreFactor {
                name: (*name).to_string(),
                weight: *weight,
                value: *value,
                contribution: if total_weight > 0.0 {
                    MAX_SCORE * weight * value / total_weight
                } else {
                    0.0
                },
            })
            .collect();
        let score = score_factors
            .iter()
            .map(|factor| factor.contribution)
            .sum::<f64>()
            .clamp(0.0, MAX_SCORE);

        ScoredSlot {
            candidate,
            score,
            score_factors,
        }
    }

    fn weekday_value(&self, day: Weekday, preferences: &ContactPreferences) -> f64 {
        let base = if preferences.preferred_weekdays.is_empty() {
            NO_WEEKDAY_PREFERENCE
        } else if preferences.preferred_weekdays.contains(&day) {
            PREFERRED_WEEKDAY
        } else {
            OTHER_WEEKDAY
        };
        let boost = if self.consultant_mode && day == Weekday::Fri {
            self.friday_boost
        } else {
            0.0
        };
        (base + boost).clamp(0.0, 1.0)
    }
}

/// Docks a slot found through the relaxed fallback in proportion to how much
/// of it falls outside the contact's strict working hours. Recorded as a
/// negative `relaxed` factor.
pub fn penalize_relaxed(mut slot: ScoredSlot, strict_hours: WorkingHours) -> ScoredSlot {
    let outside = outside_fraction(
        slot.candidate.timezone_of_contact,
        &slot.interval(),
        strict_hours,
    );
    let contribution = -RELAXED_PENALTY * outside;
    slot.score_factors.push(ScoreFactor {
        name: FACTOR_RELAXED.to_string(),
        weight: -RELAXED_PENALTY / MAX_SCORE,
        value: outside,
        contribution,
    });
    slot.score = (slot.score + contribution).clamp(0.0, MAX_SCORE);
    slot
}

/// Share of the meeting, on the contact's clock, before the start or after
/// the end of `hours`.
fn outside_fraction(tz: Tz, interval: &TimeInterval, hours: WorkingHours) -> f64 {
    let duration = interval.duration_minutes().max(1);
    let start = minutes_of_day_in(tz, interval.start) as i64;
    let end = start + duration;
    let before = (hours.start_minute as i64 - start).clamp(0, duration);
    let after = (end - hours.end_minute as i64).clamp(0, duration);
    (before + after).min(duration) as f64 / duration as f64
}

/// Full credit inside the contact's preferred band, exponential decay with
/// distance from it otherwise.
fn time_of_day_value(tz: Tz, interval: &TimeInterval, preferences: &ContactPreferences) -> f64 {
    let start = minutes_of_day_in(tz, interval.start) as i64;
    let end = start + interval.duration_minutes();
    let band_start = preferences.preferred_start_minute as i64;
    let band_end = preferences.preferred_end_minute as i64;

    let distance = if start < band_start {
        band_start - start
    } else if end > band_end {
        end - band_end
    } else {
        0
    };
    if distance == 0 {
        1.0
    } else {
        (-(distance as f64) / DECAY_MINUTES).exp()
    }
}

fn density_value(interval: &TimeInterval, organizer_busy: &[TimeInterval]) -> f64 {
    let radius = Duration::minutes(DENSITY_RADIUS_MINUTES);
    let nearby = organizer_busy
        .iter()
        .filter(|busy| interval.within_buffer_of(busy, radius))
        .count()
        .min(DENSITY_SATURATION);
    1.0 - nearby as f64 / DENSITY_SATURATION as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, minute, 0)
            .single()
            .expect("valid datetime")
    }

    fn candidate(day: u32, hour: u32) -> CandidateSlot {
        CandidateSlot {
            contact_id: "c1".into(),
            start: utc(day, hour, 0),
            end: utc(day, hour + 1, 0),
            timezone_of_contact: chrono_tz::UTC,
        }
    }

    #[test]
    fn preferred_band_scores_higher_and_factors_sum_to_score() {
        let options = AllocationOptions::default();
        let scorer = QualityScorer::new(&options, &[]);
        let fairness = FairnessState::new(chrono_tz::UTC);
        let prefs = ContactPreferences::default();

        let inside = scorer.score(candidate(2, 11), &prefs, &fairness);
        let outside = scorer.score(candidate(2, 8), &prefs, &fairness);
        assert!(inside.score > outside.score);
        assert_eq!(inside.score_factors.len(), 4);
        let sum: f64 = inside.score_factors.iter().map(|f| f.contribution).sum();
        assert!((sum - inside.score).abs() < 1e-9);
        assert!((0.0..=MAX_SCORE).contains(&inside.score));
    }

    #[test]
    fn consultant_mode_boosts_fridays() {
        let options = AllocationOptions {
            consultant_mode: true,
            ..Default::default()
        };
        let scorer = QualityScorer::new(&options, &[]);
        let fairness = FairnessState::new(chrono_tz::UTC);
        let prefs = ContactPreferences::default();
        // 2025-06-05 is a Thursday, 2025-06-06 a Friday.
        let thursday = scorer.score(candidate(5, 11), &prefs, &fairness);
        let friday = scorer.score(candidate(6, 11), &prefs, &fairness);
        assert!(friday.score > thursday.score);
        let weekday = friday.factor(FACTOR_WEEKDAY).expect("weekday factor");
        assert!((weekday.value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn crowded_slots_lose_density_credit() -> crate::error::AppResult<()> {
        let busy = vec![
            TimeInterval::new(utc(2, 9, 0), utc(2, 10, 0))?,
            TimeInterval::new(utc(2, 12, 30), utc(2, 13, 0))?,
        ];
        let options = AllocationOptions::default();
        let scorer = QualityScorer::new(&options, &busy);
        let fairness = FairnessState::new(chrono_tz::UTC);
        let prefs = ContactPreferences::default();
        let crowded = scorer.score(candidate(2, 11), &prefs, &fairness);
        let density = crowded.factor(FACTOR_DENSITY).expect("density factor");
        assert!((density.value - 0.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn relaxed_slots_lose_points_outside_strict_hours() -> crate::error::AppResult<()> {
        let options = AllocationOptions::default();
        let scorer = QualityScorer::new(&options, &[]);
        let fairness = FairnessState::new(chrono_tz::UTC);
        let prefs = ContactPreferences::default();
        let strict = WorkingHours::new(9 * 60, 17 * 60)?;

        let inside = scorer.score(candidate(2, 16), &prefs, &fairness);
        let untouched = penalize_relaxed(inside.clone(), strict);
        assert!((untouched.score - inside.score).abs() < 1e-9);

        // 17:00-18:00 lies wholly past the strict end.
        let after_hours = scorer.score(candidate(2, 17), &prefs, &fairness);
        let penalized = penalize_relaxed(after_hours.clone(), strict);
        let factor = penalized.factor(FACTOR_RELAXED).expect("relaxed factor");
        assert!((factor.value - 1.0).abs() < 1e-9);
        assert!((after_hours.score - penalized.score - RELAXED_PENALTY).abs() < 1e-9);
        assert!(penalized.score < untouched.score);

        let sum: f64 = penalized.score_factors.iter().map(|f| f.contribution).sum();
        assert!((sum - penalized.score).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn fairness_penalizes_over_represented_classes() -> crate::error::AppResult<()> {
        let mut fairness = FairnessState::new(chrono_tz::UTC);
        let morning = TimeInterval::new(utc(2, 9, 0), utc(2, 10, 0))?;
        let afternoon = TimeInterval::new(utc(2, 14, 0), utc(2, 15, 0))?;
        assert_eq!(fairness.adjustment(&morning), 0.5);

        fairness.record([&morning, &morning, &morning, &afternoon]);
        assert!(fairness.adjustment(&morning) < 0.5);
        assert!(fairness.adjustment(&afternoon) > 0.5);
        Ok(())
    }
}

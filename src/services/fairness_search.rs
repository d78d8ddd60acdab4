use tracing::{debug, info};

use crate::models::batch::FairnessReport;
use crate::models::slot::ScoredSlot;
use crate::services::greedy_allocator::{Allocation, Assignment};
use crate::services::quality_matrix::{compare_scored, QualityMatrix};

const EPSILON: f64 = 1e-9;

/// Pairwise slot exchange between the least and most satisfied contacts.
/// Only swaps that lower the satisfaction variance without lowering the
/// batch minimum are applied, so the result is never less fair than the
/// greedy input. Stops at a local optimum or when `budget` is spent.
pub fn improve_fairness(
    allocation: &mut Allocation,
    matrix: &QualityMatrix,
    budget: usize,
) -> FairnessReport {
    let greedy_std_dev = std_dev(&satisfactions(&allocation.assignments));
    let mut iterations = 0;
    let mut swaps = 0;

    while iterations < budget && allocation.assignments.len() >= 2 {
        iterations += 1;
        let Some(swap) = best_swap(&allocation.assignments, matrix) else {
            debug!(target: "app::local_search", iterations, "no improving swap left");
            break;
        };
        apply(&mut allocation.assignments, &swap);
        swaps += 1;
        debug!(
            target: "app::local_search",
            low = %allocation.assignments[swap.low].contact_id,
            high = %allocation.assignments[swap.high].contact_id,
            variance = swap.variance,
            "swap applied"
        );
    }

    let final_values = satisfactions(&allocation.assignments);
    let min_satisfaction = if final_values.is_empty() {
        0.0
    } else {
        final_values.iter().copied().fold(f64::INFINITY, f64::min)
    };
    let report = FairnessReport {
        greedy_std_dev,
        final_std_dev: std_dev(&final_values),
        min_satisfaction,
        iterations,
        swaps,
    };

    info!(
        target: "app::local_search",
        greedy_std_dev = report.greedy_std_dev,
        final_std_dev = report.final_std_dev,
        iterations = report.iterations,
        swaps = report.swaps,
        "fairness search finished"
    );

    report
}

#[derive(Debug, Clone)]
struct Swap {
    low: usize,
    low_slot: usize,
    high: usize,
    high_slot: usize,
    /// Rescored slot the low contact receives.
    to_low: ScoredSlot,
    /// Rescored slot the high contact receives.
    to_high: ScoredSlot,
    variance: f64,
}

fn satisfactions(assignments: &[Assignment]) -> Vec<f64> {
    assignments.iter().map(Assignment::satisfaction).collect()
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Searches partners from the most satisfied down and returns the best
/// improving swap with the first partner that offers one.
fn best_swap(assignments: &[Assignment], matrix: &QualityMatrix) -> Option<Swap> {
    let values = satisfactions(assignments);
    let current_variance = variance(&values);
    let current_min = values.iter().copied().fold(f64::INFINITY, f64::min);

    let low = (0..values.len()).min_by(|a, b| {
        values[*a]
            .partial_cmp(&values[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
    })?;
    let mut partners: Vec<usize> = (0..values.len()).filter(|index| *index != low).collect();
    partners.sort_by(|a, b| {
        values[*b]
            .partial_cmp(&values[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let low_row = matrix.row(&assignments[low].contact_id)?;

    for high in partners {
        let Some(high_row) = matrix.row(&assignments[high].contact_id) else {
            continue;
        };
        let mut best: Option<Swap> = None;

        for (low_slot, given_up) in assignments[low].slots.iter().enumerate() {
            for (high_slot, taken) in assignments[high].slots.iter().enumerate() {
                let (Some(to_low), Some(to_high)) = (
                    low_row.find(&taken.interval()),
                    high_row.find(&given_up.interval()),
                ) else {
                    continue;
                };
                if !fits(&assignments[low].slots, low_slot, to_low)
                    || !fits(&assignments[high].slots, high_slot, to_high)
                {
                    continue;
                }

                let mut trial = values.clone();
                trial[low] += to_low.score - given_up.score;
                trial[high] += to_high.score - taken.score;
                let trial_variance = variance(&trial);
                let trial_min = trial.iter().copied().fold(f64::INFINITY, f64::min);

                if trial_variance + EPSILON < current_variance
                    && trial_min + EPSILON >= current_min
                    && best
                        .as_ref()
                        .map_or(true, |swap| trial_variance < swap.variance)
                {
                    best = Some(Swap {
                        low,
                        low_slot,
                        high,
                        high_slot,
                        to_low: to_low.clone(),
                        to_high: to_high.clone(),
                        variance: trial_variance,
                    });
                }
            }
        }

        if best.is_some() {
            return best;
        }
    }

    None
}

/// Whether `incoming` can replace `slots[replaced]` without overlapping the
/// contact's other slots.
fn fits(slots: &[ScoredSlot], replaced: usize, incoming: &ScoredSlot) -> bool {
    let interval = incoming.interval();
    slots
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != replaced)
        .all(|(_, slot)| !slot.interval().overlaps(&interval))
}

fn apply(assignments: &mut [Assignment], swap: &Swap) {
    assignments[swap.low].slots[swap.low_slot] = swap.to_low.clone();
    assignments[swap.high].slots[swap.high_slot] = swap.to_high.clone();
    assignments[swap.low].slots.sort_by(compare_scored);
    assignments[swap.high].slots.sort_by(compare_scored);
}

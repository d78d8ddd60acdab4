use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AllocationOptions;
use crate::error::{AppError, AppResult, NoViableReason};
use crate::models::batch::UnsatisfiedContact;
use crate::models::slot::{ScoredSlot, TimeInterval};
use crate::services::quality_matrix::{compare_scored, MatrixRow, QualityMatrix};

const MAX_POOL: usize = 16;

/// Cooperative cancellation flag for an in-flight batch. Checked between
/// contacts, never mid-scoring.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> AppResult<()> {
        if self.is_cancelled() {
            Err(AppError::cancelled())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub contact_id: String,
    pub slots: Vec<ScoredSlot>,
}

impl Assignment {
    pub fn satisfaction(&self) -> f64 {
        self.slots.iter().map(|slot| slot.score).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Allocation {
    /// Ordered by contact id.
    pub assignments: Vec<Assignment>,
    pub exhausted: Vec<UnsatisfiedContact>,
}

impl Allocation {
    pub fn slots_for(&self, contact_id: &str) -> Option<&[ScoredSlot]> {
        self.assignments
            .iter()
            .find(|assignment| assignment.contact_id == contact_id)
            .map(|assignment| assignment.slots.as_slice())
    }

    pub fn intervals(&self) -> impl Iterator<Item = TimeInterval> + '_ {
        self.assignments
            .iter()
            .flat_map(|assignment| assignment.slots.iter().map(ScoredSlot::interval))
    }
}

/// How hard the lookahead penalty bites. The allocator walks these in order
/// before it settles for fewer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pressure {
    Strict,
    Relaxed,
    Unpenalized,
}

impl Pressure {
    const LADDER: [Pressure; 3] = [Pressure::Strict, Pressure::Relaxed, Pressure::Unpenalized];

    fn weight(self, base: f64) -> f64 {
        match self {
            Pressure::Strict => base,
            Pressure::Relaxed => base / 2.0,
            Pressure::Unpenalized => 0.0,
        }
    }

    fn admits(self, cost: f64, limit: f64) -> bool {
        match self {
            Pressure::Strict => cost <= limit,
            Pressure::Relaxed | Pressure::Unpenalized => true,
        }
    }
}

#[derive(Debug, Clone)]
struct Pick {
    slot: ScoredSlot,
    cost: f64,
    objective: f64,
}

/// Hands out slots contact by contact, scarcest first, so the hardest to
/// satisfy pick before the easy ones. Chosen intervals are reserved for the
/// rest of the run; an interval is never given to two contacts.
pub fn allocate(
    matrix: &QualityMatrix,
    slots_per_contact: usize,
    options: &AllocationOptions,
    cancel: &CancellationToken,
) -> AppResult<Allocation> {
    let mut order: Vec<&MatrixRow> = matrix.rows.iter().collect();
    order.sort_by(|a, b| {
        a.candidates
            .len()
            .cmp(&b.candidates.len())
            .then_with(|| a.contact_id.cmp(&b.contact_id))
    });

    let mut reserved: Vec<TimeInterval> = Vec::new();
    let mut allocation = Allocation::default();

    for (position, row) in order.iter().enumerate() {
        cancel.check()?;

        let later = &order[position + 1..];
        let open: Vec<&ScoredSlot> = row
            .candidates
            .iter()
            .filter(|slot| is_free(&slot.interval(), &reserved))
            .collect();

        let costs: Vec<f64> = open
            .iter()
            .map(|slot| lookahead_cost(&slot.interval(), later, &reserved))
            .collect();

        let chosen = choose_slots(&open, &costs, slots_per_contact, options);

        if chosen.is_empty() {
            let error =
                AppError::no_viable_slots(&row.contact_id, NoViableReason::AllocationExhausted);
            debug!(target: "app::allocator", error = %error, "no free candidates left");
            allocation.exhausted.push(UnsatisfiedContact {
                contact_id: row.contact_id.clone(),
                reason: NoViableReason::AllocationExhausted,
            });
            continue;
        }

        debug!(
            target: "app::allocator",
            contact_id = %row.contact_id,
            scarcity = row.candidates.len(),
            assigned = chosen.len(),
            requested = slots_per_contact,
            "contact allocated"
        );

        reserved.extend(chosen.iter().map(ScoredSlot::interval));
        allocation.assignments.push(Assignment {
            contact_id: row.contact_id.clone(),
            slots: chosen,
        });
    }

    allocation
        .assignments
        .sort_by(|a, b| a.contact_id.cmp(&b.contact_id));

    info!(
        target: "app::allocator",
        assigned_contacts = allocation.assignments.len(),
        exhausted = allocation.exhausted.len(),
        reserved = reserved.len(),
        "greedy allocation finished"
    );

    Ok(allocation)
}

fn is_free(interval: &TimeInterval, reserved: &[TimeInterval]) -> bool {
    reserved.iter().all(|taken| !taken.overlaps(interval))
}

/// Sum, over later contacts whose best free option collides with `interval`,
/// of the score they would lose by falling back to their next free option.
fn lookahead_cost(interval: &TimeInterval, later: &[&MatrixRow], reserved: &[TimeInterval]) -> f64 {
    later
        .iter()
        .map(|row| {
            let mut free = row
                .candidates
                .iter()
                .filter(|slot| is_free(&slot.interval(), reserved));
            let Some(best) = free.next() else {
                return 0.0;
            };
            if !best.interval().overlaps(interval) {
                return 0.0;
            }
            let fallback = free
                .find(|slot| !slot.interval().overlaps(interval))
                .map(|slot| slot.score)
                .unwrap_or(0.0);
            (best.score - fallback).max(0.0)
        })
        .sum()
}

/// Largest feasible slot count first; within a count, the lookahead penalty
/// is relaxed step by step before the count is reduced.
fn choose_slots(
    open: &[&ScoredSlot],
    costs: &[f64],
    wanted: usize,
    options: &AllocationOptions,
) -> Vec<ScoredSlot> {
    let ceiling = wanted.min(open.len());

    for size in (1..=ceiling).rev() {
        for pressure in Pressure::LADDER {
            let weight = pressure.weight(options.lookahead_weight);
            let mut admissible: Vec<Pick> = open
                .iter()
                .zip(costs)
                .filter(|(_, cost)| pressure.admits(**cost, options.lookahead_cost_limit))
                .map(|(slot, cost)| Pick {
                    slot: (*slot).clone(),
                    cost: *cost,
                    objective: slot.score - weight * cost,
                })
                .collect();
            if admissible.len() < size {
                continue;
            }
            admissible.sort_by(|a, b| {
                b.objective
                    .partial_cmp(&a.objective)
                    .unwrap_or(CmpOrdering::Equal)
                    .then_with(|| a.slot.start().cmp(&b.slot.start()))
            });

            if let Some(picked) = pick_combination(&admissible, size, options.overcommit_margin) {
                if pressure != Pressure::Strict || size < wanted {
                    debug!(
                        target: "app::allocator",
                        ?pressure,
                        size,
                        wanted,
                        lookahead_cost = picked.iter().map(|option| option.cost).sum::<f64>(),
                        "allocation constraints relaxed"
                    );
                }
                let mut slots: Vec<ScoredSlot> =
                    picked.into_iter().map(|option| option.slot).collect();
                slots.sort_by(compare_scored);
                return slots;
            }
        }
    }

    Vec::new()
}

/// Best set of `size` mutually non-overlapping options by total objective,
/// searched among the top `size + margin`, widening the pool when that is
/// not enough and finally falling back to a first-fit scan.
fn pick_combination(admissible: &[Pick], size: usize, margin: usize) -> Option<Vec<Pick>> {
    let mut pool_len = size.saturating_add(margin).min(admissible.len());
    loop {
        let pool = &admissible[..pool_len];
        let mut best: Option<(f64, Vec<usize>)> = None;
        search(pool, size, 0, &mut Vec::new(), 0.0, &mut best);
        if let Some((_, indices)) = best {
            return Some(indices.into_iter().map(|index| pool[index].clone()).collect());
        }
        let widened = MAX_POOL.max(size.saturating_add(margin)).min(admissible.len());
        if widened <= pool_len {
            break;
        }
        pool_len = widened;
    }

    let mut picked: Vec<Pick> = Vec::with_capacity(size);
    for option in admissible {
        let interval = option.slot.interval();
        if picked
            .iter()
            .all(|chosen| !chosen.slot.interval().overlaps(&interval))
        {
            picked.push(option.clone());
            if picked.len() == size {
                return Some(picked);
            }
        }
    }
    None
}

fn search(
    pool: &[Pick],
    size: usize,
    start: usize,
    chosen: &mut Vec<usize>,
    sum: f64,
    best: &mut Option<(f64, Vec<usize>)>,
) {
    if chosen.len() == size {
        if best.as_ref().map_or(true, |(value, _)| sum > *value) {
            *best = Some((sum, chosen.clone()));
        }
        return;
    }

    let missing = size - chosen.len();
    for index in start..pool.len() {
        if pool.len() - index < missing {
            break;
        }
        // Pool is sorted by objective, so this bounds every completion.
        let bound: f64 = sum
            + pool[index..index + missing]
                .iter()
                .map(|option| option.objective)
                .sum::<f64>();
        if let Some((value, _)) = best.as_ref() {
            if bound <= *value {
                break;
            }
        }

        let interval = pool[index].slot.interval();
        if chosen
            .iter()
            .any(|&other| pool[other].slot.interval().overlaps(&interval))
        {
            continue;
        }
        chosen.push(index);
        search(pool, size, index + 1, chosen, sum + pool[index].objective, best);
        chosen.pop();
    }
}

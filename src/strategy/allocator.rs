//! Turns "N proposals needed" into an integer count per strategy.
//!
//! The allocation is pure and deterministic: the same weights, count and
//! availability always yield the same plan. Randomness only enters later,
//! when a [`StrategyPlan`](super::StrategyPlan) picks its reference material.

use std::collections::BTreeMap;

use super::{Strategy, StrategyAvailability};

/// Allocate `count` proposals across strategies.
///
/// Unusable strategies are zeroed and their mass is spread over the remaining
/// strategies by renormalization. Each strategy receives `round(count * w)`;
/// rounding error is reconciled on [`Strategy::DEFAULT`] so that the returned
/// counts sum exactly to `count`. Strategies with a zero count are omitted.
pub fn allocate(
    count: usize,
    weights: &BTreeMap<Strategy, f64>,
    availability: &StrategyAvailability,
) -> BTreeMap<Strategy, usize> {
    let mut plan = BTreeMap::new();
    if count == 0 {
        return plan;
    }

    let usable: Vec<(Strategy, f64)> = weights
        .iter()
        .map(|(strategy, weight)| {
            let weight = if availability.is_usable(*strategy) && weight.is_finite() && *weight > 0.0
            {
                *weight
            } else {
                0.0
            };
            (*strategy, weight)
        })
        .collect();

    let total: f64 = usable.iter().map(|(_, w)| w).sum();
    if total <= f64::EPSILON {
        plan.insert(Strategy::DEFAULT, count);
        return plan;
    }

    let mut counts: BTreeMap<Strategy, usize> = usable
        .iter()
        .map(|(strategy, weight)| {
            let share = (count as f64 * (weight / total)).round().max(0.0) as usize;
            (*strategy, share)
        })
        .collect();

    let allocated: usize = counts.values().sum();
    if allocated < count {
        *counts.entry(Strategy::DEFAULT).or_insert(0) += count - allocated;
    } else if allocated > count {
        remove_surplus(&mut counts, allocated - count);
    }

    counts.retain(|_, n| *n > 0);
    counts
}

/// Take `surplus` back out of the allocation, from the default strategy first
/// and then from the smallest non-zero allocations.
fn remove_surplus(counts: &mut BTreeMap<Strategy, usize>, mut surplus: usize) {
    if let Some(default) = counts.get_mut(&Strategy::DEFAULT) {
        let taken = surplus.min(*default);
        *default -= taken;
        surplus -= taken;
    }

    while surplus > 0 {
        let smallest = counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .min_by_key(|(strategy, n)| (**n, **strategy))
            .map(|(strategy, _)| *strategy);

        match smallest {
            Some(strategy) => {
                if let Some(n) = counts.get_mut(&strategy) {
                    *n -= 1;
                    surplus -= 1;
                }
            }
            None => break,
        }
    }
}

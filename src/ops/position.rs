use serde::{Deserialize, Serialize};

use crate::model::item::{ItemId, OrderableItem, Position};

/// Tuning for fractional position allocation (`[positions]` in project.toml)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionPolicy {
    /// Distance used when inserting before the first or after the last sibling
    #[serde(default = "default_step")]
    pub step: f64,
    /// Position given to the first item of an empty partition
    #[serde(default = "default_baseline")]
    pub baseline: f64,
    /// Smallest gap between two neighbours that may still be split
    #[serde(default = "default_min_gap")]
    pub min_gap: f64,
}

impl Default for PositionPolicy {
    fn default() -> Self {
        PositionPolicy {
            step: default_step(),
            baseline: default_baseline(),
            min_gap: default_min_gap(),
        }
    }
}

fn default_step() -> f64 {
    1.0
}

fn default_baseline() -> f64 {
    1.0
}

fn default_min_gap() -> f64 {
    1e-9
}

/// Result of asking for a slot between two siblings
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allocation {
    /// A position strictly between the requested neighbours
    At(Position),
    /// No representable value fits; the partition must be renumbered first
    Exhausted,
}

/// Compute a position for an item inserted at `target_index` of `siblings`.
///
/// `siblings` must be in sibling order and must not contain the moved item.
/// Indices past the end clamp to an append.
pub fn allocate_position(
    siblings: &[&OrderableItem],
    target_index: usize,
    policy: &PositionPolicy,
) -> Allocation {
    let index = target_index.min(siblings.len());
    let before = index.checked_sub(1).map(|i| siblings[i].position);
    let after = siblings.get(index).map(|s| s.position);

    match (before, after) {
        (None, None) => Allocation::At(Position(policy.baseline)),
        (None, Some(next)) => extrapolate(next, -policy.step),
        (Some(prev), None) => extrapolate(prev, policy.step),
        (Some(prev), Some(next)) => between(prev, next, policy.min_gap),
    }
}

fn extrapolate(from: Position, step: f64) -> Allocation {
    let candidate = from.0 + step;
    let moved_past = if step < 0.0 {
        candidate < from.0
    } else {
        candidate > from.0
    };
    if from.is_finite() && candidate.is_finite() && moved_past {
        Allocation::At(Position(candidate))
    } else {
        Allocation::Exhausted
    }
}

fn between(lo: Position, hi: Position, min_gap: f64) -> Allocation {
    if !lo.is_finite() || !hi.is_finite() {
        return Allocation::Exhausted;
    }
    let gap = hi.0 - lo.0;
    if gap < min_gap {
        return Allocation::Exhausted;
    }
    let mid = lo.0 + gap / 2.0;
    if lo.0 < mid && mid < hi.0 {
        Allocation::At(Position(mid))
    } else {
        Allocation::Exhausted
    }
}

/// Integer ranks 0, 1, 2, ... in the given sibling order.
pub fn renumber(siblings: &[&OrderableItem]) -> Vec<(ItemId, Position)> {
    siblings
        .iter()
        .enumerate()
        .map(|(rank, item)| (item.id.clone(), Position(rank as f64)))
        .collect()
}

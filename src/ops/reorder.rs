use tracing::debug;

use crate::drag::DropEvent;
use crate::model::collection::Collection;
use crate::model::item::{ItemId, OrderableItem};
use crate::ops::position::{Allocation, PositionPolicy, allocate_position, renumber};

/// Error type for reorder computation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReorderError {
    #[error("item not found: {0}")]
    UnknownItem(ItemId),
    #[error("no position available in {partition} even after renumbering")]
    PositionSpaceExhausted { partition: String },
}

/// The concrete mutation a drop turns into
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reorder {
    /// Items whose partition or position changed, moved item first
    pub updated: Vec<OrderableItem>,
    /// Whether the target partition had to be renumbered
    pub renumbered: bool,
}

impl Reorder {
    pub fn is_noop(&self) -> bool {
        self.updated.is_empty()
    }
}

/// Turn a drop into the minimal set of item updates.
///
/// Pure and deterministic: the same collection and event always give the
/// same result. The collection itself is not touched.
pub fn compute_reorder(
    collection: &Collection,
    event: &DropEvent,
    policy: &PositionPolicy,
) -> Result<Reorder, ReorderError> {
    let moved = collection
        .get(&event.item_id)
        .ok_or_else(|| ReorderError::UnknownItem(event.item_id.clone()))?;

    if moved.partition != event.source_partition {
        debug!(
            item = %moved.id,
            recorded = %event.source_partition,
            current = %moved.partition,
            "drop source partition is stale, using current partition"
        );
    }

    let siblings: Vec<&OrderableItem> = collection
        .partition(&event.target_partition)
        .into_iter()
        .filter(|s| s.id != moved.id)
        .collect();
    let target_index = event.target_index.min(siblings.len());

    if moved.partition == event.target_partition
        && collection.index_in_partition(&moved.id) == Some(target_index)
    {
        return Ok(Reorder::default());
    }

    let mut updated = Vec::new();
    let mut renumbered_siblings = Vec::new();

    let allocation = if siblings_need_renumber(&siblings) {
        Allocation::Exhausted
    } else {
        allocate_position(&siblings, target_index, policy)
    };

    let position = match allocation {
        Allocation::At(position) => position,
        Allocation::Exhausted => {
            let ranked: Vec<OrderableItem> = renumber(&siblings)
                .into_iter()
                .zip(siblings.iter())
                .map(|((_, rank), sibling)| {
                    let mut item = (*sibling).clone();
                    item.position = rank;
                    item
                })
                .collect();
            let ranked_refs: Vec<&OrderableItem> = ranked.iter().collect();
            let position = match allocate_position(&ranked_refs, target_index, policy) {
                Allocation::At(position) => position,
                Allocation::Exhausted => {
                    return Err(ReorderError::PositionSpaceExhausted {
                        partition: event.target_partition.to_string(),
                    });
                }
            };
            for (before, after) in siblings.iter().zip(ranked) {
                if before.placement_differs(&after) {
                    renumbered_siblings.push(after);
                }
            }
            debug!(
                partition = %event.target_partition,
                changed = renumbered_siblings.len(),
                "renumbered partition before allocating"
            );
            position
        }
    };

    let mut moved_after = moved.clone();
    moved_after.partition = event.target_partition.clone();
    moved_after.position = position;
    if moved.placement_differs(&moved_after) {
        updated.push(moved_after);
    }
    let renumbered = !renumbered_siblings.is_empty();
    updated.extend(renumbered_siblings);

    Ok(Reorder {
        updated,
        renumbered,
    })
}

/// Duplicate or non-finite positions make "strictly between" meaningless.
fn siblings_need_renumber(siblings: &[&OrderableItem]) -> bool {
    siblings.iter().any(|s| !s.position.is_finite())
        || siblings
            .windows(2)
            .any(|pair| pair[0].position.total_cmp(&pair[1].position).is_eq())
}

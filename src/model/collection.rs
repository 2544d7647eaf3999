use indexmap::IndexMap;

use super::item::{ItemId, OrderableItem, PartitionKey};

/// The full set of orderable items held by the UI, keyed by id.
///
/// Iteration follows insertion order; sibling order is always derived from
/// `(position, id)` and never from storage order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    items: IndexMap<ItemId, OrderableItem>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of items. A later duplicate id replaces the earlier one.
    pub fn from_items(items: impl IntoIterator<Item = OrderableItem>) -> Self {
        let mut map = IndexMap::new();
        for item in items {
            map.insert(item.id.clone(), item);
        }
        Collection { items: map }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&OrderableItem> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrderableItem> {
        self.items.values()
    }

    pub fn into_items(self) -> Vec<OrderableItem> {
        self.items.into_values().collect()
    }

    /// Items of one partition in sibling order.
    pub fn partition(&self, key: &PartitionKey) -> Vec<&OrderableItem> {
        let mut siblings: Vec<&OrderableItem> =
            self.items.values().filter(|i| &i.partition == key).collect();
        siblings.sort_by(|a, b| a.order_cmp(b));
        siblings
    }

    /// Distinct partition keys in first-seen order.
    pub fn partitions(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = Vec::new();
        for item in self.items.values() {
            if !keys.contains(&item.partition) {
                keys.push(item.partition.clone());
            }
        }
        keys
    }

    /// Index of an item within its own partition's sibling order.
    pub fn index_in_partition(&self, id: &ItemId) -> Option<usize> {
        let item = self.items.get(id)?;
        self.partition(&item.partition)
            .iter()
            .position(|sibling| &sibling.id == id)
    }

    /// Overwrite the listed items by id. Unknown ids are inserted.
    pub fn apply(&mut self, updates: &[OrderableItem]) {
        for update in updates {
            match self.items.get_mut(&update.id) {
                Some(existing) => *existing = update.clone(),
                None => {
                    self.items.insert(update.id.clone(), update.clone());
                }
            }
        }
    }

    /// Insert or replace an item.
    pub fn insert(&mut self, item: OrderableItem) -> Option<OrderableItem> {
        self.items.insert(item.id.clone(), item)
    }

    /// Remove an item, keeping the insertion order of the rest.
    pub fn remove(&mut self, id: &ItemId) -> Option<OrderableItem> {
        self.items.shift_remove(id)
    }

    /// True if two siblings share a position or any position is not finite.
    pub fn has_duplicate_positions(&self, key: &PartitionKey) -> bool {
        let siblings = self.partition(key);
        siblings.iter().any(|s| !s.position.is_finite())
            || siblings
                .windows(2)
                .any(|pair| pair[0].position.total_cmp(&pair[1].position).is_eq())
    }
}

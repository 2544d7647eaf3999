use std::cell::RefCell;
use std::rc::Rc;

use crate::model::item::{ItemId, OrderableItem};

/// A committed change to the local collection
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// A drop was applied optimistically
    Applied { items: Vec<OrderableItem> },
    /// The store answered with canonical values that differ from ours
    Reconciled { items: Vec<OrderableItem> },
    /// A failed commit was undone; `items` are the restored values
    RolledBack { items: Vec<OrderableItem> },
    /// Items were created, deleted or refetched
    Refreshed,
}

/// One per failed commit, emitted after the rollback is already visible
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceFailure {
    pub item_id: ItemId,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Rc<dyn Fn(&E)>;

/// Registry of callbacks for one event type.
pub(crate) struct Listeners<E> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener<E>)>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Listeners {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<E> Listeners<E> {
    pub(crate) fn add(&mut self, listener: Listener<E>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Call every listener. The registry is not borrowed while callbacks run,
/// so a listener may subscribe or unsubscribe.
pub(crate) fn emit<E>(listeners: &RefCell<Listeners<E>>, event: &E) {
    let current: Vec<Listener<E>> = listeners
        .borrow()
        .entries
        .iter()
        .map(|(_, l)| Rc::clone(l))
        .collect();
    for listener in current {
        listener(event);
    }
}

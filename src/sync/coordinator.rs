use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use tracing::{debug, info, warn};

use crate::drag::{DragMachine, DropEvent, SessionError};
use crate::model::collection::Collection;
use crate::model::item::{ItemId, OrderableItem, PartitionKey};
use crate::ops::position::{PositionPolicy, renumber};
use crate::ops::reorder::compute_reorder;

use super::SyncError;
use super::events::{Listeners, PersistenceFailure, StateChange, SubscriptionId, emit};
use super::gateway::{CommitReceipt, GatewayError, PersistenceGateway};

/// The persistence half of a drop. Spawn it on the UI executor; the
/// optimistic state is already live before it is first polled.
pub type PendingCommit = LocalBoxFuture<'static, CommitOutcome>;

/// How a commit settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The store accepted the change
    Confirmed,
    /// The store refused; local state was restored and a failure emitted
    RolledBack,
    /// A later drop of the same item superseded this one; response ignored
    Stale,
}

/// A drop whose commit has not answered yet
#[derive(Debug)]
struct Outstanding {
    /// Item the drop moved; `None` for a renumber issued after a rollback
    moved: Option<ItemId>,
    /// Optimistic values we applied
    changes: Vec<OrderableItem>,
    /// Values before this revision, restored on failure
    snapshot: Vec<OrderableItem>,
}

#[derive(Debug)]
struct Inner {
    collection: Collection,
    drag: DragMachine,
    policy: PositionPolicy,
    next_revision: u64,
    /// Unsettled revisions that wrote each item, oldest first. The last one
    /// owns the item's local value.
    writers: HashMap<ItemId, Vec<u64>>,
    outstanding: BTreeMap<u64, Outstanding>,
}

impl Inner {
    fn is_in_flight(&self, id: &ItemId) -> bool {
        self.outstanding.values().any(|o| o.moved.as_ref() == Some(id))
    }

    fn owns(&self, id: &ItemId, revision: u64) -> bool {
        self.writers.get(id).and_then(|w| w.last()) == Some(&revision)
    }

    /// Record `changes` as a new revision on top of the current state.
    fn stage(&mut self, moved: Option<ItemId>, changes: Vec<OrderableItem>) -> u64 {
        let snapshot: Vec<OrderableItem> = changes
            .iter()
            .filter_map(|c| self.collection.get(&c.id).cloned())
            .collect();
        self.collection.apply(&changes);

        self.next_revision += 1;
        let revision = self.next_revision;
        for item in &changes {
            self.writers.entry(item.id.clone()).or_default().push(revision);
        }
        self.outstanding.insert(
            revision,
            Outstanding {
                moved,
                changes,
                snapshot,
            },
        );
        revision
    }

    /// A confirmed revision supersedes itself and every earlier writer.
    fn release_confirmed(&mut self, outstanding: &Outstanding, revision: u64) {
        for change in &outstanding.changes {
            if let Some(stack) = self.writers.get_mut(&change.id) {
                if stack.contains(&revision) {
                    stack.retain(|r| *r > revision);
                }
                if stack.is_empty() {
                    self.writers.remove(&change.id);
                }
            }
        }
    }

    /// Undo a failed revision. Items it still owns get their previous value
    /// back and pass to the next older writer. For items a later revision
    /// has since overwritten, that revision inherits the value to restore.
    fn release_failed(&mut self, outstanding: Outstanding, revision: u64) -> Vec<OrderableItem> {
        let mut restored = Vec::new();
        for before in outstanding.snapshot {
            let Some(stack) = self.writers.get_mut(&before.id) else {
                continue;
            };
            let Some(at) = stack.iter().position(|r| *r == revision) else {
                continue;
            };
            stack.remove(at);
            if at == stack.len() {
                if stack.is_empty() {
                    self.writers.remove(&before.id);
                }
                if self.collection.contains(&before.id) {
                    self.collection.insert(before.clone());
                    restored.push(before);
                }
            } else {
                let later = stack[at];
                if let Some(next) = self.outstanding.get_mut(&later)
                    && let Some(slot) = next.snapshot.iter_mut().find(|s| s.id == before.id)
                {
                    *slot = before;
                }
            }
        }
        restored
    }

    /// Renumber partitions that a rollback left with colliding positions.
    fn repair_collisions(&self, restored: &[OrderableItem]) -> Vec<OrderableItem> {
        let mut keys: Vec<&PartitionKey> = restored.iter().map(|r| &r.partition).collect();
        keys.sort();
        keys.dedup();

        let mut repaired = Vec::new();
        for key in keys {
            if !self.collection.has_duplicate_positions(key) {
                continue;
            }
            let siblings = self.collection.partition(key);
            for ((_, rank), sibling) in renumber(&siblings).into_iter().zip(&siblings) {
                if sibling.position != rank {
                    let mut item = (*sibling).clone();
                    item.position = rank;
                    repaired.push(item);
                }
            }
        }
        repaired
    }
}

/// Owns the collection and turns drags into optimistic, revertible commits.
///
/// Single-threaded: the handle is `Rc`-based and cheap to clone, so UI
/// callbacks and spawned commits can each hold one. No borrow of the inner
/// state is held across an await or while listeners run.
pub struct SyncCore<G> {
    inner: Rc<RefCell<Inner>>,
    gateway: Rc<G>,
    changes: Rc<RefCell<Listeners<StateChange>>>,
    failures: Rc<RefCell<Listeners<PersistenceFailure>>>,
}

impl<G> Clone for SyncCore<G> {
    fn clone(&self) -> Self {
        SyncCore {
            inner: Rc::clone(&self.inner),
            gateway: Rc::clone(&self.gateway),
            changes: Rc::clone(&self.changes),
            failures: Rc::clone(&self.failures),
        }
    }
}

impl<G: PersistenceGateway + 'static> SyncCore<G> {
    pub fn new(collection: Collection, gateway: G) -> Self {
        SyncCore {
            inner: Rc::new(RefCell::new(Inner {
                collection,
                drag: DragMachine::new(),
                policy: PositionPolicy::default(),
                next_revision: 0,
                writers: HashMap::new(),
                outstanding: BTreeMap::new(),
            })),
            gateway: Rc::new(gateway),
            changes: Rc::new(RefCell::new(Listeners::default())),
            failures: Rc::new(RefCell::new(Listeners::default())),
        }
    }

    pub fn with_policy(self, policy: PositionPolicy) -> Self {
        self.inner.borrow_mut().policy = policy;
        self
    }

    pub fn policy(&self) -> PositionPolicy {
        self.inner.borrow().policy
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    // -----------------------------------------------------------------------
    // Read access
    // -----------------------------------------------------------------------

    /// Clone of the current (optimistic) collection
    pub fn snapshot(&self) -> Collection {
        self.inner.borrow().collection.clone()
    }

    pub fn with_collection<R>(&self, f: impl FnOnce(&Collection) -> R) -> R {
        f(&self.inner.borrow().collection)
    }

    pub fn is_dragging(&self) -> bool {
        self.inner.borrow().drag.is_dragging()
    }

    /// True while a commit moving `id` has not answered
    pub fn is_in_flight(&self, id: &ItemId) -> bool {
        self.inner.borrow().is_in_flight(id)
    }

    pub fn outstanding_commits(&self) -> usize {
        self.inner.borrow().outstanding.len()
    }

    /// Live-reorder preview of the target partition during a drag
    pub fn preview(&self) -> Option<Vec<ItemId>> {
        let inner = self.inner.borrow();
        inner.drag.preview(&inner.collection)
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Called after every optimistic apply, reconcile, rollback or refresh.
    pub fn subscribe(&self, listener: impl Fn(&StateChange) + 'static) -> SubscriptionId {
        self.changes.borrow_mut().add(Rc::new(listener))
    }

    /// Error channel: one event per failed commit.
    pub fn on_failure(&self, listener: impl Fn(&PersistenceFailure) + 'static) -> SubscriptionId {
        self.failures.borrow_mut().add(Rc::new(listener))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changes.borrow_mut().remove(id) || self.failures.borrow_mut().remove(id)
    }

    // -----------------------------------------------------------------------
    // Drag session
    // -----------------------------------------------------------------------

    /// Begin dragging an item.
    ///
    /// Rejected while another drag is active or while a commit for the same
    /// item is outstanding. An unknown id is ignored.
    pub fn start_drag(&self, item_id: &ItemId) -> Result<(), SyncError> {
        let result = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.is_in_flight(item_id) {
                Err(SyncError::ConcurrentDragRejected(item_id.clone()))
            } else {
                match inner.drag.start(&inner.collection, item_id) {
                    Ok(()) => Ok(()),
                    Err(SessionError::SessionActive { .. }) => {
                        Err(SyncError::ConcurrentDragRejected(item_id.clone()))
                    }
                    Err(e) => Err(SyncError::InvalidSession(e)),
                }
            }
        };
        match result {
            Err(SyncError::InvalidSession(e)) => {
                debug!(item = %item_id, error = %e, "ignoring drag start");
                Ok(())
            }
            Err(e) => {
                debug!(item = %item_id, error = %e, "drag start rejected");
                Err(e)
            }
            Ok(()) => {
                debug!(item = %item_id, "drag started");
                Ok(())
            }
        }
    }

    /// Move the hypothesised drop location. Ignored when no drag is active.
    pub fn update_target(&self, partition: PartitionKey, index: usize) {
        if let Err(e) = self.inner.borrow_mut().drag.update_target(partition, index) {
            debug!(error = %e, "ignoring drag target update");
        }
    }

    /// Finish the active drag at its current target.
    ///
    /// Returns the pending commit, or `None` when there was no drag or the
    /// drop changes nothing.
    pub fn drop_item(&self) -> Option<PendingCommit> {
        let dropped = self.inner.borrow_mut().drag.drop_session();
        match dropped {
            Ok(event) => self.apply_drop(event),
            Err(e) => {
                debug!(error = %e, "ignoring drop");
                None
            }
        }
    }

    /// Abandon the active drag. Nothing was applied during the drag, so
    /// there is nothing to restore.
    pub fn cancel(&self) {
        if let Some(session) = self.inner.borrow_mut().drag.cancel() {
            debug!(item = %session.item_id, "drag cancelled");
        }
    }

    // -----------------------------------------------------------------------
    // Optimistic mutation
    // -----------------------------------------------------------------------

    /// Apply a drop locally and return the commit that persists it.
    ///
    /// Usable without a drag session (keyboard moves, scripted moves).
    /// Several drops of the same item may be outstanding; the newest one
    /// that has not failed decides what is shown.
    pub fn apply_drop(&self, event: DropEvent) -> Option<PendingCommit> {
        let (revision, changes) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let reorder = match compute_reorder(&inner.collection, &event, &inner.policy) {
                Ok(reorder) => reorder,
                Err(e) => {
                    warn!(item = %event.item_id, error = %e, "drop could not be applied");
                    return None;
                }
            };
            if reorder.is_noop() {
                debug!(item = %event.item_id, "drop at origin, nothing to commit");
                return None;
            }

            let revision = inner.stage(Some(event.item_id.clone()), reorder.updated.clone());
            debug!(
                item = %event.item_id,
                target = %event.target_partition,
                index = event.target_index,
                revision,
                renumbered = reorder.renumbered,
                "drop applied"
            );
            (revision, reorder.updated)
        };

        emit(
            &self.changes,
            &StateChange::Applied {
                items: changes.clone(),
            },
        );
        Some(self.commit(revision, changes))
    }

    fn commit(&self, revision: u64, changes: Vec<OrderableItem>) -> PendingCommit {
        let core = self.clone();
        Box::pin(async move {
            let result = core.gateway.commit(&changes).await;
            let (outcome, repair) = core.settle(revision, result);
            if let Some(repair) = repair {
                repair.await;
            }
            outcome
        })
    }

    /// Fold a commit response back into local state.
    ///
    /// A rollback that leaves siblings sharing a position (another drop was
    /// placed against ranks this one renumbered) queues a renumber of the
    /// affected partitions, returned as a follow-up commit.
    fn settle(
        &self,
        revision: u64,
        result: Result<CommitReceipt, GatewayError>,
    ) -> (CommitOutcome, Option<PendingCommit>) {
        let mut notices = Vec::new();
        let mut failure = None;
        let mut repair = None;
        let mut repair_notice = None;

        let outcome = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let Some(outstanding) = inner.outstanding.remove(&revision) else {
                return (CommitOutcome::Stale, None);
            };
            let live = match &outstanding.moved {
                Some(moved) => inner.owns(moved, revision),
                None => outstanding.changes.iter().any(|c| inner.owns(&c.id, revision)),
            };
            let renumber_issued = outstanding.moved.is_none();
            let subject = outstanding
                .moved
                .clone()
                .or_else(|| outstanding.changes.first().map(|c| c.id.clone()));
            let label = subject.as_ref().map_or_else(String::new, |s| s.to_string());

            match result {
                Ok(receipt) => {
                    let reconciled: Vec<OrderableItem> = receipt
                        .canonical
                        .into_iter()
                        .filter(|c| inner.owns(&c.id, revision))
                        .filter(|c| inner.collection.get(&c.id).is_some_and(|local| local != c))
                        .collect();
                    inner.release_confirmed(&outstanding, revision);
                    if !reconciled.is_empty() {
                        inner.collection.apply(&reconciled);
                        notices.push(StateChange::Reconciled { items: reconciled });
                    }
                    if live {
                        info!(item = %label, revision, "commit confirmed");
                        CommitOutcome::Confirmed
                    } else {
                        debug!(item = %label, revision, "superseded commit confirmed");
                        CommitOutcome::Stale
                    }
                }
                Err(e) => {
                    let restored = inner.release_failed(outstanding, revision);
                    if live {
                        warn!(
                            item = %label,
                            revision,
                            error = %e,
                            restored = restored.len(),
                            "commit failed, rolled back"
                        );
                    } else {
                        debug!(item = %label, revision, error = %e, "superseded commit failed");
                    }

                    let repaired = if renumber_issued {
                        Vec::new()
                    } else {
                        inner.repair_collisions(&restored)
                    };
                    if live || !restored.is_empty() {
                        notices.push(StateChange::RolledBack { items: restored });
                    }
                    if !repaired.is_empty() {
                        let repair_revision = inner.stage(None, repaired.clone());
                        info!(
                            revision = repair_revision,
                            changed = repaired.len(),
                            "renumbering siblings left colliding by rollback"
                        );
                        repair_notice = Some(StateChange::Applied {
                            items: repaired.clone(),
                        });
                        repair = Some((repair_revision, repaired));
                    }

                    if live {
                        failure = subject.map(|item_id| PersistenceFailure {
                            item_id,
                            reason: e.to_string(),
                        });
                        CommitOutcome::RolledBack
                    } else {
                        CommitOutcome::Stale
                    }
                }
            }
        };

        for notice in &notices {
            emit(&self.changes, notice);
        }
        if let Some(failure) = failure {
            emit(&self.failures, &failure);
        }
        if let Some(notice) = repair_notice {
            emit(&self.changes, &notice);
        }
        let follow_up = repair.map(|(revision, changes)| self.commit(revision, changes));
        (outcome, follow_up)
    }

    // -----------------------------------------------------------------------
    // CRUD and refetch
    // -----------------------------------------------------------------------

    /// Add or replace an item (create path of the CRUD layer).
    pub fn insert_item(&self, item: OrderableItem) {
        self.inner.borrow_mut().collection.insert(item);
        emit(&self.changes, &StateChange::Refreshed);
    }

    /// Delete an item. Cancels a drag of it; its outstanding commits become stale.
    pub fn remove_item(&self, id: &ItemId) -> Option<OrderableItem> {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            if inner.drag.session().is_some_and(|s| &s.item_id == id) {
                inner.drag.cancel();
            }
            inner.writers.remove(id);
            inner.collection.remove(id)
        };
        if removed.is_some() {
            emit(&self.changes, &StateChange::Refreshed);
        }
        removed
    }

    /// Replace local state with freshly fetched rows.
    ///
    /// Changes still waiting on the store are re-applied on top, oldest
    /// first, so a refetch racing a commit does not undo the move on screen.
    /// Each rollback snapshot is rebased onto the fetched values plus the
    /// writes queued before it.
    pub fn refresh(&self, fetched: Vec<OrderableItem>) {
        {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let mut collection = Collection::from_items(fetched);
            let writers = &inner.writers;

            for (revision, outstanding) in inner.outstanding.iter_mut() {
                for before in outstanding.snapshot.iter_mut() {
                    if let Some(server) = collection.get(&before.id) {
                        *before = server.clone();
                    }
                }
                let live: Vec<OrderableItem> = outstanding
                    .changes
                    .iter()
                    .filter(|c| {
                        writers.get(&c.id).is_some_and(|w| w.contains(revision))
                            && collection.contains(&c.id)
                    })
                    .cloned()
                    .collect();
                collection.apply(&live);
            }

            let dragged_gone = inner
                .drag
                .session()
                .is_some_and(|s| !collection.contains(&s.item_id));
            if dragged_gone {
                inner.drag.cancel();
            }
            inner.collection = collection;
        }
        emit(&self.changes, &StateChange::Refreshed);
    }
}

use crate::model::collection::Collection;
use crate::model::item::{ItemId, PartitionKey, Position};

/// Error type for drag session transitions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot drag unknown item {0}")]
    UnknownItem(ItemId),
    #[error("a drag of {active} is already in progress")]
    SessionActive { active: ItemId },
    #[error("no drag in progress")]
    NoSession,
}

/// What a completed drag hands to the reorder engine
#[derive(Debug, Clone, PartialEq)]
pub struct DropEvent {
    pub item_id: ItemId,
    pub source_partition: PartitionKey,
    pub target_partition: PartitionKey,
    /// Insertion index among the target siblings, not counting the dragged item
    pub target_index: usize,
}

/// The single in-progress drag. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub item_id: ItemId,
    pub source_partition: PartitionKey,
    /// Where the item sat when the drag started
    pub original_position: Position,
    pub original_index: usize,
    /// Current pointer-implied drop location
    pub target_partition: PartitionKey,
    pub target_index: usize,
}

impl DragSession {
    /// True while the hypothesised drop equals where the drag started.
    pub fn is_at_origin(&self) -> bool {
        self.target_partition == self.source_partition && self.target_index == self.original_index
    }

    pub fn to_drop_event(&self) -> DropEvent {
        DropEvent {
            item_id: self.item_id.clone(),
            source_partition: self.source_partition.clone(),
            target_partition: self.target_partition.clone(),
            target_index: self.target_index,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(DragSession),
}

/// Idle -> Dragging -> (drop | cancel) -> Idle
///
/// Transitions are synchronous. A rejected transition leaves the state as it was.
#[derive(Debug, Default)]
pub struct DragMachine {
    state: DragState,
}

impl DragMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn session(&self) -> Option<&DragSession> {
        match &self.state {
            DragState::Dragging(session) => Some(session),
            DragState::Idle => None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    /// Begin dragging `item_id`, snapshotting its current placement.
    pub fn start(
        &mut self,
        collection: &Collection,
        item_id: &ItemId,
    ) -> Result<(), SessionError> {
        if let DragState::Dragging(active) = &self.state {
            return Err(SessionError::SessionActive {
                active: active.item_id.clone(),
            });
        }
        let item = collection
            .get(item_id)
            .ok_or_else(|| SessionError::UnknownItem(item_id.clone()))?;
        let original_index = collection
            .index_in_partition(item_id)
            .ok_or_else(|| SessionError::UnknownItem(item_id.clone()))?;

        self.state = DragState::Dragging(DragSession {
            item_id: item.id.clone(),
            source_partition: item.partition.clone(),
            original_position: item.position,
            original_index,
            target_partition: item.partition.clone(),
            target_index: original_index,
        });
        Ok(())
    }

    /// Move the hypothesised drop location. Does not touch any collection.
    pub fn update_target(
        &mut self,
        partition: PartitionKey,
        index: usize,
    ) -> Result<(), SessionError> {
        match &mut self.state {
            DragState::Dragging(session) => {
                session.target_partition = partition;
                session.target_index = index;
                Ok(())
            }
            DragState::Idle => Err(SessionError::NoSession),
        }
    }

    /// End the drag at the current target. The event is emitted even when the
    /// target is the origin; the reorder engine turns that into a no-op.
    pub fn drop_session(&mut self) -> Result<DropEvent, SessionError> {
        match std::mem::take(&mut self.state) {
            DragState::Dragging(session) => Ok(session.to_drop_event()),
            DragState::Idle => Err(SessionError::NoSession),
        }
    }

    /// Abandon the drag. Always succeeds; returns the discarded session, if any.
    pub fn cancel(&mut self) -> Option<DragSession> {
        match std::mem::take(&mut self.state) {
            DragState::Dragging(session) => Some(session),
            DragState::Idle => None,
        }
    }

    /// Target partition order as it would look if dropped now.
    ///
    /// Derived on demand, so cancelling never has anything to undo.
    pub fn preview(&self, collection: &Collection) -> Option<Vec<ItemId>> {
        let session = self.session()?;
        let mut order: Vec<ItemId> = collection
            .partition(&session.target_partition)
            .into_iter()
            .filter(|item| item.id != session.item_id)
            .map(|item| item.id.clone())
            .collect();
        let index = session.target_index.min(order.len());
        order.insert(index, session.item_id.clone());
        Some(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::OrderableItem;

    fn board() -> Collection {
        Collection::from_items(vec![
            OrderableItem::new("T1", "not_started", 1.0, "One"),
            OrderableItem::new("T2", "not_started", 2.0, "Two"),
            OrderableItem::new("T3", "done", 1.0, "Three"),
        ])
    }

    fn ids(list: &[&str]) -> Vec<ItemId> {
        list.iter().map(|s| ItemId::from(*s)).collect()
    }

    #[test]
    fn new_machine_is_idle() {
        let machine = DragMachine::new();
        assert_eq!(machine.state(), &DragState::Idle);
        assert!(!machine.is_dragging());
        assert!(machine.session().is_none());
    }

    #[test]
    fn start_captures_origin() {
        let board = board();
        let mut machine = DragMachine::new();
        machine.start(&board, &ItemId::from("T2")).unwrap();
        let session = machine.session().unwrap();
        assert_eq!(session.source_partition, PartitionKey::from("not_started"));
        assert_eq!(session.original_position, Position(2.0));
        assert_eq!(session.original_index, 1);
        assert!(session.is_at_origin());
        assert!(machine.is_dragging());
    }

    #[test]
    fn start_unknown_item_is_rejected() {
        let board = board();
        let mut machine = DragMachine::new();
        let err = machine.start(&board, &ItemId::from("nope")).unwrap_err();
        assert_eq!(err, SessionError::UnknownItem(ItemId::from("nope")));
        assert!(!machine.is_dragging());
    }

    #[test]
    fn second_start_is_rejected_and_keeps_first() {
        let board = board();
        let mut machine = DragMachine::new();
        machine.start(&board, &ItemId::from("T1")).unwrap();
        let err = machine.start(&board, &ItemId::from("T3")).unwrap_err();
        assert_eq!(
            err,
            SessionError::SessionActive {
                active: ItemId::from("T1")
            }
        );
        assert_eq!(machine.session().unwrap().item_id, ItemId::from("T1"));
    }

    #[test]
    fn update_target_changes_only_the_session() {
        let board = board();
        let before = board.clone();
        let mut machine = DragMachine::new();
        machine.start(&board, &ItemId::from("T1")).unwrap();
        for i in 0..5 {
            machine.update_target(PartitionKey::from("done"), i).unwrap();
        }
        let session = machine.session().unwrap();
        assert_eq!(session.target_partition, PartitionKey::from("done"));
        assert_eq!(session.target_index, 4);
        assert!(!session.is_at_origin());
        assert_eq!(board, before);
    }

    #[test]
    fn update_target_without_session() {
        let mut machine = DragMachine::new();
        assert_eq!(
            machine.update_target(PartitionKey::from("done"), 0),
            Err(SessionError::NoSession)
        );
    }

    #[test]
    fn drop_emits_event_and_returns_to_idle() {
        let board = board();
        let mut machine = DragMachine::new();
        machine.start(&board, &ItemId::from("T1")).unwrap();
        machine.update_target(PartitionKey::from("done"), 0).unwrap();
        let event = machine.drop_session().unwrap();
        assert_eq!(
            event,
            DropEvent {
                item_id: ItemId::from("T1"),
                source_partition: PartitionKey::from("not_started"),
                target_partition: PartitionKey::from("done"),
                target_index: 0,
            }
        );
        assert!(!machine.is_dragging());
    }

    #[test]
    fn drop_at_origin_still_emits() {
        let board = board();
        let mut machine = DragMachine::new();
        machine.start(&board, &ItemId::from("T2")).unwrap();
        let event = machine.drop_session().unwrap();
        assert_eq!(event.target_partition, event.source_partition);
        assert_eq!(event.target_index, 1);
    }

    #[test]
    fn double_drop_is_invalid() {
        let board = board();
        let mut machine = DragMachine::new();
        machine.start(&board, &ItemId::from("T2")).unwrap();
        machine.drop_session().unwrap();
        assert_eq!(machine.drop_session(), Err(SessionError::NoSession));
    }

    #[test]
    fn cancel_always_succeeds() {
        let board = board();
        let mut machine = DragMachine::new();
        assert!(machine.cancel().is_none());
        machine.start(&board, &ItemId::from("T3")).unwrap();
        let discarded = machine.cancel().unwrap();
        assert_eq!(discarded.item_id, ItemId::from("T3"));
        assert_eq!(machine.state(), &DragState::Idle);
        // a fresh drag may start right away
        assert!(machine.start(&board, &ItemId::from("T3")).is_ok());
    }

    #[test]
    fn preview_places_dragged_item_at_target() {
        let board = board();
        let mut machine = DragMachine::new();
        assert!(machine.preview(&board).is_none());

        machine.start(&board, &ItemId::from("T1")).unwrap();
        assert_eq!(machine.preview(&board).unwrap(), ids(&["T1", "T2"]));

        machine.update_target(PartitionKey::from("not_started"), 1).unwrap();
        assert_eq!(machine.preview(&board).unwrap(), ids(&["T2", "T1"]));

        machine.update_target(PartitionKey::from("done"), 9).unwrap();
        assert_eq!(machine.preview(&board).unwrap(), ids(&["T3", "T1"]));
    }
}

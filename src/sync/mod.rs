pub mod coordinator;
pub mod events;
pub mod gateway;

pub use coordinator::*;
pub use events::{PersistenceFailure, StateChange, SubscriptionId};
pub use gateway::*;

use crate::drag::SessionError;
use crate::model::item::ItemId;

/// Error type for sync core operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("cannot drag {0}: another drag or commit is in progress")]
    ConcurrentDragRejected(ItemId),
    #[error(transparent)]
    InvalidSession(#[from] SessionError),
}

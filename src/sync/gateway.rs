use std::cell::{Cell, RefCell};

use async_trait::async_trait;

use crate::model::collection::Collection;
use crate::model::item::OrderableItem;

/// Error type for persistence gateway calls
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("commit rejected: {0}")]
    Rejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the store sends back for a successful commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    /// Canonical values of the committed items, if the store returns them.
    /// Empty means "stored as sent".
    pub canonical: Vec<OrderableItem>,
}

/// Durable store for item placements.
///
/// Implementations own transport and retry policy; the sync core only looks
/// at success or failure. Futures are not `Send`: the core runs on the UI
/// thread.
#[async_trait(?Send)]
pub trait PersistenceGateway {
    /// Durably store the new partition/position of every item in `changes`.
    async fn commit(&self, changes: &[OrderableItem]) -> Result<CommitReceipt, GatewayError>;
}

/// In-process store. Useful for previews, demos and tests.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    store: RefCell<Collection>,
    calls: RefCell<Vec<Vec<OrderableItem>>>,
    failing: Cell<bool>,
}

impl MemoryGateway {
    pub fn new(store: Collection) -> Self {
        MemoryGateway {
            store: RefCell::new(store),
            ..Self::default()
        }
    }

    /// A store that rejects every commit
    pub fn failing(store: Collection) -> Self {
        let gateway = Self::new(store);
        gateway.failing.set(true);
        gateway
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    /// Every batch passed to `commit`, in call order
    pub fn calls(&self) -> Vec<Vec<OrderableItem>> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Current durable state
    pub fn stored(&self) -> Collection {
        self.store.borrow().clone()
    }
}

#[async_trait(?Send)]
impl PersistenceGateway for MemoryGateway {
    async fn commit(&self, changes: &[OrderableItem]) -> Result<CommitReceipt, GatewayError> {
        self.calls.borrow_mut().push(changes.to_vec());
        if self.failing.get() {
            return Err(GatewayError::Unavailable("store is offline".into()));
        }
        let mut store = self.store.borrow_mut();
        if let Some(unknown) = changes.iter().find(|c| !store.contains(&c.id)) {
            return Err(GatewayError::Rejected(format!("unknown item {}", unknown.id)));
        }
        store.apply(changes);
        Ok(CommitReceipt {
            canonical: changes.to_vec(),
        })
    }
}

use std::sync::Arc;

use crate::db::{CandidateStore, MemoryCandidateStore};
use crate::services::event_source::{self, ChannelEventSource};
use crate::services::{Composer, EventPublisher, ItemCatalog, ServingPolicy};

/// Shared application state
///
/// The catalog and candidate store are owned here and handed to the composer;
/// the recommendation jobs hold their own handles to the same store.
#[derive(Clone)]
pub struct AppState {
    pub composer: Arc<Composer>,
    pub catalog: Arc<ItemCatalog>,
    pub store: Arc<dyn CandidateStore>,
    pub publisher: Arc<dyn EventPublisher>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CandidateStore>,
        catalog: Arc<ItemCatalog>,
        publisher: Arc<dyn EventPublisher>,
        policy: ServingPolicy,
    ) -> Self {
        let composer = Arc::new(Composer::new(store.clone(), catalog.clone(), policy));
        Self {
            composer,
            catalog,
            store,
            publisher,
        }
    }

    /// State backed by in-memory stores, with the matching event source
    pub fn in_memory(policy: ServingPolicy) -> (Self, ChannelEventSource) {
        let (publisher, source) = event_source::channel(1024);
        let state = Self::new(
            Arc::new(MemoryCandidateStore::new()),
            Arc::new(ItemCatalog::new()),
            Arc::new(publisher),
            policy,
        );
        (state, source)
    }
}

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::candidates::{CacheKey, CandidateStore};
use crate::error::AppResult;

/// Process-local candidate store
///
/// Backs `AppState::in_memory` and the tests.
#[derive(Default)]
pub struct MemoryCandidateStore {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait::async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<Vec<String>>> {
        Ok(self.entries.read().await.get(&key.to_string()).cloned())
    }

    async fn set(&self, key: &CacheKey, item_ids: Vec<String>) -> AppResult<()> {
        self.entries.write().await.insert(key.to_string(), item_ids);
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

use std::fmt::Display;

use crate::error::AppResult;

/// Key of one candidate tier entry
///
/// The key space is partitioned by tier and user, so each key has exactly one
/// writer job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    TopItems,
    ModelRecs(String),
    NovelItems(String),
}

/// Prefixes of the per-user keys, used when wiping the store
pub const PER_USER_PREFIXES: [&str; 2] = ["model_recs:", "novel_items:"];

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::TopItems => write!(f, "top_items"),
            CacheKey::ModelRecs(user_id) => write!(f, "model_recs:{}", user_id),
            CacheKey::NovelItems(user_id) => write!(f, "novel_items:{}", user_id),
        }
    }
}

/// Keyed store holding the latest output of each recommendation tier
///
/// `set` replaces the whole entry; a concurrent `get` sees either the previous
/// or the new list, never a mix. An absent key is a normal condition.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CandidateStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<Vec<String>>>;

    async fn set(&self, key: &CacheKey, item_ids: Vec<String>) -> AppResult<()>;

    /// Drops every tier entry
    async fn clear(&self) -> AppResult<()>;
}

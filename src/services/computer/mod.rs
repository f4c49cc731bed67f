//! Periodic jobs that turn the interaction log into candidate tiers
//!
//! Each job reads its own snapshot of the log and produces whole entries for
//! the candidate store; the scheduler owns cadence and failure isolation.

pub mod model_recs;
pub mod novel_items;
pub mod scheduler;
pub mod top_items;

use crate::db::CacheKey;
use crate::error::AppResult;
use crate::models::Interaction;

pub use model_recs::{ModelRecsJob, ModelWeighting};
pub use novel_items::NovelItemsJob;
pub use scheduler::RecommendationComputer;
pub use top_items::TopItemsJob;

/// One tier's recomputation, from a log snapshot to complete cache entries
#[async_trait::async_trait]
pub trait TierJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compute(&self, snapshot: Vec<Interaction>) -> AppResult<Vec<(CacheKey, Vec<String>)>>;
}

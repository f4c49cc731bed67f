use std::collections::HashMap;

use super::TierJob;
use crate::db::CacheKey;
use crate::error::AppResult;
use crate::models::{Action, Interaction};

/// Keeps only the most recent row per (user, item, action)
///
/// Rows with equal timestamps resolve to the one appended last.
pub fn latest_per_triple(interactions: &[Interaction]) -> Vec<&Interaction> {
    let mut latest: HashMap<(&str, &str, &Action), usize> = HashMap::new();
    for (idx, row) in interactions.iter().enumerate() {
        let key = (row.user_id.as_str(), row.item_id.as_str(), &row.action);
        let newer_kept = latest
            .get(&key)
            .is_some_and(|&prev| interactions[prev].timestamp > row.timestamp);
        if !newer_kept {
            latest.insert(key, idx);
        }
    }

    let mut indices: Vec<usize> = latest.into_values().collect();
    indices.sort_unstable();
    indices.into_iter().map(|idx| &interactions[idx]).collect()
}

/// Items ranked by how many distinct users liked them
///
/// Ties are broken by ascending item id.
pub fn rank_liked_items(interactions: &[Interaction], limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in latest_per_triple(interactions) {
        if row.action.is_like() {
            *counts.entry(row.item_id.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(item_id, _)| item_id.to_string())
        .collect()
}

/// Global most-liked items
pub struct TopItemsJob {
    limit: usize,
}

impl TopItemsJob {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait::async_trait]
impl TierJob for TopItemsJob {
    fn name(&self) -> &'static str {
        "top_items"
    }

    async fn compute(&self, snapshot: Vec<Interaction>) -> AppResult<Vec<(CacheKey, Vec<String>)>> {
        let top = rank_liked_items(&snapshot, self.limit);
        tracing::debug!(count = top.len(), "Ranked top items");
        Ok(vec![(CacheKey::TopItems, top)])
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::db::{CacheKey, CandidateStore};
use crate::error::AppResult;
use crate::models::Recommendations;
use crate::services::catalog::ItemCatalog;

/// Serving knobs: result size, exploration rate and tier switches
#[derive(Debug, Clone, PartialEq)]
pub struct ServingPolicy {
    pub k: usize,
    pub epsilon: f64,
    pub model_tier_enabled: bool,
    pub top_items_tier_enabled: bool,
    pub novel_items_tier_enabled: bool,
}

impl Default for ServingPolicy {
    fn default() -> Self {
        Self {
            k: 10,
            epsilon: 0.05,
            model_tier_enabled: true,
            top_items_tier_enabled: true,
            novel_items_tier_enabled: true,
        }
    }
}

impl ServingPolicy {
    /// Model items kept when seeding; two slots stay free for padding
    pub fn model_seed_len(&self) -> usize {
        self.k.saturating_sub(2)
    }

    /// Global top items kept when seeding
    pub fn top_items_seed_len(&self) -> usize {
        self.k.div_ceil(2)
    }
}

/// Result list under construction, with per-source bookkeeping
struct Selection {
    items: Vec<String>,
    chosen: HashSet<String>,
    contributions: Vec<(&'static str, usize)>,
}

impl Selection {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            chosen: HashSet::new(),
            contributions: Vec::new(),
        }
    }

    /// Appends unseen ids from `candidates` until the list holds `limit` items
    fn extend_from(&mut self, source: &'static str, candidates: Vec<String>, limit: usize) {
        let mut added = 0;
        for item_id in candidates {
            if self.items.len() >= limit {
                break;
            }
            if self.chosen.insert(item_id.clone()) {
                self.items.push(item_id);
                added += 1;
            }
        }
        if added > 0 {
            self.contributions.push((source, added));
        }
    }

    fn provenance(&self) -> String {
        if self.contributions.is_empty() {
            return "empty".to_string();
        }
        self.contributions
            .iter()
            .map(|(source, count)| format!("{}={}", source, count))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn finish(self) -> Recommendations {
        let provenance = self.provenance();
        Recommendations {
            item_ids: self.items,
            provenance,
        }
    }
}

/// Request-time composition of the candidate tiers
///
/// Only reads committed cache entries and never waits on the recommendation
/// jobs. Every request yields `k` unique ids, or the whole catalog when it is
/// smaller than `k`.
pub struct Composer {
    store: Arc<dyn CandidateStore>,
    catalog: Arc<ItemCatalog>,
    policy: ServingPolicy,
}

impl Composer {
    pub fn new(
        store: Arc<dyn CandidateStore>,
        catalog: Arc<ItemCatalog>,
        policy: ServingPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
        }
    }

    pub fn policy(&self) -> &ServingPolicy {
        &self.policy
    }

    pub async fn recommend(&self, user_id: &str) -> Recommendations {
        let mut rng = StdRng::from_entropy();
        self.recommend_with(user_id, &mut rng).await
    }

    pub async fn recommend_with<R: Rng + Send>(
        &self,
        user_id: &str,
        rng: &mut R,
    ) -> Recommendations {
        if rng.gen::<f64>() < self.policy.epsilon {
            tracing::debug!(user_id, "Exploration override");
            return self.random_sample("exploration", rng).await;
        }

        let mut selection = match self.compose_tiers(user_id).await {
            Ok(selection) => selection,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Candidate cache unavailable, serving random items");
                return self.random_sample("fallback", rng).await;
            }
        };

        let missing = self.policy.k.saturating_sub(selection.items.len());
        if missing > 0 {
            let backfill = self.catalog.sample(rng, missing, &selection.chosen).await;
            selection.extend_from("random", backfill, self.policy.k);
        }

        let recommendations = selection.finish();
        tracing::debug!(
            user_id,
            count = recommendations.item_ids.len(),
            provenance = %recommendations.provenance,
            "Composed recommendations"
        );
        recommendations
    }

    /// Seeds from the model or top-items tier, then pads with novelty items
    async fn compose_tiers(&self, user_id: &str) -> AppResult<Selection> {
        let mut selection = Selection::new();

        let model = self
            .load_tier(
                self.policy.model_tier_enabled,
                &CacheKey::ModelRecs(user_id.to_string()),
            )
            .await?;

        if let Some(model_items) = model {
            selection.extend_from("model_recs", model_items, self.policy.model_seed_len());
        } else if let Some(top_items) = self
            .load_tier(self.policy.top_items_tier_enabled, &CacheKey::TopItems)
            .await?
        {
            selection.extend_from("top_items", top_items, self.policy.top_items_seed_len());
        }

        if let Some(novel_items) = self
            .load_tier(
                self.policy.novel_items_tier_enabled,
                &CacheKey::NovelItems(user_id.to_string()),
            )
            .await?
        {
            selection.extend_from("novel_items", novel_items, self.policy.k);
        }

        Ok(selection)
    }

    /// Disabled tiers and empty entries both count as absent
    async fn load_tier(&self, enabled: bool, key: &CacheKey) -> AppResult<Option<Vec<String>>> {
        if !enabled {
            return Ok(None);
        }
        Ok(self.store.get(key).await?.filter(|items| !items.is_empty()))
    }

    async fn random_sample<R: Rng + Send>(&self, source: &'static str, rng: &mut R) -> Recommendations {
        let items = self
            .catalog
            .sample(rng, self.policy.k, &HashSet::new())
            .await;
        let mut selection = Selection::new();
        selection.extend_from(source, items, self.policy.k);
        selection.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::candidates::MockCandidateStore;
    use crate::db::MemoryCandidateStore;
    use crate::error::AppError;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn policy(k: usize, epsilon: f64) -> ServingPolicy {
        ServingPolicy {
            k,
            epsilon,
            ..ServingPolicy::default()
        }
    }

    async fn catalog_of(n: usize) -> Arc<ItemCatalog> {
        let catalog = Arc::new(ItemCatalog::new());
        catalog
            .register((1..=n).map(|i| i.to_string()))
            .await;
        catalog
    }

    fn assert_unique(items: &[String]) {
        let unique: HashSet<_> = items.iter().collect();
        assert_eq!(unique.len(), items.len(), "duplicates in {:?}", items);
    }

    #[test]
    fn test_seed_lengths() {
        let p = policy(10, 0.0);
        assert_eq!(p.model_seed_len(), 8);
        assert_eq!(p.top_items_seed_len(), 5);
        assert_eq!(policy(3, 0.0).top_items_seed_len(), 2);
        assert_eq!(policy(1, 0.0).model_seed_len(), 0);
    }

    #[tokio::test]
    async fn test_no_tiers_draws_from_catalog() {
        let store = Arc::new(MemoryCandidateStore::new());
        let catalog = catalog_of(5).await;
        let composer = Composer::new(store, catalog, policy(3, 0.0));
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..30 {
            let recs = composer.recommend_with("u1", &mut rng).await;
            assert_eq!(recs.item_ids.len(), 3);
            assert_unique(&recs.item_ids);
            assert!(recs
                .item_ids
                .iter()
                .all(|id| id.parse::<usize>().map(|n| (1..=5).contains(&n)).unwrap_or(false)));
            assert_eq!(recs.provenance, "random=3");
        }
    }

    #[tokio::test]
    async fn test_top_items_seed_then_backfill() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .set(&CacheKey::TopItems, ids(&["9", "8", "7"]))
            .await
            .unwrap();
        let catalog = catalog_of(9).await;
        let composer = Composer::new(store, catalog, policy(3, 0.0));
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..30 {
            let recs = composer.recommend_with("u1", &mut rng).await;
            assert_eq!(&recs.item_ids[..2], &ids(&["9", "8"])[..]);
            assert_eq!(recs.item_ids.len(), 3);
            assert!(recs.item_ids[2] != "9" && recs.item_ids[2] != "8");
        }
    }

    #[tokio::test]
    async fn test_model_tier_takes_precedence_and_keeps_order() {
        let store = Arc::new(MemoryCandidateStore::new());
        let model: Vec<String> = (1..=12).rev().map(|i| i.to_string()).collect();
        store
            .set(&CacheKey::ModelRecs("u1".to_string()), model.clone())
            .await
            .unwrap();
        store
            .set(&CacheKey::TopItems, ids(&["100", "101"]))
            .await
            .unwrap();
        store
            .set(
                &CacheKey::NovelItems("u1".to_string()),
                ids(&["12", "50", "51", "52"]),
            )
            .await
            .unwrap();
        let catalog = catalog_of(60).await;
        let composer = Composer::new(store, catalog, policy(10, 0.0));
        let mut rng = StdRng::seed_from_u64(5);

        let recs = composer.recommend_with("u1", &mut rng).await;
        assert_eq!(&recs.item_ids[..8], &model[..8]);
        // "12" is already chosen, so padding continues with the next novel ids
        assert_eq!(&recs.item_ids[8..], &ids(&["50", "51"])[..]);
        assert_eq!(recs.provenance, "model_recs=8 novel_items=2");
    }

    #[tokio::test]
    async fn test_disabled_model_tier_falls_through_to_top_items() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .set(&CacheKey::ModelRecs("u1".to_string()), ids(&["1", "2"]))
            .await
            .unwrap();
        store
            .set(&CacheKey::TopItems, ids(&["7", "8", "9"]))
            .await
            .unwrap();
        let catalog = catalog_of(20).await;
        let composer = Composer::new(
            store,
            catalog,
            ServingPolicy {
                k: 4,
                epsilon: 0.0,
                model_tier_enabled: false,
                ..ServingPolicy::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(9);

        let recs = composer.recommend_with("u1", &mut rng).await;
        assert_eq!(&recs.item_ids[..2], &ids(&["7", "8"])[..]);
        assert_eq!(recs.item_ids.len(), 4);
        assert_unique(&recs.item_ids);
    }

    #[tokio::test]
    async fn test_novelty_only_still_full_and_unique() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .set(&CacheKey::NovelItems("u1".to_string()), ids(&["3", "4"]))
            .await
            .unwrap();
        let catalog = catalog_of(30).await;
        let composer = Composer::new(store, catalog, policy(10, 0.0));
        let mut rng = StdRng::seed_from_u64(2);

        let recs = composer.recommend_with("u1", &mut rng).await;
        assert_eq!(&recs.item_ids[..2], &ids(&["3", "4"])[..]);
        assert_eq!(recs.item_ids.len(), 10);
        assert_unique(&recs.item_ids);
        assert_eq!(recs.provenance, "novel_items=2 random=8");
    }

    #[tokio::test]
    async fn test_empty_entry_counts_as_absent() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .set(&CacheKey::ModelRecs("u1".to_string()), Vec::new())
            .await
            .unwrap();
        store
            .set(&CacheKey::TopItems, ids(&["5", "6"]))
            .await
            .unwrap();
        let catalog = catalog_of(10).await;
        let composer = Composer::new(store, catalog, policy(4, 0.0));
        let mut rng = StdRng::seed_from_u64(4);

        let recs = composer.recommend_with("u1", &mut rng).await;
        assert_eq!(&recs.item_ids[..2], &ids(&["5", "6"])[..]);
    }

    #[tokio::test]
    async fn test_exploration_ignores_tiers() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .set(&CacheKey::TopItems, ids(&["100", "101", "102"]))
            .await
            .unwrap();
        let catalog = catalog_of(5).await;
        let composer = Composer::new(store, catalog, policy(3, 1.0));
        let mut rng = StdRng::seed_from_u64(8);

        let recs = composer.recommend_with("u1", &mut rng).await;
        assert_eq!(recs.item_ids.len(), 3);
        assert_unique(&recs.item_ids);
        assert!(recs.item_ids.iter().all(|id| !id.starts_with("10")));
        assert_eq!(recs.provenance, "exploration=3");
    }

    #[tokio::test]
    async fn test_small_catalog_returns_everything() {
        let store = Arc::new(MemoryCandidateStore::new());
        let catalog = catalog_of(2).await;
        let composer = Composer::new(store, catalog, policy(10, 0.0));
        let mut rng = StdRng::seed_from_u64(6);

        let mut recs = composer.recommend_with("u1", &mut rng).await.item_ids;
        recs.sort();
        assert_eq!(recs, ids(&["1", "2"]));
    }

    #[tokio::test]
    async fn test_empty_catalog_yields_empty_list() {
        let store = Arc::new(MemoryCandidateStore::new());
        let composer = Composer::new(store, Arc::new(ItemCatalog::new()), policy(10, 0.0));
        let mut rng = StdRng::seed_from_u64(6);

        let recs = composer.recommend_with("u1", &mut rng).await;
        assert!(recs.item_ids.is_empty());
        assert_eq!(recs.provenance, "empty");
    }

    #[tokio::test]
    async fn test_cache_failure_degrades_to_random() {
        let mut store = MockCandidateStore::new();
        store
            .expect_get()
            .returning(|_| Err(AppError::Transport("connection refused".to_string())));
        let catalog = catalog_of(8).await;
        let composer = Composer::new(Arc::new(store), catalog, policy(5, 0.0));
        let mut rng = StdRng::seed_from_u64(10);

        let recs = composer.recommend_with("u1", &mut rng).await;
        assert_eq!(recs.item_ids.len(), 5);
        assert_unique(&recs.item_ids);
        assert_eq!(recs.provenance, "fallback=5");
    }
}

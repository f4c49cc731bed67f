use std::collections::HashSet;

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use tokio::sync::RwLock;

/// Registry of known item ids
///
/// Grows through `register` and only shrinks through `reset`. It is the
/// universe random exploration and backfill draw from.
#[derive(Default)]
pub struct ItemCatalog {
    items: RwLock<HashSet<String>>,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent union; returns how many ids were new
    pub async fn register<I>(&self, item_ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut items = self.items.write().await;
        let before = items.len();
        items.extend(item_ids);
        items.len() - before
    }

    pub async fn reset(&self) {
        self.items.write().await.clear();
    }

    pub async fn contains(&self, item_id: &str) -> bool {
        self.items.read().await.contains(item_id)
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Draws up to `count` distinct ids uniformly, skipping `exclude`
    ///
    /// Returns fewer than `count` ids when the catalog cannot supply more.
    pub async fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        count: usize,
        exclude: &HashSet<String>,
    ) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }

        let items = self.items.read().await;
        let mut picked = items
            .iter()
            .filter(|id| !exclude.contains(*id))
            .cloned()
            .choose_multiple(rng, count);
        // reservoir sampling keeps the iteration order
        picked.shuffle(rng);
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let catalog = ItemCatalog::new();
        assert_eq!(catalog.register(ids(&["1", "2", "3"])).await, 3);
        assert_eq!(catalog.register(ids(&["1", "2", "3"])).await, 0);
        assert_eq!(catalog.len().await, 3);
        assert!(catalog.contains("2").await);
    }

    #[tokio::test]
    async fn test_reset_clears() {
        let catalog = ItemCatalog::new();
        catalog.register(ids(&["1", "2"])).await;
        catalog.reset().await;
        assert!(catalog.is_empty().await);
    }

    #[tokio::test]
    async fn test_sample_is_unique_and_respects_exclusions() {
        let catalog = ItemCatalog::new();
        catalog.register(ids(&["1", "2", "3", "4", "5"])).await;
        let mut rng = StdRng::seed_from_u64(7);
        let exclude: HashSet<String> = ids(&["1", "2"]).into_iter().collect();

        for _ in 0..50 {
            let sample = catalog.sample(&mut rng, 2, &exclude).await;
            assert_eq!(sample.len(), 2);
            let unique: HashSet<_> = sample.iter().collect();
            assert_eq!(unique.len(), 2);
            assert!(sample.iter().all(|id| !exclude.contains(id)));
        }
    }

    #[tokio::test]
    async fn test_sample_degrades_to_catalog_size() {
        let catalog = ItemCatalog::new();
        catalog.register(ids(&["a", "b"])).await;
        let mut rng = StdRng::seed_from_u64(1);

        let mut sample = catalog.sample(&mut rng, 10, &HashSet::new()).await;
        sample.sort();
        assert_eq!(sample, ids(&["a", "b"]));

        let empty = ItemCatalog::new();
        assert!(empty.sample(&mut rng, 10, &HashSet::new()).await.is_empty());
    }
}

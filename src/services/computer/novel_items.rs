use std::collections::{BTreeSet, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::{Rng, SeedableRng};

use super::TierJob;
use crate::db::CacheKey;
use crate::error::AppResult;
use crate::models::Interaction;

/// For each user, up to `k` random items from the log they have not touched
///
/// The universe is every item that appears in the snapshot.
pub fn sample_unseen<R: Rng + ?Sized>(
    interactions: &[Interaction],
    k: usize,
    rng: &mut R,
) -> Vec<(String, Vec<String>)> {
    let universe: BTreeSet<&str> = interactions.iter().map(|row| row.item_id.as_str()).collect();

    let mut seen: HashMap<&str, HashSet<&str>> = HashMap::new();
    for row in interactions {
        seen.entry(row.user_id.as_str())
            .or_default()
            .insert(row.item_id.as_str());
    }

    let mut users: Vec<&str> = seen.keys().copied().collect();
    users.sort_unstable();

    users
        .into_iter()
        .map(|user_id| {
            let user_seen = &seen[user_id];
            let mut picked: Vec<String> = universe
                .iter()
                .filter(|item_id| !user_seen.contains(*item_id))
                .map(|item_id| item_id.to_string())
                .choose_multiple(rng, k);
            picked.shuffle(rng);
            (user_id.to_string(), picked)
        })
        .collect()
}

/// Novelty tier: unseen items per user, resampled on every run
pub struct NovelItemsJob {
    k: usize,
    seed: Option<u64>,
}

impl NovelItemsJob {
    pub fn new(k: usize) -> Self {
        Self { k, seed: None }
    }

    /// Fixed seed, so every run samples the same way
    pub fn seeded(k: usize, seed: u64) -> Self {
        Self {
            k,
            seed: Some(seed),
        }
    }
}

#[async_trait::async_trait]
impl TierJob for NovelItemsJob {
    fn name(&self) -> &'static str {
        "novel_items"
    }

    async fn compute(&self, snapshot: Vec<Interaction>) -> AppResult<Vec<(CacheKey, Vec<String>)>> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(sample_unseen(&snapshot, self.k, &mut rng)
            .into_iter()
            .map(|(user_id, items)| (CacheKey::NovelItems(user_id), items))
            .collect())
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;

use super::TierJob;
use crate::db::CacheKey;
use crate::error::{AppError, AppResult};
use crate::models::Interaction;
use crate::services::factorization::{InteractionMatrix, LatentFactorModel};

/// How log rows become matrix weights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelWeighting {
    /// Only likes enter the matrix, each with weight 1
    #[default]
    LikesOnly,
    /// Every action enters the matrix: like = +1, anything else = -1
    Signed,
}

impl ModelWeighting {
    fn weight(&self, row: &Interaction) -> Option<f32> {
        match (self, row.action.is_like()) {
            (_, true) => Some(1.0),
            (ModelWeighting::LikesOnly, false) => None,
            (ModelWeighting::Signed, false) => Some(-1.0),
        }
    }
}

/// Dense integer encoding of string ids, in sorted id order
struct IdEncoder {
    ids: Vec<String>,
    index: HashMap<String, usize>,
}

impl IdEncoder {
    fn new<'a>(ids: impl Iterator<Item = &'a str>) -> Self {
        let ids: Vec<String> = ids
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let index = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();
        Self { ids, index }
    }

    fn encode(&self, id: &str) -> usize {
        self.index[id]
    }

    fn decode(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Indices of the `k` highest scores, best first, ties by lower index
pub fn top_k_indices(scores: &[f32], k: usize) -> AppResult<Vec<usize>> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(AppError::Model("non-finite item score".to_string()));
    }

    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    indices.truncate(k);
    Ok(indices)
}

/// Scores every item for every known user and keeps the top `k`
pub fn recommend_for_users(
    model: &dyn LatentFactorModel,
    weighting: ModelWeighting,
    interactions: &[Interaction],
    k: usize,
) -> AppResult<Vec<(String, Vec<String>)>> {
    let weighted: Vec<(&Interaction, f32)> = interactions
        .iter()
        .filter_map(|row| weighting.weight(row).map(|w| (row, w)))
        .collect();

    if weighted.is_empty() {
        return Err(AppError::Model(
            "no interactions usable for the model".to_string(),
        ));
    }

    let users = IdEncoder::new(weighted.iter().map(|(row, _)| row.user_id.as_str()));
    let items = IdEncoder::new(weighted.iter().map(|(row, _)| row.item_id.as_str()));

    let matrix = InteractionMatrix::from_triplets(
        users.len(),
        items.len(),
        weighted
            .iter()
            .map(|(row, w)| (users.encode(&row.user_id), items.encode(&row.item_id), *w)),
    );

    let scorer = model.fit(&matrix)?;

    let mut recommendations = Vec::with_capacity(users.len());
    for user in 0..users.len() {
        let scores = scorer.score(user);
        if scores.len() != items.len() {
            return Err(AppError::Model(format!(
                "model scored {} items, expected {}",
                scores.len(),
                items.len()
            )));
        }
        let top = top_k_indices(&scores, k)?
            .into_iter()
            .map(|idx| items.decode(idx).to_string())
            .collect();
        recommendations.push((users.decode(user).to_string(), top));
    }

    Ok(recommendations)
}

/// Latent-factor tier, one entry per known user
pub struct ModelRecsJob {
    model: Arc<dyn LatentFactorModel>,
    weighting: ModelWeighting,
    k: usize,
}

impl ModelRecsJob {
    pub fn new(model: Arc<dyn LatentFactorModel>, weighting: ModelWeighting, k: usize) -> Self {
        Self {
            model,
            weighting,
            k,
        }
    }
}

#[async_trait::async_trait]
impl TierJob for ModelRecsJob {
    fn name(&self) -> &'static str {
        "model_recs"
    }

    async fn compute(&self, snapshot: Vec<Interaction>) -> AppResult<Vec<(CacheKey, Vec<String>)>> {
        let model = Arc::clone(&self.model);
        let weighting = self.weighting;
        let k = self.k;

        let per_user = tokio::task::spawn_blocking(move || {
            recommend_for_users(model.as_ref(), weighting, &snapshot, k)
        })
        .await
        .map_err(|e| AppError::Internal(format!("model fit task failed: {}", e)))??;

        Ok(per_user
            .into_iter()
            .map(|(user_id, items)| (CacheKey::ModelRecs(user_id), items))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use crate::services::factorization::UserScorer;

    /// Scores item `i` as `i`, so the highest-encoded items win
    struct IndexScorer {
        n_items: usize,
    }

    impl UserScorer for IndexScorer {
        fn score(&self, _user: usize) -> Vec<f32> {
            (0..self.n_items).map(|i| i as f32).collect()
        }
    }

    struct IndexModel;

    impl LatentFactorModel for IndexModel {
        fn fit(&self, matrix: &InteractionMatrix) -> AppResult<Box<dyn UserScorer>> {
            Ok(Box::new(IndexScorer {
                n_items: matrix.n_items(),
            }))
        }
    }

    struct NanModel;

    impl LatentFactorModel for NanModel {
        fn fit(&self, matrix: &InteractionMatrix) -> AppResult<Box<dyn UserScorer>> {
            let n_items = matrix.n_items();
            struct Nan(usize);
            impl UserScorer for Nan {
                fn score(&self, _user: usize) -> Vec<f32> {
                    vec![f32::NAN; self.0]
                }
            }
            Ok(Box::new(Nan(n_items)))
        }
    }

    fn row(user: &str, item: &str, action: Action) -> Interaction {
        Interaction::new(user, item, action, 1.0)
    }

    #[test]
    fn test_top_k_orders_by_score_then_index() {
        assert_eq!(top_k_indices(&[0.5, 0.9, 0.5, 0.1], 3).unwrap(), vec![1, 0, 2]);
        assert_eq!(top_k_indices(&[0.5], 3).unwrap(), vec![0]);
        assert!(top_k_indices(&[f32::NAN], 1).is_err());
    }

    #[test]
    fn test_likes_only_ignores_views() {
        let rows = vec![
            row("u1", "a", Action::Like),
            row("u1", "b", Action::View),
            row("u2", "c", Action::Like),
            row("u3", "d", Action::View),
        ];

        let recs = recommend_for_users(&IndexModel, ModelWeighting::LikesOnly, &rows, 5).unwrap();
        assert_eq!(
            recs,
            vec![
                ("u1".to_string(), vec!["c".to_string(), "a".to_string()]),
                ("u2".to_string(), vec!["c".to_string(), "a".to_string()]),
            ]
        );
    }

    #[test]
    fn test_signed_weighting_keeps_every_user() {
        let rows = vec![
            row("u1", "a", Action::Like),
            row("u3", "d", Action::View),
        ];

        let recs = recommend_for_users(&IndexModel, ModelWeighting::Signed, &rows, 1).unwrap();
        assert_eq!(
            recs,
            vec![
                ("u1".to_string(), vec!["d".to_string()]),
                ("u3".to_string(), vec!["d".to_string()]),
            ]
        );
    }

    #[test]
    fn test_no_likes_is_a_model_error() {
        let rows = vec![row("u1", "a", Action::View)];
        let result = recommend_for_users(&IndexModel, ModelWeighting::LikesOnly, &rows, 5);
        assert!(matches!(result, Err(AppError::Model(_))));
    }

    #[tokio::test]
    async fn test_degenerate_scores_fail_the_run() {
        let job = ModelRecsJob::new(Arc::new(NanModel), ModelWeighting::LikesOnly, 5);
        let result = job.compute(vec![row("u1", "a", Action::Like)]).await;
        assert!(matches!(result, Err(AppError::Model(_))));
    }

    #[tokio::test]
    async fn test_job_emits_per_user_keys() {
        let job = ModelRecsJob::new(Arc::new(IndexModel), ModelWeighting::LikesOnly, 2);
        let entries = job
            .compute(vec![row("u1", "a", Action::Like), row("u2", "b", Action::Like)])
            .await
            .unwrap();

        let keys: Vec<CacheKey> = entries.into_iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec![
                CacheKey::ModelRecs("u1".to_string()),
                CacheKey::ModelRecs("u2".to_string()),
            ]
        );
    }
}

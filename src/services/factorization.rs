use std::collections::{BTreeMap, HashSet};

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{AppError, AppResult};

/// Sparse user x item matrix in coordinate form
///
/// Duplicate cells are summed on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    n_users: usize,
    n_items: usize,
    entries: Vec<(usize, usize, f32)>,
}

impl InteractionMatrix {
    pub fn from_triplets(
        n_users: usize,
        n_items: usize,
        triplets: impl IntoIterator<Item = (usize, usize, f32)>,
    ) -> Self {
        let mut cells: BTreeMap<(usize, usize), f32> = BTreeMap::new();
        for (user, item, weight) in triplets {
            *cells.entry((user, item)).or_insert(0.0) += weight;
        }

        Self {
            n_users,
            n_items,
            entries: cells
                .into_iter()
                .map(|((user, item), weight)| (user, item, weight))
                .collect(),
        }
    }

    pub fn n_users(&self) -> usize {
        self.n_users
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    pub fn entries(&self) -> &[(usize, usize, f32)] {
        &self.entries
    }
}

/// Collaborative-filtering model behind a narrow fit/score seam
pub trait LatentFactorModel: Send + Sync {
    fn fit(&self, matrix: &InteractionMatrix) -> AppResult<Box<dyn UserScorer>>;
}

/// A fitted model: one affinity score per item for a given encoded user
pub trait UserScorer: Send {
    fn score(&self, user: usize) -> Vec<f32>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorizationParams {
    pub factors: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    /// Unobserved cells sampled per observed cell, pushed toward zero
    pub negatives: usize,
    pub seed: u64,
}

impl Default for FactorizationParams {
    fn default() -> Self {
        Self {
            factors: 16,
            epochs: 30,
            learning_rate: 0.05,
            regularization: 0.01,
            negatives: 2,
            seed: 42,
        }
    }
}

/// Matrix factorization trained with stochastic gradient descent
///
/// Observed cells are regressed onto their (clamped) weight, sampled
/// unobserved cells onto zero. Seeded, so a given matrix always yields the
/// same factors.
pub struct MatrixFactorization {
    params: FactorizationParams,
}

impl MatrixFactorization {
    pub fn new(params: FactorizationParams) -> Self {
        Self { params }
    }
}

struct FittedFactors {
    users: Array2<f32>,
    items: Array2<f32>,
    item_bias: Array1<f32>,
}

impl FittedFactors {
    fn step(&mut self, user: usize, item: usize, target: f32, lr: f32, reg: f32) {
        let prediction = self.users.row(user).dot(&self.items.row(item)) + self.item_bias[item];
        let err = target - prediction;

        self.item_bias[item] += lr * (err - reg * self.item_bias[item]);
        for f in 0..self.users.ncols() {
            let pu = self.users[[user, f]];
            let qi = self.items[[item, f]];
            self.users[[user, f]] += lr * (err * qi - reg * pu);
            self.items[[item, f]] += lr * (err * pu - reg * qi);
        }
    }

    fn is_finite(&self) -> bool {
        self.users.iter().all(|v| v.is_finite())
            && self.items.iter().all(|v| v.is_finite())
            && self.item_bias.iter().all(|v| v.is_finite())
    }
}

impl UserScorer for FittedFactors {
    fn score(&self, user: usize) -> Vec<f32> {
        (self.items.dot(&self.users.row(user)) + &self.item_bias).to_vec()
    }
}

impl LatentFactorModel for MatrixFactorization {
    fn fit(&self, matrix: &InteractionMatrix) -> AppResult<Box<dyn UserScorer>> {
        let p = &self.params;
        if matrix.n_users() == 0 || matrix.n_items() == 0 || matrix.entries().is_empty() {
            return Err(AppError::Model("no interactions to factorize".to_string()));
        }
        if p.factors == 0 {
            return Err(AppError::Model("factor count must be positive".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(p.seed);
        let scale = 0.1 / (p.factors as f32).sqrt();
        let mut init = |rows: usize| {
            Array2::from_shape_fn((rows, p.factors), |_| rng.gen_range(-scale..scale))
        };
        let mut fitted = FittedFactors {
            users: init(matrix.n_users()),
            items: init(matrix.n_items()),
            item_bias: Array1::zeros(matrix.n_items()),
        };

        let observed: HashSet<(usize, usize)> = matrix
            .entries()
            .iter()
            .map(|&(user, item, _)| (user, item))
            .collect();
        let mut order: Vec<usize> = (0..matrix.entries().len()).collect();

        for _ in 0..p.epochs {
            order.shuffle(&mut rng);
            for &idx in &order {
                let (user, item, weight) = matrix.entries()[idx];
                fitted.step(user, item, weight.clamp(-1.0, 1.0), p.learning_rate, p.regularization);

                for _ in 0..p.negatives {
                    let other = rng.gen_range(0..matrix.n_items());
                    if !observed.contains(&(user, other)) {
                        fitted.step(user, other, 0.0, p.learning_rate, p.regularization);
                    }
                }
            }
        }

        if !fitted.is_finite() {
            return Err(AppError::Model("factorization diverged".to_string()));
        }

        Ok(Box::new(fitted))
    }
}

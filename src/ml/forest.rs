//! Bagged ensemble of CART trees.
//!
//! Each tree is fitted on a bootstrap sample restricted to a random feature
//! subspace. The positive-class probability is the fraction of trees voting
//! for that class.

use crate::error::{AppError, Result};
use crate::ml::models::{ClassWeight, Hyperparameters};
use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
struct ForestTree {
    tree: DecisionTree<f64, usize>,
    /// Global column indices this tree was trained on
    features: Vec<usize>,
}

impl ForestTree {
    fn predict(&self, records: &Array2<f64>) -> Array1<usize> {
        let view = records.select(Axis(1), &self.features);
        self.tree.predict(&view)
    }
}

#[derive(Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<ForestTree>,
    n_features: usize,
    /// Sorted labels seen at fit time
    classes: Vec<usize>,
}

impl std::fmt::Debug for RandomForest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomForest")
            .field("n_trees", &self.trees.len())
            .field("n_features", &self.n_features)
            .field("classes", &self.classes)
            .finish()
    }
}

impl RandomForest {
    /// Fit `params.n_estimators` trees in parallel; tree `i` uses seed `seed + i`
    pub fn fit(
        records: &Array2<f64>,
        targets: &Array1<usize>,
        params: &Hyperparameters,
        seed: u64,
    ) -> Result<Self> {
        let n_samples = records.nrows();
        let n_features = records.ncols();

        if n_samples == 0 || n_features == 0 {
            return Err(AppError::EmptyDataset(
                "cannot fit a model without samples or features".to_string(),
            ));
        }
        if targets.len() != n_samples {
            return Err(AppError::Training(format!(
                "{} labels for {} samples",
                targets.len(),
                n_samples
            )));
        }

        let classes: Vec<usize> = crate::ml::models::class_distribution(targets)
            .into_keys()
            .collect();
        if classes.len() < 2 {
            return Err(AppError::Training(format!(
                "target has a single class ({:?}); at least two are required",
                classes
            )));
        }
        if params.n_estimators == 0 {
            return Err(AppError::Training("n_estimators must be positive".to_string()));
        }

        let subspace = params.max_features.resolve(n_features);

        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                fit_tree(records, targets, params, subspace, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            trees,
            n_features,
            classes,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn is_binary(&self) -> bool {
        self.classes == [0, 1]
    }

    /// Vote fractions, one column per entry of [`RandomForest::classes`]
    pub fn predict_proba(&self, records: &Array2<f64>) -> Result<Array2<f64>> {
        if records.ncols() != self.n_features {
            return Err(AppError::Validation(format!(
                "expected {} feature columns, got {}",
                self.n_features,
                records.ncols()
            )));
        }

        let class_pos: BTreeMap<usize, usize> = self
            .classes
            .iter()
            .enumerate()
            .map(|(pos, &label)| (label, pos))
            .collect();

        let votes: Vec<Array1<usize>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(records))
            .collect();

        let mut proba = Array2::<f64>::zeros((records.nrows(), self.classes.len()));
        for tree_votes in &votes {
            for (row, label) in tree_votes.iter().enumerate() {
                if let Some(&pos) = class_pos.get(label) {
                    proba[[row, pos]] += 1.0;
                }
            }
        }
        proba /= self.trees.len() as f64;
        Ok(proba)
    }

    /// Probability of label `1` per row (zero if the label was never seen)
    pub fn positive_probability(&self, records: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(records)?;
        Ok(match self.classes.iter().position(|&c| c == 1) {
            Some(pos) => proba.column(pos).to_owned(),
            None => Array1::zeros(records.nrows()),
        })
    }

    /// Most voted label per row
    pub fn predict(&self, records: &Array2<f64>) -> Result<Array1<usize>> {
        let proba = self.predict_proba(records)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for (pos, p) in row.iter().enumerate() {
                    if *p > row[best] {
                        best = pos;
                    }
                }
                self.classes[best]
            })
            .collect())
    }

    /// Impurity-based importances averaged over trees, summing to 1
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            let local = tree.tree.feature_importance();
            for (global, value) in tree.features.iter().zip(local) {
                if value.is_finite() {
                    totals[*global] += value;
                }
            }
        }

        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|v| *v /= sum);
        }
        totals
    }
}

fn fit_tree(
    records: &Array2<f64>,
    targets: &Array1<usize>,
    params: &Hyperparameters,
    subspace: usize,
    rng: &mut StdRng,
) -> Result<ForestTree> {
    let n_samples = records.nrows();

    let rows: Vec<usize> = if params.bootstrap {
        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
    } else {
        (0..n_samples).collect()
    };

    let mut features =
        rand::seq::index::sample(rng, records.ncols(), subspace).into_vec();
    features.sort_unstable();

    let sample_records = records.select(Axis(0), &rows).select(Axis(1), &features);
    let sample_targets = targets.select(Axis(0), &rows);
    let weights = sample_weights(&sample_targets, params.class_weight);

    let dataset = Dataset::new(sample_records, sample_targets).with_weights(weights);

    let tree = DecisionTree::params()
        .split_quality(SplitQuality::Gini)
        .max_depth(params.max_depth)
        .min_weight_split(params.min_samples_split as f32)
        .min_weight_leaf(params.min_samples_leaf as f32)
        .fit(&dataset)
        .map_err(|e| AppError::Training(format!("tree fit failed: {}", e)))?;

    Ok(ForestTree { tree, features })
}

/// Per-sample weights; balanced weights average to 1 over the sample
pub(crate) fn sample_weights(targets: &Array1<usize>, class_weight: ClassWeight) -> Array1<f32> {
    match class_weight {
        ClassWeight::Uniform => Array1::ones(targets.len()),
        ClassWeight::Balanced => {
            let counts = crate::ml::models::class_distribution(targets);
            let n = targets.len() as f32;
            let k = counts.len() as f32;
            targets
                .iter()
                .map(|label| n / (k * counts[label] as f32))
                .collect()
        }
    }
}

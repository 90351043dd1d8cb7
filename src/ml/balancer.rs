//! Synthetic minority oversampling, applied to the training split only.

use crate::error::{AppError, Result};
use crate::ml::models::class_distribution;
use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour, NearestNeighbourIndex};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

/// SMOTE oversampler
#[derive(Debug, Clone)]
pub struct ClassBalancer {
    k_neighbors: usize,
    seed: u64,
}

impl ClassBalancer {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self {
            k_neighbors: k_neighbors.max(1),
            seed,
        }
    }

    /// Grow every non-majority class to the majority count.
    ///
    /// Original rows come first, unchanged; synthetic rows are appended.
    pub fn balance(
        &self,
        records: &Array2<f64>,
        targets: &Array1<usize>,
    ) -> Result<(Array2<f64>, Array1<usize>)> {
        let distribution = class_distribution(targets);
        let Some(&majority) = distribution.values().max() else {
            return Ok((records.clone(), targets.clone()));
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut synthetic_rows: Vec<Array1<f64>> = Vec::new();
        let mut synthetic_labels: Vec<usize> = Vec::new();

        for (&label, &count) in &distribution {
            let needed = majority - count;
            if needed == 0 {
                continue;
            }

            let members: Vec<usize> = targets
                .iter()
                .enumerate()
                .filter(|(_, l)| **l == label)
                .map(|(row, _)| row)
                .collect();
            let class_records = records.select(Axis(0), &members);

            let generated = if members.len() < 2 {
                warn!(label, "Class has a single sample, duplicating instead of interpolating");
                (0..needed).map(|_| class_records.row(0).to_owned()).collect()
            } else {
                self.interpolate(&class_records, needed, &mut rng)?
            };

            debug!(label, original = count, synthetic = needed, "Oversampled class");
            synthetic_labels.extend(std::iter::repeat(label).take(needed));
            synthetic_rows.extend(generated);
        }

        if synthetic_rows.is_empty() {
            return Ok((records.clone(), targets.clone()));
        }

        let mut balanced = records.clone();
        for row in &synthetic_rows {
            balanced
                .push_row(row.view())
                .map_err(|e| AppError::Internal(format!("balanced matrix shape: {}", e)))?;
        }
        let mut labels = targets.to_vec();
        labels.extend(synthetic_labels);

        info!(
            before = targets.len(),
            after = labels.len(),
            "Balanced training split"
        );

        Ok((balanced, Array1::from(labels)))
    }

    /// `needed` points on segments between class members and their nearest neighbours
    fn interpolate(
        &self,
        class_records: &Array2<f64>,
        needed: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<Array1<f64>>> {
        let n = class_records.nrows();
        let k = self.k_neighbors.min(n - 1);

        let index = CommonNearestNeighbour::KdTree
            .from_batch(class_records, L2Dist)
            .map_err(|e| AppError::Training(format!("neighbour index: {}", e)))?;

        // neighbour lists are computed once per member
        let mut neighbours: Vec<Vec<usize>> = Vec::with_capacity(n);
        for i in 0..n {
            let found = index
                .k_nearest(class_records.row(i), k + 1)
                .map_err(|e| AppError::Training(format!("neighbour query: {}", e)))?;
            let mut list: Vec<usize> = found
                .into_iter()
                .map(|(_, idx)| idx)
                .filter(|&idx| idx != i)
                .collect();
            list.truncate(k);
            if list.is_empty() {
                // every member shares the same point
                list.push(i);
            }
            neighbours.push(list);
        }

        let mut generated = Vec::with_capacity(needed);
        for _ in 0..needed {
            let i = rng.gen_range(0..n);
            let j = neighbours[i][rng.gen_range(0..neighbours[i].len())];
            let gap: f64 = rng.gen();
            let base = class_records.row(i);
            let diff = &class_records.row(j) - &base;
            generated.push(&base + &(diff * gap));
        }
        Ok(generated)
    }
}

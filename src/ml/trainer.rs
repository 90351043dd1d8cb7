//! Trainer: hyperparameter policy plus the split → balance → fit → evaluate run.

use crate::config::PipelineConfig;
use crate::error::{AppError, Result};
use crate::ml::balancer::ClassBalancer;
use crate::ml::dataset::stratified_split;
use crate::ml::evaluator::{evaluate, EvaluationContext};
use crate::ml::forest::RandomForest;
use crate::ml::models::{
    class_distribution, DatasetInfo, HyperparameterProfile, Hyperparameters, MetricsDocument,
    ModelArtifact, TrainingDataset,
};
use chrono::Utc;
use ndarray::Array1;
use std::collections::BTreeMap;
use tracing::info;

/// Settings for one training run
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub test_size: f64,
    pub random_seed: u64,
    pub imbalance_threshold: f64,
    pub use_smote: bool,
    pub smote_k_neighbors: usize,
    pub threshold: f64,
    /// Bypasses the profile policy when set
    pub hyperparameters: Option<Hyperparameters>,
}

impl TrainingOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            test_size: config.test_size,
            random_seed: config.random_seed,
            imbalance_threshold: config.imbalance_threshold,
            use_smote: config.use_smote,
            smote_k_neighbors: config.smote_k_neighbors,
            threshold: config.default_threshold,
            hyperparameters: None,
        }
    }
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Minority count over majority count; 0 when a class is absent
pub fn imbalance_ratio(targets: &Array1<usize>) -> f64 {
    let counts = class_distribution(targets);
    let (Some(min), Some(max)) = (counts.values().min(), counts.values().max()) else {
        return 0.0;
    };
    if counts.len() < 2 || *max == 0 {
        return 0.0;
    }
    *min as f64 / *max as f64
}

/// Pick hyperparameters from the unbalanced training labels
pub fn select_profile(
    train_targets: &Array1<usize>,
    imbalance_threshold: f64,
) -> (HyperparameterProfile, Hyperparameters) {
    let ratio = imbalance_ratio(train_targets);
    if ratio < imbalance_threshold {
        info!(ratio, threshold = imbalance_threshold, "Imbalanced training data, using high-capacity profile");
        (
            HyperparameterProfile::ImbalanceAdjusted,
            Hyperparameters::imbalance_profile(),
        )
    } else {
        (HyperparameterProfile::Default, Hyperparameters::default_profile())
    }
}

/// Result of a training run, ready to persist
#[derive(Debug)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub metrics: MetricsDocument,
}

fn label_counts(targets: &Array1<usize>) -> BTreeMap<String, usize> {
    class_distribution(targets)
        .into_iter()
        .map(|(label, count)| (label.to_string(), count))
        .collect()
}

/// Run the full pipeline on an already built dataset.
///
/// The test split is taken before balancing and never modified.
pub fn train_model(dataset: &TrainingDataset, options: &TrainingOptions) -> Result<TrainingOutcome> {
    if !(0.0..=1.0).contains(&options.threshold) {
        return Err(AppError::Validation(format!(
            "threshold must be in [0, 1], got {}",
            options.threshold
        )));
    }

    let distribution = dataset.class_distribution();
    if distribution.len() < 2 {
        return Err(AppError::Training(format!(
            "target {} has a single class; at least two are required",
            dataset.target_name
        )));
    }

    info!(
        samples = dataset.n_samples(),
        features = dataset.n_features(),
        distribution = ?distribution,
        "Starting training run"
    );

    let split = stratified_split(dataset, options.test_size, options.random_seed)?;

    let (profile, hyperparameters) = match &options.hyperparameters {
        Some(custom) => (HyperparameterProfile::Custom, custom.clone()),
        None => select_profile(&split.train_targets, options.imbalance_threshold),
    };

    let (train_records, train_targets) = if options.use_smote {
        ClassBalancer::new(options.smote_k_neighbors, options.random_seed)
            .balance(&split.train_records, &split.train_targets)?
    } else {
        (split.train_records.clone(), split.train_targets.clone())
    };

    info!(
        profile = %profile,
        n_estimators = hyperparameters.n_estimators,
        max_depth = ?hyperparameters.max_depth,
        training_samples = train_targets.len(),
        "Fitting ensemble"
    );

    let forest = RandomForest::fit(
        &train_records,
        &train_targets,
        &hyperparameters,
        options.random_seed,
    )?;

    let dataset_info = DatasetInfo {
        total_samples: dataset.n_samples(),
        training_samples: split.train_targets.len(),
        balanced_training_samples: train_targets.len(),
        test_samples: split.test_targets.len(),
        features_count: dataset.n_features(),
        target_distribution: label_counts(&dataset.targets),
        test_distribution: label_counts(&split.test_targets),
    };

    let metrics = evaluate(
        &forest,
        &split.test_records,
        &split.test_targets,
        EvaluationContext {
            feature_names: &dataset.feature_names,
            threshold: options.threshold,
            dataset_info,
            profile,
            hyperparameters,
        },
    )?;

    let artifact = ModelArtifact {
        forest,
        feature_columns: dataset.feature_names.clone(),
        target_column: dataset.target_name.clone(),
        trained_at: Utc::now(),
        profile,
        categories: dataset.categories.clone(),
    };

    Ok(TrainingOutcome { artifact, metrics })
}

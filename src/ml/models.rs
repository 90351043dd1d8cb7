use crate::ml::forest::RandomForest;
use crate::table::parse_integer;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

/// Training dataset: ordered feature matrix plus labels
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Column names, in matrix column order
    pub feature_names: Vec<String>,

    /// Label column name
    pub target_name: String,

    /// Feature matrix (n_samples × n_features)
    pub records: Array2<f64>,

    /// Class labels
    pub targets: Array1<usize>,

    /// Rows dropped for nulls
    pub dropped_rows: usize,

    /// Categorical feature -> its sorted values; a code is an index into the list
    pub categories: BTreeMap<String, Vec<String>>,

    /// Values changed by range repair
    pub repaired_values: usize,
}

impl TrainingDataset {
    pub fn n_samples(&self) -> usize {
        self.records.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.records.ncols()
    }

    /// Feature columns encoded as categorical codes
    pub fn categorical_columns(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    /// Label -> count, ascending by label
    pub fn class_distribution(&self) -> BTreeMap<usize, usize> {
        class_distribution(&self.targets)
    }
}

pub fn class_distribution(targets: &Array1<usize>) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for &label in targets.iter() {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

/// Held-out split of a [`TrainingDataset`]
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub train_records: Array2<f64>,
    pub train_targets: Array1<usize>,
    pub test_records: Array2<f64>,
    pub test_targets: Array1<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MaxFeatures {
    /// sqrt(n_features) per tree
    Sqrt,
    /// log2(n_features) per tree
    Log2,
    /// every feature
    All,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClassWeight {
    /// n_samples / (n_classes * class_count)
    Balanced,
    Uniform,
}

/// Ensemble hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub class_weight: ClassWeight,
}

impl Hyperparameters {
    /// Moderate ensemble used for reasonably balanced data
    pub fn default_profile() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(10),
            min_samples_split: 15,
            min_samples_leaf: 5,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            class_weight: ClassWeight::Balanced,
        }
    }

    /// Higher-capacity ensemble used when the minority class is scarce
    pub fn imbalance_profile() -> Self {
        Self {
            n_estimators: 200,
            max_depth: Some(15),
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            class_weight: ClassWeight::Balanced,
        }
    }
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self::default_profile()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HyperparameterProfile {
    Default,
    ImbalanceAdjusted,
    Custom,
}

/// Fitted classifier plus the column order it expects
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub forest: RandomForest,
    pub feature_columns: Vec<String>,
    pub target_column: String,
    pub trained_at: DateTime<Utc>,
    pub profile: HyperparameterProfile,
    /// Value tables for features trained as categorical codes
    pub categories: BTreeMap<String, Vec<String>>,
}

impl ModelArtifact {
    /// Code of `raw` in a categorical feature, `None` for numeric features
    /// or values the model never saw
    pub fn category_code(&self, feature: &str, raw: &str) -> Option<i64> {
        self.categories
            .get(feature)?
            .iter()
            .position(|value| value == raw.trim())
            .map(|code| code as i64)
    }

    pub fn is_categorical(&self, feature: &str) -> bool {
        self.categories.contains_key(feature)
    }

    /// Model input for a raw cell: its category code, or the integer itself
    pub fn encode(&self, feature: &str, raw: &str) -> Option<i64> {
        if self.is_categorical(feature) {
            self.category_code(feature, raw)
        } else {
            parse_integer(raw)
        }
    }

    /// What `feature` accepts, for error messages
    pub fn expected_values(&self, feature: &str) -> String {
        match self.categories.get(feature) {
            Some(values) => format!("one of [{}]", values.join(", ")),
            None => "an integer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub total_samples: usize,
    pub training_samples: usize,
    pub balanced_training_samples: usize,
    pub test_samples: usize,
    pub features_count: usize,
    /// Label -> count over the whole dataset
    pub target_distribution: BTreeMap<String, usize>,
    /// Label -> count over the held-out split
    pub test_distribution: BTreeMap<String, usize>,
}

/// JSON summary written once per training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    pub timestamp: DateTime<Utc>,
    pub training_date: String,
    pub threshold: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roc_auc: Option<f64>,
    /// `binary` or `weighted`
    pub average: String,
    pub confusion_matrix: ConfusionMatrix,
    pub dataset_info: DatasetInfo,
    pub hyperparameter_profile: HyperparameterProfile,
    pub hyperparameters: Hyperparameters,
    pub top_features: Vec<FeatureImportance>,
    pub feature_columns: Vec<String>,
}

//! Accident risk model: dataset building, balancing, training, evaluation
//! and the service that serves predictions from the persisted artifact.
//!
//! Training pipeline:
//! - [`dataset::DatasetBuilder`] reconciles columns and produces a numeric dataset
//! - [`dataset::stratified_split`] holds out a test split
//! - [`balancer::ClassBalancer`] oversamples the training split only
//! - [`forest::RandomForest`] fits the ensemble
//! - [`evaluator::evaluate`] scores the held-out split

pub mod balancer;
pub mod dataset;
pub mod evaluator;
pub mod forest;
pub mod models;
pub mod service;
pub mod trainer;

pub use balancer::ClassBalancer;
pub use dataset::{stratified_split, DatasetBuilder};
pub use forest::RandomForest;
pub use models::{
    ConfusionMatrix, DatasetInfo, FeatureImportance, HyperparameterProfile, Hyperparameters,
    MetricsDocument, ModelArtifact, TrainingDataset,
};
pub use service::{
    append_predictions, ModelInfo, ModelInfoReport, PredictionBatch, RiskModelService,
    TrainRequest, TrainingInfo, TrainingReport,
};
pub use trainer::{select_profile, train_model, TrainingOptions, TrainingOutcome};

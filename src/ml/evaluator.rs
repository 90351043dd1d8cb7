//! Held-out evaluation and the metrics document.

use crate::error::Result;
use crate::ml::forest::RandomForest;
use crate::ml::models::{
    class_distribution, ConfusionMatrix, DatasetInfo, FeatureImportance, HyperparameterProfile,
    Hyperparameters, MetricsDocument,
};
use chrono::Utc;
use ndarray::{Array1, Array2};
use std::collections::BTreeSet;

/// Number of importances kept in the metrics document
pub const TOP_FEATURES: usize = 10;

/// Scores over one labelled sample
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub roc_auc: Option<f64>,
    pub average: &'static str,
    pub confusion_matrix: ConfusionMatrix,
}

/// Label per row: threshold on the positive probability for binary models, argmax otherwise
pub fn predict_labels(
    forest: &RandomForest,
    records: &Array2<f64>,
    threshold: f64,
) -> Result<(Array1<usize>, Array1<f64>)> {
    let positive = forest.positive_probability(records)?;
    let labels = if forest.is_binary() {
        positive.mapv(|p| usize::from(p >= threshold))
    } else {
        forest.predict(records)?
    };
    Ok((labels, positive))
}

/// Compute scores; `positive` is the probability of label 1 per row
pub fn score(truth: &Array1<usize>, predicted: &Array1<usize>, positive: &Array1<f64>) -> Scores {
    let n = truth.len();
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    let accuracy = ratio(correct, n);

    let labels: BTreeSet<usize> = truth.iter().chain(predicted.iter()).copied().collect();
    let binary = labels.iter().all(|&l| l <= 1);

    let (precision, recall, f1_score, average) = if binary {
        let (p, r, f) = class_scores(truth, predicted, 1);
        (p, r, f, "binary")
    } else {
        // support-weighted mean over every label present in the truth
        let support = class_distribution(truth);
        let (mut p, mut r, mut f) = (0.0, 0.0, 0.0);
        for (&label, &count) in &support {
            let (lp, lr, lf) = class_scores(truth, predicted, label);
            let w = count as f64 / n as f64;
            p += lp * w;
            r += lr * w;
            f += lf * w;
        }
        (p, r, f, "weighted")
    };

    let present: BTreeSet<usize> = truth.iter().copied().collect();
    let roc_auc = if present.len() == 2 && present.iter().all(|&l| l <= 1) {
        Some(roc_auc(truth, positive))
    } else {
        None
    };

    Scores {
        accuracy,
        precision,
        recall,
        f1_score,
        roc_auc,
        average,
        confusion_matrix: confusion_matrix(truth, predicted),
    }
}

/// One-vs-rest quadrants with label 1 as positive; always sums to the sample size
pub fn confusion_matrix(truth: &Array1<usize>, predicted: &Array1<usize>) -> ConfusionMatrix {
    let mut cm = ConfusionMatrix::default();
    for (&t, &p) in truth.iter().zip(predicted) {
        match (t == 1, p == 1) {
            (false, false) => cm.true_negatives += 1,
            (false, true) => cm.false_positives += 1,
            (true, false) => cm.false_negatives += 1,
            (true, true) => cm.true_positives += 1,
        }
    }
    cm
}

fn class_scores(truth: &Array1<usize>, predicted: &Array1<usize>, label: usize) -> (f64, f64, f64) {
    let mut tp = 0;
    let mut fp = 0;
    let mut fn_ = 0;
    for (&t, &p) in truth.iter().zip(predicted) {
        match (t == label, p == label) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

/// Zero when the denominator is zero
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Mann-Whitney AUC with average ranks for ties
pub fn roc_auc(truth: &Array1<usize>, scores: &Array1<f64>) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }

    let n_pos = truth.iter().filter(|&&t| t == 1).count() as f64;
    let n_neg = truth.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }
    let rank_sum: f64 = truth
        .iter()
        .zip(&ranks)
        .filter(|(&t, _)| t == 1)
        .map(|(_, r)| r)
        .sum();
    (rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Importances ranked descending, at most [`TOP_FEATURES`]
pub fn top_features(forest: &RandomForest, feature_names: &[String]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = feature_names
        .iter()
        .zip(forest.feature_importances())
        .map(|(feature, importance)| FeatureImportance {
            feature: feature.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked.truncate(TOP_FEATURES);
    ranked
}

/// Everything the evaluator needs besides the model and test split
pub struct EvaluationContext<'a> {
    pub feature_names: &'a [String],
    pub threshold: f64,
    pub dataset_info: DatasetInfo,
    pub profile: HyperparameterProfile,
    pub hyperparameters: Hyperparameters,
}

/// Score the model on the held-out split and package the metrics document
pub fn evaluate(
    forest: &RandomForest,
    test_records: &Array2<f64>,
    test_targets: &Array1<usize>,
    ctx: EvaluationContext<'_>,
) -> Result<MetricsDocument> {
    let (predicted, positive) = predict_labels(forest, test_records, ctx.threshold)?;
    let scores = score(test_targets, &predicted, &positive);
    let now = Utc::now();

    tracing::info!(
        accuracy = scores.accuracy,
        precision = scores.precision,
        recall = scores.recall,
        f1 = scores.f1_score,
        roc_auc = ?scores.roc_auc,
        test_samples = test_targets.len(),
        "Evaluated model"
    );

    Ok(MetricsDocument {
        timestamp: now,
        training_date: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        threshold: ctx.threshold,
        accuracy: scores.accuracy,
        precision: scores.precision,
        recall: scores.recall,
        f1_score: scores.f1_score,
        roc_auc: scores.roc_auc,
        average: scores.average.to_string(),
        confusion_matrix: scores.confusion_matrix,
        dataset_info: ctx.dataset_info,
        hyperparameter_profile: ctx.profile,
        hyperparameters: ctx.hyperparameters,
        top_features: top_features(forest, ctx.feature_names),
        feature_columns: ctx.feature_names.to_vec(),
    })
}

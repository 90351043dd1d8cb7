use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Coarse risk tier derived from the positive-class probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum RiskLevel {
    Alto,
    Medio,
    Bajo,
}

impl RiskLevel {
    pub const HIGH_THRESHOLD: f64 = 0.7;
    pub const MEDIUM_THRESHOLD: f64 = 0.3;

    /// `Alto` if p > 0.7, `Medio` if p > 0.3, otherwise `Bajo`
    pub fn from_probability(probability: f64) -> Self {
        if probability > Self::HIGH_THRESHOLD {
            RiskLevel::Alto
        } else if probability > Self::MEDIUM_THRESHOLD {
            RiskLevel::Medio
        } else {
            RiskLevel::Bajo
        }
    }
}

/// Prediction for one input record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub index: usize,
    pub input_data: BTreeMap<String, i64>,
    pub prediction: u8,
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub accident_likely: bool,
}

impl PredictionResult {
    pub fn new(index: usize, input_data: BTreeMap<String, i64>, probability: f64, threshold: f64) -> Self {
        let accident_likely = probability >= threshold;
        Self {
            index,
            input_data,
            prediction: u8::from(accident_likely),
            probability,
            risk_level: RiskLevel::from_probability(probability),
            accident_likely,
        }
    }
}

/// Aggregate counts over a prediction batch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PredictionSummary {
    pub total_predictions: usize,
    pub accidents_predicted: usize,
    pub no_accidents_predicted: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub average_probability: f64,
    pub max_probability: f64,
    pub min_probability: f64,
}

impl PredictionSummary {
    pub fn from_results(results: &[PredictionResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let count = |level: RiskLevel| results.iter().filter(|r| r.risk_level == level).count();
        let accidents = results.iter().filter(|r| r.accident_likely).count();
        let probabilities = results.iter().map(|r| r.probability);

        Self {
            total_predictions: results.len(),
            accidents_predicted: accidents,
            no_accidents_predicted: results.len() - accidents,
            high_risk: count(RiskLevel::Alto),
            medium_risk: count(RiskLevel::Medio),
            low_risk: count(RiskLevel::Bajo),
            average_probability: probabilities.clone().sum::<f64>() / results.len() as f64,
            max_probability: probabilities.clone().fold(f64::MIN, f64::max),
            min_probability: probabilities.fold(f64::MAX, f64::min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_risk_level_boundaries() {
        assert_eq!(RiskLevel::from_probability(0.7), RiskLevel::Medio);
        assert_eq!(RiskLevel::from_probability(0.7000001), RiskLevel::Alto);
        assert_eq!(RiskLevel::from_probability(0.3), RiskLevel::Bajo);
        assert_eq!(RiskLevel::from_probability(0.3000001), RiskLevel::Medio);
        assert_eq!(RiskLevel::from_probability(0.0), RiskLevel::Bajo);
        assert_eq!(RiskLevel::from_probability(1.0), RiskLevel::Alto);
    }

    #[test]
    fn test_risk_level_strings() {
        assert_eq!(RiskLevel::Alto.to_string(), "Alto");
        assert_eq!(RiskLevel::from_str("Bajo").unwrap(), RiskLevel::Bajo);
        assert_eq!(serde_json::to_string(&RiskLevel::Medio).unwrap(), "\"Medio\"");
    }

    #[test]
    fn test_threshold_drives_label_not_tier() {
        let low = PredictionResult::new(0, BTreeMap::new(), 0.45, 0.4);
        assert!(low.accident_likely);
        assert_eq!(low.prediction, 1);
        assert_eq!(low.risk_level, RiskLevel::Medio);

        let strict = PredictionResult::new(0, BTreeMap::new(), 0.45, 0.5);
        assert!(!strict.accident_likely);
        assert_eq!(strict.risk_level, RiskLevel::Medio);
    }

    #[test]
    fn test_summary() {
        let results = vec![
            PredictionResult::new(0, BTreeMap::new(), 0.9, 0.5),
            PredictionResult::new(1, BTreeMap::new(), 0.5, 0.5),
            PredictionResult::new(2, BTreeMap::new(), 0.1, 0.5),
        ];
        let summary = PredictionSummary::from_results(&results);
        assert_eq!(summary.total_predictions, 3);
        assert_eq!(summary.accidents_predicted, 2);
        assert_eq!(summary.no_accidents_predicted, 1);
        assert_eq!((summary.high_risk, summary.medium_risk, summary.low_risk), (1, 1, 1));
        assert!((summary.average_probability - 0.5).abs() < 1e-12);
        assert_eq!(summary.max_probability, 0.9);
        assert_eq!(summary.min_probability, 0.1);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(PredictionSummary::from_results(&[]), PredictionSummary::default());
    }
}

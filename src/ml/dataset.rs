//! Dataset Builder: turns an untyped table into a numeric training dataset.

use crate::error::{AppError, Result};
use crate::ml::models::{DataSplit, TrainingDataset};
use crate::schema::FeatureSchema;
use crate::table::{parse_integer, RawTable};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Outcome of coercing one column to integers
#[derive(Debug, Clone, PartialEq)]
pub enum CoercedColumn {
    /// Every present value parsed as an integer
    Numeric(Vec<Option<i64>>),
    /// Some value did not parse; codes index the sorted distinct strings
    Categorical {
        codes: Vec<Option<i64>>,
        categories: Vec<String>,
    },
    /// Strict coercion failed at these 0-based rows
    Failed { rows: Vec<usize> },
}

/// Coerce raw cells to integers.
///
/// With `allow_categorical`, a column that is not fully numeric is encoded as
/// categorical codes instead of failing.
pub fn coerce_column(values: &[Option<String>], allow_categorical: bool) -> CoercedColumn {
    let parsed: Vec<Option<std::result::Result<i64, ()>>> = values
        .iter()
        .map(|v| v.as_deref().map(|raw| parse_integer(raw).ok_or(())))
        .collect();

    let failed: Vec<usize> = parsed
        .iter()
        .enumerate()
        .filter(|(_, v)| matches!(v, Some(Err(()))))
        .map(|(row, _)| row)
        .collect();

    if failed.is_empty() {
        return CoercedColumn::Numeric(
            parsed
                .into_iter()
                .map(|v| v.and_then(|r| r.ok()))
                .collect(),
        );
    }

    if !allow_categorical {
        return CoercedColumn::Failed { rows: failed };
    }

    let categories: Vec<String> = values
        .iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let lookup: BTreeMap<&str, i64> = categories
        .iter()
        .enumerate()
        .map(|(code, name)| (name.as_str(), code as i64))
        .collect();
    let codes = values
        .iter()
        .map(|v| v.as_deref().and_then(|raw| lookup.get(raw.trim()).copied()))
        .collect();

    CoercedColumn::Categorical { codes, categories }
}

/// Deterministic repair of known ordinal columns; returns the repaired value
pub fn repair_value(column: &str, value: i64) -> i64 {
    match column {
        "HORA_SINIESTRO" => value.clamp(0, 23),
        "DIA_DE_LA_SEMANA" => value.rem_euclid(7),
        "MES" => value.clamp(1, 12),
        _ => value,
    }
}

/// Builds [`TrainingDataset`]s for one feature schema
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    schema: FeatureSchema,
}

impl DatasetBuilder {
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Reconcile, coerce, filter and repair `table` into a dataset.
    ///
    /// `target` overrides the schema's label column; see
    /// [`FeatureSchema::resolve_target`] for the fallback rule.
    pub fn build(&self, table: &RawTable, target: Option<&str>) -> Result<TrainingDataset> {
        let target_name = self.schema.resolve_target(&table.columns, target)?;
        let schema = self.schema.with_target(target_name.clone());

        if schema.features().iter().any(|f| *f == target_name) {
            return Err(AppError::Validation(format!(
                "target column {} is also declared as a feature",
                target_name
            )));
        }

        let mapping = schema.reconcile(&table.columns, &schema.training_columns())?;

        let mut feature_values = Vec::with_capacity(schema.features().len());
        let mut categories = BTreeMap::new();
        for feature in schema.features() {
            let idx = mapping.index_of(feature).ok_or_else(|| AppError::Schema {
                missing: vec![feature.clone()],
            })?;
            match coerce_column(&table.column_values(idx), true) {
                CoercedColumn::Numeric(values) => feature_values.push(values),
                CoercedColumn::Categorical { codes, categories: values } => {
                    debug!(column = %feature, categories = values.len(), "Encoded column as categorical codes");
                    categories.insert(feature.clone(), values);
                    feature_values.push(codes);
                }
                CoercedColumn::Failed { rows } => {
                    return Err(AppError::Validation(format!(
                        "column {} could not be coerced in {} rows",
                        feature,
                        rows.len()
                    )))
                }
            }
        }

        let target_idx = mapping.index_of(&target_name).ok_or_else(|| AppError::Schema {
            missing: vec![target_name.clone()],
        })?;
        let target_values = match coerce_column(&table.column_values(target_idx), false) {
            CoercedColumn::Numeric(values) => values,
            CoercedColumn::Failed { rows } => {
                return Err(AppError::Validation(format!(
                    "target column {} has non-integer values in {} rows (first at row {})",
                    target_name,
                    rows.len(),
                    rows.first().map_or(0, |r| r + 1)
                )))
            }
            CoercedColumn::Categorical { .. } => {
                return Err(AppError::Validation(format!(
                    "target column {} is not numeric",
                    target_name
                )))
            }
        };

        let n_features = schema.features().len();
        let mut flat = Vec::with_capacity(table.len() * n_features);
        let mut targets = Vec::with_capacity(table.len());
        let mut dropped_rows = 0;
        let mut repaired_values = 0;

        for row in 0..table.len() {
            let label = match target_values[row] {
                Some(label) if label >= 0 => label as usize,
                Some(label) => {
                    return Err(AppError::Validation(format!(
                        "target column {} has negative label {} at row {}",
                        target_name,
                        label,
                        row + 1
                    )))
                }
                None => {
                    dropped_rows += 1;
                    continue;
                }
            };

            let values: Option<Vec<i64>> = feature_values.iter().map(|col| col[row]).collect();
            let Some(values) = values else {
                dropped_rows += 1;
                continue;
            };

            for (feature, value) in schema.features().iter().zip(values) {
                // codes are not ordinal values
                let repaired = if categories.contains_key(feature) {
                    value
                } else {
                    repair_value(feature, value)
                };
                if repaired != value {
                    repaired_values += 1;
                }
                flat.push(repaired as f64);
            }
            targets.push(label);
        }

        if targets.is_empty() {
            return Err(AppError::EmptyDataset(format!(
                "no usable rows remain out of {} after dropping incomplete rows",
                table.len()
            )));
        }

        let records = Array2::from_shape_vec((targets.len(), n_features), flat)
            .map_err(|e| AppError::Internal(format!("feature matrix shape: {}", e)))?;

        info!(
            rows = targets.len(),
            dropped = dropped_rows,
            repaired = repaired_values,
            features = n_features,
            "Built training dataset"
        );

        Ok(TrainingDataset {
            feature_names: schema.features().to_vec(),
            target_name,
            records,
            targets: Array1::from(targets),
            dropped_rows,
            categories,
            repaired_values,
        })
    }
}

/// Stratified split: each class is shuffled with `seed` and `test_size` of it held out.
///
/// Classes with at least two rows contribute at least one test row and keep at
/// least one training row.
pub fn stratified_split(dataset: &TrainingDataset, test_size: f64, seed: u64) -> Result<DataSplit> {
    if !(0.0..1.0).contains(&test_size) {
        return Err(AppError::Validation(format!(
            "test_size must be in [0, 1), got {}",
            test_size
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in dataset.targets.iter().enumerate() {
        by_class.entry(label).or_default().push(row);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train_rows = Vec::new();
    let mut test_rows = Vec::new();

    for rows in by_class.values_mut() {
        rows.shuffle(&mut rng);
        let n = rows.len();
        let mut n_test = (n as f64 * test_size).round() as usize;
        if test_size > 0.0 && n >= 2 {
            n_test = n_test.clamp(1, n - 1);
        }
        n_test = n_test.min(n);
        test_rows.extend_from_slice(&rows[..n_test]);
        train_rows.extend_from_slice(&rows[n_test..]);
    }

    train_rows.shuffle(&mut rng);
    test_rows.sort_unstable();

    Ok(DataSplit {
        train_records: dataset.records.select(Axis(0), &train_rows),
        train_targets: dataset.targets.select(Axis(0), &train_rows),
        test_records: dataset.records.select(Axis(0), &test_rows),
        test_targets: dataset.targets.select(Axis(0), &test_rows),
    })
}

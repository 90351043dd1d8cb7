//! Column naming rules shared by training, prediction and ingestion.
//!
//! Incoming tables may use a second naming convention (spaces instead of
//! underscores, accented letters). Names are reconciled once per load: first
//! through the explicit alias table, then through a normalized comparison
//! against the canonical names.

use crate::config::PipelineConfig;
use crate::error::{AppError, Result};
use std::collections::BTreeMap;

/// Built-in accepted-name -> canonical-name entries
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("HORA SINIESTRO", "HORA_SINIESTRO"),
    ("CLASE SINIESTRO", "CLASE_SINIESTRO"),
    ("CANTIDAD_DE_VEHICULOS_DAÑADOS", "CANTIDAD_DE_VEHICULOS_DANADOS"),
    ("CANTIDAD DE VEHICULOS DAÑADOS", "CANTIDAD_DE_VEHICULOS_DANADOS"),
    ("TIPO DE VÍA", "TIPO_DE_VIA"),
    ("RED VIAL", "RED_VIAL"),
    ("EXISTE CICLOVÍA", "EXISTE_CICLOVIA"),
    ("CONDICIÓN CLIMÁTICA", "CONDICION_CLIMATICA"),
    ("ZONIFICACIÓN", "ZONIFICACION"),
    ("CARACTERÍSTICAS DE VÍA", "CARACTERISTICAS_DE_VIA"),
    ("PERFIL LONGITUDINAL VÍA", "PERFIL_LONGITUDINAL_VIA"),
    ("SUPERFICIE DE CALZADA", "SUPERFICIE_DE_CALZADA"),
    ("senalizacion", "SENALIZACION"),
    ("SEÑALIZACIÓN", "SENALIZACION"),
    ("DÍA DE LA SEMANA", "DIA_DE_LA_SEMANA"),
    ("PERIODO DEL DÍA", "PERIODO_DEL_DIA"),
    ("Feriado", "FERIADO"),
    ("FECHA SINIESTRO", "FECHA_SINIESTRO"),
];

/// Uppercase, strip Spanish accents, and turn spaces/hyphens into underscores
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .map(|c| match c {
            'á' | 'Á' | 'à' | 'À' => 'A',
            'é' | 'É' | 'è' | 'È' => 'E',
            'í' | 'Í' | 'ì' | 'Ì' => 'I',
            'ó' | 'Ó' | 'ò' | 'Ò' => 'O',
            'ú' | 'Ú' | 'ù' | 'Ù' | 'ü' | 'Ü' => 'U',
            'ñ' | 'Ñ' => 'N',
            ' ' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Positions of canonical columns inside a concrete table header
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    indices: BTreeMap<String, usize>,
}

impl ColumnMapping {
    pub fn index_of(&self, canonical: &str) -> Option<usize> {
        self.indices.get(canonical).copied()
    }

    /// Indices in the order of `columns`
    pub fn ordered(&self, columns: &[String]) -> Vec<usize> {
        columns
            .iter()
            .filter_map(|c| self.index_of(c))
            .collect()
    }
}

/// Ordered feature list, target, excluded columns and alias table
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    features: Vec<String>,
    target: String,
    date_column: String,
    excluded: Vec<String>,
    /// normalized accepted name -> canonical name
    aliases: BTreeMap<String, String>,
}

impl FeatureSchema {
    pub fn new(features: Vec<String>, target: impl Into<String>) -> Self {
        let mut schema = Self {
            features,
            target: target.into(),
            date_column: crate::models::INCIDENT_DATE_COLUMN.to_string(),
            excluded: Vec::new(),
            aliases: BTreeMap::new(),
        };
        for (accepted, canonical) in DEFAULT_ALIASES {
            schema.add_alias(accepted, canonical);
        }
        schema
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut schema = Self::new(config.feature_columns.clone(), config.target_column.clone());
        schema.date_column = config.date_column.clone();
        schema.excluded = config.excluded_columns.clone();
        for (accepted, canonical) in &config.aliases {
            schema.add_alias(accepted, canonical);
        }
        schema
    }

    /// Register an accepted-name -> canonical-name entry
    pub fn add_alias(&mut self, accepted: &str, canonical: &str) {
        // config-rs may lowercase keys, so the table is keyed by normalized name
        self.aliases
            .insert(normalize_column_name(accepted), canonical.trim().to_string());
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Same schema with a different target column
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }

    /// Features followed by the target
    pub fn training_columns(&self) -> Vec<String> {
        let mut columns = self.features.clone();
        columns.push(self.target.clone());
        columns
    }

    fn known_columns(&self) -> impl Iterator<Item = &String> {
        self.features
            .iter()
            .chain(std::iter::once(&self.target))
            .chain(std::iter::once(&self.date_column))
            .chain(self.excluded.iter())
    }

    /// Canonical name for a raw header, if it resolves to a known column
    pub fn canonical_name(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim().trim_start_matches('\u{feff}');
        if let Some(known) = self.known_columns().find(|c| c.as_str() == trimmed) {
            return Some(known.clone());
        }

        let normalized = normalize_column_name(trimmed);
        if let Some(canonical) = self.aliases.get(&normalized) {
            return Some(canonical.clone());
        }

        self.known_columns()
            .find(|c| normalize_column_name(c) == normalized)
            .cloned()
    }

    /// Map every `required` canonical column to a header position.
    ///
    /// Fails with [`AppError::Schema`] naming every column that resolves to
    /// nothing. When two headers resolve to the same column the first wins.
    pub fn reconcile(&self, header: &[String], required: &[String]) -> Result<ColumnMapping> {
        let mut indices = BTreeMap::new();
        for (idx, raw) in header.iter().enumerate() {
            if let Some(canonical) = self.canonical_name(raw) {
                indices.entry(canonical).or_insert(idx);
            }
        }

        let missing: Vec<String> = required
            .iter()
            .filter(|c| !indices.contains_key(c.as_str()))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(AppError::Schema { missing });
        }

        Ok(ColumnMapping { indices })
    }

    /// Resolve the label column for a training run.
    ///
    /// A requested name is tried first; when it does not resolve, any header
    /// whose normalized name contains `ACCIDENTE` is used.
    pub fn resolve_target(&self, header: &[String], requested: Option<&str>) -> Result<String> {
        let wanted = requested.unwrap_or(&self.target);

        let lookup = self.with_target(wanted);
        if header
            .iter()
            .any(|h| lookup.canonical_name(h).as_deref() == Some(wanted))
        {
            return Ok(wanted.to_string());
        }

        if let Some(found) = header
            .iter()
            .find(|h| normalize_column_name(h).contains("ACCIDENTE"))
        {
            tracing::warn!(requested = %wanted, using = %found, "Target column not found, using fallback");
            return Ok(self
                .canonical_name(found)
                .unwrap_or_else(|| found.trim().to_string()));
        }

        Err(AppError::Schema {
            missing: vec![wanted.to_string()],
        })
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

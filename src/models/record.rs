use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// Ordered model input columns, as stored
pub const FEATURE_COLUMNS: [&str; 18] = [
    "HORA_SINIESTRO",
    "CLASE_SINIESTRO",
    "CANTIDAD_DE_VEHICULOS_DANADOS",
    "DISTRITO",
    "ZONA",
    "TIPO_DE_VIA",
    "RED_VIAL",
    "EXISTE_CICLOVIA",
    "CONDICION_CLIMATICA",
    "ZONIFICACION",
    "CARACTERISTICAS_DE_VIA",
    "PERFIL_LONGITUDINAL_VIA",
    "SUPERFICIE_DE_CALZADA",
    "SENALIZACION",
    "DIA_DE_LA_SEMANA",
    "MES",
    "PERIODO_DEL_DIA",
    "FERIADO",
];

/// Binary label: 1 when an accident occurred
pub const TARGET_COLUMN: &str = "ACCIDENTE";

pub const INCIDENT_DATE_COLUMN: &str = "FECHA_SINIESTRO";

pub const INGESTION_DATE_COLUMN: &str = "FECHA_INGRESO";

/// One row of the incident store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IncidentRecord {
    /// Store-assigned identifier (0 until persisted)
    #[serde(rename = "id", default)]
    pub id: u64,

    pub hora_siniestro: i64,
    pub clase_siniestro: i64,
    #[validate(range(min = 0))]
    pub cantidad_de_vehiculos_danados: i64,
    pub distrito: i64,
    pub zona: i64,
    pub tipo_de_via: i64,
    pub red_vial: i64,
    pub existe_ciclovia: i64,
    pub condicion_climatica: i64,
    pub zonificacion: i64,
    pub caracteristicas_de_via: i64,
    pub perfil_longitudinal_via: i64,
    pub superficie_de_calzada: i64,
    pub senalizacion: i64,
    pub dia_de_la_semana: i64,
    pub mes: i64,
    pub periodo_del_dia: i64,
    pub feriado: i64,

    #[validate(range(min = 0, max = 1))]
    pub accidente: i64,

    pub fecha_siniestro: NaiveDate,

    #[serde(default = "today")]
    pub fecha_ingreso: NaiveDate,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl IncidentRecord {
    /// Numeric value of a feature or target column
    pub fn value(&self, column: &str) -> Option<i64> {
        let v = match column {
            "HORA_SINIESTRO" => self.hora_siniestro,
            "CLASE_SINIESTRO" => self.clase_siniestro,
            "CANTIDAD_DE_VEHICULOS_DANADOS" => self.cantidad_de_vehiculos_danados,
            "DISTRITO" => self.distrito,
            "ZONA" => self.zona,
            "TIPO_DE_VIA" => self.tipo_de_via,
            "RED_VIAL" => self.red_vial,
            "EXISTE_CICLOVIA" => self.existe_ciclovia,
            "CONDICION_CLIMATICA" => self.condicion_climatica,
            "ZONIFICACION" => self.zonificacion,
            "CARACTERISTICAS_DE_VIA" => self.caracteristicas_de_via,
            "PERFIL_LONGITUDINAL_VIA" => self.perfil_longitudinal_via,
            "SUPERFICIE_DE_CALZADA" => self.superficie_de_calzada,
            "SENALIZACION" => self.senalizacion,
            "DIA_DE_LA_SEMANA" => self.dia_de_la_semana,
            "MES" => self.mes,
            "PERIODO_DEL_DIA" => self.periodo_del_dia,
            "FERIADO" => self.feriado,
            "ACCIDENTE" => self.accidente,
            _ => return None,
        };
        Some(v)
    }

    /// Build a record from a column -> value map holding every numeric column
    pub fn from_values(
        values: &HashMap<String, i64>,
        fecha_siniestro: NaiveDate,
        fecha_ingreso: NaiveDate,
    ) -> crate::error::Result<Self> {
        let get = |column: &str| {
            values.get(column).copied().ok_or_else(|| {
                crate::error::AppError::MissingFields {
                    fields: vec![column.to_string()],
                }
            })
        };

        Ok(Self {
            id: 0,
            hora_siniestro: get("HORA_SINIESTRO")?,
            clase_siniestro: get("CLASE_SINIESTRO")?,
            cantidad_de_vehiculos_danados: get("CANTIDAD_DE_VEHICULOS_DANADOS")?,
            distrito: get("DISTRITO")?,
            zona: get("ZONA")?,
            tipo_de_via: get("TIPO_DE_VIA")?,
            red_vial: get("RED_VIAL")?,
            existe_ciclovia: get("EXISTE_CICLOVIA")?,
            condicion_climatica: get("CONDICION_CLIMATICA")?,
            zonificacion: get("ZONIFICACION")?,
            caracteristicas_de_via: get("CARACTERISTICAS_DE_VIA")?,
            perfil_longitudinal_via: get("PERFIL_LONGITUDINAL_VIA")?,
            superficie_de_calzada: get("SUPERFICIE_DE_CALZADA")?,
            senalizacion: get("SENALIZACION")?,
            dia_de_la_semana: get("DIA_DE_LA_SEMANA")?,
            mes: get("MES")?,
            periodo_del_dia: get("PERIODO_DEL_DIA")?,
            feriado: get("FERIADO")?,
            accidente: get(TARGET_COLUMN)?,
            fecha_siniestro,
            fecha_ingreso,
        })
    }

    /// Every column in export order: id, features, target, dates
    pub fn columns() -> Vec<String> {
        let mut columns = vec!["id".to_string()];
        columns.extend(FEATURE_COLUMNS.iter().map(|c| c.to_string()));
        columns.push(TARGET_COLUMN.to_string());
        columns.push(INCIDENT_DATE_COLUMN.to_string());
        columns.push(INGESTION_DATE_COLUMN.to_string());
        columns
    }

    /// Cells matching [`IncidentRecord::columns`]
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![self.id.to_string()];
        for column in FEATURE_COLUMNS.iter().chain(std::iter::once(&TARGET_COLUMN)) {
            cells.push(self.value(column).unwrap_or_default().to_string());
        }
        cells.push(self.fecha_siniestro.format("%Y-%m-%d").to_string());
        cells.push(self.fecha_ingreso.format("%Y-%m-%d").to_string());
        cells
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A record whose features derive from `seed`, labelled `accident`
    pub fn record(seed: i64, accident: i64) -> IncidentRecord {
        let mut values: HashMap<String, i64> = FEATURE_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), (seed + i as i64) % 5))
            .collect();
        values.insert("HORA_SINIESTRO".to_string(), seed % 24);
        values.insert("MES".to_string(), seed % 12 + 1);
        values.insert("DIA_DE_LA_SEMANA".to_string(), seed % 7);
        values.insert(TARGET_COLUMN.to_string(), accident);
        let date = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        IncidentRecord::from_values(&values, date, date).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_lookup_covers_all_columns() {
        let record = fixtures::record(3, 1);
        for column in FEATURE_COLUMNS {
            assert!(record.value(column).is_some(), "{column}");
        }
        assert_eq!(record.value(TARGET_COLUMN), Some(1));
        assert_eq!(record.value(INCIDENT_DATE_COLUMN), None);
    }

    #[test]
    fn test_from_values_reports_missing_column() {
        let values = HashMap::new();
        let date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let err = IncidentRecord::from_values(&values, date, date).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_FIELDS");
    }

    #[test]
    fn test_serde_uses_store_column_names() {
        let record = fixtures::record(5, 0);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["HORA_SINIESTRO"], 5);
        assert_eq!(json["FECHA_SINIESTRO"], "2023-06-01");
        assert!(json.get("id").is_some());
    }

    #[test]
    fn test_cells_align_with_columns() {
        let record = fixtures::record(7, 1);
        assert_eq!(IncidentRecord::columns().len(), record.cells().len());
    }

    #[test]
    fn test_validation_rejects_non_binary_target() {
        let mut record = fixtures::record(1, 1);
        record.accidente = 2;
        assert!(record.validate().is_err());
    }
}

//! Readings and the column schema of the output log.
//!
//! A [`Reading`] is one timestamped, labeled set of named numeric values. The first
//! reading a run persists fixes the [`Schema`]: the sorted union of its field names
//! and the two reserved columns `label` and `timestamp`. Every later row is encoded
//! against that schema under a [`SchemaPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppResult, DaqError};

/// Reserved column holding the device label.
pub const LABEL_COLUMN: &str = "label";

/// Reserved column holding the Unix timestamp in seconds.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Round to the two decimal places stored in the log.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One sample from one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Unix timestamp (seconds) of the moment acquisition began
    pub timestamp: i64,
    /// Label of the originating device
    pub label: String,
    /// Field name to value
    pub values: BTreeMap<String, f64>,
}

impl Reading {
    /// Create a reading without any values yet.
    pub fn new(timestamp: i64, label: impl Into<String>) -> Self {
        Self {
            timestamp,
            label: label.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_value(mut self, field: impl Into<String>, value: f64) -> Self {
        self.insert(field, value);
        self
    }

    /// Set one field.
    pub fn insert(&mut self, field: impl Into<String>, value: f64) {
        self.values.insert(field.into(), value);
    }

    /// All column names this reading provides, sorted.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.push(LABEL_COLUMN.to_string());
        names.push(TIMESTAMP_COLUMN.to_string());
        names.sort();
        names
    }

    /// Text of one column, `None` if the reading has no such field.
    ///
    /// Values are written with exactly two decimals, the precision the log stores.
    pub fn cell(&self, column: &str) -> Option<String> {
        match column {
            LABEL_COLUMN => Some(self.label.clone()),
            TIMESTAMP_COLUMN => Some(self.timestamp.to_string()),
            field => self.values.get(field).map(|v| format!("{:.2}", v)),
        }
    }

    /// Rebuild a reading from one row of a log written with `schema`.
    ///
    /// Empty cells are treated as absent fields.
    pub fn from_record(schema: &Schema, record: &csv::StringRecord) -> AppResult<Self> {
        if record.len() != schema.columns.len() {
            return Err(DaqError::MalformedRow(format!(
                "expected {} cells, found {}",
                schema.columns.len(),
                record.len()
            )));
        }

        let mut label = None;
        let mut timestamp = None;
        let mut values = BTreeMap::new();
        for (column, cell) in schema.columns.iter().zip(record.iter()) {
            match column.as_str() {
                LABEL_COLUMN => label = Some(cell.to_string()),
                TIMESTAMP_COLUMN => {
                    let ts = cell.trim().parse::<i64>().map_err(|e| {
                        DaqError::MalformedRow(format!("bad timestamp '{}': {}", cell, e))
                    })?;
                    timestamp = Some(ts);
                }
                _ if cell.is_empty() => {}
                field => {
                    let value = cell.trim().parse::<f64>().map_err(|e| {
                        DaqError::MalformedRow(format!("bad value '{}' for {}: {}", cell, field, e))
                    })?;
                    values.insert(field.to_string(), value);
                }
            }
        }

        match (label, timestamp) {
            (Some(label), Some(timestamp)) => Ok(Self {
                timestamp,
                label,
                values,
            }),
            _ => Err(DaqError::MalformedRow(
                "row is missing label or timestamp".to_string(),
            )),
        }
    }
}

/// How rows that do not match the header are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPolicy {
    /// Reject any reading whose field set differs from the schema
    #[default]
    Strict,
    /// Accept readings with a subset of the schema's fields, leaving gaps empty
    Lenient,
}

/// Column layout of the output log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    /// Schema fixed by the first persisted reading.
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            columns: reading.field_names(),
        }
    }

    /// Schema recovered from an existing header line.
    pub fn from_header(header: &csv::StringRecord) -> AppResult<Self> {
        let columns: Vec<String> = header.iter().map(|c| c.trim().to_string()).collect();
        for reserved in [LABEL_COLUMN, TIMESTAMP_COLUMN] {
            if !columns.iter().any(|c| c == reserved) {
                return Err(DaqError::MalformedRow(format!(
                    "header [{}] has no '{}' column",
                    columns.join(","),
                    reserved
                )));
            }
        }
        let mut sorted = columns.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != columns.len() {
            return Err(DaqError::MalformedRow(format!(
                "header [{}] repeats a column",
                columns.join(",")
            )));
        }
        Ok(Self { columns })
    }

    /// Column names in file order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Encode a reading as row cells, or explain why it does not fit.
    pub fn encode(&self, reading: &Reading, policy: SchemaPolicy) -> AppResult<Vec<String>> {
        let fits = match policy {
            SchemaPolicy::Strict => {
                reading.values.len() + 2 == self.columns.len()
                    && reading.values.keys().all(|k| self.columns.contains(k))
            }
            SchemaPolicy::Lenient => reading.values.keys().all(|k| self.columns.contains(k)),
        };
        if !fits {
            return Err(DaqError::SchemaMismatch {
                label: reading.label.clone(),
                expected: self.columns.join(","),
                found: reading.field_names().join(","),
            });
        }

        Ok(self
            .columns
            .iter()
            .map(|column| reading.cell(column).unwrap_or_default())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(ts: i64, label: &str, lux: f64) -> Reading {
        Reading::new(ts, label).with_value("light", lux)
    }

    #[test]
    fn rounds_to_two_places() {
        assert_eq!(round2(123.456), 123.46);
        assert_eq!(round2(-0.004), -0.0);
        assert_eq!(round2(7.0), 7.0);
    }

    #[test]
    fn schema_is_sorted_field_set_of_first_reading() {
        let schema = Schema::from_reading(&light(99, "x", 123.45));
        assert_eq!(schema.columns(), &["label", "light", "timestamp"]);
    }

    #[test]
    fn encodes_cells_in_schema_order() {
        let reading = light(99, "x", 123.45);
        let schema = Schema::from_reading(&reading);
        let cells = schema.encode(&reading, SchemaPolicy::Strict).unwrap();
        assert_eq!(cells, vec!["x", "123.45", "99"]);
    }

    #[test]
    fn values_are_written_with_two_decimals() {
        let reading = light(104, "x", 2.0).with_value("battery", 87.456);
        assert_eq!(reading.cell("light").as_deref(), Some("2.00"));
        assert_eq!(reading.cell("battery").as_deref(), Some("87.46"));
        assert_eq!(reading.cell("timestamp").as_deref(), Some("104"));
        assert_eq!(reading.cell("humidity"), None);
    }

    #[test]
    fn strict_rejects_missing_and_extra_fields() {
        let schema = Schema::from_reading(&light(0, "x", 1.0).with_value("battery", 90.0));
        let missing = light(5, "x", 2.0);
        let extra = light(5, "x", 2.0).with_value("battery", 1.0).with_value("humidity", 3.0);

        assert!(matches!(
            schema.encode(&missing, SchemaPolicy::Strict),
            Err(DaqError::SchemaMismatch { .. })
        ));
        assert!(schema.encode(&extra, SchemaPolicy::Strict).is_err());
    }

    #[test]
    fn lenient_fills_gaps_but_rejects_extras() {
        let schema = Schema::from_reading(&light(0, "x", 1.0).with_value("battery", 90.0));
        let missing = light(5, "y", 2.0);
        let cells = schema.encode(&missing, SchemaPolicy::Lenient).unwrap();
        assert_eq!(cells, vec!["", "y", "2.00", "5"]);

        let extra = light(5, "x", 2.0).with_value("humidity", 3.0);
        assert!(schema.encode(&extra, SchemaPolicy::Lenient).is_err());
    }

    #[test]
    fn header_must_carry_reserved_columns() {
        let header = csv::StringRecord::from(vec!["light", "timestamp"]);
        assert!(Schema::from_header(&header).is_err());

        let header = csv::StringRecord::from(vec!["label", "light", "light", "timestamp"]);
        assert!(Schema::from_header(&header).is_err());

        let header = csv::StringRecord::from(vec!["label", "light", "timestamp"]);
        assert_eq!(Schema::from_header(&header).unwrap().columns().len(), 3);
    }

    #[test]
    fn record_round_trip_keeps_values_and_timestamp() {
        let reading = Reading::new(1_700_000_004, "b")
            .with_value("light", round2(512.3349))
            .with_value("humidity", 40.1);
        let schema = Schema::from_reading(&reading);
        let record = csv::StringRecord::from(schema.encode(&reading, SchemaPolicy::Strict).unwrap());

        let parsed = Reading::from_record(&schema, &record).unwrap();
        assert_eq!(parsed, reading);
    }

    #[test]
    fn record_with_bad_number_is_malformed() {
        let schema = Schema::from_reading(&light(0, "x", 1.0));
        let record = csv::StringRecord::from(vec!["x", "bright", "5"]);
        assert!(matches!(
            Reading::from_record(&schema, &record),
            Err(DaqError::MalformedRow(_))
        ));
    }
}

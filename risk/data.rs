//! # Upload Loading and Validation Module
//!
//! This module is the exclusive entry point for user-provided tables. It reads
//! a comma-separated upload with a header row, and turns the columns the
//! pipeline needs into `ndarray` structures or typed prior-result rows.
//!
//! - Schema-driven: feature columns are dictated by the model's
//!   [`FeatureSchema`]; everything else is either a reserved column
//!   (`Patient_ID`, `Risk_Score`, ...) or an ignored extra.
//! - User-centric errors: failures are assumed to be user-input errors, and
//!   `DataError` names the offending column so the message is actionable.

use crate::types::{
    FeatureMatrix, FeatureSchema, PATIENT_ID_COLUMN, PriorScore, RISK_GROUP_COLUMN,
    RISK_SCORE_COLUMN, SURVIVAL_RATE_COLUMN, UPDATED_COLUMN, is_reserved_column,
};
use ahash::AHashSet;
use ndarray::{Array2, ShapeBuilder};
use polars::prelude::*;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all upload parsing and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The uploaded file contains a header but no data rows.")]
    EmptyTable,
    #[error("The column '{0}' was not found in the uploaded file.")]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or empty values were found in the column '{0}'. Every required cell must be filled in."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. All values must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Row {row} has a Risk_Score of {value}, which is outside the range [0, 1].")]
    ScoreOutOfRange { row: usize, value: f64 },
    #[error("The column '{0}' appears more than once in the header. Column names must be unique.")]
    DuplicateColumn(String),
    #[error("Could not assemble the feature matrix: {0}")]
    InconsistentShape(String),
}

/// Result of comparing the uploaded header against the feature schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaAlignment {
    /// Required features absent from the upload, in schema order.
    pub missing: Vec<String>,
    /// Uploaded columns that are neither features nor reserved, in upload order.
    pub extra: Vec<String>,
}

impl SchemaAlignment {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Computes `required − present` and `present − required`.
///
/// Reserved columns never count as extras, and the order of the upload's
/// columns is irrelevant to the result.
pub fn align_columns(schema: &FeatureSchema, present: &[String]) -> SchemaAlignment {
    let present_set: AHashSet<&str> = present.iter().map(String::as_str).collect();
    let required_set: AHashSet<&str> = schema.names().iter().map(String::as_str).collect();

    let missing = schema
        .names()
        .iter()
        .filter(|name| !present_set.contains(name.as_str()))
        .cloned()
        .collect();

    let mut seen = AHashSet::with_capacity(present.len());
    let extra = present
        .iter()
        .filter(|name| !required_set.contains(name.as_str()) && !is_reserved_column(name))
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect();

    SchemaAlignment { missing, extra }
}

/// A parsed upload. Columns are kept as read; conversion happens on demand.
#[derive(Debug, Clone)]
pub struct UploadedTable {
    frame: DataFrame,
}

impl UploadedTable {
    /// Reads an upload from disk.
    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        log::info!("Loading uploaded data from '{}'", path.display());
        let frame = CsvReader::new(File::open(path)?)
            .with_options(read_options())
            .finish()?;
        Self::from_frame(frame)
    }

    /// Parses an upload held in memory, e.g. the body of a file-upload request.
    pub fn from_csv_str(content: &str) -> Result<Self, DataError> {
        let frame = CsvReader::new(Cursor::new(content.as_bytes().to_vec()))
            .with_options(read_options())
            .finish()?;
        Self::from_frame(frame)
    }

    fn from_frame(frame: DataFrame) -> Result<Self, DataError> {
        if let Some(name) = duplicated_header(&frame) {
            return Err(DataError::DuplicateColumn(name));
        }
        if frame.height() == 0 {
            return Err(DataError::EmptyTable);
        }
        log::debug!(
            "Parsed upload with {} rows and {} columns",
            frame.height(),
            frame.width()
        );
        Ok(Self { frame })
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_names().iter().any(|c| c.as_str() == name)
    }

    /// True when the upload already carries both a score and a group, i.e. it
    /// is a previous export that should be displayed without rescoring.
    pub fn is_prescored(&self) -> bool {
        self.has_column(RISK_SCORE_COLUMN) && self.has_column(RISK_GROUP_COLUMN)
    }

    /// Extracts the schema's columns, in schema order, as a dense matrix.
    ///
    /// Callers are expected to have checked [`align_columns`] first; a missing
    /// feature here surfaces as [`DataError::ColumnNotFound`].
    pub fn feature_matrix(&self, schema: &FeatureSchema) -> Result<FeatureMatrix, DataError> {
        let n = self.frame.height();
        let k = schema.len();
        let mut buffer = Vec::with_capacity(n * k);
        for name in schema.names() {
            if !self.has_column(name) {
                return Err(DataError::ColumnNotFound(name.clone()));
            }
            let mut column = extract_numeric_column(&self.frame, name)?;
            buffer.append(&mut column);
        }

        let values = Array2::from_shape_vec((n, k).f(), buffer)
            .map_err(|err| DataError::InconsistentShape(err.to_string()))?;

        Ok(FeatureMatrix {
            patient_ids: self.patient_ids()?,
            values,
        })
    }

    /// Reads the rows of a previous export.
    pub fn prior_scores(&self) -> Result<Vec<PriorScore>, DataError> {
        let scores = extract_numeric_column(&self.frame, RISK_SCORE_COLUMN)?;
        for (row, &value) in scores.iter().enumerate() {
            if !(0.0..=1.0).contains(&value) {
                return Err(DataError::ScoreOutOfRange {
                    row: row + 1,
                    value,
                });
            }
        }

        let groups = extract_text_column(&self.frame, RISK_GROUP_COLUMN)?;
        if groups.iter().any(Option::is_none) {
            return Err(DataError::MissingValuesFound(RISK_GROUP_COLUMN.to_string()));
        }

        let survival = if self.has_column(SURVIVAL_RATE_COLUMN) {
            extract_percentage_column(&self.frame, SURVIVAL_RATE_COLUMN)?
        } else {
            vec![None; scores.len()]
        };
        let updated = if self.has_column(UPDATED_COLUMN) {
            extract_text_column(&self.frame, UPDATED_COLUMN)?
        } else {
            vec![None; scores.len()]
        };
        let ids = self
            .patient_ids()?
            .unwrap_or_else(|| vec![None; scores.len()]);

        let rows = scores
            .into_iter()
            .zip(groups)
            .zip(survival)
            .zip(updated)
            .zip(ids)
            .map(
                |((((risk_score, group), survival_rate), updated), patient_id)| PriorScore {
                    patient_id,
                    risk_score,
                    risk_group: group.unwrap_or_default(),
                    survival_rate,
                    updated,
                },
            )
            .collect();
        Ok(rows)
    }

    fn patient_ids(&self) -> Result<Option<Vec<Option<String>>>, DataError> {
        if !self.has_column(PATIENT_ID_COLUMN) {
            return Ok(None);
        }
        Ok(Some(extract_text_column(&self.frame, PATIENT_ID_COLUMN)?))
    }
}

/// Column types are inferred from every row, so an integer-looking column
/// with a decimal far down still reads as numeric.
fn read_options() -> CsvReadOptions {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(CsvParseOptions::default().with_separator(b','))
}

/// Polars renames a repeated header `G1` to `G1_duplicated_0`; returns `G1`.
fn duplicated_header(frame: &DataFrame) -> Option<String> {
    let names = frame.get_column_names();
    names.iter().find_map(|name| {
        let (base, _) = name.as_str().split_once("_duplicated_")?;
        names
            .iter()
            .any(|other| other.as_str() == base)
            .then(|| base.to_string())
    })
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };

    // Non-strict casts turn unparseable text into nulls.
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

/// Reads a column as trimmed text; blank cells become `None`.
fn extract_text_column(
    df: &DataFrame,
    column_name: &str,
) -> Result<Vec<Option<String>>, DataError> {
    let casted = df.column(column_name)?.cast(&DataType::String)?;
    let values = casted
        .str()?
        .into_iter()
        .map(|cell| {
            cell.map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .collect();
    Ok(values)
}

/// Reads a percentage column that may hold plain numbers (`85.2`) or
/// display strings (`85%`).
fn extract_percentage_column(
    df: &DataFrame,
    column_name: &str,
) -> Result<Vec<Option<f64>>, DataError> {
    extract_text_column(df, column_name)?
        .into_iter()
        .map(|cell| match cell {
            None => Ok(None),
            Some(text) => {
                let numeric = text.trim_end_matches('%').trim();
                match numeric.parse::<f64>() {
                    Ok(value) if value.is_finite() => Ok(Some(value)),
                    Ok(_) => Err(DataError::NonFiniteValuesFound(column_name.to_string())),
                    Err(_) => Err(DataError::ColumnWrongType {
                        column_name: column_name.to_string(),
                        expected_type: "percentage",
                        found_type: format!("text '{text}'"),
                    }),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn schema(names: &[&str]) -> FeatureSchema {
        FeatureSchema::try_new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn alignment_reports_both_directions() {
        let schema = schema(&["A", "B", "C"]);
        let alignment = align_columns(&schema, &names(&["B", "D", "A", "Patient_ID"]));
        assert_eq!(alignment.missing, vec!["C".to_string()]);
        assert_eq!(alignment.extra, vec!["D".to_string()]);
        assert!(!alignment.is_complete());
    }

    #[test]
    fn alignment_ignores_column_order() {
        let schema = schema(&["A", "B", "C"]);
        let forward = align_columns(&schema, &names(&["A", "B", "C"]));
        let shuffled = align_columns(&schema, &names(&["C", "A", "B"]));
        assert_eq!(forward, shuffled);
        assert!(forward.is_complete());
        assert!(forward.extra.is_empty());
    }

    #[test]
    fn feature_matrix_follows_schema_order() {
        let table = UploadedTable::from_csv_str("G2,extra,G1\n5,9,10\n6,9,0\n").unwrap();
        let matrix = table.feature_matrix(&schema(&["G1", "G2"])).unwrap();
        assert_eq!(matrix.values.shape(), &[2, 2]);
        assert_abs_diff_eq!(matrix.values[[0, 0]], 10.0);
        assert_abs_diff_eq!(matrix.values[[0, 1]], 5.0);
        assert_abs_diff_eq!(matrix.values[[1, 0]], 0.0);
        assert_abs_diff_eq!(matrix.values[[1, 1]], 6.0);
        assert!(matrix.patient_ids.is_none());
    }

    #[test]
    fn patient_ids_are_read_when_present() {
        let table = UploadedTable::from_csv_str("Patient_ID,G1\nP-1,1.5\n,2.5\n").unwrap();
        let matrix = table.feature_matrix(&schema(&["G1"])).unwrap();
        assert_eq!(
            matrix.patient_ids,
            Some(vec![Some("P-1".to_string()), None])
        );
    }

    #[test]
    fn header_only_upload_is_rejected() {
        let err = UploadedTable::from_csv_str("G1,G2\n").unwrap_err();
        assert!(matches!(err, DataError::EmptyTable), "got {err:?}");
    }

    #[test]
    fn non_numeric_feature_is_rejected() {
        let table = UploadedTable::from_csv_str("G1,G2\n1.0,abc\n2.0,3.0\n").unwrap();
        match table.feature_matrix(&schema(&["G1", "G2"])).unwrap_err() {
            DataError::ColumnWrongType { column_name, .. } => assert_eq!(column_name, "G2"),
            other => panic!("Expected ColumnWrongType(G2), got {other:?}"),
        }
    }

    #[test]
    fn blank_feature_cell_is_rejected() {
        let table = UploadedTable::from_csv_str("G1,G2\n1.0,\n2.0,3.0\n").unwrap();
        match table.feature_matrix(&schema(&["G1", "G2"])).unwrap_err() {
            DataError::MissingValuesFound(col) => assert_eq!(col, "G2"),
            other => panic!("Expected MissingValuesFound(G2), got {other:?}"),
        }
    }

    #[test]
    fn late_decimal_after_many_integer_rows_still_parses() {
        let mut content = String::from("G1,G2\n");
        for i in 0..150 {
            content.push_str(&format!("{},1\n", i % 7));
        }
        content.push_str("3.5,2\n");
        let table = UploadedTable::from_csv_str(&content).unwrap();
        let matrix = table.feature_matrix(&schema(&["G1", "G2"])).unwrap();
        assert_eq!(matrix.values.nrows(), 151);
        assert_abs_diff_eq!(matrix.values[[150, 0]], 3.5);
        assert_abs_diff_eq!(matrix.values[[149, 0]], 2.0);
    }

    #[test]
    fn repeated_header_is_rejected() {
        match UploadedTable::from_csv_str("G1,G2,G1\n1,2,3\n").unwrap_err() {
            DataError::DuplicateColumn(col) => assert_eq!(col, "G1"),
            other => panic!("Expected DuplicateColumn(G1), got {other:?}"),
        }
    }

    #[test]
    fn prescored_upload_is_detected_and_read() {
        let content = "Patient_ID,Risk_Score,Risk_Group,Survival_Rate,Updated\n\
MM-001,0.125,Low Risk,87%,2025-01-02\n\
MM-002,0.9,Very High Risk,,2025-01-02\n";
        let table = UploadedTable::from_csv_str(content).unwrap();
        assert!(table.is_prescored());

        let rows = table.prior_scores().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].patient_id.as_deref(), Some("MM-001"));
        assert_abs_diff_eq!(rows[0].risk_score, 0.125);
        assert_eq!(rows[0].risk_group, "Low Risk");
        assert_eq!(rows[0].survival_rate, Some(87.0));
        assert_eq!(rows[0].updated.as_deref(), Some("2025-01-02"));
        assert_eq!(rows[1].survival_rate, None);
    }

    #[test]
    fn prescored_score_outside_unit_interval_is_rejected() {
        let table =
            UploadedTable::from_csv_str("Risk_Score,Risk_Group\n0.5,Low Risk\n1.5,High Risk\n")
                .unwrap();
        match table.prior_scores().unwrap_err() {
            DataError::ScoreOutOfRange { row, value } => {
                assert_eq!(row, 2);
                assert_abs_diff_eq!(value, 1.5);
            }
            other => panic!("Expected ScoreOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn upload_can_be_read_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "G1,G2\n1,2\n3,4").unwrap();
        file.flush().unwrap();

        let table = UploadedTable::from_path(file.path()).unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.column_names(), vec!["G1".to_string(), "G2".to_string()]);
        assert!(!table.is_prescored());
    }
}

// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ahash::AHashSet;
use ndarray::Array2;
use std::fmt;

pub const PATIENT_ID_COLUMN: &str = "Patient_ID";
pub const RISK_SCORE_COLUMN: &str = "Risk_Score";
pub const RISK_GROUP_COLUMN: &str = "Risk_Group";
pub const SURVIVAL_RATE_COLUMN: &str = "Survival_Rate";
pub const UPDATED_COLUMN: &str = "Updated";

/// Columns that carry identity or prior results rather than model features.
/// They are never reported as unexpected extras during schema alignment.
pub const RESERVED_COLUMNS: [&str; 5] = [
    PATIENT_ID_COLUMN,
    RISK_SCORE_COLUMN,
    RISK_GROUP_COLUMN,
    SURVIVAL_RATE_COLUMN,
    UPDATED_COLUMN,
];

pub fn is_reserved_column(name: &str) -> bool {
    RESERVED_COLUMNS.contains(&name)
}

/// The fixed, ordered list of feature columns the model consumes.
///
/// The order is the contract with the classifier: column `j` of every feature
/// matrix handed to the model is `names()[j]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    /// Builds a schema, rejecting empty lists and duplicate names.
    /// On failure the error carries a description of the offending entry.
    pub fn try_new(names: Vec<String>) -> Result<Self, String> {
        if names.is_empty() {
            return Err("feature list is empty".to_string());
        }
        let mut seen = AHashSet::with_capacity(names.len());
        for name in &names {
            if name.trim().is_empty() {
                return Err("feature list contains a blank name".to_string());
            }
            if !seen.insert(name.as_str()) {
                return Err(format!("feature '{name}' is listed more than once"));
            }
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} features", self.names.len())
    }
}

/// Feature values for one upload, already restricted to the schema's columns
/// and laid out in schema order. Shape: `[n_rows, schema.len()]`.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Identifiers from an uploaded `Patient_ID` column. `None` entries (or a
    /// `None` column) are filled with generated identifiers at assembly.
    pub patient_ids: Option<Vec<Option<String>>>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }
}

/// A row of previously exported results, carried through without rescoring.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorScore {
    pub patient_id: Option<String>,
    pub risk_score: f64,
    pub risk_group: String,
    pub survival_rate: Option<f64>,
    pub updated: Option<String>,
}

/// An upload resolved at ingestion: either raw features that must be scored,
/// or rows that already carry a score and group.
#[derive(Debug, Clone)]
pub enum Input {
    Raw(FeatureMatrix),
    PreScored(Vec<PriorScore>),
}

impl Input {
    pub fn n_rows(&self) -> usize {
        match self {
            Input::Raw(matrix) => matrix.n_rows(),
            Input::PreScored(rows) => rows.len(),
        }
    }
}

/// Where the score of a result row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Computed,
    PassedThrough,
}

/// One output row: identity, score, group and survival percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub patient_id: String,
    /// Probability of death within the study horizon, in [0, 1].
    pub risk_score: f64,
    pub risk_group: String,
    /// Survival percentage in [0, 100].
    pub survival_rate: f64,
    pub updated: Option<String>,
    pub source: ScoreSource,
}

/// Survival percentage implied by a death probability.
#[inline]
pub fn survival_rate_from_score(risk_score: f64) -> f64 {
    (1.0 - risk_score) * 100.0
}

/// Generated identifier for the 1-based row `seq`, e.g. `MM-007`.
pub fn generated_patient_id(prefix: &str, seq: usize) -> String {
    if prefix.is_empty() {
        format!("{seq:03}")
    } else {
        format!("{prefix}-{seq:03}")
    }
}

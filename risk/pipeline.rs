//! # Risk Scoring Pipeline
//!
//! One call to [`RiskPipeline::run_prediction`] handles one upload:
//!
//! 1. Ingestion resolves the upload once into [`Input::Raw`] features or
//!    [`Input::PreScored`] rows from an earlier export.
//! 2. Raw features are aligned to the schema, standardized against the batch
//!    and passed to the model's probability interface.
//! 3. Scores are stratified with the configured policy and assembled into one
//!    [`ScoredResult`] per input row, in input order.
//!
//! The model and schema are injected at construction and shared read-only, so
//! a long-lived process loads them once and serves any number of uploads.

use crate::config::{ConfigError, PipelineConfig};
use crate::data::{DataError, SchemaAlignment, UploadedTable, align_columns};
use crate::model::{LoadedModel, ModelOutputError, RiskModel};
use crate::scaling::standardize_batch;
use crate::stratify::{BinningMethod, StratifyError};
use crate::types::{
    FeatureMatrix, FeatureSchema, Input, PriorScore, ScoreSource, ScoredResult,
    generated_patient_id, survival_rate_from_score,
};
use chrono::{Local, NaiveDate};
use ndarray::Array1;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(
        "The upload is missing {count} of the {required} required features: {}",
        missing_list(.sample, .count)
    )]
    SchemaMismatch {
        count: usize,
        required: usize,
        /// The first missing names in schema order, truncated to the configured limit.
        sample: Vec<String>,
    },
    #[error("Could not read the uploaded data: {0}")]
    Parse(#[from] DataError),
    #[error("The model produced unusable output: {0}")]
    ModelOutput(#[from] ModelOutputError),
    #[error("Risk stratification failed: {0}")]
    Stratify(#[from] StratifyError),
    #[error("Invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("The model expects {model} features but the schema lists {schema}.")]
    ModelSchemaMismatch { model: usize, schema: usize },
}

fn missing_list(sample: &[String], count: &usize) -> String {
    let mut list = sample.join(", ");
    if *count > sample.len() {
        list.push_str(", ...");
    }
    list
}

/// An upload after ingestion, together with what alignment found.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub input: Input,
    pub alignment: SchemaAlignment,
}

/// Everything produced for one upload.
#[derive(Debug, Clone)]
pub struct PredictionReport {
    /// One entry per input row, in input order.
    pub results: Vec<ScoredResult>,
    /// Uploaded columns that were ignored.
    pub extra_columns: Vec<String>,
    /// `None` when every row was passed through from a previous export.
    pub binning: Option<BinningMethod>,
    /// The configured labels, lowest risk first.
    pub labels: Vec<String>,
}

impl PredictionReport {
    pub fn used_fallback_binning(&self) -> bool {
        self.binning == Some(BinningMethod::EqualWidthFallback)
    }
}

pub struct RiskPipeline<M: RiskModel + ?Sized> {
    model: Arc<M>,
    schema: Arc<FeatureSchema>,
    config: PipelineConfig,
}

impl<M: RiskModel + ?Sized> RiskPipeline<M> {
    /// Wires a model, its schema and a configuration together. Fails if the
    /// configuration is invalid or the model and schema disagree in width.
    pub fn new(
        model: Arc<M>,
        schema: Arc<FeatureSchema>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if model.n_features() != schema.len() {
            return Err(PipelineError::ModelSchemaMismatch {
                model: model.n_features(),
                schema: schema.len(),
            });
        }
        Ok(Self {
            model,
            schema,
            config,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolves an upload into raw features or pre-scored rows.
    ///
    /// An upload carrying both `Risk_Score` and `Risk_Group` is a previous
    /// export and skips feature validation. Otherwise every schema feature
    /// must be present; extras are reported and dropped.
    pub fn ingest(&self, table: &UploadedTable) -> Result<Ingested, PipelineError> {
        if table.is_prescored() {
            log::info!(
                "Upload already carries risk scores; {} rows will be passed through",
                table.height()
            );
            return Ok(Ingested {
                input: Input::PreScored(table.prior_scores()?),
                alignment: SchemaAlignment::default(),
            });
        }

        let alignment = align_columns(&self.schema, &table.column_names());
        if !alignment.is_complete() {
            let sample = alignment
                .missing
                .iter()
                .take(self.config.missing_sample_limit)
                .cloned()
                .collect();
            log::warn!(
                "Rejecting upload: {} of {} required features are missing",
                alignment.missing.len(),
                self.schema.len()
            );
            return Err(PipelineError::SchemaMismatch {
                count: alignment.missing.len(),
                required: self.schema.len(),
                sample,
            });
        }
        if !alignment.extra.is_empty() {
            log::warn!(
                "Ignoring {} column(s) not used by the model: {}",
                alignment.extra.len(),
                alignment.extra.join(", ")
            );
        }

        let matrix = table.feature_matrix(&self.schema)?;
        Ok(Ingested {
            input: Input::Raw(matrix),
            alignment,
        })
    }

    /// Standardizes the batch and returns the positive-class probability of
    /// each row.
    pub fn score(&self, matrix: &FeatureMatrix) -> Result<Array1<f64>, PipelineError> {
        let scaled = standardize_batch(matrix.values.view());
        let proba = self.model.predict_proba(scaled.view())?;

        let rows = matrix.n_rows();
        if proba.nrows() != rows || proba.ncols() != 2 {
            return Err(ModelOutputError::WrongShape {
                found_rows: proba.nrows(),
                found_cols: proba.ncols(),
                expected_rows: rows,
            }
            .into());
        }

        let scores = proba.column(1).to_owned();
        if let Some((row, &value)) = scores
            .iter()
            .enumerate()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(ModelOutputError::ProbabilityOutOfRange {
                row: row + 1,
                value,
            }
            .into());
        }
        Ok(scores)
    }

    /// Scores one upload, stamping results with today's local date.
    pub fn run_prediction(&self, table: &UploadedTable) -> Result<PredictionReport, PipelineError> {
        self.run_prediction_on(table, Local::now().date_naive())
    }

    /// Scores one upload, stamping results with `assessed_on`.
    pub fn run_prediction_on(
        &self,
        table: &UploadedTable,
        assessed_on: NaiveDate,
    ) -> Result<PredictionReport, PipelineError> {
        let Ingested { input, alignment } = self.ingest(table)?;
        let stamp = self
            .config
            .include_updated
            .then(|| assessed_on.format("%Y-%m-%d").to_string());

        let (results, binning) = match input {
            Input::Raw(matrix) => {
                let (results, method) = self.assemble_scored(&matrix, stamp)?;
                (results, Some(method))
            }
            Input::PreScored(rows) => (self.assemble_passthrough(rows, stamp), None),
        };

        if let Some(method) = binning {
            log::info!(
                "Scored {} patients; groups assigned by {}",
                results.len(),
                method.describe()
            );
        }

        Ok(PredictionReport {
            results,
            extra_columns: alignment.extra,
            binning,
            labels: self.config.stratification.labels().to_vec(),
        })
    }

    fn assemble_scored(
        &self,
        matrix: &FeatureMatrix,
        stamp: Option<String>,
    ) -> Result<(Vec<ScoredResult>, BinningMethod), PipelineError> {
        let scores = self.score(matrix)?;
        let scores = scores.to_vec();
        let (groups, method) = self.config.stratification.assign_labels(&scores)?;

        let results = scores
            .into_iter()
            .zip(groups)
            .enumerate()
            .map(|(i, (risk_score, risk_group))| ScoredResult {
                patient_id: self.patient_id(matrix.patient_ids.as_ref(), i),
                risk_score,
                risk_group,
                survival_rate: survival_rate_from_score(risk_score),
                updated: stamp.clone(),
                source: ScoreSource::Computed,
            })
            .collect();
        Ok((results, method))
    }

    fn assemble_passthrough(
        &self,
        rows: Vec<PriorScore>,
        stamp: Option<String>,
    ) -> Vec<ScoredResult> {
        rows.into_iter()
            .enumerate()
            .map(|(i, row)| ScoredResult {
                patient_id: row
                    .patient_id
                    .unwrap_or_else(|| generated_patient_id(&self.config.patient_id_prefix, i + 1)),
                risk_score: row.risk_score,
                survival_rate: row
                    .survival_rate
                    .unwrap_or_else(|| survival_rate_from_score(row.risk_score)),
                risk_group: row.risk_group,
                updated: row.updated.or_else(|| stamp.clone()),
                source: ScoreSource::PassedThrough,
            })
            .collect()
    }

    fn patient_id(&self, ids: Option<&Vec<Option<String>>>, row: usize) -> String {
        ids.and_then(|ids| ids.get(row).cloned().flatten())
            .unwrap_or_else(|| generated_patient_id(&self.config.patient_id_prefix, row + 1))
    }
}

impl RiskPipeline<LoadedModel> {
    /// Builds a pipeline around a loaded artifact, using the artifact's own
    /// feature list as the schema.
    pub fn from_artifact(model: LoadedModel, config: PipelineConfig) -> Result<Self, PipelineError> {
        let schema = Arc::new(model.schema().clone());
        Self::new(Arc::new(model), schema, config)
    }
}

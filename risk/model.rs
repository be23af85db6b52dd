use crate::types::FeatureSchema;
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of the model artifact when
// serialized to a TOML file.

/// A binary classifier seen through its probability interface.
///
/// Implementations receive a standardized matrix whose columns follow the
/// feature schema and return one row per sample with the probabilities of the
/// negative (column 0) and positive (column 1) class.
pub trait RiskModel: Send + Sync {
    /// Number of feature columns the model was trained on.
    fn n_features(&self) -> usize;

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelOutputError>;
}

/// One node of a regression tree stored as a flat array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    /// Samples with `x[feature] < threshold` continue at `left`, all others at `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Walks from the root to a leaf. Validation guarantees that every child
    /// index is larger than its parent's, so the walk terminates.
    fn leaf_value(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn validate(&self, tree_index: usize, n_features: usize) -> Result<(), ModelLoadError> {
        if self.nodes.is_empty() {
            return Err(ModelLoadError::InvalidArtifact(format!(
                "tree {tree_index} has no nodes"
            )));
        }
        for (node_index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(ModelLoadError::InvalidArtifact(format!(
                            "tree {tree_index}, node {node_index}: leaf value is not finite"
                        )));
                    }
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(ModelLoadError::InvalidArtifact(format!(
                            "tree {tree_index}, node {node_index}: feature index {feature} exceeds the {n_features} schema features"
                        )));
                    }
                    if threshold.is_nan() {
                        return Err(ModelLoadError::InvalidArtifact(format!(
                            "tree {tree_index}, node {node_index}: threshold is NaN"
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= node_index || child >= self.nodes.len() {
                            return Err(ModelLoadError::InvalidArtifact(format!(
                                "tree {tree_index}, node {node_index}: child {child} must point forward within {} nodes",
                                self.nodes.len()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// The serialized classifier. Both variants produce a log-odds value that is
/// mapped to a probability with the logistic function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    /// `sigmoid(intercept + x · coefficients)`.
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    /// Gradient-boosted trees: `sigmoid(base_score + Σ tree(x))`.
    TreeEnsemble {
        base_score: f64,
        trees: Vec<RegressionTree>,
    },
}

impl Classifier {
    fn validate(&self, n_features: usize) -> Result<(), ModelLoadError> {
        match self {
            Classifier::Logistic {
                intercept,
                coefficients,
            } => {
                if coefficients.len() != n_features {
                    return Err(ModelLoadError::InvalidArtifact(format!(
                        "logistic model has {} coefficients for {} features",
                        coefficients.len(),
                        n_features
                    )));
                }
                if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
                    return Err(ModelLoadError::InvalidArtifact(
                        "logistic model contains non-finite parameters".to_string(),
                    ));
                }
            }
            Classifier::TreeEnsemble { base_score, trees } => {
                if !base_score.is_finite() {
                    return Err(ModelLoadError::InvalidArtifact(
                        "tree ensemble base_score is not finite".to_string(),
                    ));
                }
                for (tree_index, tree) in trees.iter().enumerate() {
                    tree.validate(tree_index, n_features)?;
                }
            }
        }
        Ok(())
    }

    fn log_odds(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Classifier::Logistic {
                intercept,
                coefficients,
            } => {
                intercept
                    + row
                        .iter()
                        .zip(coefficients)
                        .map(|(x, beta)| x * beta)
                        .sum::<f64>()
            }
            Classifier::TreeEnsemble { base_score, trees } => {
                base_score + trees.iter().map(|tree| tree.leaf_value(row)).sum::<f64>()
            }
        }
    }

    fn n_coefficients(&self) -> Option<usize> {
        match self {
            Classifier::Logistic { coefficients, .. } => Some(coefficients.len()),
            Classifier::TreeEnsemble { .. } => None,
        }
    }
}

/// Maps log-odds to a probability. Inputs are clamped to keep `exp` finite.
fn sigmoid(eta: f64) -> f64 {
    let eta = eta.clamp(-700.0, 700.0);
    1.0 / (1.0 + (-eta).exp())
}

/// The top-level, self-contained model artifact: the ordered feature list and
/// the classifier trained on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub features: Vec<String>,
    pub classifier: Classifier,
}

/// A validated artifact, ready to score. Immutable after loading.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    schema: FeatureSchema,
    classifier: Classifier,
}

/// Failures while reading, writing or validating a model artifact. These are
/// fatal at startup.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Model artifact is invalid: {0}")]
    InvalidArtifact(String),
}

/// Failures of a single inference call. These end the current request only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelOutputError {
    #[error("Feature matrix has {found} columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error(
        "Model returned a probability matrix of shape ({found_rows}, {found_cols}); expected ({expected_rows}, 2)."
    )]
    WrongShape {
        found_rows: usize,
        found_cols: usize,
        expected_rows: usize,
    },
    #[error("Model returned risk score {value} for row {row}, which is outside [0, 1].")]
    ProbabilityOutOfRange { row: usize, value: f64 },
}

impl ModelArtifact {
    /// Checks the feature list and the classifier against each other and
    /// produces the immutable scoring model.
    pub fn into_model(self) -> Result<LoadedModel, ModelLoadError> {
        let schema =
            FeatureSchema::try_new(self.features).map_err(ModelLoadError::InvalidArtifact)?;
        self.classifier.validate(schema.len())?;
        Ok(LoadedModel {
            schema,
            classifier: self.classifier,
        })
    }

    /// Saves the artifact to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelLoadError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads an artifact from a TOML file without validating it.
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let toml_string = fs::read_to_string(path)?;
        let artifact = toml::from_str(&toml_string)?;
        Ok(artifact)
    }
}

impl LoadedModel {
    /// Loads and validates a model artifact. Called once per process.
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        log::info!("Loading model artifact from '{}'", path.display());
        let model = ModelArtifact::load(path)?.into_model()?;
        log::info!(
            "Model ready: {} classifier over {}",
            model.kind(),
            model.schema
        );
        Ok(model)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn kind(&self) -> &'static str {
        match self.classifier {
            Classifier::Logistic { .. } => "logistic",
            Classifier::TreeEnsemble { .. } => "tree ensemble",
        }
    }
}

impl RiskModel for LoadedModel {
    fn n_features(&self) -> usize {
        self.classifier
            .n_coefficients()
            .unwrap_or_else(|| self.schema.len())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelOutputError> {
        if x.ncols() != self.n_features() {
            return Err(ModelOutputError::MismatchedFeatureCount {
                found: x.ncols(),
                expected: self.n_features(),
            });
        }
        let mut proba = Array2::zeros((x.nrows(), 2));
        for (i, row) in x.outer_iter().enumerate() {
            let positive = sigmoid(self.classifier.log_odds(row));
            proba[[i, 0]] = 1.0 - positive;
            proba[[i, 1]] = positive;
        }
        Ok(proba)
    }
}

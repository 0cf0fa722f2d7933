use crate::encoding::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of the trained model
// when serialized to a TOML file. The training side exports into this format.

/// Anything that maps a feature vector to an LVEF estimate.
///
/// Implementations must be deterministic and must not mutate state across calls:
/// a single instance is shared read-only between every concurrent request.
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError>;

    /// Short label of the regression technique, for logs and health checks.
    fn technique(&self) -> &'static str;
}

/// Metadata describing what the model consumes and produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name of the predicted quantity.
    #[serde(default = "default_target")]
    pub target: String,
    /// Defines the canonical order of the inputs. Must match `FEATURE_NAMES`
    /// exactly; this is checked at load time.
    pub feature_names: Vec<String>,
}

fn default_target() -> String {
    "lvef".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Ordinary linear regression: `intercept + coefficients . x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

/// How per-tree outputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Bagged ensembles (random forests): `base_score + mean(trees)`.
    #[default]
    Mean,
    /// Boosted ensembles: `base_score + learning_rate * sum(trees)`.
    Sum,
}

/// One node of a regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// Rows with `x[feature] <= threshold` continue at `left`, others at `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: f64 },
}

/// A single regression tree stored as a flat node list; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    #[serde(default)]
    pub base_score: f64,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

fn default_learning_rate() -> f64 {
    1.0
}

/// The regression technique and its fitted parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressorSpec {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

/// The top-level, self-contained, trained model artifact.
/// This is the structure that gets saved to and loaded from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub config: ModelConfig,
    pub regressor: RegressorSpec,
}

/// Custom error type for model loading, saving, and prediction.
///
/// Load-time variants make startup fail. Prediction-time variants
/// (`NonFiniteInput`, `NonFiniteOutput`) are per-request inference failures.
/// `MalformedTree` is raised at load time, or while predicting with a
/// hand-built ensemble that never went through `validate`.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Model was trained on features {found:?}, but this service encodes {expected:?}. Refusing to load a model with a different feature order."
    )]
    FeatureOrderMismatch {
        found: Vec<String>,
        expected: Vec<String>,
    },
    #[error("Linear model has {found} coefficients, but {expected} features are encoded.")]
    CoefficientCount { found: usize, expected: usize },
    #[error("Model parameter '{0}' is not a finite number.")]
    NonFiniteParameter(String),
    #[error("Tree {tree}: {reason}")]
    MalformedTree { tree: usize, reason: String },
    #[error("Feature '{0}' reached the model as a non-finite value.")]
    NonFiniteInput(&'static str),
    #[error("Model produced a non-finite estimate.")]
    NonFiniteOutput,
}

impl ModelError {
    /// True for errors raised while scoring a single request.
    pub fn is_inference_failure(&self) -> bool {
        matches!(
            self,
            ModelError::NonFiniteInput(_) | ModelError::NonFiniteOutput
        )
    }
}

impl TrainedModel {
    /// Builds a linear model with the canonical feature order.
    pub fn linear(intercept: f64, coefficients: [f64; FEATURE_COUNT]) -> Self {
        Self {
            config: ModelConfig::default(),
            regressor: RegressorSpec::Linear(LinearModel {
                intercept,
                coefficients: coefficients.to_vec(),
            }),
        }
    }

    /// Builds a tree ensemble with the canonical feature order.
    pub fn tree_ensemble(ensemble: TreeEnsemble) -> Self {
        Self {
            config: ModelConfig::default(),
            regressor: RegressorSpec::TreeEnsemble(ensemble),
        }
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates a trained model from a TOML file.
    ///
    /// Every structural problem is caught here so that a broken artifact stops
    /// the process at startup instead of failing each request.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ModelError> {
        let model: TrainedModel = toml::from_str(source)?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.config.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(ModelError::FeatureOrderMismatch {
                found: self.config.feature_names.clone(),
                expected: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            });
        }

        match &self.regressor {
            RegressorSpec::Linear(linear) => internal::validate_linear(linear),
            RegressorSpec::TreeEnsemble(ensemble) => internal::validate_ensemble(ensemble),
        }
    }

    /// One-line description for operator logs.
    pub fn summary(&self) -> String {
        match &self.regressor {
            RegressorSpec::Linear(linear) => format!(
                "linear regression (intercept {:.4}, {} coefficients) predicting '{}'",
                linear.intercept,
                linear.coefficients.len(),
                self.config.target
            ),
            RegressorSpec::TreeEnsemble(ensemble) => format!(
                "tree ensemble ({} trees, {} nodes, {:?} aggregation) predicting '{}'",
                ensemble.trees.len(),
                ensemble.trees.iter().map(|t| t.nodes.len()).sum::<usize>(),
                ensemble.aggregation,
                self.config.target
            ),
        }
    }
}

impl Regressor for TrainedModel {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        // --- 1. Validate Inputs ---
        if let Some((name, _)) = features.named().find(|(_, v)| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput(name));
        }

        // --- 2. Evaluate ---
        let estimate = match &self.regressor {
            RegressorSpec::Linear(linear) => {
                if linear.coefficients.len() != FEATURE_COUNT {
                    return Err(ModelError::CoefficientCount {
                        found: linear.coefficients.len(),
                        expected: FEATURE_COUNT,
                    });
                }
                let coefficients = ArrayView1::from(&linear.coefficients[..]);
                linear.intercept + coefficients.dot(&features.view())
            }
            RegressorSpec::TreeEnsemble(ensemble) => {
                internal::evaluate_ensemble(ensemble, features)?
            }
        };

        if !estimate.is_finite() {
            return Err(ModelError::NonFiniteOutput);
        }
        Ok(estimate)
    }

    fn technique(&self) -> &'static str {
        match self.regressor {
            RegressorSpec::Linear(_) => "linear",
            RegressorSpec::TreeEnsemble(_) => "tree_ensemble",
        }
    }
}

/// Internal module for validation and evaluation details.
mod internal {
    use super::*;

    fn finite(value: f64, name: impl Into<String>) -> Result<(), ModelError> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(ModelError::NonFiniteParameter(name.into()))
        }
    }

    pub(super) fn validate_linear(linear: &LinearModel) -> Result<(), ModelError> {
        if linear.coefficients.len() != FEATURE_COUNT {
            return Err(ModelError::CoefficientCount {
                found: linear.coefficients.len(),
                expected: FEATURE_COUNT,
            });
        }
        finite(linear.intercept, "intercept")?;
        for (name, coefficient) in FEATURE_NAMES.iter().zip(&linear.coefficients) {
            finite(*coefficient, format!("coefficients.{name}"))?;
        }
        Ok(())
    }

    pub(super) fn validate_ensemble(ensemble: &TreeEnsemble) -> Result<(), ModelError> {
        finite(ensemble.base_score, "base_score")?;
        finite(ensemble.learning_rate, "learning_rate")?;
        if ensemble.trees.is_empty() {
            return Err(ModelError::MalformedTree {
                tree: 0,
                reason: "ensemble contains no trees".to_string(),
            });
        }

        for (tree_idx, tree) in ensemble.trees.iter().enumerate() {
            let malformed = |reason: String| ModelError::MalformedTree {
                tree: tree_idx,
                reason,
            };
            if tree.nodes.is_empty() {
                return Err(malformed("tree has no nodes".to_string()));
            }
            for (node_idx, node) in tree.nodes.iter().enumerate() {
                match *node {
                    TreeNode::Leaf { value } => {
                        if !value.is_finite() {
                            return Err(malformed(format!("leaf {node_idx} has a non-finite value")));
                        }
                    }
                    TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if feature >= FEATURE_COUNT {
                            return Err(malformed(format!(
                                "node {node_idx} splits on feature {feature}, but only {FEATURE_COUNT} exist"
                            )));
                        }
                        if !threshold.is_finite() {
                            return Err(malformed(format!(
                                "node {node_idx} has a non-finite threshold"
                            )));
                        }
                        // Children must come after their parent. This rules out
                        // cycles, so evaluation always reaches a leaf.
                        for child in [left, right] {
                            if child <= node_idx || child >= tree.nodes.len() {
                                return Err(malformed(format!(
                                    "node {node_idx} points at invalid child {child}"
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Walks one tree from the root. Hand-built models skip `validate`, so
    /// bounds and forward-only child links are checked on every step.
    fn evaluate_tree(
        tree_idx: usize,
        tree: &RegressionTree,
        features: &FeatureVector,
    ) -> Result<f64, ModelError> {
        let malformed = |reason: String| ModelError::MalformedTree {
            tree: tree_idx,
            reason,
        };
        let mut idx = 0;
        loop {
            let node = tree
                .nodes
                .get(idx)
                .ok_or_else(|| malformed(format!("node {idx} does not exist")))?;
            match *node {
                TreeNode::Leaf { value } => return Ok(value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.as_array().get(feature).ok_or_else(|| {
                        malformed(format!("node {idx} splits on unknown feature {feature}"))
                    })?;
                    let child = if *value <= threshold { left } else { right };
                    if child <= idx {
                        return Err(malformed(format!(
                            "node {idx} points back at node {child}"
                        )));
                    }
                    idx = child;
                }
            }
        }
    }

    pub(super) fn evaluate_ensemble(
        ensemble: &TreeEnsemble,
        features: &FeatureVector,
    ) -> Result<f64, ModelError> {
        let mut total = 0.0;
        for (tree_idx, tree) in ensemble.trees.iter().enumerate() {
            total += evaluate_tree(tree_idx, tree, features)?;
        }
        Ok(match ensemble.aggregation {
            Aggregation::Mean => ensemble.base_score + total / ensemble.trees.len() as f64,
            Aggregation::Sum => ensemble.base_score + ensemble.learning_rate * total,
        })
    }
}

//! # Prediction Orchestrator
//!
//! One request runs exactly one pass through this module:
//!
//! 1.  **Validate and encode** the raw fields into a `FeatureVector`. A failure
//!     short-circuits with `PredictionError::InvalidInput`; the model is not
//!     called.
//! 2.  **Invoke** the shared, read-only `Regressor` once.
//! 3.  **Round** the estimate to two decimals, half away from zero.
//! 4.  **Classify** the rounded value into a fixed clinical band.
//!
//! Inference failures are reported as `PredictionError::Inference` and never
//! retried; the model is a pure function, so a retry would fail identically.

use crate::encoding::{self, EncodingRules, FeatureVector, ValidationError};
use crate::model::{ModelError, Regressor};
use crate::observation::RawObservation;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lowest LVEF (inclusive) classified as `Normal`.
pub const NORMAL_LOWER_BOUND: f64 = 55.0;
/// Lowest LVEF (inclusive) classified as `BorderlineReduced`.
pub const BORDERLINE_LOWER_BOUND: f64 = 40.0;

/// Clinical band of an LVEF estimate. Bands are closed below and open above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LvefStatus {
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Borderline Reduced")]
    BorderlineReduced,
    #[serde(rename = "Reduced")]
    Reduced,
}

impl LvefStatus {
    pub fn classify(lvef: f64) -> Self {
        if lvef >= NORMAL_LOWER_BOUND {
            LvefStatus::Normal
        } else if lvef >= BORDERLINE_LOWER_BOUND {
            LvefStatus::BorderlineReduced
        } else {
            LvefStatus::Reduced
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LvefStatus::Normal => "Normal",
            LvefStatus::BorderlineReduced => "Borderline Reduced",
            LvefStatus::Reduced => "Reduced",
        }
    }
}

impl fmt::Display for LvefStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rounds to two decimal places, ties away from zero (`f64::round`).
pub fn round_lvef(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionResult {
    pub lvef: f64,
    pub status: LvefStatus,
}

impl PredictionResult {
    /// Rounds a raw model estimate and derives its band from the rounded value.
    pub fn from_estimate(estimate: f64) -> Self {
        let lvef = round_lvef(estimate);
        Self {
            lvef,
            status: LvefStatus::classify(lvef),
        }
    }
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
    #[error("Inference failed: {0}")]
    Inference(#[from] ModelError),
}

impl PredictionError {
    /// Stable label of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::InvalidInput(_) => "InvalidInput",
            PredictionError::Inference(_) => "InferenceError",
        }
    }

    /// Message safe to hand back to a client.
    ///
    /// Validation messages only ever mention request fields. Model errors are
    /// reduced to a generic sentence unless they describe the request's own
    /// values, so artifact paths and parameters never leave the process.
    pub fn public_message(&self) -> String {
        match self {
            PredictionError::InvalidInput(e) => e.to_string(),
            PredictionError::Inference(e) if e.is_inference_failure() => {
                format!("Prediction could not be computed: {e}")
            }
            PredictionError::Inference(_) => "Prediction could not be computed.".to_string(),
        }
    }
}

/// The request-path handle: the process-scoped model plus the encoding policy.
///
/// Cloning is cheap and every clone shares the same model.
#[derive(Clone)]
pub struct Predictor {
    model: Arc<dyn Regressor>,
    rules: EncodingRules,
}

impl fmt::Debug for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictor")
            .field("model", &self.model.technique())
            .field("rules", &self.rules)
            .finish()
    }
}

impl Predictor {
    pub fn new(model: Arc<dyn Regressor>, rules: EncodingRules) -> Self {
        Self { model, rules }
    }

    pub fn rules(&self) -> &EncodingRules {
        &self.rules
    }

    pub fn technique(&self) -> &'static str {
        self.model.technique()
    }

    /// Validates, encodes, predicts, rounds and classifies one observation.
    pub fn handle_prediction(
        &self,
        raw: &RawObservation,
    ) -> Result<PredictionResult, PredictionError> {
        let features = encoding::encode(raw, &self.rules)?;
        self.predict_features(&features)
    }

    /// The part of `handle_prediction` after encoding.
    pub fn predict_features(
        &self,
        features: &FeatureVector,
    ) -> Result<PredictionResult, PredictionError> {
        let estimate = self.model.predict(features).inspect_err(|e| {
            log::error!("Inference failed for {features:?}: {e}");
        })?;
        let result = PredictionResult::from_estimate(estimate);
        // Scaling for rounding can overflow estimates that were finite.
        if !result.lvef.is_finite() {
            log::error!("Rounding overflowed for estimate {estimate:e} from {features:?}");
            return Err(ModelError::NonFiniteOutput.into());
        }
        log::debug!("Predicted LVEF {:.2} ({})", result.lvef, result.status);
        Ok(result)
    }
}

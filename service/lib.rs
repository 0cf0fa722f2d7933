#![deny(dead_code)]
#![deny(unused_imports)]

// The request path is observation -> encoding -> model -> predictor. Everything
// else (config, http, batch) is plumbing around that path.

pub mod batch;
pub mod config;
pub mod encoding;
pub mod http;
pub mod model;
pub mod observation;
pub mod predictor;

pub use encoding::{FeatureVector, RacePolicy, ValidationError};
pub use model::{ModelError, Regressor, TrainedModel};
pub use observation::{RawObservation, RawValue};
pub use predictor::{LvefStatus, PredictionError, PredictionResult, Predictor};

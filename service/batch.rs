//! # Batch Inference
//!
//! Scores every row of a delimited file with the same `Predictor` used by the
//! HTTP service. The header row names the fields (any accepted alias works) and
//! every cell is treated as text, exactly like a form submission, so a row is
//! valid in a file if and only if it would be valid as a request.
//!
//! Invalid rows do not abort the batch. Their error is written to the output
//! next to the row number and the remaining rows are still scored.

use crate::observation::RawObservation;
use crate::predictor::{PredictionError, PredictionResult, Predictor};
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to read or write delimited data: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The outcome for one input row.
#[derive(Debug)]
pub struct BatchRecord {
    /// 1-based data row number (the header is not counted).
    pub row: usize,
    pub outcome: Result<PredictionResult, PredictionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(records: &[BatchRecord]) -> Self {
        let succeeded = records.iter().filter(|r| r.outcome.is_ok()).count();
        Self {
            total: records.len(),
            succeeded,
            failed: records.len() - succeeded,
        }
    }
}

/// Tab for `.tsv`/`.txt`, comma otherwise.
fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("txt") => b'\t',
        _ => b',',
    }
}

/// Reads all observations from a delimited file with a header row.
///
/// Empty cells are left out of the observation so that they read as missing
/// fields rather than as unparseable numbers.
pub fn read_observations(path: impl AsRef<Path>) -> Result<Vec<RawObservation>, BatchError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let pairs = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, value)| !value.is_empty());
        observations.push(RawObservation::from_text_pairs(pairs));
    }
    Ok(observations)
}

/// Scores observations in parallel. Output order matches input order.
pub fn predict_batch(predictor: &Predictor, observations: &[RawObservation]) -> Vec<BatchRecord> {
    observations
        .par_iter()
        .enumerate()
        .map(|(idx, raw)| BatchRecord {
            row: idx + 1,
            outcome: predictor.handle_prediction(raw),
        })
        .collect()
}

/// Writes `row, lvef, status, error` as TSV.
pub fn write_predictions(path: impl AsRef<Path>, records: &[BatchRecord]) -> Result<(), BatchError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    writer.write_record(["row", "lvef", "status", "error"])?;
    for record in records {
        let row = record.row.to_string();
        match &record.outcome {
            Ok(result) => {
                let lvef = format!("{:.2}", result.lvef);
                writer.write_record([row.as_str(), lvef.as_str(), result.status.label(), ""])?;
            }
            Err(error) => {
                let message = error.public_message();
                writer.write_record([row.as_str(), "", "", message.as_str()])?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

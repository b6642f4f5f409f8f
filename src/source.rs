//! Recorded batches: labels and model outputs captured to a JSON-lines file.
//!
//! Each line is one [`RecordedBatch`], arrays in ndarray's serde layout
//! (`{"v":1,"dim":[..],"data":[..]}`). [`load_recorded`] splits the file
//! into a [`BatchSource`] and a [`Predictor`] that replays the stored
//! outputs, so a recorded run goes through the same evaluator as a live one.

use crate::batch::{Batch, BatchInputKind, BatchSource, ModelInputs, Prediction, Predictor};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tabled::Tabled;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while loading recorded batches
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid record on line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Record on line {line} has {found} phase arrays, expected {expected}")]
    PhaseMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Replay exhausted after {0} batches")]
    Exhausted(usize),
}

/// One batch of labels and the model output recorded for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedBatch {
    pub y_true: ArrayD<f32>,
    pub y_pred: ArrayD<f32>,
    pub sample_weight: ArrayD<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_true_phase: Option<ArrayD<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_pred_phase: Option<ArrayD<f32>>,
}

impl RecordedBatch {
    fn phase_arrays(&self) -> usize {
        usize::from(self.y_true_phase.is_some()) + usize::from(self.y_pred_phase.is_some())
    }
}

/// Labels side of a recording
#[derive(Debug, Clone)]
pub struct RecordedBatches {
    kind: BatchInputKind,
    batches: Vec<Batch>,
}

impl BatchSource for RecordedBatches {
    fn len(&self) -> usize {
        self.batches.len()
    }

    fn kind(&self) -> BatchInputKind {
        self.kind
    }

    fn batch(&mut self, idx: usize) -> anyhow::Result<Batch> {
        self.batches
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("batch {idx} out of range ({} recorded)", self.len()))
    }
}

/// Model side of a recording; hands out the stored predictions in order
#[derive(Debug, Clone)]
pub struct ReplayPredictor {
    predictions: Vec<Prediction>,
    cursor: usize,
}

impl Predictor for ReplayPredictor {
    fn predict_on_batch(&mut self, _inputs: ModelInputs<'_>) -> anyhow::Result<Prediction> {
        let prediction = self
            .predictions
            .get(self.cursor)
            .cloned()
            .ok_or(SourceError::Exhausted(self.cursor))?;
        self.cursor += 1;
        Ok(prediction)
    }
}

/// Per-batch overview, for the `summarize` command
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct BatchStats {
    #[tabled(rename = "Batch")]
    pub index: usize,
    #[tabled(rename = "Shape")]
    pub shape: String,
    #[tabled(rename = "Positions")]
    pub positions: usize,
    #[tabled(rename = "Weighted")]
    pub weighted: usize,
    #[tabled(rename = "Phase")]
    pub phase: bool,
}

impl RecordedBatches {
    /// Position counts of every batch
    #[must_use]
    pub fn stats(&self) -> Vec<BatchStats> {
        self.batches
            .iter()
            .enumerate()
            .map(|(index, batch)| BatchStats {
                index,
                shape: format!("{:?}", batch.y_true.shape()),
                positions: batch.sample_weight.len(),
                weighted: batch.sample_weight.iter().filter(|w| **w != 0.0).count(),
                phase: batch.y_true_phase.is_some(),
            })
            .collect()
    }
}

/// Split a list of records into a batch source and a replaying model
///
/// # Errors
///
/// Returns an error if only some records carry phase arrays.
pub fn from_records(
    records: Vec<RecordedBatch>,
) -> Result<(RecordedBatches, ReplayPredictor), SourceError> {
    let expected = records.first().map_or(0, RecordedBatch::phase_arrays);
    if expected == 1 {
        return Err(SourceError::PhaseMismatch {
            line: 1,
            expected: 2,
            found: 1,
        });
    }
    let kind = if expected == 2 {
        BatchInputKind::Phase
    } else {
        BatchInputKind::Plain
    };

    let mut batches = Vec::with_capacity(records.len());
    let mut predictions = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        let found = record.phase_arrays();
        if found != expected {
            return Err(SourceError::PhaseMismatch {
                line: i + 1,
                expected,
                found,
            });
        }
        batches.push(Batch {
            x: ArrayD::zeros(IxDyn(&[0])),
            aux: None,
            y_true: record.y_true,
            y_true_phase: record.y_true_phase,
            sample_weight: record.sample_weight,
        });
        predictions.push(Prediction {
            genic: record.y_pred,
            phase: record.y_pred_phase,
        });
    }

    Ok((
        RecordedBatches { kind, batches },
        ReplayPredictor {
            predictions,
            cursor: 0,
        },
    ))
}

/// Load a JSON-lines recording; blank lines are skipped
///
/// # Errors
///
/// Returns an error if the file cannot be read, a line is not a valid
/// record, or records disagree on carrying phase arrays.
pub fn load_recorded(path: &Path) -> Result<(RecordedBatches, ReplayPredictor), SourceError> {
    let io_err = |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(io_err)?;

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RecordedBatch =
            serde_json::from_str(&line).map_err(|source| SourceError::Json {
                line: i + 1,
                source,
            })?;
        debug!(line = i + 1, shape = ?record.y_true.shape(), "Loaded record");
        records.push(record);
    }

    let (source, model) = from_records(records)?;
    info!(path = %path.display(), batches = source.len(), kind = %source.kind(), "Loaded recording");
    Ok((source, model))
}

//! Interfaces to the batch generator, the model and the overlap helper.
//!
//! None of these are implemented by the metrics engine itself; the
//! evaluator only drives them. `RecordedBatches` in [`crate::source`] is the
//! one implementation shipped with the crate.

use anyhow::Result;
use ndarray::{Array3, ArrayD, ArrayView3, ArrayViewD};
use serde::{Deserialize, Serialize};

/// How a batch source packs model inputs. Declared once per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchInputKind {
    /// Dilated convolution models take the sample weights as a second input
    Dilated,
    /// Correction models take a previous prediction as a second input
    Correction,
    /// Phase models return genic and phase outputs
    Phase,
    /// Inputs go to the model as they are
    Plain,
}

impl std::fmt::Display for BatchInputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Dilated => "dilated",
            Self::Correction => "correction",
            Self::Phase => "phase",
            Self::Plain => "plain",
        };
        f.write_str(name)
    }
}

/// One batch as yielded by a batch source
#[derive(Debug, Clone)]
pub struct Batch {
    /// Model input
    pub x: ArrayD<f32>,
    /// Previous-model predictions, used by correction models
    pub aux: Option<ArrayD<f32>>,
    /// Genic labels, classes on the last axis
    pub y_true: ArrayD<f32>,
    /// Phase labels, present for phase sources
    pub y_true_phase: Option<ArrayD<f32>>,
    /// One weight per position; 0 marks padding or an invalid base
    pub sample_weight: ArrayD<f32>,
}

/// What the model sees for one batch
#[derive(Debug, Clone)]
pub enum ModelInputs<'a> {
    /// A single input array
    Single(ArrayViewD<'a, f32>),
    /// Input plus a second array (sample weights or a prior prediction)
    Pair(ArrayViewD<'a, f32>, ArrayViewD<'a, f32>),
}

/// Model output for one batch
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Genic class probabilities
    pub genic: ArrayD<f32>,
    /// Phase class probabilities, only from phase models
    pub phase: Option<ArrayD<f32>>,
}

impl Prediction {
    #[must_use]
    pub const fn genic(genic: ArrayD<f32>) -> Self {
        Self { genic, phase: None }
    }

    #[must_use]
    pub const fn with_phase(genic: ArrayD<f32>, phase: ArrayD<f32>) -> Self {
        Self {
            genic,
            phase: Some(phase),
        }
    }
}

/// A trained model, treated as an opaque predict function
pub trait Predictor {
    /// Predict class probabilities for one batch
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn predict_on_batch(&mut self, inputs: ModelInputs<'_>) -> Result<Prediction>;
}

/// Folds predictions made on overlapping sliding windows back onto a single
/// non-overlapping sequence
pub trait OverlapHelper {
    /// Reconcile `(batch, chunk_len, classes)` predictions of one batch
    fn overlap_predictions(&self, batch_idx: usize, y_pred: ArrayView3<'_, f32>) -> Array3<f32>;

    /// Keep the entries of `array` that survive reconciliation
    fn subset_input(&self, batch_idx: usize, array: ArrayViewD<'_, f32>) -> ArrayD<f32>;
}

/// An indexable collection of batches
pub trait BatchSource {
    /// Number of batches
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Input packing used by every batch of this source
    fn kind(&self) -> BatchInputKind;

    /// Load batch `idx`
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be produced.
    fn batch(&mut self, idx: usize) -> Result<Batch>;

    /// Present when batches are overlapping sliding windows
    fn overlap_helper(&self) -> Option<&dyn OverlapHelper> {
        None
    }

    /// Whether predictions must be reconciled before scoring
    fn overlap(&self) -> bool {
        self.overlap_helper().is_some()
    }
}

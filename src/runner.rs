//! Batch evaluation driver.
//!
//! Pulls batches from a [`BatchSource`] in order, runs the model on each,
//! reconciles overlapping windows when the source asks for it, and folds the
//! result into the genic and (for phase models) phase accumulators.

use crate::batch::{Batch, BatchInputKind, BatchSource, ModelInputs, OverlapHelper, Predictor};
use crate::config::EvalConfig;
use crate::confusion::{ConfusionAccumulator, MetricsError};
use crate::report;
use crate::scores::ClassScores;
use indexmap::IndexMap;
use ndarray::ArrayD;
use thiserror::Error;
use tracing::{debug, info};

/// Result group for genic classes
pub const GENIC_GROUP: &str = "genic_base_wise";
/// Result group for phase classes
pub const PHASE_GROUP: &str = "phase_base_wise";

/// Scores per metric group, then per class
pub type EvaluationResults = IndexMap<String, ClassScores>;

/// Errors that abort an evaluation run
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Batch {index} does not fit the declared {kind} input layout: missing {missing}")]
    UnrecognizedBatch {
        index: usize,
        kind: BatchInputKind,
        missing: &'static str,
    },

    #[error("Phase model returned no phase output for batch {index}")]
    MissingPhaseOutput { index: usize },

    #[error("Overlap reconciliation expects (batch, chunk/pool, pool, classes) predictions, got {shape:?}")]
    OverlapShape { shape: Vec<usize> },

    #[error("Failed to load batch {index}: {source}")]
    Source {
        index: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Prediction failed on batch {index}: {source}")]
    Predict {
        index: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{group} metrics failed on batch {index}: {source}")]
    Metrics {
        group: &'static str,
        index: usize,
        source: MetricsError,
    },

    #[error("Array reshape failed: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Print tables once the run completes
    pub print_to_stdout: bool,
    /// Also print tables after every batch
    pub print_every_batch: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            print_to_stdout: true,
            print_every_batch: false,
        }
    }
}

/// Accumulated state of a completed run
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Genic confusion matrix and uncertainties
    pub genic: ConfusionAccumulator,
    /// Phase confusion matrix, present once a phase output was seen
    pub phase: Option<ConfusionAccumulator>,
    /// Number of batches processed
    pub batches: usize,
}

impl Evaluation {
    /// Scores per metric group
    #[must_use]
    pub fn results(&self) -> EvaluationResults {
        let mut results = EvaluationResults::new();
        if self.batches > 0 {
            results.insert(GENIC_GROUP.to_string(), self.genic.scores());
        }
        if let Some(phase) = &self.phase {
            results.insert(PHASE_GROUP.to_string(), phase.scores());
        }
        results
    }

    /// Accumulators per metric group, in result order
    #[must_use]
    pub fn groups(&self) -> Vec<(&'static str, &ConfusionAccumulator)> {
        let mut groups = Vec::new();
        if self.batches > 0 {
            groups.push((GENIC_GROUP, &self.genic));
        }
        if let Some(phase) = &self.phase {
            groups.push((PHASE_GROUP, phase));
        }
        groups
    }
}

/// Drives one model over one batch source
#[derive(Debug, Clone)]
pub struct Evaluator {
    genic: ConfusionAccumulator,
    phase: ConfusionAccumulator,
    config: RunnerConfig,
}

impl Evaluator {
    /// Genic classes with the default composites, phase classes, printing on
    #[must_use]
    pub fn new() -> Self {
        Self {
            genic: ConfusionAccumulator::genic(),
            phase: ConfusionAccumulator::phase(),
            config: RunnerConfig::default(),
        }
    }

    /// Build from a loaded configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a composite metric names an unknown genic class.
    pub fn from_config(config: &EvalConfig) -> Result<Self, MetricsError> {
        Ok(Self {
            genic: ConfusionAccumulator::with_composites(
                config.genic_classes.clone(),
                &config.composites,
            )?,
            phase: ConfusionAccumulator::new(config.phase_classes.clone()),
            config: RunnerConfig {
                print_to_stdout: config.print_to_stdout,
                print_every_batch: config.print_every_batch,
            },
        })
    }

    /// Replace the runner configuration
    #[must_use]
    pub const fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Get current configuration
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run the model over every batch and return the final scores
    ///
    /// # Errors
    ///
    /// Any failing batch aborts the whole run; see [`Evaluator::run`].
    pub fn calculate_metrics<S, P>(
        &self,
        source: &mut S,
        model: &mut P,
    ) -> Result<EvaluationResults, RunnerError>
    where
        S: BatchSource + ?Sized,
        P: Predictor + ?Sized,
    {
        Ok(self.run(source, model)?.results())
    }

    /// Run the model over every batch, in order.
    ///
    /// Each run starts from empty accumulators; nothing from a failed run
    /// is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch cannot be loaded, does not match the
    /// source's declared input kind, the model fails, or the arrays do not
    /// line up.
    pub fn run<S, P>(&self, source: &mut S, model: &mut P) -> Result<Evaluation, RunnerError>
    where
        S: BatchSource + ?Sized,
        P: Predictor + ?Sized,
    {
        let total = source.len();
        let kind = source.kind();
        info!(batches = total, kind = %kind, overlap = source.overlap(), "Starting evaluation");

        let mut evaluation = Evaluation {
            genic: self.genic.clone(),
            phase: None,
            batches: 0,
        };

        for index in 0..total {
            debug!(batch = index, last = total.saturating_sub(1), "Evaluating batch");

            let batch = source
                .batch(index)
                .map_err(|e| RunnerError::Source {
                    index,
                    source: e.into(),
                })?;
            let inputs = model_inputs(&batch, kind, index)?;
            let prediction = model
                .predict_on_batch(inputs)
                .map_err(|e| RunnerError::Predict {
                    index,
                    source: e.into(),
                })?;
            if kind == BatchInputKind::Phase && prediction.phase.is_none() {
                return Err(RunnerError::MissingPhaseOutput { index });
            }

            let helper = source.overlap_helper();
            let Batch {
                y_true,
                y_true_phase,
                sample_weight,
                ..
            } = batch;
            let sample_weight = match helper {
                Some(h) => h.subset_input(index, sample_weight.view()),
                None => sample_weight,
            };

            feed(
                &mut evaluation.genic,
                GENIC_GROUP,
                index,
                helper,
                y_true,
                prediction.genic,
                &sample_weight,
            )?;
            if let (Some(y_true_phase), Some(y_pred_phase)) = (y_true_phase, prediction.phase) {
                let phase = evaluation.phase.get_or_insert_with(|| self.phase.clone());
                feed(
                    phase,
                    PHASE_GROUP,
                    index,
                    helper,
                    y_true_phase,
                    y_pred_phase,
                    &sample_weight,
                )?;
            }
            evaluation.batches += 1;

            if self.config.print_every_batch {
                for (_, acc) in evaluation.groups() {
                    report::print_results(acc);
                }
            }
        }

        info!(
            batches = evaluation.batches,
            positions = evaluation.genic.matrix().total(),
            accuracy = evaluation.genic.matrix().total_accuracy(),
            "Evaluation complete"
        );
        if self.config.print_to_stdout && !self.config.print_every_batch {
            for (_, acc) in evaluation.groups() {
                report::print_results(acc);
            }
        }

        Ok(evaluation)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a batch into what the model expects for `kind`
fn model_inputs(
    batch: &Batch,
    kind: BatchInputKind,
    index: usize,
) -> Result<ModelInputs<'_>, RunnerError> {
    let missing = |missing| RunnerError::UnrecognizedBatch {
        index,
        kind,
        missing,
    };
    match kind {
        BatchInputKind::Dilated => Ok(ModelInputs::Pair(
            batch.x.view(),
            batch.sample_weight.view(),
        )),
        BatchInputKind::Correction => batch
            .aux
            .as_ref()
            .map(|aux| ModelInputs::Pair(batch.x.view(), aux.view()))
            .ok_or_else(|| missing("aux")),
        BatchInputKind::Phase => {
            if batch.y_true_phase.is_none() {
                return Err(missing("y_true_phase"));
            }
            Ok(ModelInputs::Single(batch.x.view()))
        }
        BatchInputKind::Plain => Ok(ModelInputs::Single(batch.x.view())),
    }
}

/// Fold overlapping windows of one group's labels and predictions back
/// onto linear positions.
///
/// Predictions arrive as `(batch, chunk/pool, pool, classes)` and are
/// handed to the helper as `(batch, chunk, classes)`.
fn reconcile(
    helper: &dyn OverlapHelper,
    index: usize,
    y_true: &ArrayD<f32>,
    y_pred: &ArrayD<f32>,
) -> Result<(ArrayD<f32>, ArrayD<f32>), RunnerError> {
    let &[batch_size, chunk_pooled, pool, classes] = y_pred.shape() else {
        return Err(RunnerError::OverlapShape {
            shape: y_pred.shape().to_vec(),
        });
    };
    let window = chunk_pooled * pool * classes;
    if window == 0 {
        return Err(RunnerError::OverlapShape {
            shape: y_pred.shape().to_vec(),
        });
    }

    let flat = y_pred.to_shape((batch_size, chunk_pooled * pool, classes))?;
    let merged = helper.overlap_predictions(index, flat.view());
    let rows = merged.len() / window;
    let y_pred = merged
        .to_shape((rows, chunk_pooled, pool, classes))?
        .into_owned()
        .into_dyn();
    let y_true = helper.subset_input(index, y_true.view());
    Ok((y_true, y_pred))
}

fn feed(
    acc: &mut ConfusionAccumulator,
    group: &'static str,
    index: usize,
    helper: Option<&dyn OverlapHelper>,
    y_true: ArrayD<f32>,
    y_pred: ArrayD<f32>,
    sample_weight: &ArrayD<f32>,
) -> Result<(), RunnerError> {
    let (y_true, y_pred) = match helper {
        Some(h) => reconcile(h, index, &y_true, &y_pred)?,
        None => (y_true, y_pred),
    };
    let counted = acc
        .count_and_calculate_one_batch(y_true.view(), y_pred.view(), sample_weight.view())
        .map_err(|source| RunnerError::Metrics {
            group,
            index,
            source,
        })?;
    if counted == 0 {
        debug!(batch = index, group, "Batch fully masked, nothing counted");
    }
    Ok(())
}

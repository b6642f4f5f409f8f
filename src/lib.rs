//! # Basewise Eval
//!
//! Streaming base-wise evaluation for genic sequence labeling models.
//!
//! A model labels every base of a DNA sequence with one of a small set of
//! classes (intergenic, UTR, exon, intron; optionally a coding phase). This
//! crate folds its predictions, batch by batch, into a confusion matrix and
//! derives precision, recall, F1 and normalized prediction entropy per class,
//! plus composite metrics built from several classes.
//!
//! ## Architecture
//!
//! ```text
//! BatchSource ──► Predictor ──► (OverlapHelper) ──► ConfusionAccumulator
//!                                                        │
//!                                     ConfusionMatrix + UncertaintyLog
//!                                                        │
//!                                  ClassScores ──► tables / CSV / JSON
//! ```
//!
//! Padding is excluded by sample weight: positions with weight 0 are never
//! counted.

pub mod batch;
pub mod classes;
pub mod config;
pub mod confusion;
pub mod entropy;
pub mod report;
pub mod runner;
pub mod scores;
pub mod source;

pub use batch::{
    Batch, BatchInputKind, BatchSource, ModelInputs, OverlapHelper, Prediction, Predictor,
};
pub use classes::{ClassSet, ClassSetError, GENIC_CLASSES, PHASE_CLASSES};
pub use config::{ConfigError, EvalConfig};
pub use confusion::{ConfusionAccumulator, ConfusionMatrix, MetricsError};
pub use entropy::{EntropyScorer, UncertaintyLog};
pub use report::{EvaluationReport, ReportError, ReportMetadata, ReportTable};
pub use runner::{
    Evaluation, EvaluationResults, Evaluator, RunnerConfig, RunnerError, GENIC_GROUP,
    PHASE_GROUP,
};
pub use scores::{CellRule, ClassScores, CompositeMetric, CompositeRule, ScoreRecord};
pub use source::{load_recorded, RecordedBatch, RecordedBatches, ReplayPredictor, SourceError};

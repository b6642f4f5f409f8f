//! Streaming confusion matrix accumulation.
//!
//! Every batch is masked, reduced by arg-max and folded into a running
//! `cm[true][pred]` count matrix. Only the counts and the per-batch entropy
//! averages survive a batch; raw predictions are dropped as soon as they have
//! been counted.

use crate::classes::{ClassSet, ClassSetError};
use crate::entropy::{EntropyScorer, UncertaintyLog};
use crate::scores::{score_classes, ClassScores, CompositeMetric, ResolvedComposite};
use ndarray::{Array2, ArrayView1, ArrayViewD, Axis, CowArray, Ix2};
use thiserror::Error;

/// Errors raised while folding a batch into the accumulator
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Last axis must hold {expected} class probabilities, found {found}")]
    ClassDimension { expected: usize, found: usize },

    #[error("Position count mismatch: labels {labels}, predictions {predictions}, sample weights {weights}")]
    PositionMismatch {
        labels: usize,
        predictions: usize,
        weights: usize,
    },

    #[error("Cannot merge a {found}-class matrix into a {expected}-class matrix")]
    ClassCountMismatch { expected: usize, found: usize },

    #[error("Array reshape failed: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Invalid class reference: {0}")]
    Class(#[from] ClassSetError),
}

/// N×N count matrix indexed as `[true][pred]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Array2<u64>,
}

impl ConfusionMatrix {
    /// Empty matrix for `n_classes` classes
    #[must_use]
    pub fn new(n_classes: usize) -> Self {
        Self {
            counts: Array2::zeros((n_classes, n_classes)),
        }
    }

    /// Count `(true, pred)` index pairs into a fresh matrix.
    ///
    /// Pairs with an index outside `0..n_classes` are ignored.
    #[must_use]
    pub fn from_pairs<I>(n_classes: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut cm = Self::new(n_classes);
        for (t, p) in pairs {
            if let Some(cell) = cm.counts.get_mut((t, p)) {
                *cell += 1;
            }
        }
        cm
    }

    /// Wrap an existing square count matrix
    ///
    /// # Errors
    ///
    /// Returns `ClassCountMismatch` if the matrix is not square.
    pub fn from_counts(counts: Array2<u64>) -> Result<Self, MetricsError> {
        let (rows, cols) = counts.dim();
        if rows != cols {
            return Err(MetricsError::ClassCountMismatch {
                expected: rows,
                found: cols,
            });
        }
        Ok(Self { counts })
    }

    /// Add another matrix element-wise into this one
    ///
    /// # Errors
    ///
    /// Returns `ClassCountMismatch` if the matrices differ in size.
    pub fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        if other.n_classes() != self.n_classes() {
            return Err(MetricsError::ClassCountMismatch {
                expected: self.n_classes(),
                found: other.n_classes(),
            });
        }
        self.counts += &other.counts;
        Ok(())
    }

    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.counts.nrows()
    }

    /// Raw counts
    #[must_use]
    pub const fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    /// Count of positions with true label `t` predicted as `p`
    #[must_use]
    pub fn get(&self, t: usize, p: usize) -> u64 {
        self.counts[[t, p]]
    }

    /// Total number of counted positions
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Sum of the diagonal
    #[must_use]
    pub fn trace(&self) -> u64 {
        self.counts.diag().sum()
    }

    #[must_use]
    pub fn true_positives(&self, class: usize) -> u64 {
        self.counts[[class, class]]
    }

    /// Predicted as `class` while being something else
    #[must_use]
    pub fn false_positives(&self, class: usize) -> u64 {
        self.counts.column(class).sum() - self.counts[[class, class]]
    }

    /// Labelled `class` but predicted as something else
    #[must_use]
    pub fn false_negatives(&self, class: usize) -> u64 {
        self.counts.row(class).sum() - self.counts[[class, class]]
    }

    /// `trace / total`; NaN for an empty matrix
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_accuracy(&self) -> f64 {
        self.trace() as f64 / self.total() as f64
    }

    /// Each row divided by its sum. Rows of classes that never occurred
    /// come out as NaN.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn normalized(&self) -> Array2<f64> {
        let mut normalized = self.counts.mapv(|c| c as f64);
        for mut row in normalized.rows_mut() {
            let class_sum = row.sum();
            row.mapv_inplace(|v| v / class_sum);
        }
        normalized
    }
}

/// Index of the largest value; ties go to the lowest index.
///
/// NaN counts as larger than any number, so the first NaN wins.
fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v.is_nan() {
            return i;
        }
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// View an array with classes on the last axis as `(positions, n_classes)`
fn as_positions<'a>(
    arr: &'a ArrayViewD<'_, f32>,
    n_classes: usize,
) -> Result<CowArray<'a, f32, Ix2>, MetricsError> {
    let found = arr.shape().last().copied().unwrap_or(0);
    if arr.ndim() < 2 || found != n_classes {
        return Err(MetricsError::ClassDimension {
            expected: n_classes,
            found,
        });
    }
    Ok(arr.to_shape((arr.len() / n_classes, n_classes))?)
}

/// Running confusion matrix plus per-class uncertainty for one label set
#[derive(Debug, Clone)]
pub struct ConfusionAccumulator {
    classes: ClassSet,
    composites: Vec<ResolvedComposite>,
    matrix: ConfusionMatrix,
    uncertainty: UncertaintyLog,
    scorer: EntropyScorer,
}

impl ConfusionAccumulator {
    /// Accumulator without composite metrics
    #[must_use]
    pub fn new(classes: ClassSet) -> Self {
        Self::build(classes, Vec::new())
    }

    /// Accumulator scoring the given composite metrics after the primitives
    ///
    /// # Errors
    ///
    /// Returns an error if a composite names a class missing from `classes`.
    pub fn with_composites(
        classes: ClassSet,
        composites: &[CompositeMetric],
    ) -> Result<Self, MetricsError> {
        let resolved = composites
            .iter()
            .map(|c| c.resolve(&classes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::build(classes, resolved))
    }

    /// Genic classes with `legacy_cds`, `sub_genic` and `genic` composites
    #[must_use]
    pub fn genic() -> Self {
        Self::build(ClassSet::genic(), ResolvedComposite::genic_defaults())
    }

    /// Phase classes, primitives only
    #[must_use]
    pub fn phase() -> Self {
        Self::new(ClassSet::phase())
    }

    fn build(classes: ClassSet, composites: Vec<ResolvedComposite>) -> Self {
        let n = classes.len();
        Self {
            classes,
            composites,
            matrix: ConfusionMatrix::new(n),
            uncertainty: UncertaintyLog::new(n),
            scorer: EntropyScorer::new(n),
        }
    }

    /// Mask, score and count one batch.
    ///
    /// `y_true` and `y_pred` carry class vectors on their last axis,
    /// `sample_weight` one entry per position. Positions with weight 0 are
    /// dropped from both the matrix and the entropy log. Returns the number
    /// of positions that were counted.
    ///
    /// # Errors
    ///
    /// Returns an error if the arrays disagree on the class dimension or on
    /// the number of positions.
    pub fn count_and_calculate_one_batch(
        &mut self,
        y_true: ArrayViewD<'_, f32>,
        y_pred: ArrayViewD<'_, f32>,
        sample_weight: ArrayViewD<'_, f32>,
    ) -> Result<usize, MetricsError> {
        let n = self.classes.len();
        let y_true = as_positions(&y_true, n)?;
        let y_pred = as_positions(&y_pred, n)?;
        if y_true.nrows() != y_pred.nrows() || y_true.nrows() != sample_weight.len() {
            return Err(MetricsError::PositionMismatch {
                labels: y_true.nrows(),
                predictions: y_pred.nrows(),
                weights: sample_weight.len(),
            });
        }

        let kept: Vec<usize> = sample_weight
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0.0)
            .map(|(i, _)| i)
            .collect();
        if kept.is_empty() {
            return Ok(0);
        }

        let y_true = y_true.select(Axis(0), &kept);
        let y_pred = y_pred.select(Axis(0), &kept);
        let true_idx: Vec<usize> = y_true.axis_iter(Axis(0)).map(argmax).collect();

        let batch_uncertainty = self.scorer.score_batch(&true_idx, y_pred.view());
        self.uncertainty.extend_batch(&batch_uncertainty);

        let pairs = true_idx
            .iter()
            .copied()
            .zip(y_pred.axis_iter(Axis(0)).map(argmax));
        self.matrix.merge(&ConfusionMatrix::from_pairs(n, pairs))?;

        Ok(kept.len())
    }

    /// Current primitive and composite scores
    #[must_use]
    pub fn scores(&self) -> ClassScores {
        score_classes(
            &self.matrix,
            &self.uncertainty,
            &self.classes,
            &self.composites,
        )
    }

    #[must_use]
    pub const fn classes(&self) -> &ClassSet {
        &self.classes
    }

    #[must_use]
    pub const fn matrix(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    #[must_use]
    pub const fn uncertainty(&self) -> &UncertaintyLog {
        &self.uncertainty
    }

    /// True if composite metrics follow the primitive classes
    #[must_use]
    pub fn has_composites(&self) -> bool {
        !self.composites.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array1, Array3};

    fn one_hot(indices: &[usize], n: usize) -> Array2<f32> {
        let mut arr = Array2::zeros((indices.len(), n));
        for (row, &i) in indices.iter().enumerate() {
            arr[[row, i]] = 1.0;
        }
        arr
    }

    fn scenario_pairs() -> (Vec<usize>, Vec<usize>) {
        (vec![0, 0, 1, 2, 2, 3], vec![0, 1, 1, 2, 3, 3])
    }

    // =========================================================================
    // ConfusionMatrix tests
    // =========================================================================

    #[test]
    fn test_from_pairs_scenario() {
        let (t, p) = scenario_pairs();
        let cm = ConfusionMatrix::from_pairs(4, t.into_iter().zip(p));
        let expected = arr2(&[[1, 1, 0, 0], [0, 1, 0, 0], [0, 0, 1, 1], [0, 0, 0, 1]]);
        assert_eq!(cm.counts(), &expected);
        assert_eq!(cm.true_positives(2), 1);
        assert_eq!(cm.false_positives(2), 0);
        assert_eq!(cm.false_negatives(2), 1);
    }

    #[test]
    fn test_total_accuracy_is_trace_over_sum() {
        let cm = ConfusionMatrix::from_counts(arr2(&[[5, 1], [2, 7]])).unwrap();
        assert_eq!(cm.total_accuracy(), cm.trace() as f64 / cm.total() as f64);
        assert_eq!(cm.total_accuracy(), 12.0 / 15.0);
    }

    #[test]
    fn test_total_accuracy_empty_is_nan() {
        assert!(ConfusionMatrix::new(4).total_accuracy().is_nan());
    }

    #[test]
    fn test_normalized_rows_sum_to_one() {
        let cm = ConfusionMatrix::from_counts(arr2(&[[3, 1, 0], [0, 0, 0], [2, 2, 4]])).unwrap();
        let normalized = cm.normalized();

        assert!((normalized.row(0).sum() - 1.0).abs() < 1e-12);
        assert!((normalized.row(2).sum() - 1.0).abs() < 1e-12);
        assert!(normalized.row(1).iter().all(|v| v.is_nan()));
        assert_eq!(normalized[[0, 0]], 0.75);
    }

    #[test]
    fn test_merge_rejects_size_mismatch() {
        let mut cm = ConfusionMatrix::new(4);
        let err = cm.merge(&ConfusionMatrix::new(3)).unwrap_err();
        assert!(matches!(
            err,
            MetricsError::ClassCountMismatch {
                expected: 4,
                found: 3
            }
        ));
    }

    #[test]
    fn test_from_counts_rejects_non_square() {
        assert!(ConfusionMatrix::from_counts(Array2::zeros((2, 3))).is_err());
    }

    #[test]
    fn test_argmax_ties_pick_lowest_index() {
        assert_eq!(argmax(arr1(&[0.4, 0.4, 0.2]).view()), 0);
        assert_eq!(argmax(arr1(&[0.1, 0.3, 0.3, 0.3]).view()), 1);
        assert_eq!(argmax(arr1(&[0.1, 0.2, 0.7]).view()), 2);
    }

    #[test]
    fn test_argmax_first_nan_wins() {
        assert_eq!(argmax(arr1(&[0.1, f32::NAN, 0.5]).view()), 1);
        assert_eq!(argmax(arr1(&[f32::NAN, 0.9, f32::NAN]).view()), 0);
        assert_eq!(argmax(arr1(&[0.9, 0.05, f32::NAN]).view()), 2);
    }

    // =========================================================================
    // ConfusionAccumulator tests
    // =========================================================================

    #[test]
    fn test_one_batch_scenario() {
        let (t, p) = scenario_pairs();
        let mut acc = ConfusionAccumulator::genic();
        let counted = acc
            .count_and_calculate_one_batch(
                one_hot(&t, 4).into_dyn().view(),
                one_hot(&p, 4).into_dyn().view(),
                Array1::<f32>::ones(6).into_dyn().view(),
            )
            .unwrap();

        assert_eq!(counted, 6);
        assert_eq!(acc.matrix().get(0, 1), 1);
        assert_eq!(acc.matrix().total(), 6);
    }

    #[test]
    fn test_fully_masked_batch_is_noop() {
        let (t, p) = scenario_pairs();
        let mut acc = ConfusionAccumulator::genic();
        acc.count_and_calculate_one_batch(
            one_hot(&t, 4).into_dyn().view(),
            one_hot(&p, 4).into_dyn().view(),
            Array1::<f32>::ones(6).into_dyn().view(),
        )
        .unwrap();
        let matrix_before = acc.matrix().clone();
        let log_before = acc.uncertainty().clone();

        let counted = acc
            .count_and_calculate_one_batch(
                one_hot(&p, 4).into_dyn().view(),
                one_hot(&t, 4).into_dyn().view(),
                Array1::<f32>::zeros(6).into_dyn().view(),
            )
            .unwrap();

        assert_eq!(counted, 0);
        assert_eq!(acc.matrix(), &matrix_before);
        assert_eq!(acc.uncertainty(), &log_before);
    }

    #[test]
    fn test_masked_positions_are_excluded() {
        let mut acc = ConfusionAccumulator::genic();
        acc.count_and_calculate_one_batch(
            one_hot(&[0, 1, 2], 4).into_dyn().view(),
            one_hot(&[0, 0, 0], 4).into_dyn().view(),
            arr1(&[1.0_f32, 0.0, 1.0]).into_dyn().view(),
        )
        .unwrap();

        assert_eq!(acc.matrix().get(0, 0), 1);
        assert_eq!(acc.matrix().get(1, 0), 0);
        assert_eq!(acc.matrix().get(2, 0), 1);
        assert!(acc.uncertainty().values(1).is_empty());
    }

    #[test]
    fn test_batches_are_order_independent() {
        let batch_a = (one_hot(&[0, 1, 2], 4), one_hot(&[1, 1, 3], 4));
        let batch_b = (one_hot(&[3, 3, 0, 2], 4), one_hot(&[3, 2, 0, 0], 4));
        let feed = |acc: &mut ConfusionAccumulator, (t, p): &(Array2<f32>, Array2<f32>)| {
            let sw = Array1::<f32>::ones(t.nrows());
            acc.count_and_calculate_one_batch(
                t.view().into_dyn(),
                p.view().into_dyn(),
                sw.view().into_dyn(),
            )
            .unwrap();
        };

        let mut ab = ConfusionAccumulator::genic();
        feed(&mut ab, &batch_a);
        feed(&mut ab, &batch_b);
        let mut ba = ConfusionAccumulator::genic();
        feed(&mut ba, &batch_b);
        feed(&mut ba, &batch_a);

        assert_eq!(ab.matrix(), ba.matrix());
    }

    #[test]
    fn test_batched_sequences_are_flattened() {
        // (batch, sequence, classes) with a (batch, sequence) mask
        let mut y = Array3::<f32>::zeros((2, 3, 4));
        for b in 0..2 {
            for s in 0..3 {
                y[[b, s, s]] = 1.0;
            }
        }
        let sw = Array2::<f32>::ones((2, 3));
        let mut acc = ConfusionAccumulator::genic();
        acc.count_and_calculate_one_batch(y.view().into_dyn(), y.view().into_dyn(), sw.view().into_dyn())
            .unwrap();

        assert_eq!(acc.matrix().trace(), 6);
        assert_eq!(acc.matrix().get(2, 2), 2);
    }

    #[test]
    fn test_uncertainty_logged_per_represented_class() {
        let y_true = one_hot(&[0, 0, 3], 4);
        let y_pred = arr2(&[
            [0.25_f32, 0.25, 0.25, 0.25],
            [0.25, 0.25, 0.25, 0.25],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let mut acc = ConfusionAccumulator::genic();
        acc.count_and_calculate_one_batch(
            y_true.view().into_dyn(),
            y_pred.view().into_dyn(),
            Array1::<f32>::ones(3).view().into_dyn(),
        )
        .unwrap();

        assert_eq!(acc.uncertainty().values(0), &[1.0]);
        assert_eq!(acc.uncertainty().values(3), &[0.0]);
        assert!(acc.uncertainty().values(1).is_empty());
    }

    #[test]
    fn test_class_dimension_mismatch() {
        let mut acc = ConfusionAccumulator::genic();
        let err = acc
            .count_and_calculate_one_batch(
                one_hot(&[0], 3).into_dyn().view(),
                one_hot(&[0], 3).into_dyn().view(),
                Array1::<f32>::ones(1).into_dyn().view(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::ClassDimension {
                expected: 4,
                found: 3
            }
        ));
    }

    #[test]
    fn test_position_mismatch() {
        let mut acc = ConfusionAccumulator::genic();
        let err = acc
            .count_and_calculate_one_batch(
                one_hot(&[0, 1], 4).into_dyn().view(),
                one_hot(&[0, 1], 4).into_dyn().view(),
                Array1::<f32>::ones(3).into_dyn().view(),
            )
            .unwrap_err();
        assert!(matches!(err, MetricsError::PositionMismatch { .. }));
    }

    #[test]
    fn test_unknown_composite_class_rejected() {
        let composite = CompositeMetric::sum_of("cds", ["exon", "cds"]);
        let err = ConfusionAccumulator::with_composites(ClassSet::genic(), &[composite]).unwrap_err();
        assert!(matches!(err, MetricsError::Class(ClassSetError::UnknownClass(_))));
    }
}

//! Prediction uncertainty as normalized Shannon entropy.
//!
//! Entropy of each predicted distribution is divided by the entropy of the
//! uniform distribution over the same number of classes, so values from
//! label sets of different sizes land on the same [0, 1] scale.

use ndarray::{ArrayView1, ArrayView2, Axis};

/// Entropy of the uniform distribution over `n_classes` classes, in bits
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn max_entropy(n_classes: usize) -> f64 {
    let p = 1.0 / n_classes as f64;
    -(n_classes as f64) * p * p.log2()
}

/// Shannon entropy (bits) of one probability vector.
///
/// Zero-probability terms contribute nothing; anything that is not a
/// probability (NaN, negative) yields NaN for the whole vector.
#[must_use]
pub fn shannon_entropy(probs: ArrayView1<'_, f32>) -> f64 {
    let h: f64 = probs
        .iter()
        .map(|&p| {
            let p = f64::from(p);
            if p == 0.0 {
                0.0
            } else {
                p * p.log2()
            }
        })
        .sum();
    // one-hot vectors would otherwise come out as -0.0
    -h + 0.0
}

/// Mean of the non-NaN values, NaN if there are none
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn nan_mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0_usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Scores per-position uncertainty of a batch of predictions
#[derive(Debug, Clone, Copy)]
pub struct EntropyScorer {
    n_classes: usize,
    max_entropy: f64,
}

impl EntropyScorer {
    #[must_use]
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            max_entropy: max_entropy(n_classes),
        }
    }

    /// Normalized entropy of one probability vector
    #[must_use]
    pub fn normalized(&self, probs: ArrayView1<'_, f32>) -> f64 {
        shannon_entropy(probs) / self.max_entropy
    }

    /// Average normalized entropy per true class.
    ///
    /// `y_true` holds the true class index of every row of `y_pred`. The
    /// result has one slot per class; classes absent from the batch are
    /// `None`.
    #[must_use]
    pub fn score_batch(&self, y_true: &[usize], y_pred: ArrayView2<'_, f32>) -> Vec<Option<f64>> {
        let entropies: Vec<f64> = y_pred
            .axis_iter(Axis(0))
            .map(shannon_entropy)
            .collect();

        (0..self.n_classes)
            .map(|class| {
                let mut in_class = y_true
                    .iter()
                    .zip(&entropies)
                    .filter(|(t, _)| **t == class)
                    .map(|(_, &h)| h)
                    .peekable();
                in_class.peek()?;
                Some(nan_mean(in_class) / self.max_entropy)
            })
            .collect()
    }
}

/// Per-class history of batch-average normalized entropies
#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintyLog {
    per_class: Vec<Vec<f64>>,
}

impl UncertaintyLog {
    #[must_use]
    pub fn new(n_classes: usize) -> Self {
        Self {
            per_class: vec![Vec::new(); n_classes],
        }
    }

    /// Append one batch value to a class
    pub fn push(&mut self, class: usize, value: f64) {
        self.per_class[class].push(value);
    }

    /// Append the output of [`EntropyScorer::score_batch`]
    pub fn extend_batch(&mut self, batch: &[Option<f64>]) {
        for (class, value) in batch.iter().enumerate() {
            if let Some(v) = value {
                self.push(class, *v);
            }
        }
    }

    /// Recorded values for a class
    #[must_use]
    pub fn values(&self, class: usize) -> &[f64] {
        &self.per_class[class]
    }

    /// Arithmetic mean over all batches; NaN when the class was never seen.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self, class: usize) -> f64 {
        let values = &self.per_class[class];
        if values.is_empty() {
            return f64::NAN;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_max_entropy_four_classes() {
        assert_eq!(max_entropy(4), 2.0);
        assert_eq!(max_entropy(2), 1.0);
    }

    #[test]
    fn test_uniform_is_one() {
        let scorer = EntropyScorer::new(4);
        assert_eq!(scorer.normalized(arr1(&[0.25, 0.25, 0.25, 0.25]).view()), 1.0);
    }

    #[test]
    fn test_one_hot_is_zero() {
        let scorer = EntropyScorer::new(4);
        assert_eq!(scorer.normalized(arr1(&[1.0, 0.0, 0.0, 0.0]).view()), 0.0);
    }

    #[test]
    fn test_zero_probability_is_not_nan() {
        let h = shannon_entropy(arr1(&[0.5, 0.5, 0.0, 0.0]).view());
        assert_eq!(h, 1.0);
    }

    #[test]
    fn test_nan_mean_skips_nan() {
        assert_eq!(nan_mean([1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean([f64::NAN]).is_nan());
        assert!(nan_mean(std::iter::empty()).is_nan());
    }

    #[test]
    fn test_score_batch_groups_by_true_class() {
        let scorer = EntropyScorer::new(4);
        let y_pred = arr2(&[
            [0.25, 0.25, 0.25, 0.25],
            [1.0, 0.0, 0.0, 0.0],
            [0.5, 0.5, 0.0, 0.0],
        ]);
        let scores = scorer.score_batch(&[0, 0, 2], y_pred.view());

        assert_eq!(scores.len(), 4);
        assert_eq!(scores[0], Some(0.5));
        assert_eq!(scores[1], None);
        assert_eq!(scores[2], Some(0.5));
        assert_eq!(scores[3], None);
    }

    #[test]
    fn test_score_batch_nan_rows_are_skipped() {
        let scorer = EntropyScorer::new(2);
        let y_pred = arr2(&[[f32::NAN, 0.5], [0.5, 0.5]]);
        let scores = scorer.score_batch(&[1, 1], y_pred.view());
        assert_eq!(scores[1], Some(1.0));
    }

    #[test]
    fn test_log_mean_and_unseen_class() {
        let mut log = UncertaintyLog::new(4);
        log.extend_batch(&[Some(0.2), None, None, None]);
        log.extend_batch(&[Some(0.4), None, None, None]);

        assert!((log.mean(0) - 0.3).abs() < 1e-12);
        assert_eq!(log.values(0).len(), 2);
        assert!(log.mean(1).is_nan());
    }
}

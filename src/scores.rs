//! Precision, recall and F1 for primitive and composite classes.
//!
//! Primitive classes read TP/FP/FN straight off the confusion matrix.
//! Composite classes are defined as data: either the sum of several
//! primitive records or an explicit list of matrix cells per count.

use crate::classes::{ClassSet, ClassSetError};
use crate::confusion::ConfusionMatrix;
use crate::entropy::UncertaintyLog;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scores per class name: primitives in class order, then composites
pub type ClassScores = IndexMap<String, ScoreRecord>;

/// Counts and derived metrics for one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    #[serde(rename = "TP")]
    pub tp: u64,
    #[serde(rename = "FP")]
    pub fp: u64,
    #[serde(rename = "FN")]
    pub fn_: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Mean normalized entropy; only primitive classes carry one
    #[serde(rename = "H", default, skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
}

impl ScoreRecord {
    /// Derive precision/recall/F1 from raw counts
    #[must_use]
    pub fn from_counts(tp: u64, fp: u64, fn_: u64, entropy: Option<f64>) -> Self {
        let (precision, recall, f1) = precision_recall_f1(tp, fp, fn_);
        Self {
            tp,
            fp,
            fn_,
            precision,
            recall,
            f1,
            entropy,
        }
    }
}

/// Precision, recall and F1; each is 0.0 where its denominator is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn precision_recall_f1(tp: u64, fp: u64, fn_: u64) -> (f64, f64, f64) {
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

/// Matrix cells, as `(true, pred)` class names, summed into each count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRule {
    pub tp: Vec<(String, String)>,
    pub fp: Vec<(String, String)>,
    #[serde(rename = "fn")]
    pub fn_: Vec<(String, String)>,
}

/// How a composite class gets its TP/FP/FN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeRule {
    /// Sum the TP, FP and FN of the named primitive classes
    SumOf(Vec<String>),
    /// Sum explicit matrix cells
    Cells(CellRule),
}

/// A named derived class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeMetric {
    pub name: String,
    #[serde(flatten)]
    pub rule: CompositeRule,
}

fn cells(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(t, p)| ((*t).to_string(), (*p).to_string()))
        .collect()
}

impl CompositeMetric {
    /// Composite summing the records of `members`
    pub fn sum_of<I, S>(name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            rule: CompositeRule::SumOf(members.into_iter().map(Into::into).collect()),
        }
    }

    /// `legacy_cds`, `sub_genic`, `genic` over the genic class names.
    ///
    /// `legacy_cds` treats exon/intron confusion as correct. `genic` leaves
    /// the intergenic class out entirely.
    #[must_use]
    pub fn genic_defaults() -> Vec<Self> {
        vec![
            Self {
                name: "legacy_cds".to_string(),
                rule: CompositeRule::Cells(CellRule {
                    tp: cells(&[
                        ("exon", "exon"),
                        ("intron", "intron"),
                        ("exon", "intron"),
                        ("intron", "exon"),
                    ]),
                    fp: cells(&[
                        ("ig", "exon"),
                        ("ig", "intron"),
                        ("utr", "exon"),
                        ("utr", "intron"),
                    ]),
                    fn_: cells(&[
                        ("exon", "ig"),
                        ("intron", "ig"),
                        ("exon", "utr"),
                        ("intron", "utr"),
                    ]),
                }),
            },
            Self::sum_of("sub_genic", ["exon", "intron"]),
            Self::sum_of("genic", ["utr", "exon", "intron"]),
        ]
    }

    /// Replace class names with indices into `classes`
    ///
    /// # Errors
    ///
    /// Returns `ClassSetError::UnknownClass` for a name not in `classes`.
    pub fn resolve(&self, classes: &ClassSet) -> Result<ResolvedComposite, ClassSetError> {
        let resolve_cells = |pairs: &[(String, String)]| {
            pairs
                .iter()
                .map(|(t, p)| Ok((classes.index_of(t)?, classes.index_of(p)?)))
                .collect::<Result<Vec<_>, ClassSetError>>()
        };
        let rule = match &self.rule {
            CompositeRule::SumOf(members) => ResolvedRule::SumOf(
                members
                    .iter()
                    .map(|m| classes.index_of(m))
                    .collect::<Result<_, _>>()?,
            ),
            CompositeRule::Cells(rule) => ResolvedRule::Cells {
                tp: resolve_cells(&rule.tp)?,
                fp: resolve_cells(&rule.fp)?,
                fn_: resolve_cells(&rule.fn_)?,
            },
        };
        Ok(ResolvedComposite {
            name: self.name.clone(),
            rule,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ResolvedRule {
    SumOf(Vec<usize>),
    Cells {
        tp: Vec<(usize, usize)>,
        fp: Vec<(usize, usize)>,
        fn_: Vec<(usize, usize)>,
    },
}

/// A composite whose class references have been checked against a class set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedComposite {
    name: String,
    rule: ResolvedRule,
}

impl ResolvedComposite {
    /// Genic defaults with indices into [`ClassSet::genic`]
    pub(crate) fn genic_defaults() -> Vec<Self> {
        const IG: usize = 0;
        const UTR: usize = 1;
        const EXON: usize = 2;
        const INTRON: usize = 3;
        vec![
            Self {
                name: "legacy_cds".to_string(),
                rule: ResolvedRule::Cells {
                    tp: vec![(EXON, EXON), (INTRON, INTRON), (EXON, INTRON), (INTRON, EXON)],
                    fp: vec![(IG, EXON), (IG, INTRON), (UTR, EXON), (UTR, INTRON)],
                    fn_: vec![(EXON, IG), (INTRON, IG), (EXON, UTR), (INTRON, UTR)],
                },
            },
            Self {
                name: "sub_genic".to_string(),
                rule: ResolvedRule::SumOf(vec![EXON, INTRON]),
            },
            Self {
                name: "genic".to_string(),
                rule: ResolvedRule::SumOf(vec![UTR, EXON, INTRON]),
            },
        ]
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, cm: &ConfusionMatrix, primitives: &[ScoreRecord]) -> ScoreRecord {
        let (tp, fp, fn_) = match &self.rule {
            ResolvedRule::SumOf(members) => members.iter().fold((0, 0, 0), |(tp, fp, fn_), &m| {
                let r = &primitives[m];
                (tp + r.tp, fp + r.fp, fn_ + r.fn_)
            }),
            ResolvedRule::Cells { tp, fp, fn_ } => {
                let sum = |cells: &[(usize, usize)]| -> u64 {
                    cells.iter().map(|&(t, p)| cm.get(t, p)).sum()
                };
                (sum(tp), sum(fp), sum(fn_))
            }
        };
        ScoreRecord::from_counts(tp, fp, fn_, None)
    }
}

/// Score every class of `classes`, then every composite in order
#[must_use]
pub fn score_classes(
    cm: &ConfusionMatrix,
    uncertainty: &UncertaintyLog,
    classes: &ClassSet,
    composites: &[ResolvedComposite],
) -> ClassScores {
    let primitives: Vec<ScoreRecord> = (0..classes.len())
        .map(|c| {
            ScoreRecord::from_counts(
                cm.true_positives(c),
                cm.false_positives(c),
                cm.false_negatives(c),
                Some(uncertainty.mean(c)),
            )
        })
        .collect();

    let mut scores: ClassScores = classes
        .iter()
        .map(ToString::to_string)
        .zip(primitives.iter().copied())
        .collect();
    for composite in composites {
        scores.insert(composite.name.clone(), composite.score(cm, &primitives));
    }
    scores
}

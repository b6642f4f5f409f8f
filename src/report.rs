//! Report generation for evaluation results.
//!
//! Builds three tables per metric group:
//! - raw confusion matrix
//! - row-normalized confusion matrix
//! - F1 summary (normalized entropy, precision, recall, F1)
//!
//! Tables are printed as ASCII, exported as CSV, and the final scores can be
//! rendered as a JSON document.

use crate::confusion::ConfusionAccumulator;
use crate::runner::{Evaluation, EvaluationResults};
use crate::scores::ClassScores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use tabled::builder::Builder;
use tabled::settings::Style;
use thiserror::Error;
use tracing::info;

/// Errors that can occur while writing reports
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// A named table of pre-formatted cells, header row first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTable {
    pub name: &'static str,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    /// Render as an ASCII table
    #[must_use]
    pub fn to_ascii(&self) -> String {
        let mut table = Builder::from(self.rows.clone()).build();
        table.with(Style::ascii());
        table.to_string()
    }

    fn write_rows<W: std::io::Write>(
        &self,
        writer: &mut csv::Writer<W>,
    ) -> Result<(), ReportError> {
        for row in &self.rows {
            writer.write_record(row)?;
        }
        Ok(())
    }

    /// Render as CSV, one line per row
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be encoded.
    pub fn to_csv(&self) -> Result<String, ReportError> {
        let mut writer = csv_writer().from_writer(Vec::new());
        self.write_rows(&mut writer)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write as CSV to `path`, replacing any existing file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_csv(&self, path: &Path) -> Result<(), ReportError> {
        let mut writer = csv_writer().from_path(path)?;
        self.write_rows(&mut writer)?;
        writer.flush().map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn csv_writer() -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder.terminator(csv::Terminator::Any(b'\n'));
    builder
}

/// Confusion matrix, normalized confusion matrix and F1 summary tables
#[must_use]
pub fn prep_tables(acc: &ConfusionAccumulator, scores: &ClassScores) -> Vec<ReportTable> {
    let names = acc.classes().names();

    let header: Vec<String> = std::iter::once(String::new())
        .chain(names.iter().map(|n| format!("{n}_pred")))
        .collect();

    let mut cm = vec![header.clone()];
    for (name, row) in names.iter().zip(acc.matrix().counts().rows()) {
        cm.push(
            std::iter::once(format!("{name}_ref"))
                .chain(row.iter().map(ToString::to_string))
                .collect(),
        );
    }

    let mut normalized = vec![header];
    for (name, row) in names.iter().zip(acc.matrix().normalized().rows()) {
        normalized.push(
            std::iter::once(format!("{name}_ref"))
                .chain(row.iter().map(|v| format!("{v:.4}")))
                .collect(),
        );
    }

    let mut summary = vec![["", "norm. H", "Precision", "Recall", "F1-Score"]
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()];
    for (i, (name, record)) in scores.iter().enumerate() {
        if i == names.len() {
            summary.push(vec![String::new(); 5]);
        }
        let entropy = record
            .entropy
            .map_or_else(String::new, |h| format!("{h:.4}"));
        summary.push(vec![
            name.clone(),
            entropy,
            format!("{:.4}", record.precision),
            format!("{:.4}", record.recall),
            format!("{:.4}", record.f1),
        ]);
    }

    vec![
        ReportTable {
            name: "confusion_matrix",
            rows: cm,
        },
        ReportTable {
            name: "normalized_confusion_matrix",
            rows: normalized,
        },
        ReportTable {
            name: "F1_summary",
            rows: summary,
        },
    ]
}

/// All tables as ASCII plus the total accuracy line
#[must_use]
pub fn render(acc: &ConfusionAccumulator) -> String {
    let scores = acc.scores();
    let mut output = String::new();
    for table in prep_tables(acc, &scores) {
        writeln!(output).ok();
        writeln!(output, "{}", table.name).ok();
        writeln!(output, "{}", table.to_ascii()).ok();
    }
    writeln!(
        output,
        "Total acc: {:.4}",
        acc.matrix().total_accuracy()
    )
    .ok();
    output
}

/// Print all tables of one accumulator to stdout
pub fn print_results(acc: &ConfusionAccumulator) {
    print!("{}", render(acc));
}

/// Write `<table>.csv` for every table into `dir`, creating it if needed
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be written.
pub fn export_csvs(acc: &ConfusionAccumulator, dir: &Path) -> Result<(), ReportError> {
    std::fs::create_dir_all(dir).map_err(|source| ReportError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let scores = acc.scores();
    for table in prep_tables(acc, &scores) {
        let path = dir.join(format!("{}.csv", table.name));
        table.write_csv(&path)?;
        info!(path = %path.display(), "Exported table");
    }
    Ok(())
}

/// Export every metric group of a run into `dir/<group>/`
///
/// # Errors
///
/// Returns an error if any file cannot be written.
pub fn export_evaluation(evaluation: &Evaluation, dir: &Path) -> Result<(), ReportError> {
    for (group, acc) in evaluation.groups() {
        export_csvs(acc, &dir.join(group))?;
    }
    Ok(())
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Framework version
    pub framework_version: String,
    /// Number of batches evaluated
    pub batches: usize,
    /// Total accuracy per metric group
    pub total_accuracy: indexmap::IndexMap<String, f64>,
}

/// Final scores of a run, ready for serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metadata: ReportMetadata,
    pub results: EvaluationResults,
}

impl EvaluationReport {
    #[must_use]
    pub fn from_evaluation(evaluation: &Evaluation) -> Self {
        Self {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                batches: evaluation.batches,
                total_accuracy: evaluation
                    .groups()
                    .into_iter()
                    .map(|(group, acc)| (group.to_string(), acc.matrix().total_accuracy()))
                    .collect(),
            },
            results: evaluation.results(),
        }
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn accumulator(t: &[usize], p: &[usize]) -> ConfusionAccumulator {
        let one_hot = |indices: &[usize]| {
            let mut arr = Array2::<f32>::zeros((indices.len(), 4));
            for (row, &i) in indices.iter().enumerate() {
                arr[[row, i]] = 1.0;
            }
            arr
        };
        let mut acc = ConfusionAccumulator::genic();
        acc.count_and_calculate_one_batch(
            one_hot(t).into_dyn().view(),
            one_hot(p).into_dyn().view(),
            Array1::<f32>::ones(t.len()).into_dyn().view(),
        )
        .unwrap();
        acc
    }

    fn scenario() -> ConfusionAccumulator {
        accumulator(&[0, 0, 1, 2, 2, 3], &[0, 1, 1, 2, 3, 3])
    }

    #[test]
    fn test_confusion_matrix_table() {
        let acc = scenario();
        let tables = prep_tables(&acc, &acc.scores());
        let cm = &tables[0];

        assert_eq!(cm.name, "confusion_matrix");
        assert_eq!(cm.rows[0], ["", "ig_pred", "utr_pred", "exon_pred", "intron_pred"]);
        assert_eq!(cm.rows[1], ["ig_ref", "1", "1", "0", "0"]);
        assert_eq!(cm.rows.len(), 5);
    }

    #[test]
    fn test_normalized_table_four_decimals() {
        let acc = scenario();
        let tables = prep_tables(&acc, &acc.scores());
        assert_eq!(tables[1].rows[1][1], "0.5000");
    }

    #[test]
    fn test_summary_separator_before_composites() {
        let acc = scenario();
        let tables = prep_tables(&acc, &acc.scores());
        let summary = &tables[2].rows;

        // header + 4 primitives + separator + 3 composites
        assert_eq!(summary.len(), 9);
        assert!(summary[5].iter().all(String::is_empty));
        assert_eq!(summary[6][0], "legacy_cds");
        assert_eq!(summary[6][1], "");
        assert_eq!(summary[3], ["exon", "0.0000", "1.0000", "0.5000", "0.6667"]);
    }

    #[test]
    fn test_summary_without_composites_has_no_separator() {
        let acc = ConfusionAccumulator::phase();
        let tables = prep_tables(&acc, &acc.scores());
        assert_eq!(tables[2].rows.len(), 5);
        assert_eq!(tables[2].rows[1][1], "NaN");
    }

    #[test]
    fn test_render_includes_total_accuracy() {
        let text = render(&scenario());
        assert!(text.contains("F1_summary"));
        assert!(text.contains("Total acc: 0.6667"));
    }

    #[test]
    fn test_csv_quotes_commas() {
        let table = ReportTable {
            name: "t",
            rows: vec![vec!["a,b".to_string(), "c".to_string()]],
        };
        assert_eq!(table.to_csv().unwrap(), "\"a,b\",c\n");
    }

    #[test]
    fn test_csv_quotes_carriage_return() {
        let table = ReportTable {
            name: "t",
            rows: vec![vec!["a\rb".to_string(), "c".to_string()]],
        };
        assert_eq!(table.to_csv().unwrap(), "\"a\rb\",c\n");
    }

    #[test]
    fn test_csv_blank_separator_row() {
        let acc = scenario();
        let tables = prep_tables(&acc, &acc.scores());
        let csv = tables[2].to_csv().unwrap();
        assert!(csv.starts_with(",norm. H,Precision,Recall,F1-Score\n"));
        assert!(csv.contains("\n,,,,\n"));
    }

    #[test]
    fn test_export_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("metrics");
        export_csvs(&scenario(), &out).unwrap();

        for name in ["confusion_matrix", "normalized_confusion_matrix", "F1_summary"] {
            assert!(out.join(format!("{name}.csv")).exists());
        }
        let cm = std::fs::read_to_string(out.join("confusion_matrix.csv")).unwrap();
        assert!(cm.starts_with(",ig_pred,utr_pred,exon_pred,intron_pred\n"));
    }
}

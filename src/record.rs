//! Run history: logs, per-iteration metrics, run metadata, and durable
//! persistence.
//!
//! The optimizers and the evaluator report everything they do to a
//! [`ResultSink`]. Metrics accumulate in an uncommitted iteration until
//! [`ResultSink::commit_iteration`] flushes it to the append-only history;
//! committed records are never mutated afterwards, so a run that terminates
//! early still retains its full history.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::mem;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::evaluation::Evaluation;

/// A metric or metadata value attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
    Text(String),
}

impl MetricValue {
    /// The scalar value, if this is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    /// The vector value, if this is a vector.
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            MetricValue::Vector(values) => Some(values),
            _ => None,
        }
    }

    /// The text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetricValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Scalar(value)
    }
}

impl From<&Array1<f64>> for MetricValue {
    fn from(value: &Array1<f64>) -> Self {
        MetricValue::Vector(value.to_vec())
    }
}

impl From<&Array2<f64>> for MetricValue {
    fn from(value: &Array2<f64>) -> Self {
        MetricValue::Matrix(value.rows().into_iter().map(|row| row.to_vec()).collect())
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// Provenance note for one evaluation reported by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationNote {
    /// Evaluation id, absent for failures without an assigned id.
    pub id: Option<u64>,

    /// Free-text provenance label of the batch (e.g. `"jacobi-matrix"`).
    pub tag: String,

    /// Simulation runtime in seconds, when known.
    pub runtime: Option<f64>,

    /// Whether the evaluation succeeded.
    pub success: bool,

    /// Failure reason for errored evaluations.
    pub reason: Option<String>,
}

/// Metrics and evaluation notes of one committed optimizer iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Named metrics of this iteration.
    pub metrics: BTreeMap<String, MetricValue>,

    /// Every evaluation that occurred during this iteration.
    pub evaluations: Vec<EvaluationNote>,
}

/// Sink for logs, metrics and iteration snapshots produced during a
/// calibration run.
pub trait ResultSink {
    /// Append a log line.
    fn log(&mut self, text: &str);

    /// Record a metric scoped to the current uncommitted iteration. Adding a
    /// metric under an existing name overwrites it.
    fn add_metric(&mut self, name: &str, value: MetricValue);

    /// Record run-level metadata.
    fn add_run_metadata(&mut self, name: &str, value: MetricValue);

    /// Record provenance notes for a batch of evaluations.
    fn add_evaluations(&mut self, evaluations: &[Evaluation], tag: &str);

    /// Flush and durably persist the current iteration, then clear it.
    fn commit_iteration(&mut self);
}

/// In-memory run record with optional JSON persistence.
///
/// When constructed with a path, the whole record is rewritten on every
/// committed iteration, so an interrupted run leaves its history on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunRecord {
    iterations: Vec<IterationRecord>,
    current: IterationRecord,
    metadata: BTreeMap<String, MetricValue>,
    log_entries: Vec<String>,

    #[serde(skip)]
    path: Option<PathBuf>,
}

impl RunRecord {
    /// Create an in-memory record without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record persisted as JSON to the given path on every commit.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Number of committed iterations.
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    /// The committed iteration history.
    pub fn iterations(&self) -> &[IterationRecord] {
        &self.iterations
    }

    /// Run-level metadata.
    pub fn metadata(&self) -> &BTreeMap<String, MetricValue> {
        &self.metadata
    }

    /// All log lines, oldest first.
    pub fn log_entries(&self) -> &[String] {
        &self.log_entries
    }

    /// A metric of a committed iteration.
    pub fn metric(&self, iteration: usize, name: &str) -> Option<&MetricValue> {
        self.iterations.get(iteration)?.metrics.get(name)
    }

    /// A metric of the most recently committed iteration.
    pub fn last_metric(&self, name: &str) -> Option<&MetricValue> {
        self.iterations.last()?.metrics.get(name)
    }

    /// Write the record as JSON to its configured path, if any.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a previously persisted record. The loaded record keeps the path,
    /// so further commits continue persisting to the same file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut record: RunRecord = serde_json::from_reader(BufReader::new(file))?;
        record.path = Some(path.as_ref().to_path_buf());
        Ok(record)
    }
}

impl ResultSink for RunRecord {
    fn log(&mut self, text: &str) {
        tracing::info!(target: "simfit", "{}", text);
        self.log_entries.push(text.to_string());
    }

    fn add_metric(&mut self, name: &str, value: MetricValue) {
        self.current.metrics.insert(name.to_string(), value);
    }

    fn add_run_metadata(&mut self, name: &str, value: MetricValue) {
        self.metadata.insert(name.to_string(), value);
    }

    fn add_evaluations(&mut self, evaluations: &[Evaluation], tag: &str) {
        for evaluation in evaluations {
            let note = match evaluation {
                Evaluation::Success(measurement) => EvaluationNote {
                    id: Some(measurement.id),
                    tag: tag.to_string(),
                    runtime: Some(measurement.runtime),
                    success: true,
                    reason: None,
                },
                Evaluation::Error(failure) => EvaluationNote {
                    id: None,
                    tag: tag.to_string(),
                    runtime: None,
                    success: false,
                    reason: Some(failure.reason.clone()),
                },
            };
            self.current.evaluations.push(note);
        }
    }

    fn commit_iteration(&mut self) {
        self.iterations.push(mem::take(&mut self.current));
        if let Err(err) = self.save() {
            tracing::warn!(target: "simfit", "failed to persist run record: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_metrics_are_scoped_to_the_uncommitted_iteration() {
        let mut record = RunRecord::new();

        record.add_metric("residualnorm", 12.5.into());
        assert_eq!(record.iteration_count(), 0);
        assert_eq!(record.metric(0, "residualnorm"), None);

        record.commit_iteration();
        assert_eq!(record.iteration_count(), 1);
        assert_eq!(
            record.metric(0, "residualnorm"),
            Some(&MetricValue::Scalar(12.5))
        );

        // The next iteration starts empty.
        record.add_metric("residualnorm", 3.0.into());
        record.commit_iteration();
        assert_eq!(
            record.metric(0, "residualnorm"),
            Some(&MetricValue::Scalar(12.5))
        );
        assert_eq!(
            record.metric(1, "residualnorm"),
            Some(&MetricValue::Scalar(3.0))
        );
    }

    #[test]
    fn test_metric_conversions() {
        let vector: MetricValue = (&array![1.0, 2.0]).into();
        assert_eq!(vector.as_vector(), Some([1.0, 2.0].as_slice()));

        let matrix: MetricValue = (&array![[1.0, 2.0], [3.0, 4.0]]).into();
        assert_eq!(
            matrix,
            MetricValue::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]])
        );

        let scalar: MetricValue = 4.2.into();
        assert_eq!(scalar.as_scalar(), Some(4.2));
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = std::env::temp_dir().join("simfit_record_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("run.json");

        let mut record = RunRecord::with_path(&path);
        record.add_run_metadata("epsilon", 1e-4.into());
        record.add_metric("parameters", (&array![1.0, 2.0]).into());
        record.log("first iteration");
        record.commit_iteration();

        let loaded = RunRecord::load(&path).unwrap();
        assert_eq!(loaded.iteration_count(), 1);
        assert_eq!(
            loaded.metric(0, "parameters"),
            Some(&MetricValue::Vector(vec![1.0, 2.0]))
        );
        assert_eq!(
            loaded.metadata().get("epsilon"),
            Some(&MetricValue::Scalar(1e-4))
        );
        assert_eq!(loaded.log_entries(), ["first iteration"]);

        std::fs::remove_file(&path).unwrap();
    }
}

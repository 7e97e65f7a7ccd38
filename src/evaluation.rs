//! Simulation run results: measured sample series and the tagged
//! success/error union every consumer must match on.
//!
//! A successful run yields a [`Measurement`]: a [`SampleSeries`] (values on
//! an ordered time axis at a fixed set of probe positions) plus the physical
//! parameter vector it was produced with. Since different runs may use
//! different adaptive time stepping, series are compared by resampling one
//! onto the other's grid with piecewise-linear interpolation.

use crate::error::{Result, SimFitError};
use ndarray::Array1;

/// Tolerance for comparing probe positions of two series.
const POSITION_TOLERANCE: f64 = 1e-9;

/// Values measured on an ordered time axis at a fixed set of probe positions.
///
/// `data[t][p]` is the value at time index `t` and position index `p`. A
/// scalar time series is a series with a single probe position.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries {
    times: Vec<f64>,
    positions: Vec<f64>,
    data: Vec<Vec<f64>>,
}

impl SampleSeries {
    /// Create a series from a time axis, probe positions and per-time rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the axes are empty, the time axis is not
    /// strictly increasing, or the data shape does not match the axes.
    pub fn new(times: Vec<f64>, positions: Vec<f64>, data: Vec<Vec<f64>>) -> Result<Self> {
        if times.is_empty() || positions.is_empty() {
            return Err(SimFitError::DimensionMismatch(
                "sample series needs at least one time and one position".to_string(),
            ));
        }

        if times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SimFitError::InvalidState(
                "time axis must be strictly increasing".to_string(),
            ));
        }

        if data.len() != times.len() || data.iter().any(|row| row.len() != positions.len()) {
            return Err(SimFitError::DimensionMismatch(format!(
                "expected {} rows of {} values",
                times.len(),
                positions.len()
            )));
        }

        Ok(Self {
            times,
            positions,
            data,
        })
    }

    /// Create a scalar series: one value per time, single probe position.
    pub fn scalar(times: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        let data = values.into_iter().map(|v| vec![v]).collect();
        Self::new(times, vec![0.0], data)
    }

    /// The time axis.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// The probe positions (the non-time axis).
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Total number of stored values.
    pub fn len(&self) -> usize {
        self.times.len() * self.positions.len()
    }

    /// Whether the series holds no values. A constructed series never is.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stored values as a flat vector, row-major over times then
    /// positions.
    pub fn flat(&self) -> Array1<f64> {
        self.data.iter().flatten().copied().collect()
    }

    /// Value at one probe position, linearly interpolated along the time
    /// axis and clamped to the nearest sample outside the covered range.
    fn value_at(&self, position_index: usize, time: f64) -> f64 {
        let first = self.times[0];
        let last = self.times[self.times.len() - 1];

        if time <= first {
            return self.data[0][position_index];
        }
        if time >= last {
            return self.data[self.times.len() - 1][position_index];
        }

        // Index of the first time strictly greater than `time`; the probes
        // above guarantee 1 <= idx <= len-1.
        let idx = self.times.partition_point(|&t| t <= time);
        let (t_lower, t_upper) = (self.times[idx - 1], self.times[idx]);

        if t_lower == time {
            return self.data[idx - 1][position_index];
        }

        let fraction = (time - t_lower) / (t_upper - t_lower);
        (1.0 - fraction) * self.data[idx - 1][position_index]
            + fraction * self.data[idx][position_index]
    }

    /// This series' data reinterpolated onto the target's sampling grid,
    /// returned as a flat vector in the target's layout.
    ///
    /// # Errors
    ///
    /// Fails with an incompatible-format error when the probe positions of
    /// the two series are not equal (within tolerance), since no mapping
    /// between them exists.
    pub fn resampled_to(&self, target: &SampleSeries) -> Result<Array1<f64>> {
        if self.positions.len() != target.positions.len()
            || self
                .positions
                .iter()
                .zip(target.positions.iter())
                .any(|(a, b)| (a - b).abs() > POSITION_TOLERANCE)
        {
            return Err(SimFitError::IncompatibleFormat(
                "probe positions of the two series differ".to_string(),
            ));
        }

        let mut values = Vec::with_capacity(target.len());
        for &time in &target.times {
            for p in 0..self.positions.len() {
                values.push(self.value_at(p, time));
            }
        }

        Ok(Array1::from_vec(values))
    }
}

/// The result of one successful simulation run.
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Evaluation id assigned by the evaluator, unique within a run.
    pub id: u64,

    /// Wall-clock runtime of the simulation, in seconds.
    pub runtime: f64,

    /// The physical parameter vector the run was produced with.
    pub parameters: Array1<f64>,

    /// The measured data.
    pub series: SampleSeries,
}

impl Measurement {
    /// The measured values as a flat vector.
    pub fn flat(&self) -> Array1<f64> {
        self.series.flat()
    }

    /// Measurement dimension (flat vector length).
    pub fn dimension(&self) -> usize {
        self.series.len()
    }

    /// This measurement's data reinterpolated onto the target's grid.
    pub fn resampled_to(&self, target: &Measurement) -> Result<Array1<f64>> {
        self.series.resampled_to(&target.series)
    }
}

/// Why a simulation run produced no usable measurement.
#[derive(Debug, Clone)]
pub struct EvaluationFailure {
    /// Explanatory reason; never numeric data.
    pub reason: String,

    /// The physical parameter vector, when it was known at failure time.
    pub parameters: Option<Array1<f64>>,
}

/// The tagged result of one simulation run.
///
/// Every consumer must match both arms; the error arm exposes only an
/// explanatory reason and must never be treated as measurement data.
#[derive(Debug, Clone)]
pub enum Evaluation {
    /// The run finished and produced a measurement.
    Success(Measurement),

    /// The run failed or produced unusable output.
    Error(EvaluationFailure),
}

impl Evaluation {
    /// Shorthand for constructing an error evaluation.
    pub fn error(reason: impl Into<String>, parameters: Option<Array1<f64>>) -> Self {
        Evaluation::Error(EvaluationFailure {
            reason: reason.into(),
            parameters,
        })
    }

    /// The measurement, if this is a success.
    pub fn success(&self) -> Option<&Measurement> {
        match self {
            Evaluation::Success(measurement) => Some(measurement),
            Evaluation::Error(_) => None,
        }
    }

    /// The failure, if this is an error.
    pub fn failure(&self) -> Option<&EvaluationFailure> {
        match self {
            Evaluation::Success(_) => None,
            Evaluation::Error(failure) => Some(failure),
        }
    }

    /// Whether this is the error arm.
    pub fn is_error(&self) -> bool {
        matches!(self, Evaluation::Error(_))
    }
}

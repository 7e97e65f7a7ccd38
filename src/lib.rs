//! # simfit-rs
//!
//! `simfit-rs` calibrates unknown physical model parameters by iteratively
//! driving an expensive, black-box simulation to match observed
//! measurements, using nonlinear least squares.
//!
//! The library provides:
//! - Finite-difference Jacobian estimation over batched evaluations
//! - Gauss-Newton and Levenberg-Marquardt iteration loops with
//!   per-iteration statistical diagnostics (variance, covariance,
//!   correlation, standard errors, confidence intervals)
//! - A family of batched line searches with a sufficient-decrease guarantee
//! - A caching evaluator deduplicating tolerance-equal parameter vectors
//!   in front of a pluggable simulation backend
//! - A parameter system mapping between unconstrained optimization space
//!   and bounded physical space
//!
//! The simulation itself stays behind the [`SimulationBackend`] trait: the
//! core only submits batches of parameter vectors and consumes the tagged
//! success/error results, so local process launchers or cluster schedulers
//! plug in without touching the calibration logic.
//!
//! ## Basic Usage
//!
//! ```
//! use ndarray::{array, Array1};
//! use simfit_rs::{
//!     BacktrackingLineSearch, BatchEvaluator, Evaluate, FunctionBackend, GaussNewton,
//!     Parameter, ParameterManager, RunRecord, SampleSeries,
//! };
//!
//! // Model: two samples of a line, parameters (slope, intercept).
//! let model = |x: &Array1<f64>| {
//!     SampleSeries::scalar(vec![0.0, 1.0], vec![x[1], x[0] + x[1]]).map_err(|e| e.to_string())
//! };
//!
//! let mut manager = ParameterManager::new();
//! manager.add_parameter(Parameter::direct("slope", 0.5)).unwrap();
//! manager.add_parameter(Parameter::direct("intercept", 0.0)).unwrap();
//!
//! let mut evaluator = BatchEvaluator::new(manager, FunctionBackend::new(model));
//! let mut record = RunRecord::new();
//!
//! // Target produced by the true parameters (2, 1).
//! let target = evaluator
//!     .evaluate(&[array![2.0, 1.0]], false, "target", &mut record)
//!     .unwrap()[0]
//!     .success()
//!     .unwrap()
//!     .clone();
//!
//! let initial = evaluator.manager().initial_array();
//! let optimizer = GaussNewton::new(Box::new(BacktrackingLineSearch::new()))
//!     .with_max_error_ratio(None);
//! let outcome = optimizer.run(&mut evaluator, initial, &target, &mut record).unwrap();
//! assert!(outcome.converged());
//! ```

pub mod error;

// Parameter system
pub mod parameters;

// Evaluation data model and the evaluator contract
pub mod evaluation;
pub mod evaluator;

// Calibration engine
pub mod jacobian;
pub mod linesearch;
pub mod optimizer;

// Run history and result sink
pub mod record;

mod utils;

// Re-exports for convenience
pub use error::{Result, SimFitError};

pub use parameters::{Bounds, Feasibility, Parameter, ParameterManager, Transform};

pub use evaluation::{Evaluation, EvaluationFailure, Measurement, SampleSeries};
pub use evaluator::{BatchEvaluator, BatchRequest, Evaluate, FunctionBackend, SimulationBackend};

pub use jacobian::{Differencing, JacobianEstimate, JacobianEstimator};
pub use linesearch::{
    BacktrackingLineSearch, LineSearch, LineSearchStep, LinearParallelLineSearch,
    LogarithmicParallelLineSearch,
};
pub use optimizer::{CalibrationOutcome, GaussNewton, LevenbergMarquardt, RunStatus};
pub use record::{EvaluationNote, IterationRecord, MetricValue, ResultSink, RunRecord};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Batched, cached dispatch of parameter vectors to a simulation backend.
//!
//! The core never launches simulations itself. It submits batches of
//! parameter vectors to a [`BatchEvaluator`], which transforms them into
//! physical space, serves tolerance-equal repeats from its cache, and hands
//! the remainder to a [`SimulationBackend`] in a single call. Batches are the
//! sole way the core expresses parallelism; whatever concurrency the backend
//! employs stays behind this boundary, and results always come back in
//! request order.

use ndarray::Array1;
use rayon::prelude::*;
use std::time::Instant;

use crate::error::{Result, SimFitError};
use crate::evaluation::{Evaluation, Measurement, SampleSeries};
use crate::parameters::{Feasibility, ParameterManager};
use crate::record::ResultSink;

/// Relative tolerance for matching a requested parameter vector against a
/// cached one.
const CACHE_RELATIVE_TOLERANCE: f64 = 1e-8;

/// One entry of a backend batch: the evaluation id assigned by the evaluator
/// and the physical parameter vector to run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub id: u64,
    pub parameters: Array1<f64>,
}

/// The mechanism that actually runs simulations.
///
/// Implementations may run locally, on a cluster, or in-process; the
/// evaluator only requires that `run_batch` returns one [`Evaluation`] per
/// request, in request order. `acquire`/`release` bracket every dispatch:
/// `release` is guaranteed to run on all exit paths, so implementations can
/// use it to cancel or reap outstanding external work.
pub trait SimulationBackend {
    /// How many runs the backend can usefully execute concurrently.
    fn parallelism(&self) -> usize;

    /// Enter a dispatch scope.
    fn acquire(&mut self) -> Result<()> {
        Ok(())
    }

    /// Leave a dispatch scope, releasing any outstanding external work.
    fn release(&mut self) {}

    /// Run one batch. Must return the same number of evaluations as
    /// requests, in the same order.
    fn run_batch(&mut self, requests: &[BatchRequest]) -> Vec<Evaluation>;
}

/// RAII guard pairing [`SimulationBackend::acquire`] with
/// [`SimulationBackend::release`] on every exit path.
struct BackendScope<'a, B: SimulationBackend + ?Sized> {
    backend: &'a mut B,
}

impl<'a, B: SimulationBackend + ?Sized> BackendScope<'a, B> {
    fn enter(backend: &'a mut B) -> Result<Self> {
        backend.acquire()?;
        Ok(Self { backend })
    }

    fn run(&mut self, requests: &[BatchRequest]) -> Vec<Evaluation> {
        self.backend.run_batch(requests)
    }
}

impl<B: SimulationBackend + ?Sized> Drop for BackendScope<'_, B> {
    fn drop(&mut self) {
        self.backend.release();
    }
}

/// Object-safe evaluation interface consumed by the Jacobian estimator, the
/// line searches and the optimizers.
pub trait Evaluate {
    /// Evaluate a batch of parameter vectors.
    ///
    /// With `transform` set, the vectors are optimization-space and are
    /// mapped through the parameter manager first; otherwise they are taken
    /// as already physical. `tag` labels the batch for provenance in the
    /// result sink. The returned sequence has the same length and order as
    /// `vectors`.
    fn evaluate(
        &mut self,
        vectors: &[Array1<f64>],
        transform: bool,
        tag: &str,
        sink: &mut dyn ResultSink,
    ) -> Result<Vec<Evaluation>>;

    /// Number of registered parameters.
    fn parameter_count(&self) -> usize;

    /// Parallelism hint of the underlying backend.
    fn parallelism(&self) -> usize;

    /// Human-readable counter summary.
    fn statistics(&self) -> String;
}

/// Caching evaluator owning the parameter manager, the backend, and the
/// evaluation cache.
///
/// The cache is an instance-owned field: two evaluators never share cached
/// evaluations, and [`BatchEvaluator::reset`] gives a fresh cache and fresh
/// counters for a new calibration run.
pub struct BatchEvaluator<B: SimulationBackend> {
    manager: ParameterManager,
    backend: B,
    cache: Vec<Evaluation>,
    cache_tolerance: f64,
    total_evaluations: usize,
    cache_hits: usize,
    batches: usize,
    next_id: u64,
}

impl<B: SimulationBackend> BatchEvaluator<B> {
    /// Create an evaluator for the given parameter registry and backend.
    ///
    /// The caller selects the concrete backend from its own configuration;
    /// no environment inspection happens here.
    pub fn new(manager: ParameterManager, backend: B) -> Self {
        Self {
            manager,
            backend,
            cache: Vec::new(),
            cache_tolerance: CACHE_RELATIVE_TOLERANCE,
            total_evaluations: 0,
            cache_hits: 0,
            batches: 0,
            next_id: 0,
        }
    }

    /// Override the relative tolerance used for cache matching.
    pub fn with_cache_tolerance(mut self, tolerance: f64) -> Self {
        self.cache_tolerance = tolerance;
        self
    }

    /// The parameter registry.
    pub fn manager(&self) -> &ParameterManager {
        &self.manager
    }

    /// Total number of evaluations produced by the backend.
    pub fn total_evaluations(&self) -> usize {
        self.total_evaluations
    }

    /// Number of requests served from the cache.
    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    /// Number of dispatch rounds sent to the backend.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Number of cached evaluations.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Clear the cache and all counters for a fresh calibration run.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.total_evaluations = 0;
        self.cache_hits = 0;
        self.batches = 0;
    }

    /// Find a cached successful evaluation with tolerance-equal parameters.
    fn lookup_cache(&self, parameters: &Array1<f64>) -> Option<Evaluation> {
        self.cache
            .iter()
            .find(|entry| match entry {
                Evaluation::Success(measurement) => {
                    vectors_approx_equal(&measurement.parameters, parameters, self.cache_tolerance)
                }
                Evaluation::Error(_) => false,
            })
            .cloned()
    }
}

/// Elementwise relative-tolerance equality of two parameter vectors.
fn vectors_approx_equal(a: &Array1<f64>, b: &Array1<f64>, tolerance: f64) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= tolerance * x.abs().max(y.abs()))
}

impl<B: SimulationBackend> Evaluate for BatchEvaluator<B> {
    fn evaluate(
        &mut self,
        vectors: &[Array1<f64>],
        transform: bool,
        tag: &str,
        sink: &mut dyn ResultSink,
    ) -> Result<Vec<Evaluation>> {
        let mut results: Vec<Option<Evaluation>> = vec![None; vectors.len()];
        let mut pending: Vec<(usize, Array1<f64>)> = Vec::new();

        for (index, vector) in vectors.iter().enumerate() {
            let physical = if transform {
                match self.manager.transformed_parameters(vector)? {
                    Feasibility::Feasible(physical) => physical,
                    Feasibility::Infeasible => {
                        results[index] = Some(Evaluation::error("Infeasible parameters", None));
                        continue;
                    }
                }
            } else {
                if vector.len() != self.manager.len() {
                    return Err(SimFitError::DimensionMismatch(format!(
                        "Expected {} parameters, got {}",
                        self.manager.len(),
                        vector.len()
                    )));
                }
                vector.clone()
            };

            if let Some(hit) = self.lookup_cache(&physical) {
                if let Evaluation::Success(measurement) = &hit {
                    sink.log(&format!("Served evaluation {} from cache", measurement.id));
                }
                self.cache_hits += 1;
                results[index] = Some(hit);
                continue;
            }

            pending.push((index, physical));
        }

        if !pending.is_empty() {
            let requests: Vec<BatchRequest> = pending
                .iter()
                .map(|(_, physical)| {
                    let id = self.next_id;
                    self.next_id += 1;
                    BatchRequest {
                        id,
                        parameters: physical.clone(),
                    }
                })
                .collect();

            let produced = {
                let mut scope = BackendScope::enter(&mut self.backend)?;
                scope.run(&requests)
            };

            if produced.len() != requests.len() {
                return Err(SimFitError::InvalidState(format!(
                    "backend returned {} evaluations for {} requests",
                    produced.len(),
                    requests.len()
                )));
            }

            self.batches += 1;
            self.total_evaluations += produced.len();

            sink.add_evaluations(&produced, tag);
            sink.add_run_metadata(
                "evaluator_totalcount",
                (self.total_evaluations as f64).into(),
            );
            sink.add_run_metadata("evaluator_batches", (self.batches as f64).into());
            sink.add_run_metadata("evaluator_cachehits", (self.cache_hits as f64).into());

            for ((index, _), evaluation) in pending.iter().zip(produced) {
                self.cache.push(evaluation.clone());
                results[*index] = Some(evaluation);
            }
        }

        Ok(results
            .into_iter()
            .map(|slot| slot.expect("every request slot is filled"))
            .collect())
    }

    fn parameter_count(&self) -> usize {
        self.manager.len()
    }

    fn parallelism(&self) -> usize {
        self.backend.parallelism()
    }

    fn statistics(&self) -> String {
        format!(
            "Total count of evaluations: {}\nTaken from cache: {}\nBatches: {}",
            self.total_evaluations, self.cache_hits, self.batches
        )
    }
}

/// In-process backend evaluating a model function, fanning batches out over
/// a rayon thread pool.
///
/// This is the backend used by tests and by callers whose model runs in the
/// same process; process-launching and cluster backends implement
/// [`SimulationBackend`] outside this crate.
pub struct FunctionBackend<F> {
    model: F,
    parallelism: usize,
}

impl<F> FunctionBackend<F>
where
    F: Fn(&Array1<f64>) -> std::result::Result<SampleSeries, String> + Sync,
{
    /// Wrap a model function.
    pub fn new(model: F) -> Self {
        Self {
            model,
            parallelism: rayon::current_num_threads(),
        }
    }

    /// Override the advertised parallelism.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

impl<F> SimulationBackend for FunctionBackend<F>
where
    F: Fn(&Array1<f64>) -> std::result::Result<SampleSeries, String> + Sync,
{
    fn parallelism(&self) -> usize {
        self.parallelism
    }

    fn run_batch(&mut self, requests: &[BatchRequest]) -> Vec<Evaluation> {
        requests
            .par_iter()
            .map(|request| {
                let start = Instant::now();
                match (self.model)(&request.parameters) {
                    Ok(series) => Evaluation::Success(Measurement {
                        id: request.id,
                        runtime: start.elapsed().as_secs_f64(),
                        parameters: request.parameters.clone(),
                        series,
                    }),
                    Err(reason) => Evaluation::error(reason, Some(request.parameters.clone())),
                }
            })
            .collect()
    }
}

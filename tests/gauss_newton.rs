//! Integration tests for the Gauss-Newton calibration loop.

use approx::assert_relative_eq;
use ndarray::{array, Array1};
use simfit_rs::{
    BacktrackingLineSearch, BatchEvaluator, BatchRequest, Evaluate, Evaluation, FunctionBackend,
    GaussNewton, LinearParallelLineSearch, Measurement, MetricValue, Parameter, ParameterManager,
    RunRecord, RunStatus, SampleSeries, SimulationBackend,
};

type Model = fn(&Array1<f64>) -> Result<SampleSeries, String>;

/// Rosenbrock-type residuals: f(x) = [10(x1 - x0²), 1 - x0].
fn rosenbrock(x: &Array1<f64>) -> Result<SampleSeries, String> {
    SampleSeries::scalar(vec![0.0, 1.0], vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])
        .map_err(|e| e.to_string())
}

/// Line model y = a*x + b sampled at x = 0..3.
fn line(p: &Array1<f64>) -> Result<SampleSeries, String> {
    let values = [0.0, 1.0, 2.0, 3.0]
        .iter()
        .map(|x| p[0] * x + p[1])
        .collect();
    SampleSeries::scalar(vec![0.0, 1.0, 2.0, 3.0], values).map_err(|e| e.to_string())
}

fn two_parameter_manager(initial: (f64, f64)) -> ParameterManager {
    let mut manager = ParameterManager::new();
    manager
        .add_parameter(Parameter::direct("x0", initial.0))
        .unwrap();
    manager
        .add_parameter(Parameter::direct("x1", initial.1))
        .unwrap();
    manager
}

fn target_of(
    evaluator: &mut dyn Evaluate,
    record: &mut RunRecord,
    physical: Array1<f64>,
) -> Measurement {
    evaluator
        .evaluate(&[physical], false, "target", record)
        .unwrap()[0]
        .success()
        .expect("target evaluation succeeds")
        .clone()
}

#[test]
fn rosenbrock_converges_within_fifteen_iterations() {
    let manager = two_parameter_manager((-1.2, 1.0));
    let mut evaluator = BatchEvaluator::new(manager, FunctionBackend::new(rosenbrock as Model));
    let mut record = RunRecord::new();

    let target = target_of(&mut evaluator, &mut record, array![1.0, 1.0]);

    // Square problem (two residuals, two parameters): the error-ratio gate
    // has no confidence interval to check, so convergence is reduction-only.
    let optimizer = GaussNewton::new(Box::new(LinearParallelLineSearch::default()))
        .with_max_iterations(15)
        .with_max_error_ratio(None);

    let initial = evaluator.manager().initial_array();
    let outcome = optimizer
        .run(&mut evaluator, initial, &target, &mut record)
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Converged);
    assert!(outcome.iterations <= 15);

    let first = record
        .metric(0, "residualnorm")
        .and_then(MetricValue::as_scalar)
        .unwrap();
    let last = outcome.residual_norm.unwrap();
    assert!(
        last < 1e-4 * first,
        "residual norm {} did not drop below 1e-4 of {}",
        last,
        first
    );
}

#[test]
fn linear_fit_recovers_the_true_parameters() {
    let manager = two_parameter_manager((0.5, 0.0));
    let mut evaluator = BatchEvaluator::new(manager, FunctionBackend::new(line as Model));
    let mut record = RunRecord::new();

    // Four noiseless samples of y = 2x + 1.
    let target = target_of(&mut evaluator, &mut record, array![2.0, 1.0]);

    let optimizer = GaussNewton::new(Box::new(BacktrackingLineSearch::new()));
    let initial = evaluator.manager().initial_array();
    let outcome = optimizer
        .run(&mut evaluator, initial, &target, &mut record)
        .unwrap();

    assert!(outcome.converged());
    assert!(outcome.iterations < 15);
    assert_relative_eq!(outcome.parameters[0], 2.0, epsilon = 1e-6);
    assert_relative_eq!(outcome.parameters[1], 1.0, epsilon = 1e-6);

    // The converging iteration recorded the full statistical diagnostics.
    let last = outcome.iterations - 1;
    for metric in [
        "residuals",
        "residualnorm",
        "parameters",
        "jacobian",
        "variance",
        "covariance",
        "correlation",
        "errors",
        "confidenceinterval",
    ] {
        assert!(
            record.metric(last, metric).is_some(),
            "metric {} missing",
            metric
        );
    }
}

#[test]
fn committed_history_matches_the_outcome() {
    let manager = two_parameter_manager((-1.2, 1.0));
    let mut evaluator = BatchEvaluator::new(manager, FunctionBackend::new(rosenbrock as Model));
    let mut record = RunRecord::new();

    let target = target_of(&mut evaluator, &mut record, array![1.0, 1.0]);

    let optimizer = GaussNewton::new(Box::new(BacktrackingLineSearch::new()))
        .with_max_error_ratio(None);
    let initial = evaluator.manager().initial_array();
    let outcome = optimizer
        .run(&mut evaluator, initial, &target, &mut record)
        .unwrap();

    assert!(outcome.converged());
    assert_eq!(record.iteration_count(), outcome.iterations);

    // Residual norms were committed in order and end below the start.
    let norms: Vec<f64> = (0..record.iteration_count())
        .map(|i| {
            record
                .metric(i, "residualnorm")
                .and_then(MetricValue::as_scalar)
                .unwrap()
        })
        .collect();
    assert!(norms.last().unwrap() < norms.first().unwrap());

    // Every non-terminal iteration carries the accepted step length, and
    // each accepted step satisfied the sufficient-decrease bound at
    // acceptance time (the next iteration's norm equals the accepted one).
    for i in 0..record.iteration_count() - 1 {
        let alpha = record
            .metric(i, "alpha")
            .and_then(MetricValue::as_scalar)
            .unwrap();
        assert!(alpha > 0.0 && alpha <= 1.0);
    }
}

/// Backend delegating to the Rosenbrock model, but erroring every
/// multi-point batch after the first one. Jacobian batches are the only
/// multi-point batches when the optimizer uses a backtracking line search,
/// so the second Jacobian estimate fails while everything else succeeds.
struct SecondJacobianFails {
    multi_batches_seen: usize,
}

impl SimulationBackend for SecondJacobianFails {
    fn parallelism(&self) -> usize {
        1
    }

    fn run_batch(&mut self, requests: &[BatchRequest]) -> Vec<Evaluation> {
        if requests.len() >= 2 {
            self.multi_batches_seen += 1;
            if self.multi_batches_seen > 1 {
                return requests
                    .iter()
                    .map(|r| Evaluation::error("simulation did not finish", Some(r.parameters.clone())))
                    .collect();
            }
        }

        requests
            .iter()
            .map(|request| match rosenbrock(&request.parameters) {
                Ok(series) => Evaluation::Success(Measurement {
                    id: request.id,
                    runtime: 0.0,
                    parameters: request.parameters.clone(),
                    series,
                }),
                Err(reason) => Evaluation::error(reason, Some(request.parameters.clone())),
            })
            .collect()
    }
}

#[test]
fn jacobian_failure_terminates_and_preserves_history() {
    let manager = two_parameter_manager((-1.2, 1.0));
    let mut evaluator = BatchEvaluator::new(
        manager,
        SecondJacobianFails {
            multi_batches_seen: 0,
        },
    );
    let mut record = RunRecord::new();

    let target = target_of(&mut evaluator, &mut record, array![1.0, 1.0]);

    let optimizer = GaussNewton::new(Box::new(BacktrackingLineSearch::new()))
        .with_max_error_ratio(None);
    let initial = evaluator.manager().initial_array();
    let outcome = optimizer
        .run(&mut evaluator, initial, &target, &mut record)
        .unwrap();

    assert_eq!(outcome.status, RunStatus::JacobianFailed);

    // The first iteration completed, was committed, and survived intact.
    assert_eq!(outcome.iterations, 1);
    assert_eq!(record.iteration_count(), 1);
    assert!(record.metric(0, "residualnorm").is_some());
    assert!(record.metric(0, "jacobian").is_some());
}

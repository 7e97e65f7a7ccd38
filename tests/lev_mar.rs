//! Integration tests for the Levenberg-Marquardt calibration loop.

use approx::assert_relative_eq;
use ndarray::{array, Array1};
use simfit_rs::{
    BacktrackingLineSearch, BatchEvaluator, Evaluate, FunctionBackend, LevenbergMarquardt,
    MetricValue, Parameter, ParameterManager, RunRecord, RunStatus, SampleSeries,
};

type Model = fn(&Array1<f64>) -> Result<SampleSeries, String>;

fn rosenbrock(x: &Array1<f64>) -> Result<SampleSeries, String> {
    SampleSeries::scalar(vec![0.0, 1.0], vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])
        .map_err(|e| e.to_string())
}

fn line(p: &Array1<f64>) -> Result<SampleSeries, String> {
    let values = [0.0, 1.0, 2.0, 3.0]
        .iter()
        .map(|x| p[0] * x + p[1])
        .collect();
    SampleSeries::scalar(vec![0.0, 1.0, 2.0, 3.0], values).map_err(|e| e.to_string())
}

fn evaluator_for(model: Model, initial: (f64, f64)) -> BatchEvaluator<FunctionBackend<Model>> {
    let mut manager = ParameterManager::new();
    manager
        .add_parameter(Parameter::direct("x0", initial.0))
        .unwrap();
    manager
        .add_parameter(Parameter::direct("x1", initial.1))
        .unwrap();
    BatchEvaluator::new(manager, FunctionBackend::new(model))
}

#[test]
fn linear_fit_converges_in_one_step() {
    let mut evaluator = evaluator_for(line as Model, (0.5, 0.0));
    let mut record = RunRecord::new();

    let target = evaluator
        .evaluate(&[array![2.0, 1.0]], false, "target", &mut record)
        .unwrap()[0]
        .success()
        .unwrap()
        .clone();

    let optimizer = LevenbergMarquardt::new(Box::new(BacktrackingLineSearch::new()));
    let initial = evaluator.manager().initial_array();
    let outcome = optimizer
        .run(&mut evaluator, initial, &target, &mut record)
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Converged);
    assert_relative_eq!(outcome.parameters[0], 2.0, epsilon = 1e-3);
    assert_relative_eq!(outcome.parameters[1], 1.0, epsilon = 1e-3);
}

#[test]
fn rosenbrock_converges_and_tracks_lambda() {
    let mut evaluator = evaluator_for(rosenbrock as Model, (-1.2, 1.0));
    let mut record = RunRecord::new();

    let target = evaluator
        .evaluate(&[array![1.0, 1.0]], false, "target", &mut record)
        .unwrap()[0]
        .success()
        .unwrap()
        .clone();

    let optimizer = LevenbergMarquardt::new(Box::new(BacktrackingLineSearch::new()))
        .with_max_iterations(15);
    let initial = evaluator.manager().initial_array();
    let outcome = optimizer
        .run(&mut evaluator, initial, &target, &mut record)
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Converged);
    assert!(outcome.iterations <= 15);
    assert_relative_eq!(outcome.parameters[0], 1.0, epsilon = 1e-3);
    assert_relative_eq!(outcome.parameters[1], 1.0, epsilon = 1e-3);

    // Each committed iteration recorded the damping in effect, and the
    // successful run drove it below its initial value.
    let lambdas: Vec<f64> = (0..record.iteration_count())
        .map(|i| {
            record
                .metric(i, "lambda")
                .and_then(MetricValue::as_scalar)
                .unwrap()
        })
        .collect();
    assert_eq!(lambdas[0], 0.01);
    assert!(lambdas.last().unwrap() < &0.01);
}

#[test]
fn scaling_variant_still_converges() {
    let mut evaluator = evaluator_for(line as Model, (0.5, 0.0));
    let mut record = RunRecord::new();

    let target = evaluator
        .evaluate(&[array![2.0, 1.0]], false, "target", &mut record)
        .unwrap()[0]
        .success()
        .unwrap()
        .clone();

    let optimizer = LevenbergMarquardt::new(Box::new(BacktrackingLineSearch::new()))
        .with_scaling(true);
    let initial = evaluator.manager().initial_array();
    let outcome = optimizer
        .run(&mut evaluator, initial, &target, &mut record)
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Converged);
    assert_relative_eq!(outcome.parameters[0], 2.0, epsilon = 1e-2);
    assert_relative_eq!(outcome.parameters[1], 1.0, epsilon = 1e-2);
}

//! Ordered parameter registry and optimization-space to physical-space
//! mapping.

use crate::error::{Result, SimFitError};
use crate::parameters::parameter::{Parameter, ParameterError};
use ndarray::Array1;

/// Outcome of mapping an optimization-space vector into physical space.
///
/// Infeasible vectors (a coordinate outside its transform's domain or outside
/// explicit bounds) yield [`Feasibility::Infeasible`] instead of a physical
/// vector. Consumers must match both arms; the infeasible arm carries no
/// numeric data by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Feasibility {
    /// Every coordinate mapped successfully.
    Feasible(Array1<f64>),

    /// At least one coordinate fell outside its domain.
    Infeasible,
}

impl Feasibility {
    /// The physical vector, or `None` for the infeasible sentinel.
    pub fn feasible(self) -> Option<Array1<f64>> {
        match self {
            Feasibility::Feasible(vector) => Some(vector),
            Feasibility::Infeasible => None,
        }
    }

    /// Whether this is the infeasible sentinel.
    pub fn is_infeasible(&self) -> bool {
        matches!(self, Feasibility::Infeasible)
    }
}

/// Ordered registry of calibration parameters.
///
/// Registration order is significant and fixed: it defines the coordinate
/// order of every parameter vector exchanged with the evaluator and the
/// optimizers.
#[derive(Debug, Clone, Default)]
pub struct ParameterManager {
    parameters: Vec<Parameter>,
}

impl ParameterManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter. Order is significant and fixed thereafter.
    ///
    /// # Errors
    ///
    /// Returns an error when a parameter with the same name is already
    /// registered.
    pub fn add_parameter(&mut self, parameter: Parameter) -> Result<()> {
        if self.parameters.iter().any(|p| p.name() == parameter.name()) {
            return Err(ParameterError::DuplicateName {
                name: parameter.name().to_string(),
            }
            .into());
        }

        self.parameters.push(parameter);
        Ok(())
    }

    /// Number of registered parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether no parameters are registered.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// The registered parameters, in registration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Parameter names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name()).collect()
    }

    /// The optimization-space vector assembled from the registered initial
    /// values.
    pub fn initial_array(&self) -> Array1<f64> {
        self.parameters
            .iter()
            .map(|p| p.initial_optimization_value())
            .collect()
    }

    /// Map an optimization-space vector into physical space.
    ///
    /// Pure function of the registered parameters. Returns the infeasible
    /// sentinel when any coordinate falls outside its transform's domain.
    ///
    /// # Errors
    ///
    /// Returns a dimension error when the vector length does not match the
    /// registered parameter count.
    pub fn transformed_parameters(&self, vector: &Array1<f64>) -> Result<Feasibility> {
        if vector.len() != self.parameters.len() {
            return Err(SimFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.parameters.len(),
                vector.len()
            )));
        }

        let mut physical = Array1::zeros(vector.len());
        for (i, (parameter, value)) in self.parameters.iter().zip(vector.iter()).enumerate() {
            match parameter.to_physical(*value) {
                Some(mapped) => physical[i] = mapped,
                None => return Ok(Feasibility::Infeasible),
            }
        }

        Ok(Feasibility::Feasible(physical))
    }
}

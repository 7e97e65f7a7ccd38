//! Parameter definition and per-coordinate transforms.
//!
//! A `Parameter` describes one unknown of the calibration problem: its name,
//! the physical initial value, optional physical bounds, and the transform
//! connecting the unconstrained optimization space to physical space.

use crate::parameters::bounds::{Bounds, BoundsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when defining parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Bounds error: {0}")]
    Bounds(#[from] BoundsError),

    #[error("Parameter '{name}': initial value {value} violates the configured bounds")]
    InitialOutsideBounds { name: String, value: f64 },

    #[error("Parameter '{name}': logarithmic transform requires a positive value, got {value}")]
    NonPositiveLog { name: String, value: f64 },

    #[error("Parameter '{name}': bounded transform requires finite lower < upper bounds")]
    UnboundedReparameterization { name: String },

    #[error("Parameter '{name}' registered twice")]
    DuplicateName { name: String },
}

/// How an optimization-space coordinate maps to the physical value the
/// simulation consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    /// Optimization space and physical space coincide.
    Direct,

    /// The optimizer works on log10 of the physical value.
    Log,

    /// Minuit-style sine reparameterization onto a finite interval. Every
    /// optimization-space value maps inside the bounds.
    Bounded,
}

/// One unknown of the calibration problem.
///
/// Parameters are immutable once registered with a
/// [`ParameterManager`](crate::parameters::ParameterManager); registration
/// order fixes the coordinate order of every parameter vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    transform: Transform,
    /// Initial value in physical space.
    initial: f64,
    bounds: Bounds,
}

impl Parameter {
    /// Create a new parameter.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the parameter
    /// * `transform` - Transform connecting optimization and physical space
    /// * `initial` - Initial value in physical space
    /// * `lower` - Optional lower physical bound
    /// * `upper` - Optional upper physical bound
    ///
    /// # Returns
    ///
    /// The parameter, or an error when the definition is inconsistent (e.g.
    /// a non-positive initial for a log transform, or a bounded transform
    /// without finite bounds).
    pub fn new(
        name: &str,
        transform: Transform,
        initial: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<Self, ParameterError> {
        let bounds = Bounds::new(lower, upper)?;

        if transform == Transform::Bounded && !bounds.is_fully_bounded() {
            return Err(ParameterError::UnboundedReparameterization {
                name: name.to_string(),
            });
        }

        if transform == Transform::Log && initial <= 0.0 {
            return Err(ParameterError::NonPositiveLog {
                name: name.to_string(),
                value: initial,
            });
        }

        if !bounds.contains(initial) {
            return Err(ParameterError::InitialOutsideBounds {
                name: name.to_string(),
                value: initial,
            });
        }

        Ok(Self {
            name: name.to_string(),
            transform,
            initial,
            bounds,
        })
    }

    /// An unbounded identity parameter.
    pub fn direct(name: &str, initial: f64) -> Self {
        Self {
            name: name.to_string(),
            transform: Transform::Direct,
            initial,
            bounds: Bounds::unbounded(),
        }
    }

    /// A log10-transformed parameter with optional physical bounds.
    pub fn log(
        name: &str,
        initial: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<Self, ParameterError> {
        Self::new(name, Transform::Log, initial, lower, upper)
    }

    /// A sine-reparameterized parameter confined to `[lower, upper]`.
    pub fn bounded(name: &str, initial: f64, lower: f64, upper: f64) -> Result<Self, ParameterError> {
        Self::new(name, Transform::Bounded, initial, Some(lower), Some(upper))
    }

    /// Name of the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The transform kind.
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Initial value in physical space.
    pub fn initial_value(&self) -> f64 {
        self.initial
    }

    /// The physical bounds.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The optimization-space coordinate corresponding to the registered
    /// physical initial value.
    pub fn initial_optimization_value(&self) -> f64 {
        match self.transform {
            Transform::Direct => self.initial,
            Transform::Log => self.initial.log10(),
            Transform::Bounded => {
                let scaled = 2.0 * (self.initial - self.bounds.lower()) / self.bounds.span() - 1.0;
                scaled.clamp(-1.0, 1.0).asin()
            }
        }
    }

    /// Map one optimization-space coordinate into physical space.
    ///
    /// Returns `None` when the coordinate is infeasible: non-finite input, a
    /// physical value outside the bounds, or a non-finite physical value.
    pub fn to_physical(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }

        let physical = match self.transform {
            Transform::Direct => value,
            Transform::Log => 10f64.powf(value),
            Transform::Bounded => {
                self.bounds.lower() + (value.sin() + 1.0) * self.bounds.span() / 2.0
            }
        };

        if !physical.is_finite() || !self.bounds.contains(physical) {
            return None;
        }

        Some(physical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_direct_parameter_roundtrip() {
        let param = Parameter::direct("porosity", 0.2);
        assert_eq!(param.name(), "porosity");
        assert_eq!(param.initial_optimization_value(), 0.2);
        assert_eq!(param.to_physical(0.2), Some(0.2));
    }

    #[test]
    fn test_direct_parameter_bounds() {
        let param =
            Parameter::new("porosity", Transform::Direct, 0.2, Some(0.0), Some(1.0)).unwrap();
        assert_eq!(param.to_physical(0.5), Some(0.5));
        assert_eq!(param.to_physical(1.5), None);
        assert_eq!(param.to_physical(-0.1), None);
        assert_eq!(param.to_physical(f64::NAN), None);
    }

    #[test]
    fn test_log_parameter() {
        let param = Parameter::log("permeability", 1e-10, None, None).unwrap();
        assert_relative_eq!(param.initial_optimization_value(), -10.0, epsilon = 1e-12);
        assert_relative_eq!(
            param.to_physical(param.initial_optimization_value()).unwrap(),
            1e-10,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_log_parameter_outside_bounds_is_infeasible() {
        let param = Parameter::log("rate", 0.5, Some(1e-3), Some(1.0)).unwrap();

        // Optimization value corresponding to a physical value of 2
        let outside = 2f64.log10();
        assert_eq!(param.to_physical(outside), None);

        // Inside the bounds the mapping succeeds
        assert!(param.to_physical(0.5f64.log10()).is_some());
    }

    #[test]
    fn test_log_parameter_rejects_nonpositive_initial() {
        assert!(Parameter::log("rate", 0.0, None, None).is_err());
        assert!(Parameter::log("rate", -1.0, None, None).is_err());
    }

    #[test]
    fn test_bounded_parameter_stays_within_bounds() {
        let param = Parameter::bounded("saturation", 0.4, 0.0, 1.0).unwrap();

        for x in [-10.0, -1.0, 0.0, 0.7, 3.0, 100.0] {
            let physical = param.to_physical(x).unwrap();
            assert!((0.0..=1.0).contains(&physical), "physical = {}", physical);
        }

        assert_relative_eq!(
            param.to_physical(param.initial_optimization_value()).unwrap(),
            0.4,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_bounded_parameter_requires_finite_bounds() {
        let result = Parameter::new("saturation", Transform::Bounded, 0.4, Some(0.0), None);
        assert!(matches!(
            result,
            Err(ParameterError::UnboundedReparameterization { .. })
        ));
    }

    #[test]
    fn test_initial_must_respect_bounds() {
        let result = Parameter::new("porosity", Transform::Direct, 2.0, Some(0.0), Some(1.0));
        assert!(matches!(
            result,
            Err(ParameterError::InitialOutsideBounds { .. })
        ));
    }
}

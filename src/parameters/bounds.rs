//! Physical bounds attached to calibration parameters.
//!
//! Bounds describe the admissible interval of a parameter in physical space.
//! Missing endpoints are stored as infinities, so an unbounded parameter is
//! simply `(-inf, inf)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when constructing bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: lower ({lower}) must be less than upper ({upper})")]
    InvalidBounds { lower: f64, upper: f64 },
}

/// The admissible physical interval of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    lower: f64,
    upper: f64,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Bounds", 2)?;

        // JSON cannot represent infinities, so open ends become null.
        if self.lower.is_infinite() {
            state.serialize_field("lower", &None::<f64>)?;
        } else {
            state.serialize_field("lower", &self.lower)?;
        }

        if self.upper.is_infinite() {
            state.serialize_field("upper", &None::<f64>)?;
        } else {
            state.serialize_field("upper", &self.upper)?;
        }

        state.end()
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BoundsHelper {
            #[serde(default)]
            lower: Option<f64>,

            #[serde(default)]
            upper: Option<f64>,
        }

        let helper = BoundsHelper::deserialize(deserializer)?;

        Ok(Bounds {
            lower: helper.lower.unwrap_or(f64::NEG_INFINITY),
            upper: helper.upper.unwrap_or(f64::INFINITY),
        })
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }
}

impl Bounds {
    /// Create bounds from optional endpoints.
    ///
    /// # Arguments
    ///
    /// * `lower` - Lower endpoint, or `None` for unbounded below
    /// * `upper` - Upper endpoint, or `None` for unbounded above
    ///
    /// # Returns
    ///
    /// A new `Bounds` value, or an error if `lower >= upper`.
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Result<Self, BoundsError> {
        let lower = lower.unwrap_or(f64::NEG_INFINITY);
        let upper = upper.unwrap_or(f64::INFINITY);

        if lower >= upper {
            return Err(BoundsError::InvalidBounds { lower, upper });
        }

        Ok(Self { lower, upper })
    }

    /// Create an unbounded interval (negative infinity to positive infinity).
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// The lower endpoint (possibly negative infinity).
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// The upper endpoint (possibly positive infinity).
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Width of the interval (infinite unless fully bounded).
    pub fn span(&self) -> f64 {
        self.upper - self.lower
    }

    /// Check if a value lies within the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Check if both endpoints are finite.
    pub fn is_fully_bounded(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }
}

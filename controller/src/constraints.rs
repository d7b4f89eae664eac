use serde::Deserialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use control_model::LinearModel;
use prelude::*;

use crate::ConfigError;

/// Half space `direction . x + offset >= 0` in absolute state coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintLine {
    pub direction: Vector,
    pub offset: float,
}

impl ConstraintLine {
    pub fn new(direction: Vector, offset: float) -> ConstraintLine {
        ConstraintLine { direction, offset }
    }

    /// The side of `x[1] + slope * x[0] + intercept = 0` where the left hand side is positive.
    pub fn from_slope(slope: float, intercept: float) -> ConstraintLine {
        ConstraintLine::new(Vector::from_column_slice(&[slope, 1.0]), intercept)
    }

    pub fn value(&self, x: &Vector) -> float {
        self.direction.dot(x) + self.offset
    }

    /// Signed perpendicular distance of `x` from the line, negative on the unsafe side.
    pub fn clearance(&self, x: &Vector) -> float {
        self.value(x) / self.direction.norm()
    }

    /// Offset of the same half space for deviation coordinates about `model`.
    pub fn deviation_offset(&self, model: &LinearModel) -> float {
        self.offset + self.direction.dot(&model.b)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceGrowth {
    /// Propagate the covariance through every horizon step.
    #[default]
    Compound,
    /// Use the one step ahead covariance for the whole horizon.
    Frozen,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintMode {
    /// Keep the mean trajectory on the safe side of the line.
    Mean,
    /// Tighten the line by `kappa` standard deviations of the predicted state along it.
    ChanceConstrained {
        kappa: float,
        growth: CovarianceGrowth,
        process_noise: Matrix,
    },
    /// No safety constraint.
    Unconstrained,
}

/// `kappa` such that a Gaussian in `dof` dimensions lies inside its `kappa` sigma ellipsoid
/// with probability `confidence`.
pub fn chance_multiplier(confidence: float, dof: usize) -> Result<float, ConfigError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(ConfigError::InvalidConfidence(confidence));
    }
    let chi_squared = ChiSquared::new(dof as float)
        .map_err(|_| ConfigError::InvalidConfidence(confidence))?;
    Ok(chi_squared.inverse_cdf(confidence).sqrt())
}

/// Lower bounds on `direction . x(k)` in deviation coordinates for `k = 1..=horizon`.
/// Empty when the mode has no safety constraint.
pub fn constraint_margins(
    model: &LinearModel,
    line: &ConstraintLine,
    mode: &ConstraintMode,
    covariance: &Matrix,
    horizon: usize,
) -> Vec<float> {
    let e = line.deviation_offset(model);
    let d = &line.direction;

    match *mode {
        ConstraintMode::Unconstrained => Vec::new(),
        ConstraintMode::Mean => vec![-e; horizon],
        ConstraintMode::ChanceConstrained {
            kappa,
            growth,
            ref process_noise,
        } => {
            let A = &model.A;
            let mut sigma = process_noise + A * covariance * A.transpose();
            let mut limits = Vec::with_capacity(horizon);
            for _ in 0..horizon {
                let variance = max(d.dot(&(&sigma * d)), 0.0);
                limits.push(-e + kappa * variance.sqrt());
                if growth == CovarianceGrowth::Compound {
                    sigma = process_noise + A * &sigma * A.transpose();
                }
            }
            limits
        }
    }
}

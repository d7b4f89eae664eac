#![allow(non_snake_case)]

use prelude::*;
use thiserror::Error;

mod kalman;
pub use kalman::KalmanFilter;

mod tracking;
pub use tracking::TrackingFilter;

/// Gaussian belief over the deviation state.
#[derive(Clone, Debug, PartialEq)]
pub struct Belief {
    pub mean: Vector,
    pub covariance: Matrix,
}

impl Belief {
    pub fn new(mean: Vector, covariance: Matrix) -> Belief {
        Belief { mean, covariance }
    }

    pub fn num_states(&self) -> usize {
        self.mean.len()
    }
}

/// Observation matrix with process and measurement noise covariances.
#[derive(Clone, Debug)]
pub struct MeasurementModel {
    pub C: Matrix,
    pub Q: Matrix,
    pub R: Matrix,
}

impl MeasurementModel {
    pub fn new(C: Matrix, Q: Matrix, R: Matrix) -> Result<MeasurementModel, EstimatorError> {
        let (p, n) = C.shape();
        check_shape("Q", (n, n), Q.shape())?;
        check_shape("R", (p, p), R.shape())?;
        Ok(MeasurementModel { C, Q, R })
    }

    pub fn num_states(&self) -> usize {
        self.C.ncols()
    }

    pub fn num_measurements(&self) -> usize {
        self.C.nrows()
    }
}

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("innovation covariance is not positive definite")]
    SingularInnovation,
    #[error("predicted covariance after step {step} is not positive definite")]
    SingularPredictedCovariance { step: usize },
    #[error("{what} has shape {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("smoother given {means} means, {covariances} covariances and {controls} controls")]
    LengthMismatch {
        means: usize,
        covariances: usize,
        controls: usize,
    },
}

pub(crate) fn check_shape(
    what: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<(), EstimatorError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EstimatorError::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}

pub trait Estimator {
    /// Folds in the input applied since the last step and the new measurement.
    fn step(&mut self, u: &Vector, measurement: &Vector) -> Result<&Belief, EstimatorError>;

    fn belief(&self) -> &Belief;
}

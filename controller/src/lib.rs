#![allow(non_snake_case)]

use std::fmt;

use prelude::*;
use thiserror::Error;

mod constraints;
pub use constraints::{
    chance_multiplier, constraint_margins, ConstraintLine, ConstraintMode, CovarianceGrowth,
};

mod mpc;
pub use mpc::{MpcConfig, MpcController};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not positive semi-definite")]
    NotPositiveSemiDefinite(&'static str),
    #[error("{0} is not positive definite")]
    NotPositiveDefinite(&'static str),
    #[error("{what} has shape {actual:?} but {expected:?} was expected")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("{0} has a negative entry")]
    NegativeLimit(&'static str),
    #[error("horizon must be at least one step")]
    ZeroHorizon,
    #[error("constraint line has a zero direction")]
    DegenerateLine,
    #[error("confidence {0} is outside (0, 1)")]
    InvalidConfidence(float),
    #[error("chance multiplier {0} is negative")]
    InvalidMultiplier(float),
    #[error(transparent)]
    Qp(#[from] qp::QpError),
}

/// Predicted trajectory from one solve. `states` has `horizon + 1` entries starting at the
/// belief mean, `inputs` has `horizon`.
#[derive(Clone, Debug)]
pub struct ControlSolution {
    pub inputs: Vec<Vector>,
    pub states: Vec<Vector>,
    /// Lower bound on `direction . x(k)` used for `k = 1..=horizon`, empty without a line.
    pub margins: Vec<float>,
    pub objective: float,
}

impl ControlSolution {
    pub fn first_input(&self) -> &Vector {
        &self.inputs[0]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NoSolution {
    Infeasible,
    DualInfeasible,
    TimeLimit,
    NotOptimal(String),
}

impl fmt::Display for NoSolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            NoSolution::Infeasible => write!(f, "problem is infeasible"),
            NoSolution::DualInfeasible => write!(f, "problem is unbounded"),
            NoSolution::TimeLimit => write!(f, "solver ran out of time"),
            NoSolution::NotOptimal(ref reason) => write!(f, "no optimal point: {}", reason),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ControlOutcome {
    Optimal(ControlSolution),
    NoSolution(NoSolution),
}

impl ControlOutcome {
    /// Input to apply now, if the problem was solved.
    pub fn input(&self) -> Option<&Vector> {
        match *self {
            ControlOutcome::Optimal(ref solution) => Some(solution.first_input()),
            ControlOutcome::NoSolution(_) => None,
        }
    }

    pub fn is_optimal(&self) -> bool {
        matches!(*self, ControlOutcome::Optimal(_))
    }

    pub fn solution(&self) -> Option<&ControlSolution> {
        match *self {
            ControlOutcome::Optimal(ref solution) => Some(solution),
            ControlOutcome::NoSolution(_) => None,
        }
    }
}

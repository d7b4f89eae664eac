#![allow(non_snake_case)]

use log::debug;
use prelude::*;
use thiserror::Error;

mod cstr;
pub use cstr::Cstr;

mod operating_points;
pub use operating_points::{enumerate_operating_points, linear_models, Region, Sampling};

const NEWTON_MAX_ITERATIONS: usize = 100;
const NEWTON_TOLERANCE: float = 1e-12;

/// Jacobians with a reciprocal condition number (smallest over largest singular value) below
/// this are treated as singular. The reactor's high conversion steady state sits near 2e-7.
pub const MIN_RECIPROCAL_CONDITION: float = 1e-8;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("jacobian is singular at {point:?}")]
    SingularJacobian { point: Vec<float> },
    #[error("no steady state found from initial guess {guess:?}")]
    NoSteadyState { guess: Vec<float> },
    #[error("invalid operating point region: {0}")]
    InvalidRegion(String),
}

/// Discrete affine approximation of a model about `op`.
///
/// In deviation coordinates `x' = x - b` the model evolves as `x'(k+1) = A x'(k) + B u(k)`.
/// At a steady state `b` coincides with `op`.
#[derive(Clone, Debug)]
pub struct LinearModel {
    pub op: Vector,
    pub A: Matrix,
    pub B: Matrix,
    pub b: Vector,
}

impl LinearModel {
    pub fn num_states(&self) -> usize {
        self.A.nrows()
    }

    pub fn num_inputs(&self) -> usize {
        self.B.ncols()
    }

    pub fn propagate(&self, x: &Vector, u: &Vector) -> Vector {
        &self.A * x + &self.B * u
    }

    pub fn to_deviation(&self, x: &Vector) -> Vector {
        x - &self.b
    }

    pub fn from_deviation(&self, x: &Vector) -> Vector {
        x + &self.b
    }
}

pub trait ControlModel {
    fn num_states(&self) -> usize;

    fn num_inputs(&self) -> usize;

    // Returns the state space derivative at a given operating point
    fn state_equation(&self, x: &Vector, u: &Vector) -> Vector;

    // Returns the jacobian of the state equation with respect to the state. Inputs enter
    // affinely so the jacobian is evaluated at zero input.
    fn jacobian(&self, x: &Vector) -> Matrix;

    // Returns the continuous time input matrix
    fn input_matrix(&self) -> Matrix;

    fn step(&self, dt: float, x: &Vector, u: &Vector) -> Vector {
        rk4(dt, 1, x, |x| self.state_equation(x, u))
    }

    fn linearise(&self, op: &Vector, dt: float) -> Result<LinearModel, ModelError> {
        linearise(self, op, dt)
    }

    fn steady_states(&self, guesses: &[Vector]) -> Result<Vec<Vector>, ModelError> {
        guesses.iter().map(|g| steady_state(self, g)).collect()
    }
}

/// Bilinear (Tustin) discretisation of `x' = A x + B u`. `A_inv` is the inverse of `A`.
pub fn discretise(dt: float, A: &Matrix, A_inv: &Matrix, B: &Matrix) -> Option<(Matrix, Matrix)> {
    let n = A.nrows();
    let I = Matrix::identity(n, n);

    let M = (&I - 0.5 * dt * A).try_inverse()?;
    let A_d = (&I + 0.5 * dt * A) * M;
    let B_d = A_inv * (&A_d - &I) * B;

    Some((A_d, B_d))
}

pub fn linearise<M: ControlModel + ?Sized>(
    model: &M,
    op: &Vector,
    dt: float,
) -> Result<LinearModel, ModelError> {
    let _guard = flame::start_guard("linearise");

    let singular = || ModelError::SingularJacobian {
        point: op.iter().cloned().collect(),
    };

    let A = model.jacobian(op);
    let rcond = reciprocal_condition(&A);
    if !(rcond >= MIN_RECIPROCAL_CONDITION) {
        debug!("jacobian at {:?} has reciprocal condition {:e}", op.as_slice(), rcond);
        return Err(singular());
    }
    let A_inv = A
        .clone()
        .try_inverse()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
        .ok_or_else(singular)?;

    // x' = A x + B u + F0 - A op, written about the fixed point b of the affine system
    let F0 = model.state_equation(op, &Vector::zeros(model.num_inputs()));
    let b = &A_inv * (&A * op - F0);

    let (A_d, B_d) = discretise(dt, &A, &A_inv, &model.input_matrix()).ok_or_else(singular)?;

    Ok(LinearModel {
        op: op.clone(),
        A: A_d,
        B: B_d,
        b,
    })
}

/// Smallest over largest singular value, zero for a zero or non-finite matrix.
pub fn reciprocal_condition(A: &Matrix) -> float {
    if A.is_empty() || !A.iter().all(|v| v.is_finite()) {
        return 0.0;
    }
    let s = A.singular_values();
    let largest = s.max();
    if largest > 0.0 {
        s.min() / largest
    } else {
        0.0
    }
}

/// Newton iteration on `state_equation(x, 0) = 0`.
pub fn steady_state<M: ControlModel + ?Sized>(model: &M, guess: &Vector) -> Result<Vector, ModelError> {
    let no_steady_state = || ModelError::NoSteadyState {
        guess: guess.iter().cloned().collect(),
    };

    let u = Vector::zeros(model.num_inputs());
    let mut x = guess.clone();
    for i in 0..NEWTON_MAX_ITERATIONS {
        let f = model.state_equation(&x, &u);
        let dx = model.jacobian(&x).lu().solve(&f).ok_or_else(no_steady_state)?;
        x -= &dx;

        if !x.iter().all(|v| v.is_finite()) {
            break;
        }
        if dx.norm() <= NEWTON_TOLERANCE * (1.0 + x.norm()) {
            debug!("steady state {:?} found after {} iterations", x.as_slice(), i + 1);
            return Ok(x);
        }
    }
    Err(no_steady_state())
}

pub fn rk4<F>(dt: float, num_steps: u32, y_0: &Vector, mut f: F) -> Vector
where
    F: FnMut(&Vector) -> Vector,
{
    let h = dt / float::from(num_steps);
    let mut y = y_0.clone();
    for _ in 0..num_steps {
        let k1 = f(&y) * h;
        let k2 = f(&(&y + 0.5 * &k1)) * h;
        let k3 = f(&(&y + 0.5 * &k2)) * h;
        let k4 = f(&(&y + &k3)) * h;
        y += (k1 + 2.0 * (k2 + k3) + k4) / 6.0;
    }
    y
}

use log::{debug, warn};
use std::iter::repeat;

use control_model::LinearModel;
use estimator::Belief;
use prelude::*;
use qp::{Problem, Settings, Status};

use crate::{constraint_margins, ConfigError, ConstraintLine, ConstraintMode, ControlOutcome, ControlSolution, NoSolution};

/// Finite horizon tracking problem. All states are in the deviation coordinates of the
/// linear model passed to `MpcController::solve`.
#[derive(Clone, Debug)]
pub struct MpcConfig {
    pub horizon: usize,
    pub Q_cost: Matrix,
    /// Must be positive definite so the optimal input sequence is unique.
    pub R_cost: Matrix,
    pub x_setpoint: Vector,
    pub u_setpoint: Vector,
    /// Symmetric bound on each input, may be infinite.
    pub u_max: Vector,
    /// Symmetric bound on each input change between steps, may be infinite.
    pub u_delta_max: Vector,
    pub line: ConstraintLine,
    pub mode: ConstraintMode,
    /// Known additive disturbance in the state transition.
    pub disturbance: Vector,
    /// Wall clock limit on each solve in seconds.
    pub time_limit: Option<float>,
}

pub struct MpcController {
    config: MpcConfig,
    settings: Settings,
}

impl MpcController {
    pub fn new(config: MpcConfig) -> Result<MpcController, ConfigError> {
        validate(&config)?;

        let settings = Settings {
            time_limit: config.time_limit,
            ..Settings::default()
        };
        Ok(MpcController { config, settings })
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    /// Solves a fresh problem from `belief`. `u_prev` bounds the first input change; without it
    /// the first input is only bounded in magnitude.
    pub fn solve(
        &self,
        model: &LinearModel,
        belief: &Belief,
        u_prev: Option<&Vector>,
    ) -> Result<ControlOutcome, ConfigError> {
        let _guard = flame::start_guard("mpc solve");

        let c = &self.config;
        let N = c.horizon;
        let ns = c.Q_cost.nrows();
        let ni = c.R_cost.nrows();

        check_shape("A", (ns, ns), model.A.shape())?;
        check_shape("B", (ns, ni), model.B.shape())?;
        check_shape("belief mean", (ns, 1), belief.mean.shape())?;
        check_shape("belief covariance", (ns, ns), belief.covariance.shape())?;
        if let Some(u_prev) = u_prev {
            check_shape("previous input", (ni, 1), u_prev.shape())?;
        }

        let margins = constraint_margins(model, &c.line, &c.mode, &belief.covariance, N);

        let mut problem = {
            let _guard = flame::start_guard("mpc build");
            let (P, q) = self.objective();
            let (A, l, u) = self.constraints(model, belief, u_prev, &margins);
            Problem::new(&P, q.as_slice(), &A, l.as_slice(), u.as_slice(), &self.settings)?
        };

        let status = match problem.solve() {
            Ok(status) => status,
            Err(e) => {
                warn!("mpc solver could not be set up: {}", e);
                return Ok(ControlOutcome::NoSolution(NoSolution::NotOptimal(e.to_string())));
            }
        };

        let outcome = match status {
            Status::Solved(solution) => {
                debug!(
                    "mpc solved in {} iterations, objective {}",
                    solution.iterations, solution.objective
                );
                let x = &solution.x;
                let states = x[..(N + 1) * ns]
                    .chunks(ns)
                    .map(Vector::from_column_slice)
                    .collect();
                let inputs = x[(N + 1) * ns..]
                    .chunks(ni)
                    .map(Vector::from_column_slice)
                    .collect();
                ControlOutcome::Optimal(ControlSolution {
                    inputs,
                    states,
                    margins,
                    objective: solution.objective,
                })
            }
            Status::PrimalInfeasible => ControlOutcome::NoSolution(NoSolution::Infeasible),
            Status::DualInfeasible => ControlOutcome::NoSolution(NoSolution::DualInfeasible),
            Status::MaxTime => ControlOutcome::NoSolution(NoSolution::TimeLimit),
            Status::MaxIterations => {
                ControlOutcome::NoSolution(NoSolution::NotOptimal("iteration limit reached".into()))
            }
            Status::Failed(reason) => ControlOutcome::NoSolution(NoSolution::NotOptimal(reason)),
        };

        if let ControlOutcome::NoSolution(ref reason) = outcome {
            warn!("mpc found no solution: {}", reason);
        }
        Ok(outcome)
    }

    // 0.5 z^T P z + q^T z over z = [x_0 .. x_N, u_0 .. u_N-1]
    fn objective(&self) -> (sparse::CscMatrix, Vector) {
        let c = &self.config;
        let N = c.horizon;

        // Build state and input quadratic penalty, the terminal state reuses the stage weight
        let P = sparse::block_diag(&[
            sparse::kron_eye(N + 1, &c.Q_cost),
            sparse::kron_eye(N, &c.R_cost),
        ])
        .build_csc();

        let q_x = -(&c.Q_cost * &c.x_setpoint);
        let q_u = -(&c.R_cost * &c.u_setpoint);
        let q: Vec<float> = repeat(q_x.as_slice())
            .take(N + 1)
            .chain(repeat(q_u.as_slice()).take(N))
            .flatten()
            .cloned()
            .collect();

        (P, Vector::from_vec(q))
    }

    fn constraints(
        &self,
        model: &LinearModel,
        belief: &Belief,
        u_prev: Option<&Vector>,
        margins: &[float],
    ) -> (sparse::CscMatrix, Vector, Vector) {
        let c = &self.config;
        let N = c.horizon;
        let ns = model.num_states();
        let ni = model.num_inputs();
        let n_x = (N + 1) * ns;
        let n_u = N * ni;

        // State evolution, A x_k - x_k+1 + B u_k = -d and -x_0 = -mean
        let Ax = -sparse::eye(n_x)
            + sparse::bmat(&[
                &[None, Some(sparse::zeros(ns, ns))],
                &[Some(sparse::kron_eye(N, &model.A)), None],
            ]);
        let Au = sparse::vstack(&[sparse::zeros(ns, n_u), sparse::kron_eye(N, &model.B)]);

        let mut rows = vec![sparse::hstack(&[Ax, Au])];
        let neg_d: Vec<float> = c.disturbance.iter().map(|v| -v).collect();
        let mut l: Vec<float> = belief
            .mean
            .iter()
            .map(|v| -v)
            .chain(repeat(neg_d).take(N).flatten())
            .collect();
        let mut u = l.clone();

        // Safety line on x_1 .. x_N
        if !margins.is_empty() {
            let d_T = Matrix::from_row_slice(1, ns, c.line.direction.as_slice());
            rows.push(sparse::hstack(&[
                sparse::zeros(N, ns),
                sparse::kron_eye(N, &d_T),
                sparse::zeros(N, n_u),
            ]));
            l.extend_from_slice(margins);
            u.extend(repeat(INFINITY).take(N));
        }

        // Input change, u_0 - u_prev and u_k - u_k-1
        let U_delta = if N > 1 {
            sparse::diags(n_u, &[1.0, -1.0], &[0, -(ni as isize)])
        } else {
            sparse::eye(n_u)
        };
        rows.push(sparse::hstack(&[sparse::zeros(n_u, n_x), U_delta]));
        for k in 0..N {
            for i in 0..ni {
                let delta = c.u_delta_max[i];
                let (lo, hi) = match (k, u_prev) {
                    (0, Some(u_prev)) => (u_prev[i] - delta, u_prev[i] + delta),
                    (0, None) => (NEG_INFINITY, INFINITY),
                    _ => (-delta, delta),
                };
                l.push(lo);
                u.push(hi);
            }
        }

        // Input magnitude
        rows.push(sparse::hstack(&[sparse::zeros(n_u, n_x), sparse::eye(n_u)]));
        for _ in 0..N {
            l.extend(c.u_max.iter().map(|&m| -m));
            u.extend(c.u_max.iter().cloned());
        }

        (
            sparse::vstack(&rows).build_csc(),
            Vector::from_vec(l),
            Vector::from_vec(u),
        )
    }
}

fn check_shape(
    what: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<(), ConfigError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConfigError::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}

fn validate(c: &MpcConfig) -> Result<(), ConfigError> {
    if c.horizon == 0 {
        return Err(ConfigError::ZeroHorizon);
    }

    let ns = c.Q_cost.nrows();
    let ni = c.R_cost.nrows();
    check_shape("Q_cost", (ns, ns), c.Q_cost.shape())?;
    check_shape("R_cost", (ni, ni), c.R_cost.shape())?;
    check_shape("x_setpoint", (ns, 1), c.x_setpoint.shape())?;
    check_shape("u_setpoint", (ni, 1), c.u_setpoint.shape())?;
    check_shape("u_max", (ni, 1), c.u_max.shape())?;
    check_shape("u_delta_max", (ni, 1), c.u_delta_max.shape())?;
    check_shape("constraint direction", (ns, 1), c.line.direction.shape())?;
    check_shape("disturbance", (ns, 1), c.disturbance.shape())?;

    if !is_psd(&c.Q_cost, 1e-9) {
        return Err(ConfigError::NotPositiveSemiDefinite("Q_cost"));
    }
    if !is_symmetric(&c.R_cost, 1e-9) || c.R_cost.clone().cholesky().is_none() {
        return Err(ConfigError::NotPositiveDefinite("R_cost"));
    }
    if c.u_max.iter().any(|&v| !(v >= 0.0)) {
        return Err(ConfigError::NegativeLimit("u_max"));
    }
    if c.u_delta_max.iter().any(|&v| !(v >= 0.0)) {
        return Err(ConfigError::NegativeLimit("u_delta_max"));
    }
    if c.line.direction.iter().all(|&v| v == 0.0) && c.mode != ConstraintMode::Unconstrained {
        return Err(ConfigError::DegenerateLine);
    }

    if let ConstraintMode::ChanceConstrained {
        kappa,
        ref process_noise,
        ..
    } = c.mode
    {
        if !(kappa >= 0.0) {
            return Err(ConfigError::InvalidMultiplier(kappa));
        }
        check_shape("process noise", (ns, ns), process_noise.shape())?;
        if !is_psd(process_noise, 1e-9) {
            return Err(ConfigError::NotPositiveSemiDefinite("process noise"));
        }
    }
    Ok(())
}

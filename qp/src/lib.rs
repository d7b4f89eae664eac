//! Thin wrapper presenting an interior point solver through a two-sided
//! `l <= A x <= u` quadratic program interface.

use clarabel::algebra::CscMatrix as SolverCsc;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use log::debug;
use prelude::*;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct Settings {
    pub max_iter: u32,
    /// Wall clock limit in seconds. `None` runs until convergence or `max_iter`.
    pub time_limit: Option<float>,
    pub eps: float,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            max_iter: 200,
            time_limit: None,
            eps: 1e-8,
            verbose: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub x: Vec<float>,
    pub objective: float,
    pub iterations: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    Solved(Solution),
    PrimalInfeasible,
    DualInfeasible,
    MaxTime,
    MaxIterations,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum QpError {
    #[error("{what} has {actual} entries but the problem needs {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("lower bound {lower} is above upper bound {upper} on constraint row {row}")]
    CrossedBounds { row: usize, lower: float, upper: float },
    #[error("solver setup failed: {0}")]
    Setup(String),
}

#[allow(non_snake_case)]
pub struct Problem {
    P: SolverCsc<float>,
    q: Vec<float>,
    A: SolverCsc<float>,
    b: Vec<float>,
    cones: Vec<SupportedConeT<float>>,
    settings: Settings,
    // Kept for reporting constraint residuals after a solve
    A_orig: sparse::CscMatrix,
    l: Vec<float>,
    u: Vec<float>,
}

impl Problem {
    /// `P` must be symmetric; only its upper triangle is passed on. Rows with both bounds
    /// infinite are dropped and rows with `l == u` become equalities.
    #[allow(non_snake_case)]
    pub fn new(
        P: &sparse::CscMatrix,
        q: &[float],
        A: &sparse::CscMatrix,
        l: &[float],
        u: &[float],
        settings: &Settings,
    ) -> Result<Problem, QpError> {
        let _guard = flame::start_guard("qp setup");

        let n = q.len();
        let (m, a_ncols) = A.shape();
        check_len("P", n, P.shape().0)?;
        check_len("P", n, P.shape().1)?;
        check_len("A", n, a_ncols)?;
        check_len("l", m, l.len())?;
        check_len("u", m, u.len())?;

        // Each caller row maps onto zero, one or two solver rows
        let mut eq_rows = Vec::new();
        let mut ineq_rows = Vec::new();
        for (row, (&lo, &hi)) in l.iter().zip(u).enumerate() {
            if lo > hi {
                return Err(QpError::CrossedBounds {
                    row,
                    lower: lo,
                    upper: hi,
                });
            }
            if lo == hi && hi.is_finite() {
                eq_rows.push((row, 1.0, hi));
                continue;
            }
            if hi.is_finite() {
                ineq_rows.push((row, 1.0, hi));
            }
            if lo.is_finite() {
                ineq_rows.push((row, -1.0, -lo));
            }
        }

        let mut targets = vec![Vec::new(); m];
        let mut b = Vec::with_capacity(eq_rows.len() + ineq_rows.len());
        for (new_row, &(row, sign, rhs)) in eq_rows.iter().chain(&ineq_rows).enumerate() {
            targets[row].push((new_row, sign));
            b.push(rhs);
        }

        let mut cones = Vec::with_capacity(2);
        if !eq_rows.is_empty() {
            cones.push(ZeroConeT(eq_rows.len()));
        }
        if !ineq_rows.is_empty() {
            cones.push(NonnegativeConeT(ineq_rows.len()));
        }

        Ok(Problem {
            P: convert_sparse(&P.upper_triangular()),
            q: q.to_vec(),
            A: remap_rows(A, &targets, b.len()),
            b,
            cones,
            settings: settings.clone(),
            A_orig: A.clone(),
            l: l.to_vec(),
            u: u.to_vec(),
        })
    }

    pub fn solve(&mut self) -> Result<Status, QpError> {
        let _guard = flame::start_guard("qp solve");

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.settings.max_iter)
            .verbose(self.settings.verbose)
            .tol_gap_abs(self.settings.eps)
            .tol_gap_rel(self.settings.eps)
            .tol_feas(self.settings.eps)
            .time_limit(self.settings.time_limit.unwrap_or(INFINITY))
            .build()
            .map_err(|e| QpError::Setup(e.to_string()))?;

        let mut solver = DefaultSolver::new(&self.P, &self.q, &self.A, &self.b, &self.cones, settings)
            .map_err(|e| QpError::Setup(format!("{:?}", e)))?;
        solver.solve();

        let solution = &solver.solution;
        let status = classify(&solution.status, || {
            debug!(
                "qp solved in {} iterations, worst bound violation {:e}",
                solution.iterations,
                self.max_violation(&solution.x)
            );
            Solution {
                x: solution.x.clone(),
                objective: solution.obj_val,
                iterations: solution.iterations,
            }
        });
        Ok(status)
    }

    fn max_violation(&self, x: &[float]) -> float {
        self.A_orig
            .mul_vec(x)
            .iter()
            .zip(self.l.iter().zip(&self.u))
            .map(|(&ax, (&lo, &hi))| max(max(lo - ax, ax - hi), 0.0))
            .fold(0.0, max)
    }
}

/// Only a fully converged solve yields a solution. A reduced accuracy `AlmostSolved` iterate
/// is reported as a failure.
fn classify<F>(status: &SolverStatus, solved: F) -> Status
where
    F: FnOnce() -> Solution,
{
    match *status {
        SolverStatus::Solved => Status::Solved(solved()),
        SolverStatus::AlmostSolved => Status::Failed("almost solved".to_string()),
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            Status::PrimalInfeasible
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => Status::DualInfeasible,
        SolverStatus::MaxTime => Status::MaxTime,
        SolverStatus::MaxIterations => Status::MaxIterations,
        ref other => Status::Failed(format!("{:?}", other)),
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), QpError> {
    if expected == actual {
        Ok(())
    } else {
        Err(QpError::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}

fn remap_rows(this: &sparse::CscMatrix, targets: &[Vec<(usize, float)>], nrows: usize) -> SolverCsc<float> {
    let (_, ncols) = this.shape();
    let mut colptr = Vec::with_capacity(ncols + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    let mut column = Vec::new();

    colptr.push(0);
    for c in 0..ncols {
        column.clear();
        for i in this.indptr()[c]..this.indptr()[c + 1] {
            let val = this.data()[i];
            for &(new_row, sign) in &targets[this.indices()[i]] {
                column.push((new_row, sign * val));
            }
        }
        column.sort_unstable_by_key(|&(r, _)| r);
        for &(r, val) in &column {
            rowval.push(r);
            nzval.push(val);
        }
        colptr.push(rowval.len());
    }

    SolverCsc::new(nrows, ncols, colptr, rowval, nzval)
}

pub fn convert_sparse(this: &sparse::CscMatrix) -> SolverCsc<float> {
    let (nrows, ncols) = this.shape();
    SolverCsc::new(
        nrows,
        ncols,
        this.indptr().to_vec(),
        this.indices().to_vec(),
        this.data().to_vec(),
    )
}

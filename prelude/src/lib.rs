#![allow(non_snake_case)]

pub use flame;
pub use nalgebra;

use rand::Rng;
use rand_distr::StandardNormal;

#[allow(non_camel_case_types)]
pub type float = f64;
pub use std::f64::{INFINITY, NEG_INFINITY};

pub type Matrix = nalgebra::DMatrix<float>;
pub type Vector = nalgebra::DVector<float>;

/// Entries below this are treated as collapsed variance.
pub const VARIANCE_FLOOR: float = 1e-12;

pub fn min<T: Copy + PartialOrd>(a: T, b: T) -> T {
    if b < a {
        b
    } else {
        a
    }
}

pub fn max<T: Copy + PartialOrd>(a: T, b: T) -> T {
    if b > a {
        b
    } else {
        a
    }
}

pub fn randn<R: Rng + ?Sized>(rng: &mut R) -> float {
    rng.sample(StandardNormal)
}

/// Draws a zero mean sample with the given covariance.
///
/// Uses the symmetric eigendecomposition rather than a Cholesky factor so
/// that singular (e.g. all zero) covariances are accepted.
pub fn sample_gaussian<R: Rng + ?Sized>(rng: &mut R, covariance: &Matrix) -> Vector {
    let n = covariance.nrows();
    let eigen = symmetrised(covariance).symmetric_eigen();
    let z = Vector::from_fn(n, |_, _| randn(rng));
    let scale = eigen.eigenvalues.map(|l| max(l, 0.0).sqrt());
    &eigen.eigenvectors * z.component_mul(&scale)
}

pub fn symmetrised(P: &Matrix) -> Matrix {
    (P + P.transpose()) * 0.5
}

/// Symmetrises a covariance in place and floors its diagonal at `VARIANCE_FLOOR`.
pub fn condition_covariance(P: &mut Matrix) {
    *P = symmetrised(P);
    for i in 0..P.nrows() {
        if P[(i, i)] < VARIANCE_FLOOR {
            P[(i, i)] = VARIANCE_FLOOR;
        }
    }
}

/// Smallest eigenvalue of the symmetric part of a square matrix.
pub fn min_eigenvalue(P: &Matrix) -> float {
    symmetrised(P)
        .symmetric_eigenvalues()
        .iter()
        .cloned()
        .fold(INFINITY, min)
}

pub fn is_symmetric(P: &Matrix, tol: float) -> bool {
    P.is_square() && (P - P.transpose()).amax() <= tol
}

pub fn is_psd(P: &Matrix, tol: float) -> bool {
    is_symmetric(P, tol) && (P.nrows() == 0 || min_eigenvalue(P) >= -tol)
}

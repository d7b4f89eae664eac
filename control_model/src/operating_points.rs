use itertools::Itertools;
use rand::Rng;

use crate::{linearise, ControlModel, LinearModel, ModelError};
use prelude::*;

/// Axis aligned box in state space.
#[derive(Clone, Debug)]
pub struct Region {
    pub lower: Vector,
    pub upper: Vector,
}

#[derive(Clone, Debug)]
pub enum Sampling {
    /// Centre of every cell when each axis is split into `counts[i]` equal parts.
    Grid { counts: Vec<usize> },
    /// Uniformly distributed points.
    Random { count: usize },
}

impl Region {
    fn validate(&self) -> Result<(), ModelError> {
        if self.lower.len() != self.upper.len() || self.lower.is_empty() {
            return Err(ModelError::InvalidRegion(format!(
                "bounds have dimensions {} and {}",
                self.lower.len(),
                self.upper.len()
            )));
        }
        if self.lower.iter().zip(self.upper.iter()).any(|(l, u)| !(l < u)) {
            return Err(ModelError::InvalidRegion(format!(
                "lower bound {:?} is not below upper bound {:?}",
                self.lower.as_slice(),
                self.upper.as_slice()
            )));
        }
        Ok(())
    }
}

/// Points sampled from `region` followed by `extra`, which usually holds the known steady
/// states. Grid points vary fastest along the last axis.
pub fn enumerate_operating_points<R: Rng + ?Sized>(
    region: &Region,
    sampling: &Sampling,
    extra: &[Vector],
    rng: &mut R,
) -> Result<Vec<Vector>, ModelError> {
    region.validate()?;
    let n = region.lower.len();

    let mut points = match *sampling {
        Sampling::Grid { ref counts } => {
            if counts.len() != n || counts.contains(&0) {
                return Err(ModelError::InvalidRegion(format!(
                    "grid counts {:?} do not cover a {} dimensional region",
                    counts, n
                )));
            }
            counts
                .iter()
                .enumerate()
                .map(|(i, &count)| {
                    let lower = region.lower[i];
                    let dx = (region.upper[i] - lower) / count as float;
                    (0..count).map(move |k| lower + dx * (k as float + 0.5))
                })
                .multi_cartesian_product()
                .map(|p| Vector::from_vec(p))
                .collect::<Vec<_>>()
        }
        Sampling::Random { count } => (0..count)
            .map(|_| {
                Vector::from_fn(n, |i, _| {
                    region.lower[i] + rng.gen::<float>() * (region.upper[i] - region.lower[i])
                })
            })
            .collect(),
    };

    points.extend(extra.iter().cloned());
    Ok(points)
}

/// Linearises `model` about every point.
pub fn linear_models<M: ControlModel + ?Sized>(
    model: &M,
    points: &[Vector],
    dt: float,
) -> Result<Vec<LinearModel>, ModelError> {
    points.iter().map(|op| linearise(model, op, dt)).collect()
}

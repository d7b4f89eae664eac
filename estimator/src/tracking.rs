use prelude::*;

use crate::{Belief, Estimator, EstimatorError, KalmanFilter};

/// Runs a `KalmanFilter` online and keeps the filtered history for smoothing.
pub struct TrackingFilter {
    filter: KalmanFilter,
    belief: Belief,
    means: Vec<Vector>,
    covariances: Vec<Matrix>,
    controls: Vec<Vector>,
}

impl TrackingFilter {
    pub fn new(
        filter: KalmanFilter,
        prior_mean: &Vector,
        prior_covariance: &Matrix,
        first_measurement: &Vector,
    ) -> Result<TrackingFilter, EstimatorError> {
        let belief = filter.initialise(prior_mean, prior_covariance, first_measurement)?;
        Ok(TrackingFilter {
            means: vec![belief.mean.clone()],
            covariances: vec![belief.covariance.clone()],
            controls: Vec::new(),
            filter,
            belief,
        })
    }

    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }

    pub fn means(&self) -> &[Vector] {
        &self.means
    }

    pub fn covariances(&self) -> &[Matrix] {
        &self.covariances
    }

    /// Smoothed estimates over everything filtered so far.
    pub fn smoothed(&self) -> Result<(Vec<Vector>, Vec<Matrix>), EstimatorError> {
        self.filter
            .smooth(&self.means, &self.covariances, &self.controls)
    }
}

impl Estimator for TrackingFilter {
    fn step(&mut self, u: &Vector, measurement: &Vector) -> Result<&Belief, EstimatorError> {
        self.belief = self.filter.step(&self.belief, u, measurement)?;
        self.means.push(self.belief.mean.clone());
        self.covariances.push(self.belief.covariance.clone());
        self.controls.push(u.clone());
        Ok(&self.belief)
    }

    fn belief(&self) -> &Belief {
        &self.belief
    }
}

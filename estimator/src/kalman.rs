use log::trace;

use control_model::LinearModel;
use prelude::*;

use crate::{check_shape, Belief, EstimatorError, MeasurementModel};

/// Linear Gaussian filter and fixed interval smoother over a fixed linear model.
#[derive(Clone, Debug)]
pub struct KalmanFilter {
    model: LinearModel,
    measurement: MeasurementModel,
}

impl KalmanFilter {
    pub fn new(
        model: LinearModel,
        measurement: MeasurementModel,
    ) -> Result<KalmanFilter, EstimatorError> {
        let n = model.num_states();
        check_shape("A", (n, n), model.A.shape())?;
        check_shape("B", (n, model.num_inputs()), model.B.shape())?;
        check_shape("C", (measurement.num_measurements(), n), measurement.C.shape())?;
        Ok(KalmanFilter { model, measurement })
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    pub fn measurement_model(&self) -> &MeasurementModel {
        &self.measurement
    }

    /// Corrects the prior with the first measurement. No prediction is made.
    pub fn initialise(
        &self,
        prior_mean: &Vector,
        prior_covariance: &Matrix,
        measurement: &Vector,
    ) -> Result<Belief, EstimatorError> {
        let n = self.model.num_states();
        check_shape("prior mean", (n, 1), prior_mean.shape())?;
        check_shape("prior covariance", (n, n), prior_covariance.shape())?;

        let mut prior = Belief::new(prior_mean.clone(), prior_covariance.clone());
        condition_covariance(&mut prior.covariance);
        self.update(&prior, measurement)
    }

    pub fn predict(&self, belief: &Belief, u: &Vector) -> Result<Belief, EstimatorError> {
        let n = self.model.num_states();
        check_shape("mean", (n, 1), belief.mean.shape())?;
        check_shape("u", (self.model.num_inputs(), 1), u.shape())?;

        let A = &self.model.A;
        let mean = self.model.propagate(&belief.mean, u);
        let mut covariance = A * &belief.covariance * A.transpose() + &self.measurement.Q;
        condition_covariance(&mut covariance);

        Ok(Belief::new(mean, covariance))
    }

    pub fn update(&self, predicted: &Belief, measurement: &Vector) -> Result<Belief, EstimatorError> {
        let C = &self.measurement.C;
        let R = &self.measurement.R;
        check_shape("measurement", (C.nrows(), 1), measurement.shape())?;

        let P = &predicted.covariance;

        // Innovation
        let y = measurement - C * &predicted.mean;

        // Innovation covariance
        let S = symmetrised(&(C * P * C.transpose() + R));
        let S_chol = S.cholesky().ok_or(EstimatorError::SingularInnovation)?;

        // Kalman gain, K = P C^T S^-1
        let K = S_chol.solve(&(C * P)).transpose();

        let mean = &predicted.mean + &K * y;

        let n = P.nrows();
        let IKC = Matrix::identity(n, n) - &K * C;
        // Joseph form keeps the update positive semi-definite
        let mut covariance = &IKC * P * IKC.transpose() + &K * R * K.transpose();
        condition_covariance(&mut covariance);

        Ok(Belief::new(mean, covariance))
    }

    pub fn step(
        &self,
        belief: &Belief,
        u: &Vector,
        measurement: &Vector,
    ) -> Result<Belief, EstimatorError> {
        let _guard = flame::start_guard("kalman step");
        let predicted = self.predict(belief, u)?;
        self.update(&predicted, measurement)
    }

    /// Rauch-Tung-Striebel backward pass over filtered beliefs. `controls[t]` drives the
    /// transition from step `t` to `t + 1`, so at least `means.len() - 1` are required.
    pub fn smooth(
        &self,
        means: &[Vector],
        covariances: &[Matrix],
        controls: &[Vector],
    ) -> Result<(Vec<Vector>, Vec<Matrix>), EstimatorError> {
        let _guard = flame::start_guard("kalman smooth");

        let T = means.len();
        if covariances.len() != T || controls.len() + 1 < T {
            return Err(EstimatorError::LengthMismatch {
                means: T,
                covariances: covariances.len(),
                controls: controls.len(),
            });
        }
        if T == 0 {
            return Ok((Vec::new(), Vec::new()));
        }

        let A = &self.model.A;
        let mut smoothed_means = means.to_vec();
        let mut smoothed_covariances = covariances.to_vec();

        for t in (0..T - 1).rev() {
            let P = &covariances[t];
            let predicted_mean = self.model.propagate(&means[t], &controls[t]);
            let predicted_covariance = symmetrised(&(A * P * A.transpose() + &self.measurement.Q));

            // Smoother gain, G = P A^T P_pred^-1
            let chol = predicted_covariance
                .clone()
                .cholesky()
                .ok_or(EstimatorError::SingularPredictedCovariance { step: t })?;
            let G = chol.solve(&(A * P)).transpose();

            let mean = &means[t] + &G * (&smoothed_means[t + 1] - predicted_mean);
            let mut covariance =
                P + &G * (&smoothed_covariances[t + 1] - predicted_covariance) * G.transpose();
            condition_covariance(&mut covariance);

            trace!("smoothed step {}: {:?}", t, mean.as_slice());
            smoothed_means[t] = mean;
            smoothed_covariances[t] = covariance;
        }

        Ok((smoothed_means, smoothed_covariances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scalar(v: float) -> Matrix {
        Matrix::from_element(1, 1, v)
    }

    // Random walk observed directly
    fn random_walk(q: float, r: float) -> KalmanFilter {
        let model = LinearModel {
            op: Vector::zeros(1),
            A: scalar(1.0),
            B: scalar(1.0),
            b: Vector::zeros(1),
        };
        let measurement = MeasurementModel::new(scalar(1.0), scalar(q), scalar(r)).unwrap();
        KalmanFilter::new(model, measurement).unwrap()
    }

    #[test]
    fn scalar_update_matches_closed_form() {
        let filter = random_walk(0.5, 2.0);
        let prior = Belief::new(Vector::from_element(1, 1.0), scalar(3.0));

        let predicted = filter.predict(&prior, &Vector::from_element(1, 0.5)).unwrap();
        assert_relative_eq!(predicted.mean[0], 1.5);
        assert_relative_eq!(predicted.covariance[(0, 0)], 3.5);

        let updated = filter.update(&predicted, &Vector::from_element(1, 4.0)).unwrap();
        let k = 3.5 / (3.5 + 2.0);
        assert_relative_eq!(updated.mean[0], 1.5 + k * 2.5, epsilon = 1e-12);
        assert_relative_eq!(updated.covariance[(0, 0)], (1.0 - k) * 3.5, epsilon = 1e-12);
    }

    #[test]
    fn initialise_corrects_without_predicting() {
        let filter = random_walk(100.0, 1.0);
        let belief = filter
            .initialise(&Vector::zeros(1), &scalar(1.0), &Vector::from_element(1, 2.0))
            .unwrap();

        // Process noise must not enter the first belief
        assert_relative_eq!(belief.mean[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(belief.covariance[(0, 0)], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn collapsed_covariance_is_floored() {
        let filter = random_walk(0.0, 0.0);
        let belief = filter
            .initialise(&Vector::zeros(1), &scalar(0.0), &Vector::zeros(1))
            .unwrap();

        assert!(belief.covariance[(0, 0)] >= VARIANCE_FLOOR);
    }

    #[test]
    fn singular_innovation_is_reported() {
        let model = LinearModel {
            op: Vector::zeros(2),
            A: Matrix::identity(2, 2),
            B: Matrix::zeros(2, 1),
            b: Vector::zeros(2),
        };
        // Both rows observe the same state with no noise
        let C = Matrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 0.0]);
        let measurement = MeasurementModel::new(C, Matrix::zeros(2, 2), Matrix::zeros(2, 2)).unwrap();
        let filter = KalmanFilter::new(model, measurement).unwrap();

        let belief = Belief::new(Vector::zeros(2), Matrix::identity(2, 2));
        match filter.update(&belief, &Vector::zeros(2)) {
            Err(EstimatorError::SingularInnovation) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn shape_errors() {
        let filter = random_walk(1.0, 1.0);
        let belief = Belief::new(Vector::zeros(1), scalar(1.0));

        match filter.step(&belief, &Vector::zeros(2), &Vector::zeros(1)) {
            Err(EstimatorError::DimensionMismatch { what: "u", .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        let means = vec![Vector::zeros(1); 3];
        match filter.smooth(&means, &[scalar(1.0), scalar(1.0)], &[]) {
            Err(EstimatorError::LengthMismatch { means: 3, .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert!(MeasurementModel::new(scalar(1.0), Matrix::zeros(2, 2), scalar(1.0)).is_err());
    }

    #[test]
    fn input_matrix_must_match_states() {
        let model = LinearModel {
            op: Vector::zeros(2),
            A: Matrix::identity(2, 2),
            B: Matrix::zeros(3, 1),
            b: Vector::zeros(2),
        };
        let I = Matrix::identity(2, 2);
        let measurement = MeasurementModel::new(I.clone(), I.clone(), I).unwrap();

        match KalmanFilter::new(model, measurement) {
            Err(EstimatorError::DimensionMismatch {
                what: "B",
                expected: (2, 1),
                actual: (3, 1),
            }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn smoother_terminal_step_is_filtered() {
        let filter = random_walk(0.1, 1.0);
        let mut belief = filter
            .initialise(&Vector::zeros(1), &scalar(1.0), &Vector::from_element(1, 0.3))
            .unwrap();
        let mut means = vec![belief.mean.clone()];
        let mut covariances = vec![belief.covariance.clone()];
        let controls = vec![Vector::from_element(1, 0.1); 4];
        for (t, u) in controls.iter().enumerate() {
            belief = filter
                .step(&belief, u, &Vector::from_element(1, t as float * 0.2))
                .unwrap();
            means.push(belief.mean.clone());
            covariances.push(belief.covariance.clone());
        }

        let (smoothed_means, smoothed_covariances) =
            filter.smooth(&means, &covariances, &controls).unwrap();

        assert_eq!(smoothed_means.last(), means.last());
        assert_eq!(smoothed_covariances.last(), covariances.last());
        // Later measurements can only reduce uncertainty
        for (s, f) in smoothed_covariances.iter().zip(&covariances) {
            assert!(s[(0, 0)] <= f[(0, 0)] + 1e-12);
        }
    }
}

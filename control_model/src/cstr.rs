// Continuously stirred tank reactor with a single exothermic first order reaction A -> B.
// State is [concentration of A (kmol/m3), temperature (K)], input is the heat added (kJ/min).

use serde::Deserialize;

use prelude::*;
use crate::{linear_models, ControlModel, LinearModel, ModelError};

const NOMINAL_POINTS: [[float; 2]; 3] = [
    [0.009718824131074055, 508.0562351737852],
    [0.48934869384879404, 412.1302612302412],
    [0.9996453064079288, 310.07093871841454],
];

const STEADY_STATE_GUESSES: [[float; 2]; 3] = [[0.073, 493.0], [0.21, 467.0], [0.999, 310.0]];

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Cstr {
    /// Tank volume (m3)
    pub volume: float,
    pub gas_constant: float,
    /// Feed concentration (kmol/m3)
    pub feed_concentration: float,
    /// Feed temperature (K)
    pub feed_temperature: float,
    /// Heat of reaction (kJ/kmol), negative for exothermic
    pub heat_of_reaction: float,
    /// Arrhenius pre-exponential factor (1/min)
    pub pre_exponential: float,
    pub activation_energy: float,
    pub heat_capacity: float,
    pub density: float,
    /// Volumetric flow rate (m3/min)
    pub flow_rate: float,
}

impl Default for Cstr {
    fn default() -> Cstr {
        Cstr {
            volume: 5.0,
            gas_constant: 8.314,
            feed_concentration: 1.0,
            feed_temperature: 310.0,
            heat_of_reaction: -4.78e4,
            pre_exponential: 72e7,
            activation_energy: 8.314e4,
            heat_capacity: 0.239,
            density: 1000.0,
            flow_rate: 0.1,
        }
    }
}

impl Cstr {
    pub fn rate_constant(&self, T: float) -> float {
        self.pre_exponential * (-self.activation_energy / (self.gas_constant * T)).exp()
    }

    fn dilution(&self) -> float {
        self.flow_rate / self.volume
    }

    fn thermal_mass(&self) -> float {
        self.density * self.heat_capacity
    }

    /// Concentration at which the material balance is at steady state for temperature `T`.
    pub fn ca(&self, T: float) -> float {
        self.dilution() * self.feed_concentration / (self.dilution() + self.rate_constant(T))
    }

    /// Heat generated by the reaction at steady state concentration, in K/min.
    pub fn qg(&self, T: float) -> float {
        -self.heat_of_reaction / self.thermal_mass() * self.rate_constant(T) * self.ca(T)
    }

    /// Heat removed by the flow less the heat input `Q`, in K/min.
    pub fn qr(&self, T: float, Q: float) -> float {
        -self.dilution() * (self.feed_temperature - T) - Q / (self.thermal_mass() * self.volume)
    }

    /// The three tabulated steady states at zero heat input, from high to low conversion.
    pub fn nominal_points() -> Vec<Vector> {
        NOMINAL_POINTS
            .iter()
            .map(|p| Vector::from_column_slice(p))
            .collect()
    }

    /// Solves for the three steady states and linearises about each.
    pub fn nominal_linear_models(&self, dt: float) -> Result<Vec<LinearModel>, ModelError> {
        let guesses: Vec<_> = STEADY_STATE_GUESSES
            .iter()
            .map(|g| Vector::from_column_slice(g))
            .collect();
        let states = self.steady_states(&guesses)?;
        linear_models(self, &states, dt)
    }
}

impl ControlModel for Cstr {
    fn num_states(&self) -> usize {
        2
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn state_equation(&self, x: &Vector, u: &Vector) -> Vector {
        let (ca, T) = (x[0], x[1]);
        let r = self.rate_constant(T) * ca;

        let ca_dot = self.dilution() * (self.feed_concentration - ca) - r;
        let T_dot = self.dilution() * (self.feed_temperature - T)
            - self.heat_of_reaction / self.thermal_mass() * r
            + u[0] / (self.thermal_mass() * self.volume);

        Vector::from_column_slice(&[ca_dot, T_dot])
    }

    fn jacobian(&self, x: &Vector) -> Matrix {
        let (ca, T) = (x[0], x[1]);
        let k = self.rate_constant(T);
        let dk_dT = k * self.activation_energy / (self.gas_constant * T * T);
        let h = self.heat_of_reaction / self.thermal_mass();

        #[rustfmt::skip]
        let J = Matrix::from_row_slice(2, 2, &[
            -self.dilution() - k, -ca * dk_dT,
            -h * k,               -(self.dilution() + h * dk_dT * ca),
        ]);
        J
    }

    fn input_matrix(&self) -> Matrix {
        Matrix::from_column_slice(2, 1, &[0.0, 1.0 / (self.thermal_mass() * self.volume)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn state(ca: float, T: float) -> Vector {
        Vector::from_column_slice(&[ca, T])
    }

    #[test]
    fn steady_states_match_nominal_points() {
        let reactor = Cstr::default();
        let guesses: Vec<_> = STEADY_STATE_GUESSES
            .iter()
            .map(|g| Vector::from_column_slice(g))
            .collect();

        let states = reactor.steady_states(&guesses).unwrap();

        for (found, nominal) in states.iter().zip(Cstr::nominal_points()) {
            assert_relative_eq!(found[0], nominal[0], max_relative = 1e-6);
            assert_relative_eq!(found[1], nominal[1], max_relative = 1e-8);
        }
    }

    #[test]
    fn heat_balance_at_steady_state() {
        let reactor = Cstr::default();
        for point in Cstr::nominal_points() {
            let T = point[1];
            assert_relative_eq!(reactor.ca(T), point[0], max_relative = 1e-6);
            assert_abs_diff_eq!(reactor.qg(T), reactor.qr(T, 0.0), epsilon = 1e-6);
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let reactor = Cstr::default();
        let x = state(0.5, 400.0);
        let u = Vector::zeros(1);
        let J = reactor.jacobian(&x);

        let steps = [1e-7, 1e-4];
        for j in 0..2 {
            let mut dx = Vector::zeros(2);
            dx[j] = steps[j];
            let fd = (reactor.state_equation(&(&x + &dx), &u)
                - reactor.state_equation(&(&x - &dx), &u))
                / (2.0 * steps[j]);
            for i in 0..2 {
                assert_relative_eq!(J[(i, j)], fd[i], max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn single_rk4_step() {
        let reactor = Cstr::default();
        let x = reactor.step(0.1, &state(0.5, 400.0), &Vector::zeros(1));
        assert_relative_eq!(x[0], 0.5005005336719928, max_relative = 1e-10);
        assert_relative_eq!(x[1], 399.9198732789281, max_relative = 1e-10);

        let heated = reactor.step(0.1, &state(0.5, 400.0), &Vector::from_element(1, 1000.0));
        assert_relative_eq!(heated[1], 400.00373304989796, max_relative = 1e-10);
    }

    #[test]
    fn drifts_to_low_conversion_without_heating() {
        let reactor = Cstr::default();
        let u = Vector::zeros(1);
        let mut x = state(0.5, 400.0);
        for _ in 0..500 {
            x = reactor.step(0.1, &x, &u);
        }
        assert_relative_eq!(x[0], 0.772873354244764, max_relative = 1e-8);
        assert_relative_eq!(x[1], 351.7465347393325, max_relative = 1e-8);
    }

    #[test]
    fn linearise_low_conversion_point() {
        let reactor = Cstr::default();
        let op = Cstr::nominal_points().remove(2);
        let model = reactor.linearise(&op, 0.1).unwrap();

        #[rustfmt::skip]
        let expected_A = Matrix::from_row_slice(2, 2, &[
            0.9980012897739914,    -7.363713787134281e-08,
            0.0001416456013670919, 0.9980167254295725,
        ]);
        assert_relative_eq!(model.A, expected_A, epsilon = 1e-12, max_relative = 1e-8);
        assert_relative_eq!(model.B[(0, 0)], -3.0810517933632483e-12, max_relative = 1e-6);
        assert_relative_eq!(model.B[(1, 0)], 8.359902616859009e-05, max_relative = 1e-8);
        assert_relative_eq!(model.b, op, epsilon = 1e-9, max_relative = 1e-8);
    }

    #[test]
    fn turning_point_is_singular() {
        // The jacobian along the steady state material balance changes sign near 372.9 K
        let reactor = Cstr::default();
        let det = |T: float| reactor.jacobian(&state(reactor.ca(T), T)).determinant();
        let (mut lo, mut hi) = (370.0, 380.0);
        assert!(det(lo) > 0.0 && det(hi) < 0.0);
        for _ in 0..100 {
            let mid = 0.5 * (lo + hi);
            if det(mid) > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        assert_abs_diff_eq!(lo, 372.905, epsilon = 1e-3);

        match reactor.linearise(&state(reactor.ca(lo), lo), 0.1) {
            Err(ModelError::SingularJacobian { .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        // A little way off the turning point the model is usable again
        assert!(reactor.linearise(&state(reactor.ca(375.0), 375.0), 0.1).is_ok());
    }

    #[test]
    fn zero_deviation_is_fixed_point() {
        let reactor = Cstr::default();
        for model in reactor.nominal_linear_models(0.1).unwrap() {
            let origin = model.to_deviation(&model.b);
            let next = model.propagate(&origin, &Vector::zeros(1));
            assert_abs_diff_eq!(next, Vector::zeros(2), epsilon = 1e-12);
            assert_relative_eq!(model.b, model.op, max_relative = 1e-8);
        }
    }

    #[test]
    fn linearised_model_tracks_plant_nearby() {
        let reactor = Cstr::default();
        let op = Cstr::nominal_points().remove(1);
        let model = reactor.linearise(&op, 0.1).unwrap();

        let x0 = &op + state(1e-3, 0.1);
        let u = Vector::from_element(1, 50.0);
        let plant = reactor.step(0.1, &x0, &u);
        let linear = model.from_deviation(&model.propagate(&model.to_deviation(&x0), &u));

        assert_abs_diff_eq!(plant[0], linear[0], epsilon = 1e-5);
        assert_abs_diff_eq!(plant[1], linear[1], epsilon = 1e-3);
    }
}

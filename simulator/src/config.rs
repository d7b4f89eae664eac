use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use control_model::{Cstr, LinearModel};
use controller::{
    chance_multiplier, ConstraintLine, ConstraintMode, CovarianceGrowth, MpcConfig,
};
use prelude::*;

use crate::SimulationError;

#[derive(Clone, Debug, Deserialize)]
pub struct SimulatorConfig {
    /// Step size in minutes.
    pub dt: float,
    /// Simulated time in minutes.
    pub duration: float,
    pub seed: u64,
    pub initial_state: Vec<float>,
    /// Where the fixed linear model used by the estimator and controller is taken.
    pub linearisation_point: Vec<float>,
    #[serde(default)]
    pub reactor: Cstr,
    pub plant: PlantConfig,
    pub estimator: EstimatorConfig,
    pub mpc: Option<MpcSection>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlantKind {
    Nonlinear,
    Linear,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlantConfig {
    pub kind: PlantKind,
    /// Rows of the observation matrix.
    pub C: Vec<Vec<float>>,
    /// Diagonal of the noise added to the true state each step.
    pub process_noise: Vec<float>,
    /// Diagonal of the noise added to each measurement.
    pub measurement_noise: Vec<float>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EstimatorConfig {
    pub process_noise: Vec<float>,
    pub measurement_noise: Vec<float>,
    pub prior_covariance: Vec<float>,
    /// Added to the initial state, in deviation coordinates, to form the prior mean.
    #[serde(default)]
    pub prior_offset: Option<Vec<float>>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    Mean,
    Chance,
    Unconstrained,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Apply the previous input again.
    #[default]
    HoldPrevious,
    /// Stop the run with `SimulationError::ControlUnavailable`.
    Abort,
}

/// `temperature + slope * concentration + intercept >= 0`
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct LineConfig {
    pub slope: float,
    pub intercept: float,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MpcSection {
    pub horizon: usize,
    pub Q_cost: Vec<float>,
    pub R_cost: Vec<float>,
    /// Absolute state setpoint.
    pub setpoint: Vec<float>,
    #[serde(default)]
    pub input_setpoint: Option<Vec<float>>,
    pub u_max: Vec<float>,
    pub u_delta_max: Vec<float>,
    pub line: LineConfig,
    pub mode: ModeKind,
    #[serde(default = "default_confidence")]
    pub confidence: float,
    #[serde(default)]
    pub growth: CovarianceGrowth,
    #[serde(default)]
    pub fallback: Fallback,
    pub time_limit: Option<float>,
}

fn default_confidence() -> float {
    0.9
}

impl SimulatorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<SimulatorConfig, SimulationError> {
        let path = path.as_ref();
        let io_error = |source| SimulationError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut config_str = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut config_str))
            .map_err(io_error)?;
        SimulatorConfig::from_str(&config_str)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<SimulatorConfig, SimulationError> {
        let config: SimulatorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_steps(&self) -> usize {
        (self.duration / self.dt).round() as usize
    }

    pub fn initial_state(&self) -> Vector {
        Vector::from_column_slice(&self.initial_state)
    }

    pub fn linearisation_point(&self) -> Vector {
        Vector::from_column_slice(&self.linearisation_point)
    }

    pub fn C(&self) -> Matrix {
        let rows = self.plant.C.len();
        let cols = self.plant.C.first().map_or(0, |r| r.len());
        Matrix::from_fn(rows, cols, |r, c| self.plant.C[r][c])
    }

    /// Controller settings in the deviation coordinates of `model`.
    pub fn mpc_config(&self, model: &LinearModel) -> Result<Option<MpcConfig>, SimulationError> {
        let mpc = match self.mpc {
            Some(ref mpc) => mpc,
            None => return Ok(None),
        };
        let n = model.num_states();
        let m = model.num_inputs();

        let mode = match mpc.mode {
            ModeKind::Mean => ConstraintMode::Mean,
            ModeKind::Unconstrained => ConstraintMode::Unconstrained,
            ModeKind::Chance => ConstraintMode::ChanceConstrained {
                kappa: chance_multiplier(mpc.confidence, n)?,
                growth: mpc.growth,
                process_noise: diagonal(&self.estimator.process_noise),
            },
        };

        let u_setpoint = match mpc.input_setpoint {
            Some(ref u) => Vector::from_column_slice(u),
            None => Vector::zeros(m),
        };

        Ok(Some(MpcConfig {
            horizon: mpc.horizon,
            Q_cost: diagonal(&mpc.Q_cost),
            R_cost: diagonal(&mpc.R_cost),
            x_setpoint: model.to_deviation(&Vector::from_column_slice(&mpc.setpoint)),
            u_setpoint,
            u_max: Vector::from_column_slice(&mpc.u_max),
            u_delta_max: Vector::from_column_slice(&mpc.u_delta_max),
            line: self.line().unwrap_or_else(|| ConstraintLine::from_slope(0.0, 0.0)),
            mode,
            disturbance: Vector::zeros(n),
            time_limit: mpc.time_limit,
        }))
    }

    pub fn line(&self) -> Option<ConstraintLine> {
        self.mpc
            .as_ref()
            .map(|mpc| ConstraintLine::from_slope(mpc.line.slope, mpc.line.intercept))
    }

    pub fn fallback(&self) -> Fallback {
        self.mpc.as_ref().map_or(Fallback::default(), |mpc| mpc.fallback)
    }

    fn validate(&self) -> Result<(), SimulationError> {
        let n = self.initial_state.len();
        let p = self.plant.C.len();

        if !(self.dt > 0.0) || !(self.duration >= 0.0) {
            return Err(invalid("dt must be positive and duration non-negative"));
        }
        if n == 0 {
            return Err(invalid("initial_state is empty"));
        }
        check_len("linearisation_point", n, self.linearisation_point.len())?;
        if self.plant.C.iter().any(|row| row.len() != n) {
            return Err(invalid(format!("every row of C must have {} entries", n)));
        }
        check_len("plant.process_noise", n, self.plant.process_noise.len())?;
        check_len("plant.measurement_noise", p, self.plant.measurement_noise.len())?;
        check_len("estimator.process_noise", n, self.estimator.process_noise.len())?;
        check_len("estimator.measurement_noise", p, self.estimator.measurement_noise.len())?;
        check_len("estimator.prior_covariance", n, self.estimator.prior_covariance.len())?;
        if let Some(ref offset) = self.estimator.prior_offset {
            check_len("estimator.prior_offset", n, offset.len())?;
        }
        let noise = self
            .plant
            .process_noise
            .iter()
            .chain(&self.plant.measurement_noise)
            .chain(&self.estimator.process_noise)
            .chain(&self.estimator.measurement_noise)
            .chain(&self.estimator.prior_covariance);
        if noise.cloned().any(|v| !(v >= 0.0)) {
            return Err(invalid("noise variances must be non-negative"));
        }

        if let Some(ref mpc) = self.mpc {
            let m = mpc.R_cost.len();
            check_len("mpc.Q_cost", n, mpc.Q_cost.len())?;
            check_len("mpc.setpoint", n, mpc.setpoint.len())?;
            check_len("mpc.u_max", m, mpc.u_max.len())?;
            check_len("mpc.u_delta_max", m, mpc.u_delta_max.len())?;
            if let Some(ref u) = mpc.input_setpoint {
                check_len("mpc.input_setpoint", m, u.len())?;
            }
            if n != 2 {
                return Err(invalid("the safety line is defined over two states"));
            }
        }
        Ok(())
    }
}

pub fn diagonal(values: &[float]) -> Matrix {
    Matrix::from_diagonal(&Vector::from_column_slice(values))
}

fn invalid<S: Into<String>>(reason: S) -> SimulationError {
    SimulationError::Config(reason.into())
}

fn check_len(what: &str, expected: usize, actual: usize) -> Result<(), SimulationError> {
    if expected == actual {
        Ok(())
    } else {
        Err(invalid(format!(
            "{} has {} entries, expected {}",
            what, actual, expected
        )))
    }
}

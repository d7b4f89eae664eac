use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use control_model::{ControlModel, LinearModel};
use controller::{ControlOutcome, MpcController};
use estimator::{Belief, Estimator, KalmanFilter, MeasurementModel, TrackingFilter};
use prelude::*;

use crate::config::{diagonal, Fallback, SimulatorConfig};
use crate::plant::Plant;
use crate::SimulationError;

/// Time series from one run, all in absolute coordinates.
///
/// `states`, `measurements`, `estimates`, `smoothed` and `covariances` have one entry per
/// sample time. `inputs[t]` and `margins[t]` belong to the move from sample `t` to `t + 1`.
#[derive(Clone, Debug, Default)]
pub struct History {
    pub times: Vec<float>,
    pub states: Vec<Vector>,
    pub measurements: Vec<Vector>,
    pub estimates: Vec<Vector>,
    pub smoothed: Vec<Vector>,
    pub covariances: Vec<Matrix>,
    pub inputs: Vec<Vector>,
    /// Lower bound the controller placed on `direction . x` one step ahead.
    pub margins: Vec<Option<float>>,
    /// Steps where the controller had no solution and the previous input was held.
    pub fallbacks: Vec<usize>,
}

impl History {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// One plant, one filter and optionally one controller, sharing a fixed linear model.
pub struct Simulation {
    config: SimulatorConfig,
    model: LinearModel,
    plant: Plant,
    rng: ChaCha8Rng,
}

impl Simulation {
    pub fn new(config: SimulatorConfig) -> Result<Simulation, SimulationError> {
        let op = config.linearisation_point();
        let model = config.reactor.linearise(&op, config.dt).map_err(|e| {
            error!("unable to linearise at {:?}: {}", op.as_slice(), e);
            e
        })?;

        Ok(Simulation {
            plant: Plant::new(&config, model.clone()),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            model,
            config,
        })
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Estimate, control, then advance the plant for the configured duration.
    pub fn run_closed_loop(&mut self) -> Result<History, SimulationError> {
        let mpc_config = self
            .config
            .mpc_config(&self.model)?
            .ok_or_else(|| SimulationError::Config("closed loop runs need an [mpc] table".into()))?;
        let controller = MpcController::new(mpc_config)?;
        let fallback = self.config.fallback();
        let offset = controller.config().line.direction.dot(&self.model.b);
        let model = self.model.clone();

        let steps = self.config.num_steps();
        info!(
            "closed loop run of {} steps with {:?} plant",
            steps,
            self.plant.kind()
        );

        let mut held = Vec::new();
        let mut history = self.simulate(steps, |t, belief, u_prev| {
            let previous = if t == 0 { None } else { Some(u_prev) };
            match controller.solve(&model, belief, previous)? {
                ControlOutcome::Optimal(solution) => {
                    let margin = solution.margins.first().map(|m| m + offset);
                    Ok((solution.first_input().clone(), margin))
                }
                ControlOutcome::NoSolution(reason) => match fallback {
                    Fallback::HoldPrevious => {
                        warn!("step {}: {}, holding previous input", t, reason);
                        held.push(t);
                        Ok((u_prev.clone(), None))
                    }
                    Fallback::Abort => Err(SimulationError::ControlUnavailable { step: t, reason }),
                },
            }
        })?;

        history.fallbacks = held;
        info!("closed loop run finished, {} fallbacks", history.fallbacks.len());
        Ok(history)
    }

    /// Applies `inputs` in order, one per step.
    pub fn run_open_loop(&mut self, inputs: &[Vector]) -> Result<History, SimulationError> {
        let m = self.model.num_inputs();
        if let Some(u) = inputs.iter().find(|u| u.len() != m) {
            return Err(SimulationError::Config(format!(
                "open loop input has {} entries, expected {}",
                u.len(),
                m
            )));
        }
        info!("open loop run of {} steps", inputs.len());
        self.simulate(inputs.len(), |t, _, _| Ok((inputs[t].clone(), None)))
    }

    fn simulate<F>(&mut self, steps: usize, mut choose: F) -> Result<History, SimulationError>
    where
        F: FnMut(usize, &Belief, &Vector) -> Result<(Vector, Option<float>), SimulationError>,
    {
        let config = &self.config;
        let model = &self.model;
        let C = config.C();
        let y_offset = &C * &model.b;

        let measurement = MeasurementModel::new(
            C,
            diagonal(&config.estimator.process_noise),
            diagonal(&config.estimator.measurement_noise),
        )?;
        let filter = KalmanFilter::new(model.clone(), measurement)?;

        // The prior is centred on the nominal starting state
        let mut prior_mean = model.to_deviation(&config.initial_state());
        if let Some(ref offset) = config.estimator.prior_offset {
            prior_mean += Vector::from_column_slice(offset);
        }
        let prior_covariance = diagonal(&config.estimator.prior_covariance);

        let mut x = config.initial_state();
        let mut y = self.plant.measure(&x, &mut self.rng);
        let mut tracker = TrackingFilter::new(filter, &prior_mean, &prior_covariance, &(&y - &y_offset))?;

        let mut history = History::default();
        let mut u_prev = Vector::zeros(model.num_inputs());
        history.record(0.0, &x, &y, tracker.belief(), model);

        for t in 0..steps {
            let _guard = flame::start_guard("simulation step");

            let (u, margin) = choose(t, tracker.belief(), &u_prev)?;

            x = self.plant.step(&x, &u, &mut self.rng);
            y = self.plant.measure(&x, &mut self.rng);
            let belief = tracker.step(&u, &(&y - &y_offset))?;

            debug!(
                "step {}: u {:?}, x {:?}, estimate {:?}",
                t,
                u.as_slice(),
                x.as_slice(),
                model.from_deviation(&belief.mean).as_slice()
            );
            history.record((t + 1) as float * config.dt, &x, &y, belief, model);
            history.inputs.push(u.clone());
            history.margins.push(margin);
            u_prev = u;
        }

        let (smoothed, _) = tracker.smoothed()?;
        history.smoothed = smoothed.iter().map(|m| model.from_deviation(m)).collect();
        Ok(history)
    }
}

impl History {
    fn record(&mut self, t: float, x: &Vector, y: &Vector, belief: &Belief, model: &LinearModel) {
        self.times.push(t);
        self.states.push(x.clone());
        self.measurements.push(y.clone());
        self.estimates.push(model.from_deviation(&belief.mean));
        self.covariances.push(belief.covariance.clone());
    }
}

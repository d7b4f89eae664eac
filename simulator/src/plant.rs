use rand::Rng;

use control_model::{ControlModel, Cstr, LinearModel};
use prelude::*;

use crate::config::{diagonal, PlantKind, SimulatorConfig};

/// Ground truth for a run. States are always absolute, whichever model advances them.
#[derive(Clone, Debug)]
pub struct Plant {
    kind: PlantKind,
    reactor: Cstr,
    model: LinearModel,
    dt: float,
    C: Matrix,
    process_noise: Matrix,
    measurement_noise: Matrix,
}

impl Plant {
    pub fn new(config: &SimulatorConfig, model: LinearModel) -> Plant {
        Plant {
            kind: config.plant.kind,
            reactor: config.reactor.clone(),
            model,
            dt: config.dt,
            C: config.C(),
            process_noise: diagonal(&config.plant.process_noise),
            measurement_noise: diagonal(&config.plant.measurement_noise),
        }
    }

    pub fn kind(&self) -> PlantKind {
        self.kind
    }

    pub fn step<R: Rng + ?Sized>(&self, x: &Vector, u: &Vector, rng: &mut R) -> Vector {
        let x_next = match self.kind {
            PlantKind::Nonlinear => self.reactor.step(self.dt, x, u),
            PlantKind::Linear => {
                let x_dev = self.model.to_deviation(x);
                self.model.from_deviation(&self.model.propagate(&x_dev, u))
            }
        };
        x_next + sample_gaussian(rng, &self.process_noise)
    }

    pub fn measure<R: Rng + ?Sized>(&self, x: &Vector, rng: &mut R) -> Vector {
        &self.C * x + sample_gaussian(rng, &self.measurement_noise)
    }
}

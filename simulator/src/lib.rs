// Ignore this lint otherwise many warnings are generated for common mathematical notation
#![allow(non_snake_case)]

use thiserror::Error;

use control_model::ModelError;
use controller::{ConfigError, NoSolution};
use estimator::EstimatorError;

pub mod config;
pub use config::{Fallback, PlantKind, SimulatorConfig};

mod driver;
pub use driver::{History, Simulation};

pub mod metrics;

mod plant;
pub use plant::Plant;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error(transparent)]
    Controller(#[from] ConfigError),
    #[error("no control action at step {step}: {reason}")]
    ControlUnavailable { step: usize, reason: NoSolution },
}

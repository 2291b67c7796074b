pub mod belief_propagation;
pub(crate) mod bp_compute;
pub mod factor_graph;
pub mod legend;
pub mod marginals;
pub mod model;
pub mod potentials;
pub mod weights;

pub use belief_propagation::{run_bp, BPResult, BPState, ConvergenceMetric, Messages};
pub use factor_graph::{FactorGraph, FactorId, FactorKind, VarId};
pub use legend::Legend;
pub use marginals::Marginals;
pub use model::{format_risk, RiskChange, RiskModel, RiskReport, ScenarioOutcome};
pub use potentials::{Evidence, MissingWeightPolicy, Potentials};
pub use weights::{Cutoff, WeightTable};

use thiserror::Error;

type Result<T> = std::result::Result<T, RiskError>;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Cannot load the weight table: {0}")]
    ModelLoad(String),
    #[error("Cannot read the weight table.")]
    Io(#[from] std::io::Error),
    #[error("Malformed weight table.")]
    Csv(#[from] csv::Error),
    #[error("Malformed weight workbook.")]
    Workbook(#[from] calamine::Error),
    #[error("Unknown feature {0}.")]
    UnknownFeature(String),
    #[error("State {state} is out of range for feature {feature} ({nc} states).")]
    InvalidState {
        feature: String,
        state: i64,
        nc: usize,
    },
    #[error("No trained weight for feature {feature} with label {label}.")]
    MissingWeight { feature: String, label: String },
    #[error("A factor graph needs at least 2 variables, got {0}.")]
    InvalidVariableCount(usize),
    #[error("Variable {0} is declared more than once.")]
    DuplicateVariable(String),
    #[error("Variable {var} must have at least 2 states, got {nc}.")]
    InvalidCardinality { var: String, nc: usize },
    #[error("No factor with id {0}.")]
    UnknownFactor(usize),
    #[error("No edge between variable {var} and factor {factor}.")]
    NoEdge { var: usize, factor: usize },
    #[error("Incorrect shape for the potential of factor {factor}: expected {expected:?}, got {dim:?}.")]
    PotentialShape {
        factor: usize,
        expected: Vec<usize>,
        dim: Vec<usize>,
    },
}

/// Parameters of one inference call.
///
/// A `Config` is passed by reference into every call, nothing in the loaded model is
/// reconfigured between calls.
#[derive(Clone, Debug)]
pub struct Config {
    /// Convergence threshold on the per-iteration error.
    pub precision: f64,
    /// Maximum number of message-passing sweeps.
    pub max_iter: usize,
    /// How the per-iteration error is measured.
    pub metric: ConvergenceMetric,
    /// What to do with states that have no trained weight.
    pub missing_weights: MissingWeightPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            precision: 1e-7,
            max_iter: 1000,
            metric: ConvergenceMetric::SumDifference,
            missing_weights: MissingWeightPolicy::Zero,
        }
    }
}

impl Config {
    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
    pub fn with_metric(mut self, metric: ConvergenceMetric) -> Self {
        self.metric = metric;
        self
    }
    pub fn strict_weights(mut self) -> Self {
        self.missing_weights = MissingWeightPolicy::Strict;
        self
    }
}

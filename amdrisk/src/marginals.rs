use indexmap::IndexMap;
use ndarray::{Array1, ArrayView1};

use crate::belief_propagation::Messages;
use crate::bp_compute;
use crate::factor_graph::{FactorGraph, VarId};

/// State of the target variable that denotes the outcome.
pub const POSITIVE_STATE: usize = 1;

/// Posterior distribution of every variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Marginals {
    distributions: Vec<Array1<f64>>,
    target: VarId,
}

impl Marginals {
    /// Product of all incoming factor to variable messages of each variable, normalized to sum
    /// to one. A variable whose product sums to zero keeps its unnormalized (zero) product.
    pub fn extract(graph: &FactorGraph, messages: &Messages) -> Self {
        let distributions = (0..graph.n_vars())
            .map(|var| {
                let mut distri = bp_compute::product(messages.to_var(graph, var), graph.nc(var));
                if !bp_compute::normalize(&mut distri) {
                    log::warn!("Marginal of {} sums to zero.", graph.var_name(var));
                }
                distri
            })
            .collect();
        Self {
            distributions,
            target: graph.target(),
        }
    }

    pub fn get(&self, var: VarId) -> ArrayView1<'_, f64> {
        self.distributions[var].view()
    }

    pub fn target(&self) -> ArrayView1<'_, f64> {
        self.get(self.target)
    }

    /// Posterior probability of the outcome.
    pub fn risk_score(&self) -> f64 {
        self.distributions[self.target][POSITIVE_STATE]
    }

    /// Distributions keyed by variable name, in variable id order.
    pub fn by_name(&self, graph: &FactorGraph) -> IndexMap<String, Vec<f64>> {
        self.distributions
            .iter()
            .enumerate()
            .map(|(var, d)| (graph.var_name(var).to_owned(), d.to_vec()))
            .collect()
    }
}

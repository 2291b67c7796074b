//! Sum-product belief propagation on the risk factor graph.
//!
//! Messages are stored per edge, in two families: variable to factor and factor to variable.
//! A sweep first recomputes all variable to factor messages from the previous factor to
//! variable messages, then all factor to variable messages from the new variable to factor
//! messages. Every family is computed into fresh buffers: no message of a sweep is read
//! before the sweep that produced it is complete.
//!
//! The star graph is a tree, hence the algorithm is exact and reaches its fixed point after a
//! few sweeps, whatever the number of features.

use ndarray::{Array1, ArrayView1};

use crate::bp_compute;
use crate::factor_graph::{FactorGraph, FactorId, VarId};
use crate::potentials::Potentials;
use crate::{Config, Result};

type EdgeVec<T> = Vec<T>;

/// Per-iteration error used for the convergence test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergenceMetric {
    /// `|sum(old - new)|` per factor to variable message, maximized over messages.
    ///
    /// Opposite changes on the states of one message cancel out, so this may report
    /// convergence of messages that are still changing.
    #[default]
    SumDifference,
    /// Largest absolute change of any entry of any factor to variable message.
    MaxAbsDifference,
}

impl ConvergenceMetric {
    fn error(self, old: ArrayView1<f64>, new: ArrayView1<f64>) -> f64 {
        match self {
            Self::SumDifference => bp_compute::sum_difference(old, new),
            Self::MaxAbsDifference => bp_compute::max_abs_difference(old, new),
        }
    }
}

/// Both message families, indexed by edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Messages {
    pub(crate) var_to_factor: EdgeVec<Array1<f64>>,
    pub(crate) factor_to_var: EdgeVec<Array1<f64>>,
}

impl Messages {
    /// Initial messages.
    ///
    /// Variable to factor messages are all ones. Factor to variable messages of degree-1
    /// factors are the factor potential, the others are all ones.
    pub fn init(graph: &FactorGraph, potentials: &Potentials) -> Self {
        let var_to_factor = graph
            .edges
            .iter()
            .map(|e| Array1::ones(graph.nc(e.var)))
            .collect();
        let factor_to_var = graph
            .edges
            .iter()
            .map(|e| {
                let table = potentials.table(e.factor);
                if graph.factor(e.factor).edges.len() == 1 {
                    table.iter().copied().collect()
                } else {
                    Array1::ones(graph.nc(e.var))
                }
            })
            .collect();
        Self {
            var_to_factor,
            factor_to_var,
        }
    }

    pub fn var_to_factor(
        &self,
        graph: &FactorGraph,
        var: VarId,
        factor: FactorId,
    ) -> Result<ArrayView1<'_, f64>> {
        Ok(self.var_to_factor[graph.edge(var, factor)?].view())
    }

    pub fn factor_to_var(
        &self,
        graph: &FactorGraph,
        factor: FactorId,
        var: VarId,
    ) -> Result<ArrayView1<'_, f64>> {
        Ok(self.factor_to_var[graph.edge(var, factor)?].view())
    }

    /// Incoming factor to variable messages of a variable, in adjacency order.
    pub(crate) fn to_var<'a>(
        &'a self,
        graph: &'a FactorGraph,
        var: VarId,
    ) -> impl Iterator<Item = ArrayView1<'a, f64>> + 'a {
        graph
            .var(var)
            .edges
            .values()
            .map(move |e| self.factor_to_var[*e].view())
    }
}

/// Outcome of a run. Not converging within the iteration cap is not an error: check
/// `converged`, or `error` against the precision.
#[derive(Debug, Clone)]
pub struct BPResult {
    pub messages: Messages,
    /// Number of sweeps performed.
    pub iterations: usize,
    /// Error of the last sweep.
    pub error: f64,
    pub converged: bool,
}

pub struct BPState<'a> {
    graph: &'a FactorGraph,
    potentials: &'a Potentials,
    messages: Messages,
}

impl<'a> BPState<'a> {
    pub fn new(graph: &'a FactorGraph, potentials: &'a Potentials) -> Self {
        Self {
            graph,
            potentials,
            messages: Messages::init(graph, potentials),
        }
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// New variable to factor messages: for every edge, product of the messages coming from
    /// the other factors of the variable.
    fn update_variables(&self) -> EdgeVec<Array1<f64>> {
        let mut res: EdgeVec<Array1<f64>> = vec![Array1::zeros(0); self.graph.n_edges()];
        for var_id in 0..self.graph.n_vars() {
            let incoming: Vec<_> = self.messages.to_var(self.graph, var_id).collect();
            let products = bp_compute::exclusive_products(&incoming, self.graph.nc(var_id));
            for (edge, msg) in self.graph.var(var_id).edges.values().zip(products) {
                res[*edge] = msg;
            }
        }
        res
    }

    /// New factor to variable messages, computed from `var_to_factor`.
    fn update_factors(&self, var_to_factor: &[Array1<f64>]) -> EdgeVec<Array1<f64>> {
        let mut res: EdgeVec<Array1<f64>> = vec![Array1::zeros(0); self.graph.n_edges()];
        for (factor_id, factor) in self.graph.factors.iter().enumerate() {
            let incoming: Vec<_> = factor
                .edges
                .values()
                .map(|e| var_to_factor[*e].view())
                .collect();
            let table = self.potentials.table(factor_id);
            for edge in factor.edges.values() {
                res[*edge] = bp_compute::factor_message(
                    table.view(),
                    &incoming,
                    self.graph.edges[*edge].pos_factor,
                );
            }
        }
        res
    }

    /// One synchronous sweep, returns the error between the previous and the new factor to
    /// variable messages.
    pub fn sweep(&mut self, metric: ConvergenceMetric) -> f64 {
        let var_to_factor = self.update_variables();
        let factor_to_var = self.update_factors(&var_to_factor);
        let error = self
            .messages
            .factor_to_var
            .iter()
            .zip(factor_to_var.iter())
            .map(|(old, new)| metric.error(old.view(), new.view()))
            .fold(0.0, f64::max);
        self.messages = Messages {
            var_to_factor,
            factor_to_var,
        };
        error
    }

    /// Sweeps until the error is at most `config.precision`, or `config.max_iter` sweeps.
    pub fn run(mut self, config: &Config) -> BPResult {
        let mut iterations = 0;
        let mut error = 0.0;
        let mut converged = false;
        while !converged && iterations < config.max_iter {
            iterations += 1;
            error = self.sweep(config.metric);
            log::debug!("BP iteration {}: error {:e}", iterations, error);
            converged = error <= config.precision;
        }
        if !converged {
            log::warn!(
                "BP did not converge after {} iterations (error {:e}, precision {:e})",
                iterations,
                error,
                config.precision
            );
        }
        BPResult {
            messages: self.messages,
            iterations,
            error,
            converged,
        }
    }
}

/// Runs belief propagation from the initial messages.
pub fn run_bp(graph: &FactorGraph, potentials: &Potentials, config: &Config) -> BPResult {
    BPState::new(graph, potentials).run(config)
}

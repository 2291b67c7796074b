//! Risk model: a weight table loaded for one cutoff, and its factor graph.
//!
//! The model is immutable once loaded. Every inference call receives its evidence, legend
//! and [`Config`] explicitly, so one model can serve concurrent callers.

use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;

use crate::belief_propagation::run_bp;
use crate::factor_graph::FactorGraph;
use crate::legend::Legend;
use crate::marginals::Marginals;
use crate::potentials::{Evidence, Potentials};
use crate::weights::{Cutoff, WeightTable};
use crate::{Config, Result};

/// Risk differences smaller than this (in absolute value) are reported as unchanged.
pub const SIGNIFICANT_CHANGE: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct RiskModel {
    weights: WeightTable,
    graph: FactorGraph,
    cutoff: Cutoff,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub cutoff: Cutoff,
    /// Posterior probability of the outcome.
    pub score: f64,
    pub marginals: IndexMap<String, Vec<f64>>,
    pub iterations: usize,
    pub error: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskChange {
    Reduced,
    Increased,
    Unchanged,
}

impl RiskChange {
    pub fn from_delta(delta: f64) -> Self {
        if delta < -SIGNIFICANT_CHANGE {
            Self::Reduced
        } else if delta > SIGNIFICANT_CHANGE {
            Self::Increased
        } else {
            Self::Unchanged
        }
    }
}

/// Comparison of a baseline profile with a modified one.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub baseline: RiskReport,
    pub scenario: RiskReport,
    /// `scenario.score - baseline.score`
    pub delta: f64,
    pub change: RiskChange,
}

impl RiskModel {
    /// Builds the graph over the features of the weight table, in table order, followed by
    /// the binary target.
    pub fn new(weights: WeightTable, target: &str, cutoff: Cutoff) -> Result<Self> {
        let graph = FactorGraph::build(weights.features(), target)?;
        log::info!(
            "Risk model for stages {}: {} features, {} factors",
            cutoff,
            graph.n_vars() - 1,
            graph.n_factors()
        );
        Ok(Self {
            weights,
            graph,
            cutoff,
        })
    }

    /// Loads the weight table trained for `cutoff` from a results directory.
    pub fn load(
        dir: impl AsRef<Path>,
        cutoff: Cutoff,
        fixed_state: u8,
        target: &str,
    ) -> Result<Self> {
        Self::new(WeightTable::load(dir, cutoff, fixed_state)?, target, cutoff)
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }
    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }
    pub fn cutoff(&self) -> Cutoff {
        self.cutoff
    }

    pub fn potentials(
        &self,
        evidence: &Evidence,
        legend: &Legend,
        config: &Config,
    ) -> Result<Potentials> {
        Potentials::assemble(
            &self.graph,
            &self.weights,
            evidence,
            legend,
            config.missing_weights,
        )
    }

    /// Posterior risk of the outcome for a patient profile.
    pub fn calculate_risk(
        &self,
        evidence: &Evidence,
        legend: &Legend,
        config: &Config,
    ) -> Result<RiskReport> {
        let potentials = self.potentials(evidence, legend, config)?;
        let res = run_bp(&self.graph, &potentials, config);
        let marginals = Marginals::extract(&self.graph, &res.messages);
        log::debug!(
            "Risk {} after {} iterations (error {:e})",
            marginals.risk_score(),
            res.iterations,
            res.error
        );
        Ok(RiskReport {
            cutoff: self.cutoff,
            score: marginals.risk_score(),
            marginals: marginals.by_name(&self.graph),
            iterations: res.iterations,
            error: res.error,
            converged: res.converged,
        })
    }

    /// Risk of `baseline`, and of `baseline` with the states in `changes` substituted.
    pub fn simulate(
        &self,
        baseline: &Evidence,
        changes: &Evidence,
        legend: &Legend,
        config: &Config,
    ) -> Result<ScenarioOutcome> {
        let mut modified = baseline.clone();
        for (feature, state) in changes.iter() {
            modified.insert(feature.clone(), *state);
        }
        let baseline = self.calculate_risk(baseline, legend, config)?;
        let scenario = self.calculate_risk(&modified, legend, config)?;
        let delta = scenario.score - baseline.score;
        Ok(ScenarioOutcome {
            baseline,
            scenario,
            delta,
            change: RiskChange::from_delta(delta),
        })
    }
}

/// Formats a risk (or risk difference) for display: two decimals from 0.1 on, two significant
/// digits below.
pub fn format_risk(val: f64) -> String {
    if val == 0.0 {
        return "0.00".to_owned();
    }
    if val.abs() >= 0.1 {
        return format!("{:.2}", val);
    }
    // Exponent after rounding to two significant digits.
    let sci = format!("{:.1e}", val);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return sci,
    };
    if exp < -4 {
        format!("{}e-{:02}", strip_zeros(mantissa), -exp)
    } else {
        let decimals = (1 - exp).max(0) as usize;
        strip_zeros(&format!("{:.*}", decimals, val)).to_owned()
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

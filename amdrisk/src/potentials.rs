//! Potential tables of the factors, built from trained weights and patient evidence.

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayD, ArrayViewD};

use crate::factor_graph::{FactorGraph, FactorId, FactorKind, VarId};
use crate::legend::{Legend, UNKNOWN_CODE};
use crate::weights::WeightTable;
use crate::{Result, RiskError};

/// Observed state code for each observed feature, by name. Missing features are unobserved, as
/// are features set to [`UNKNOWN_CODE`].
pub type Evidence = IndexMap<String, i64>;

/// Treatment of feature states that have no trained weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingWeightPolicy {
    /// The state gets weight 0.0 under both target contexts.
    #[default]
    Zero,
    /// Fail with [`RiskError::MissingWeight`].
    Strict,
}

/// One potential table per factor, indexed by factor id. Table axes follow the factor's
/// variable order.
#[derive(Debug, Clone, PartialEq)]
pub struct Potentials {
    tables: Vec<ArrayD<f64>>,
}

impl Potentials {
    /// Uninformative potentials (all ones) for every factor.
    pub fn uniform(graph: &FactorGraph) -> Self {
        Self {
            tables: (0..graph.n_factors())
                .map(|f| ArrayD::ones(graph.factor_shape(f)))
                .collect(),
        }
    }

    /// Builds the potentials of every factor for one patient.
    ///
    /// All evidence is validated before any table is built.
    pub fn assemble(
        graph: &FactorGraph,
        weights: &WeightTable,
        evidence: &Evidence,
        legend: &Legend,
        policy: MissingWeightPolicy,
    ) -> Result<Self> {
        let observed = resolve_evidence(graph, evidence)?;
        if let Some((feature, _)) = legend.features().find(|(f, _)| graph.get_varid(f).is_err()) {
            return Err(RiskError::UnknownFeature(feature.to_owned()));
        }
        let tables = (0..graph.n_factors())
            .map(|f| match graph.factor_kind(f) {
                FactorKind::Evidence(var) | FactorKind::Prior(var) => {
                    Ok(clamped(graph.nc(var), observed[var]).into_dyn())
                }
                FactorKind::Weight { feature, target } => {
                    weight_table(graph, weights, legend, policy, feature, target)
                        .map(Array2::into_dyn)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tables })
    }

    pub fn get(&self, factor: FactorId) -> Result<ArrayViewD<'_, f64>> {
        self.tables
            .get(factor)
            .map(|t| t.view())
            .ok_or(RiskError::UnknownFactor(factor))
    }

    /// Table of a factor id taken from the graph the potentials were built for.
    pub(crate) fn table(&self, factor: FactorId) -> ArrayViewD<'_, f64> {
        self.tables[factor].view()
    }

    /// Replaces the table of a factor, keeping its shape.
    pub fn set(&mut self, factor: FactorId, table: ArrayD<f64>) -> Result<()> {
        let expected = self
            .tables
            .get(factor)
            .ok_or(RiskError::UnknownFactor(factor))?
            .shape();
        if table.shape() != expected {
            return Err(RiskError::PotentialShape {
                factor,
                expected: expected.to_vec(),
                dim: table.shape().to_vec(),
            });
        }
        self.tables[factor] = table;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Observed state per variable, `None` for unobserved variables.
fn resolve_evidence(graph: &FactorGraph, evidence: &Evidence) -> Result<Vec<Option<usize>>> {
    let mut observed = vec![None; graph.n_vars()];
    for (feature, &code) in evidence.iter() {
        let var = graph.get_varid(feature)?;
        if code == UNKNOWN_CODE {
            continue;
        }
        let nc = graph.nc(var);
        if code < 0 || code as usize >= nc {
            return Err(RiskError::InvalidState {
                feature: feature.clone(),
                state: code,
                nc,
            });
        }
        observed[var] = Some(code as usize);
    }
    Ok(observed)
}

/// One-hot table at the observed state, all ones when unobserved.
fn clamped(nc: usize, state: Option<usize>) -> Array1<f64> {
    match state {
        Some(s) => Array1::from_shape_fn(nc, |i| if i == s { 1.0 } else { 0.0 }),
        None => Array1::ones(nc),
    }
}

/// Pairwise table (feature state, target state): entry `(s, t)` is the `x=1` weight of the
/// label of state `s` under target context `t`.
fn weight_table(
    graph: &FactorGraph,
    weights: &WeightTable,
    legend: &Legend,
    policy: MissingWeightPolicy,
    feature: VarId,
    target: VarId,
) -> Result<Array2<f64>> {
    let name = graph.var_name(feature);
    let mut table = Array2::zeros((graph.nc(feature), graph.nc(target)));
    for (s, mut row) in table.outer_iter_mut().enumerate() {
        let label = legend.label(name, s as i64);
        match label.and_then(|l| weights.get(name, l)) {
            Some(entry) => {
                for (t, w) in row.iter_mut().enumerate() {
                    *w = entry.x1(t);
                }
            }
            None => {
                if policy == MissingWeightPolicy::Strict {
                    return Err(RiskError::MissingWeight {
                        feature: name.to_owned(),
                        label: label.map_or_else(|| format!("<state {}>", s), str::to_owned),
                    });
                }
            }
        }
    }
    Ok(table)
}

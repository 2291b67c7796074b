//! Topology of the risk model.
//!
//! The graph is a "star of stars": every feature variable is attached to its own evidence
//! factor and, through a weight factor, to the target variable, which additionally carries a
//! prior factor.
//!
//! Ids are dense indices:
//! - variables: features `0..N-1`, target `N-1`,
//! - factors: evidence `0..N-1` (factor `i` on feature `i`), weight `N-1..2N-2` (factor `N-1+i`
//!   on feature `i` then the target), prior `2N-2`.
//!
//! Every factor carries its [`FactorKind`], ids are never classified by range.

use indexmap::IndexMap;

use crate::{RiskError, Result};

pub type VarId = usize;
pub type FactorId = usize;
pub type EdgeId = usize;

type NamedList<T> = IndexMap<String, T>;

/// Number of states of the target variable (outcome absent/present).
pub const TARGET_NC: usize = 2;

#[derive(Debug, Clone)]
pub(crate) struct Var {
    pub(crate) nc: usize,
    pub(crate) edges: IndexMap<FactorId, EdgeId>,
}

#[derive(Debug, Clone)]
pub(crate) struct Factor {
    pub(crate) kind: FactorKind,
    // Ordered as the axes of the potential table.
    pub(crate) edges: IndexMap<VarId, EdgeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorKind {
    /// Patient evidence on a feature.
    Evidence(VarId),
    /// Trained weights linking a feature to the target.
    Weight { feature: VarId, target: VarId },
    /// Prior on the target.
    Prior(VarId),
}

impl FactorKind {
    /// Incident variables, in potential table axis order.
    fn vars(&self) -> Vec<VarId> {
        match *self {
            FactorKind::Evidence(v) | FactorKind::Prior(v) => vec![v],
            FactorKind::Weight { feature, target } => vec![feature, target],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub(crate) var: VarId,
    pub(crate) factor: FactorId,
    pub(crate) pos_factor: usize,
}

#[derive(Debug, Clone)]
pub struct FactorGraph {
    pub(crate) vars: NamedList<Var>,
    pub(crate) factors: Vec<Factor>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) target: VarId,
}

impl FactorGraph {
    /// Builds the star topology over named features with their number of states.
    ///
    /// The target comes last and always has [`TARGET_NC`] states.
    pub fn build<S: Into<String>>(
        features: impl IntoIterator<Item = (S, usize)>,
        target: impl Into<String>,
    ) -> Result<Self> {
        let mut graph = Self {
            vars: NamedList::new(),
            factors: Vec::new(),
            edges: Vec::new(),
            target: 0,
        };
        for (name, nc) in features {
            graph.add_var(name.into(), nc)?;
        }
        let n_features = graph.vars.len();
        if n_features == 0 {
            return Err(RiskError::InvalidVariableCount(1));
        }
        graph.target = graph.add_var(target.into(), TARGET_NC)?;
        for feature in 0..n_features {
            graph.add_factor(FactorKind::Evidence(feature));
        }
        for feature in 0..n_features {
            graph.add_factor(FactorKind::Weight {
                feature,
                target: graph.target,
            });
        }
        graph.add_factor(FactorKind::Prior(graph.target));
        Ok(graph)
    }

    /// Star topology over `n_variables` anonymous binary variables (`x0`, `x1`, ..., the
    /// last one being the target).
    pub fn star(n_variables: usize) -> Result<Self> {
        if n_variables < 2 {
            return Err(RiskError::InvalidVariableCount(n_variables));
        }
        Self::build(
            (0..n_variables - 1).map(|i| (format!("x{}", i), 2)),
            format!("x{}", n_variables - 1),
        )
    }

    fn add_var(&mut self, name: String, nc: usize) -> Result<VarId> {
        if self.vars.contains_key(&name) {
            return Err(RiskError::DuplicateVariable(name));
        }
        if nc < 2 {
            return Err(RiskError::InvalidCardinality { var: name, nc });
        }
        let (var_id, _) = self.vars.insert_full(
            name,
            Var {
                nc,
                edges: IndexMap::new(),
            },
        );
        Ok(var_id)
    }

    fn add_factor(&mut self, kind: FactorKind) {
        let factor_id = self.factors.len();
        let mut edges = IndexMap::new();
        for var_id in kind.vars() {
            let edge_id = self.edges.len();
            let var = &mut self.vars[var_id];
            var.edges.insert(factor_id, edge_id);
            edges.insert(var_id, edge_id);
            self.edges.push(Edge {
                var: var_id,
                factor: factor_id,
                pos_factor: edges.len() - 1,
            });
        }
        self.factors.push(Factor { kind, edges });
    }

    pub fn edge(&self, var: VarId, factor: FactorId) -> Result<EdgeId> {
        self.vars
            .get_index(var)
            .and_then(|(_, v)| v.edges.get(&factor))
            .copied()
            .ok_or(RiskError::NoEdge { var, factor })
    }

    pub(crate) fn var(&self, var: VarId) -> &Var {
        &self.vars[var]
    }
    pub(crate) fn factor(&self, factor: FactorId) -> &Factor {
        &self.factors[factor]
    }

    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }
    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }
    pub fn target(&self) -> VarId {
        self.target
    }
    /// Feature variables, in id order.
    pub fn features(&self) -> impl Iterator<Item = VarId> + '_ {
        (0..self.n_vars()).filter(move |v| *v != self.target)
    }
    pub fn nc(&self, var: VarId) -> usize {
        self.vars[var].nc
    }
    pub fn var_name(&self, var: VarId) -> &str {
        self.vars.get_index(var).map(|(n, _)| n.as_str()).unwrap_or("")
    }
    pub fn get_varid(&self, var: &str) -> Result<VarId> {
        self.vars
            .get_index_of(var)
            .ok_or_else(|| RiskError::UnknownFeature(var.to_owned()))
    }
    pub fn factor_kind(&self, factor: FactorId) -> FactorKind {
        self.factors[factor].kind
    }
    /// Variables incident to a factor, in potential table axis order.
    pub fn factor_vars(&self, factor: FactorId) -> impl Iterator<Item = VarId> + '_ {
        self.factors[factor].edges.keys().copied()
    }
    /// Factors incident to a variable, in adjacency order.
    pub fn var_factors(&self, var: VarId) -> impl Iterator<Item = FactorId> + '_ {
        self.vars[var].edges.keys().copied()
    }
    /// Evidence factor attached to a feature.
    pub fn evidence_factor(&self, var: VarId) -> Option<FactorId> {
        self.var_factors(var)
            .find(|f| matches!(self.factors[*f].kind, FactorKind::Evidence(_)))
    }
    /// Shape of the potential table of a factor.
    pub fn factor_shape(&self, factor: FactorId) -> Vec<usize> {
        self.factor_vars(factor).map(|v| self.nc(v)).collect()
    }

    /// Whether the graph contains a cycle (it never does for the star topology, on which
    /// sum-product is exact).
    pub fn is_cyclic(&self) -> bool {
        // Union-find over variable and factor nodes: an edge joining two nodes that are
        // already connected closes a cycle.
        let n_vars = self.n_vars();
        let mut parent: Vec<usize> = (0..n_vars + self.n_factors()).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        for edge in self.edges.iter() {
            let a = find(&mut parent, edge.var);
            let b = find(&mut parent, n_vars + edge.factor);
            if a == b {
                return true;
            }
            parent[a] = b;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_counts() {
        for n in 2..20 {
            let graph = FactorGraph::star(n).unwrap();
            assert_eq!(graph.n_vars(), n);
            assert_eq!(graph.n_factors(), 2 * (n - 1) + 1);
            let kinds: Vec<_> = (0..graph.n_factors())
                .map(|f| graph.factor_kind(f))
                .collect();
            let n_ev = kinds
                .iter()
                .filter(|k| matches!(k, FactorKind::Evidence(_)))
                .count();
            let n_w = kinds
                .iter()
                .filter(|k| matches!(k, FactorKind::Weight { .. }))
                .count();
            let n_prior = kinds
                .iter()
                .filter(|k| matches!(k, FactorKind::Prior(_)))
                .count();
            assert_eq!((n_ev, n_w, n_prior), (n - 1, n - 1, 1));
            assert!(!graph.is_cyclic());
        }
    }

    #[test]
    fn id_layout() {
        let graph = FactorGraph::star(4).unwrap();
        assert_eq!(graph.target(), 3);
        assert_eq!(graph.factor_kind(1), FactorKind::Evidence(1));
        assert_eq!(
            graph.factor_kind(3 + 1),
            FactorKind::Weight {
                feature: 1,
                target: 3
            }
        );
        assert_eq!(graph.factor_kind(6), FactorKind::Prior(3));
        assert_eq!(graph.var_factors(1).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(graph.var_factors(3).collect::<Vec<_>>(), vec![3, 4, 5, 6]);
        assert_eq!(graph.factor_vars(4).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(graph.evidence_factor(2), Some(2));
        assert_eq!(graph.evidence_factor(3), None);
        assert_eq!(graph.edge(1, 4).unwrap(), graph.factor(4).edges[&1]);
        assert!(matches!(
            graph.edge(1, 5),
            Err(RiskError::NoEdge { var: 1, factor: 5 })
        ));
        assert!(graph.edge(9, 0).is_err());
    }

    #[test]
    fn edges_are_consistent() {
        let graph = FactorGraph::star(5).unwrap();
        for (e, edge) in graph.edges.iter().enumerate() {
            assert_eq!(graph.var(edge.var).edges[&edge.factor], e);
            assert_eq!(graph.factor(edge.factor).edges[&edge.var], e);
            assert_eq!(
                graph.factor(edge.factor).edges.get_index_of(&edge.var),
                Some(edge.pos_factor)
            );
        }
    }

    #[test]
    fn named_build() {
        let graph = FactorGraph::build([("age", 4), ("smoker", 2)], "amd").unwrap();
        assert_eq!(graph.get_varid("smoker").unwrap(), 1);
        assert_eq!(graph.var_name(2), "amd");
        assert_eq!(graph.factor_shape(2), vec![4, 2]);
        assert!(matches!(
            graph.get_varid("bmi"),
            Err(RiskError::UnknownFeature(_))
        ));
    }

    #[test]
    fn invalid_builds() {
        assert!(matches!(
            FactorGraph::star(1),
            Err(RiskError::InvalidVariableCount(1))
        ));
        assert!(matches!(
            FactorGraph::star(0),
            Err(RiskError::InvalidVariableCount(0))
        ));
        assert!(matches!(
            FactorGraph::build([("a", 2), ("a", 3)], "t"),
            Err(RiskError::DuplicateVariable(_))
        ));
        assert!(matches!(
            FactorGraph::build([("a", 2)], "a"),
            Err(RiskError::DuplicateVariable(_))
        ));
        assert!(matches!(
            FactorGraph::build([("a", 1)], "t"),
            Err(RiskError::InvalidCardinality { nc: 1, .. })
        ));
    }
}

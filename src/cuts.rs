use parking_lot::RwLock;
use tracing::debug;

use crate::config::PNorm;
use crate::geometry::{
    SurfacePoint, VIOLATION_TOLERANCE, projection_points, tangent_hyperplane, violation,
};
use crate::model::{FairnessModel, LinearConstraint, LinearExpr, VarId};

/// Read-only view of an integer-feasible candidate, indexed by [`VarId`].
#[derive(Debug, Clone, Copy)]
pub struct CandidateSnapshot<'a> {
    values: &'a [f64],
}

impl<'a> CandidateSnapshot<'a> {
    pub fn new(values: &'a [f64]) -> Self {
        Self { values }
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.index()]
    }
}

/// Lazy constraint callback, invoked once per integer-feasible candidate.
///
/// Returning a non-empty list rejects the candidate; every returned inequality
/// must be globally valid, since the engine keeps it for the rest of the search.
/// Implementations may be called concurrently and must not keep per-call state.
pub trait CutGenerator: Send + Sync {
    fn generate_cuts(&self, candidate: &CandidateSnapshot<'_>) -> Vec<LinearConstraint>;
}

/// Tangent-plane cuts for `l[i] <= k[i]^(1/p) * l_eps^(1-1/p)`.
#[derive(Debug, Clone)]
pub struct OuterApproximation {
    p: u32,
    source_cost: Vec<VarId>,
    auxiliary: Vec<VarId>,
    fairness_factor: VarId,
}

impl OuterApproximation {
    /// `None` for the max-norm model, whose fairness constraint is already exact.
    pub fn new(model: &FairnessModel) -> Option<Self> {
        let PNorm::Finite(p) = model.p_norm() else {
            return None;
        };
        let handles = model.handles();
        Some(Self {
            p,
            source_cost: handles.source_cost.clone(),
            auxiliary: handles.auxiliary.clone(),
            fairness_factor: handles.fairness_factor,
        })
    }

    fn cuts_for_source(&self, source: usize, candidate: SurfacePoint) -> Vec<LinearConstraint> {
        projection_points(candidate, self.p)
            .into_iter()
            .map(|at| tangent_hyperplane(at, self.p))
            .filter(|plane| !plane.is_degenerate())
            .map(|plane| {
                let expr = LinearExpr::new()
                    .with_term(self.auxiliary[source], plane.aux)
                    .with_term(self.fairness_factor, plane.fairness)
                    .with_term(self.source_cost[source], plane.cost);
                debug!("adding OA for source {source}: {expr:?}");
                LinearConstraint::geq(format!("oa_{source}"), expr, 0.0)
            })
            .collect()
    }
}

impl CutGenerator for OuterApproximation {
    fn generate_cuts(&self, candidate: &CandidateSnapshot<'_>) -> Vec<LinearConstraint> {
        // LP round-off can leave tiny negatives, which powf would turn into NaN.
        let y = candidate.value(self.fairness_factor).max(0.0);
        (0..self.source_cost.len())
            .flat_map(|i| {
                let point = SurfacePoint::new(
                    candidate.value(self.auxiliary[i]).max(0.0),
                    y,
                    candidate.value(self.source_cost[i]).max(0.0),
                );
                if violation(point, self.p) > VIOLATION_TOLERANCE {
                    self.cuts_for_source(i, point)
                } else {
                    Vec::new()
                }
            })
            .collect()
    }
}

/// Append-only store of global cuts shared by every node of a search.
#[derive(Debug, Default)]
pub struct CutPool {
    cuts: RwLock<Vec<LinearConstraint>>,
}

impl CutPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, cuts: impl IntoIterator<Item = LinearConstraint>) {
        self.cuts.write().extend(cuts);
    }

    pub fn len(&self) -> usize {
        self.cuts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<LinearConstraint> {
        self.cuts.read().clone()
    }
}

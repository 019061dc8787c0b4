use crate::config::{FairnessConfig, PNorm};
use crate::geometry::{SurfacePoint, tangent_hyperplane};
use crate::instance::CostMatrix;

/// Slack allowed when checking a source-cost vector against the fairness bound.
const FAIRNESS_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Binary,
    Continuous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
}

impl VariableDef {
    pub fn binary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Binary,
            lower: 0.0,
            upper: 1.0,
        }
    }

    /// Non-negative, unbounded above.
    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Continuous,
            lower: 0.0,
            upper: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(VarId, f64)>,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, var: VarId, coefficient: f64) -> Self {
        self.terms.push((var, coefficient));
        self
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(var, coefficient)| coefficient * values[var.index()])
            .sum()
    }
}

impl FromIterator<(VarId, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (VarId, f64)>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    LessEqual,
    Equal,
    GreaterEqual,
}

/// `expr (<=|=|>=) rhs`, named for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn leq(name: impl Into<String>, expr: LinearExpr, rhs: f64) -> Self {
        Self::new(name, expr, Sense::LessEqual, rhs)
    }

    pub fn eq(name: impl Into<String>, expr: LinearExpr, rhs: f64) -> Self {
        Self::new(name, expr, Sense::Equal, rhs)
    }

    pub fn geq(name: impl Into<String>, expr: LinearExpr, rhs: f64) -> Self {
        Self::new(name, expr, Sense::GreaterEqual, rhs)
    }

    fn new(name: impl Into<String>, expr: LinearExpr, sense: Sense, rhs: f64) -> Self {
        Self {
            name: name.into(),
            expr,
            sense,
            rhs,
        }
    }

    /// Amount by which `values` violate the constraint, `0.0` when satisfied.
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            Sense::LessEqual => (lhs - self.rhs).max(0.0),
            Sense::Equal => (lhs - self.rhs).abs(),
            Sense::GreaterEqual => (self.rhs - lhs).max(0.0),
        }
    }
}

/// Variable handles of a built model, indexed by source and target.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHandles {
    /// `x[i][j]`: source `i` serves target `j`.
    pub assignment: Vec<Vec<VarId>>,
    /// `l[i]`
    pub source_cost: Vec<VarId>,
    /// `l_eps`
    pub fairness_factor: VarId,
    /// `k[i]`, empty for the max-norm formulation.
    pub auxiliary: Vec<VarId>,
}

/// Solver-agnostic mixed-integer model of one fair assignment problem.
///
/// For finite `p` the conic constraint `l[i] <= k[i]^(1/p) * l_eps^(1-1/p)` is
/// only represented by the initial tangent at `(1, 1, 1)`; the rest of its outer
/// approximation is added lazily by
/// [`OuterApproximation`](crate::cuts::OuterApproximation). For the max norm the
/// model is exact.
#[derive(Debug, Clone)]
pub struct FairnessModel {
    variables: Vec<VariableDef>,
    constraints: Vec<LinearConstraint>,
    objective: LinearExpr,
    handles: ModelHandles,
    p_norm: PNorm,
    eps_bar: f64,
}

impl FairnessModel {
    pub fn build(costs: &CostMatrix, config: &FairnessConfig) -> Self {
        let num_sources = costs.num_sources();
        let (variables, handles) = init_variables(num_sources, costs.num_targets(), config.p_norm());

        let objective = create_objective(&handles);
        let model = Self {
            variables,
            constraints: Vec::new(),
            objective,
            handles,
            p_norm: config.p_norm(),
            eps_bar: config.eps_bar(num_sources),
        };

        // Add constraints
        let model = constrain_source_costs(model, costs);
        let model = constrain_target_visits(model, costs);
        let model = constrain_fairness_factor(model);
        match config.p_norm() {
            PNorm::Finite(p) => constrain_power_mean(model, p),
            PNorm::Unbounded => constrain_max_norm(model),
        }
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn variable(&self, var: VarId) -> &VariableDef {
        &self.variables[var.index()]
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    /// Minimized.
    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn handles(&self) -> &ModelHandles {
        &self.handles
    }

    pub fn p_norm(&self) -> PNorm {
        self.p_norm
    }

    pub fn eps_bar(&self) -> f64 {
        self.eps_bar
    }

    pub fn num_sources(&self) -> usize {
        self.handles.source_cost.len()
    }

    pub fn num_targets(&self) -> usize {
        self.handles.assignment.first().map(Vec::len).unwrap_or(0)
    }

    pub fn with(mut self, constraint: LinearConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Overrides the bounds of `var`. Contradictory bounds are kept as given
    /// and make the model infeasible.
    pub fn with_bounds(mut self, var: VarId, lower: f64, upper: f64) -> Self {
        let def = &mut self.variables[var.index()];
        def.lower = lower;
        def.upper = upper;
        self
    }

    /// Whether the per-source costs admit some `l_eps` (and `k`) satisfying the
    /// exact fairness constraint, i.e. `eps_bar * ||l||_p <= ||l||_1`.
    pub fn is_fair(&self, source_costs: &[f64]) -> bool {
        let total: f64 = source_costs.iter().sum();
        let dispersion = match self.p_norm {
            PNorm::Finite(p) => source_costs
                .iter()
                .map(|l| l.powi(p as i32))
                .sum::<f64>()
                .powf(1.0 / p as f64),
            PNorm::Unbounded => source_costs.iter().copied().fold(0.0, f64::max),
        };
        self.eps_bar * dispersion <= total * (1.0 + FAIRNESS_SLACK) + FAIRNESS_SLACK
    }
}

fn init_variables(
    num_sources: usize,
    num_targets: usize,
    p_norm: PNorm,
) -> (Vec<VariableDef>, ModelHandles) {
    let mut variables = Vec::new();
    let mut add = |def: VariableDef| {
        variables.push(def);
        VarId::new(variables.len() - 1)
    };

    // Edge variable x_ij between each source i and target j
    let assignment: Vec<Vec<VarId>> = (0..num_sources)
        .map(|i| {
            (0..num_targets)
                .map(|j| add(VariableDef::binary(format!("x_{i}_{j}"))))
                .collect()
        })
        .collect();
    let source_cost: Vec<VarId> = (0..num_sources)
        .map(|i| add(VariableDef::continuous(format!("l_{i}"))))
        .collect();
    let fairness_factor = add(VariableDef::continuous("l_eps"));
    let auxiliary: Vec<VarId> = match p_norm {
        PNorm::Finite(_) => (0..num_sources)
            .map(|i| add(VariableDef::continuous(format!("k_{i}"))))
            .collect(),
        PNorm::Unbounded => Vec::new(),
    };

    let handles = ModelHandles {
        assignment,
        source_cost,
        fairness_factor,
        auxiliary,
    };
    (variables, handles)
}

/// Total cost, `sum_i l[i]`.
fn create_objective(handles: &ModelHandles) -> LinearExpr {
    handles.source_cost.iter().map(|&l| (l, 1.0)).collect()
}

/// `l[i] = sum_j c[i][j] * x[i][j]`
fn constrain_source_costs(model: FairnessModel, costs: &CostMatrix) -> FairnessModel {
    (0..model.num_sources()).fold(model, |m, i| {
        let expr = m.handles.assignment[i]
            .iter()
            .enumerate()
            .map(|(j, &x)| (x, -costs.cost(i, j)))
            .chain(std::iter::once((m.handles.source_cost[i], 1.0)))
            .collect();
        m.with(LinearConstraint::eq(format!("sourceCost_{i}"), expr, 0.0))
    })
}

/// Every target is served by exactly one source.
fn constrain_target_visits(model: FairnessModel, costs: &CostMatrix) -> FairnessModel {
    (0..costs.num_targets()).fold(model, |m, j| {
        let expr = m
            .handles
            .assignment
            .iter()
            .map(|row| (row[j], 1.0))
            .collect();
        m.with(LinearConstraint::eq(format!("targetVisit_{j}"), expr, 1.0))
    })
}

/// `eps_bar * l_eps = ||l||_1`
fn constrain_fairness_factor(model: FairnessModel) -> FairnessModel {
    let expr = model
        .handles
        .source_cost
        .iter()
        .map(|&l| (l, -1.0))
        .chain(std::iter::once((model.handles.fairness_factor, model.eps_bar)))
        .collect();
    model.with(LinearConstraint::eq("FairnessFactorConstraint", expr, 0.0))
}

/// `sum_i k[i] = l_eps`, plus the tangent of every conic constraint at `(1, 1, 1)`.
fn constrain_power_mean(model: FairnessModel, p: u32) -> FairnessModel {
    let l_eps = model.handles.fairness_factor;
    let expr = model
        .handles
        .auxiliary
        .iter()
        .map(|&k| (k, 1.0))
        .chain(std::iter::once((l_eps, -1.0)))
        .collect();
    let model = model.with(LinearConstraint::eq("AuxVariableConstraint", expr, 0.0));

    let plane = tangent_hyperplane(SurfacePoint::new(1.0, 1.0, 1.0), p);
    (0..model.num_sources()).fold(model, |m, i| {
        let expr = LinearExpr::new()
            .with_term(m.handles.auxiliary[i], plane.aux)
            .with_term(l_eps, plane.fairness)
            .with_term(m.handles.source_cost[i], plane.cost);
        m.with(LinearConstraint::geq(format!("tangent_{i}"), expr, 0.0))
    })
}

/// `l[i] <= l_eps` for every source.
fn constrain_max_norm(model: FairnessModel) -> FairnessModel {
    let l_eps = model.handles.fairness_factor;
    (0..model.num_sources()).fold(model, |m, i| {
        let expr = LinearExpr::new()
            .with_term(m.handles.source_cost[i], 1.0)
            .with_term(l_eps, -1.0);
        m.with(LinearConstraint::leq(format!("sourceConstraint_{i}"), expr, 0.0))
    })
}

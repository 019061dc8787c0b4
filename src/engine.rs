//! LP-based branch-and-cut search over a [`FairnessModel`].
//!
//! Relaxations are solved with `good_lp`; integrality is restored by branching
//! on binary variables. Whenever a relaxation is integral it is handed to the
//! [`CutGenerator`] as a candidate: returned cuts go to the global [`CutPool`]
//! and the node is solved again, otherwise the candidate becomes the incumbent.

use good_lp::solvers::microlp::microlp;
use good_lp::{
    Expression, ResolutionError, Solution as LpSolution, SolverModel, Variable, variable,
    variables,
};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::FairnessConfig;
use crate::cuts::{CandidateSnapshot, CutGenerator, CutPool};
use crate::error::{AllocationError, Result};
use crate::model::{FairnessModel, LinearConstraint, LinearExpr, Sense, VarId, VarKind};

/// Absolute slack when comparing a node bound against the incumbent.
const BOUND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub time_limit: Duration,
    /// Stop exploring a node once `(incumbent - bound) / |incumbent|` is within this.
    pub relative_gap: f64,
    /// A binary is integral when within this distance of 0 or 1.
    pub integrality_tolerance: f64,
}

impl SearchSettings {
    pub fn from_config(config: &FairnessConfig) -> Self {
        Self {
            time_limit: config.time_limit(),
            relative_gap: config.gap_tolerance(),
            ..Self::default()
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(3600),
            relative_gap: 1e-3,
            integrality_tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Optimal,
    FeasibleAtTimeLimit,
    Infeasible,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchStats {
    pub nodes: u64,
    pub cut_rounds: u64,
    pub cuts_added: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    /// Incumbent values indexed by [`VarId`]; `None` when infeasible.
    pub values: Option<Vec<f64>>,
    pub objective: Option<f64>,
    pub relative_gap: Option<f64>,
    pub elapsed: Duration,
    pub stats: SearchStats,
}

impl SearchOutcome {
    fn infeasible(elapsed: Duration, stats: SearchStats) -> Self {
        Self {
            status: SearchStatus::Infeasible,
            values: None,
            objective: None,
            relative_gap: None,
            elapsed,
            stats,
        }
    }

    pub fn value(&self, var: VarId) -> Option<f64> {
        self.values.as_ref().map(|values| values[var.index()])
    }
}

/// A mixed-integer search engine able to call back into a [`CutGenerator`].
pub trait SearchEngine {
    fn solve(
        &self,
        model: &FairnessModel,
        generator: Option<&dyn CutGenerator>,
        settings: &SearchSettings,
    ) -> Result<SearchOutcome>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BranchAndCut;

impl BranchAndCut {
    pub fn new() -> Self {
        Self
    }
}

struct Node {
    bounds: Vec<(f64, f64)>,
    /// Objective of the parent relaxation, a lower bound for this subtree.
    estimate: f64,
    depth: usize,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lowest bound first, deeper first on ties
        other
            .estimate
            .total_cmp(&self.estimate)
            .then(self.depth.cmp(&other.depth))
    }
}

struct Relaxation {
    values: Vec<f64>,
    objective: f64,
}

struct Incumbent {
    values: Vec<f64>,
    objective: f64,
}

impl SearchEngine for BranchAndCut {
    fn solve(
        &self,
        model: &FairnessModel,
        generator: Option<&dyn CutGenerator>,
        settings: &SearchSettings,
    ) -> Result<SearchOutcome> {
        let start = Instant::now();
        let mut stats = SearchStats::default();

        if let Some(def) = model.variables().iter().find(|v| v.lower > v.upper) {
            warn!(
                "variable {} has contradictory bounds [{}, {}]",
                def.name, def.lower, def.upper
            );
            return Ok(SearchOutcome::infeasible(start.elapsed(), stats));
        }

        let pool = CutPool::new();
        let mut open = BinaryHeap::new();
        open.push(Node {
            bounds: model.variables().iter().map(|v| (v.lower, v.upper)).collect(),
            estimate: f64::NEG_INFINITY,
            depth: 0,
        });
        let mut incumbent: Option<Incumbent> = None;
        // Lowest bound among subtrees discarded only because of the gap tolerance
        let mut pruned_bound = f64::INFINITY;
        let mut timed_out = false;

        let improves = |bound: f64, incumbent: &Option<Incumbent>| match incumbent {
            Some(best) => {
                bound
                    < best.objective - settings.relative_gap * best.objective.abs() - BOUND_EPSILON
            }
            None => true,
        };

        while let Some(node) = open.pop() {
            if start.elapsed() >= settings.time_limit {
                open.push(node);
                timed_out = true;
                break;
            }
            if !improves(node.estimate, &incumbent) {
                pruned_bound = pruned_bound.min(node.estimate);
                continue;
            }

            stats.nodes += 1;
            let Some(relaxation) = solve_relaxation(model, &node.bounds, &pool.snapshot())? else {
                continue;
            };
            if !improves(relaxation.objective, &incumbent) {
                pruned_bound = pruned_bound.min(relaxation.objective);
                continue;
            }

            if let Some(var) =
                most_fractional(model, &relaxation.values, settings.integrality_tolerance)
            {
                let value = relaxation.values[var.index()];
                let (lower, upper) = node.bounds[var.index()];
                for bound in [(lower, value.floor()), (value.ceil(), upper)] {
                    let mut bounds = node.bounds.clone();
                    bounds[var.index()] = bound;
                    open.push(Node {
                        bounds,
                        estimate: relaxation.objective,
                        depth: node.depth + 1,
                    });
                }
                continue;
            }

            let cuts = generator
                .map(|g| g.generate_cuts(&CandidateSnapshot::new(&relaxation.values)))
                .unwrap_or_default();
            if cuts.is_empty() {
                debug!("new incumbent with objective {}", relaxation.objective);
                incumbent = Some(Incumbent {
                    values: relaxation.values,
                    objective: relaxation.objective,
                });
            } else {
                stats.cut_rounds += 1;
                stats.cuts_added += cuts.len();
                debug!(
                    "candidate rejected with {} cuts ({} in pool)",
                    cuts.len(),
                    pool.len() + cuts.len()
                );
                pool.extend(cuts);
                open.push(Node {
                    estimate: relaxation.objective,
                    ..node
                });
            }
        }

        let elapsed = start.elapsed();
        info!(
            "search explored {} nodes, {} cut rounds, {} cuts in {:.2}s",
            stats.nodes,
            stats.cut_rounds,
            stats.cuts_added,
            elapsed.as_secs_f64()
        );

        let Some(best) = incumbent else {
            if timed_out {
                warn!("time limit reached before any feasible assignment was found");
            }
            return Ok(SearchOutcome::infeasible(elapsed, stats));
        };

        let open_bound = open
            .iter()
            .map(|n| n.estimate)
            .fold(pruned_bound, f64::min)
            .min(best.objective);
        let gap = (best.objective - open_bound) / (1e-10 + best.objective.abs());

        Ok(SearchOutcome {
            status: if timed_out {
                SearchStatus::FeasibleAtTimeLimit
            } else {
                SearchStatus::Optimal
            },
            objective: Some(best.objective),
            values: Some(best.values),
            relative_gap: gap.is_finite().then_some(gap),
            elapsed,
            stats,
        })
    }
}

/// Binary variable farthest from integrality, if any exceeds `tolerance`.
fn most_fractional(model: &FairnessModel, values: &[f64], tolerance: f64) -> Option<VarId> {
    model
        .variables()
        .iter()
        .enumerate()
        .filter(|(_, def)| def.kind == VarKind::Binary)
        .map(|(i, _)| {
            let fraction = values[i] - values[i].floor();
            (i, fraction.min(1.0 - fraction))
        })
        .filter(|&(_, distance)| distance > tolerance)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| VarId::new(i))
}

/// Solves the LP relaxation under `bounds`; `None` when infeasible.
fn solve_relaxation(
    model: &FairnessModel,
    bounds: &[(f64, f64)],
    cuts: &[LinearConstraint],
) -> Result<Option<Relaxation>> {
    let mut problem_vars = variables!();
    let lp_vars: Vec<Variable> = bounds
        .iter()
        .map(|&(lower, upper)| {
            let def = variable().min(lower);
            problem_vars.add(if upper.is_finite() { def.max(upper) } else { def })
        })
        .collect();

    let objective = to_expression(model.objective(), &lp_vars);
    let lp = model
        .constraints()
        .iter()
        .chain(cuts)
        .fold(problem_vars.minimise(objective).using(microlp), |lp, c| {
            let lhs = to_expression(&c.expr, &lp_vars);
            match c.sense {
                Sense::LessEqual => lp.with(lhs.leq(c.rhs)),
                Sense::Equal => lp.with(lhs.eq(c.rhs)),
                Sense::GreaterEqual => lp.with(lhs.geq(c.rhs)),
            }
        });

    match lp.solve() {
        Ok(solution) => {
            let values: Vec<f64> = lp_vars.iter().map(|&v| solution.value(v)).collect();
            let objective = model.objective().evaluate(&values);
            Ok(Some(Relaxation { values, objective }))
        }
        Err(ResolutionError::Infeasible) => Ok(None),
        Err(e) => Err(AllocationError::Relaxation(e.to_string())),
    }
}

fn to_expression(expr: &LinearExpr, lp_vars: &[Variable]) -> Expression {
    expr.terms()
        .iter()
        .fold(Expression::from(0.0), |sum, &(var, coefficient)| {
            sum + coefficient * lp_vars[var.index()]
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PNorm;
    use crate::instance::CostMatrix;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn exact_settings() -> SearchSettings {
        SearchSettings {
            relative_gap: 0.0,
            ..SearchSettings::default()
        }
    }

    fn unconstrained(rows: Vec<Vec<f64>>) -> FairnessModel {
        let costs = CostMatrix::from_rows(rows).unwrap();
        FairnessModel::build(&costs, &FairnessConfig::new(PNorm::Unbounded, 0.0).unwrap())
    }

    /// Lazily forbids source 0 from serving target 0.
    struct ForbidFirstEdge {
        var: VarId,
        calls: AtomicUsize,
    }

    impl CutGenerator for ForbidFirstEdge {
        fn generate_cuts(&self, candidate: &CandidateSnapshot<'_>) -> Vec<LinearConstraint> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if candidate.value(self.var) > 0.5 {
                let expr = LinearExpr::new().with_term(self.var, 1.0);
                vec![LinearConstraint::leq("forbid", expr, 0.0)]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn finds_minimum_cost_assignment() {
        let model = unconstrained(vec![vec![4.0, 1.0, 3.0], vec![2.0, 5.0, 6.0]]);
        let outcome = BranchAndCut::new()
            .solve(&model, None, &exact_settings())
            .unwrap();

        assert_eq!(outcome.status, SearchStatus::Optimal);
        assert!((outcome.objective.unwrap() - 6.0).abs() < 1e-6);
        let h = model.handles();
        assert!(outcome.value(h.assignment[1][0]).unwrap() > 0.9);
        assert!(outcome.value(h.assignment[0][1]).unwrap() > 0.9);
        assert!(outcome.value(h.assignment[0][2]).unwrap() > 0.9);
        assert_eq!(outcome.relative_gap, Some(0.0));
    }

    #[test]
    fn rejected_candidates_are_cut_globally() {
        let model = unconstrained(vec![vec![1.0, 2.0], vec![3.0, 9.0]]);
        let generator = ForbidFirstEdge {
            var: model.handles().assignment[0][0],
            calls: AtomicUsize::new(0),
        };
        let outcome = BranchAndCut::new()
            .solve(&model, Some(&generator), &exact_settings())
            .unwrap();

        // t0 -> s1 (3), t1 -> s0 (2)
        assert_eq!(outcome.status, SearchStatus::Optimal);
        assert!((outcome.objective.unwrap() - 5.0).abs() < 1e-6);
        assert!(outcome.value(model.handles().assignment[0][0]).unwrap() < 0.1);
        assert_eq!(outcome.stats.cut_rounds, 1);
        assert_eq!(outcome.stats.cuts_added, 1);
        assert!(generator.calls.load(AtomicOrdering::SeqCst) >= 2);
    }

    #[test]
    fn contradictory_bounds_are_infeasible() {
        let model = unconstrained(vec![vec![1.0]]);
        let l_eps = model.handles().fairness_factor;
        let model = model.with_bounds(l_eps, 2.0, 1.0);
        let outcome = BranchAndCut::new()
            .solve(&model, None, &exact_settings())
            .unwrap();

        assert_eq!(outcome.status, SearchStatus::Infeasible);
        assert!(outcome.values.is_none());
        assert!(outcome.objective.is_none());
    }

    #[test]
    fn infeasible_relaxation_is_reported() {
        // the only target costs 5 but source cost is capped at 1
        let model = unconstrained(vec![vec![5.0]]);
        let l0 = model.handles().source_cost[0];
        let model = model.with_bounds(l0, 0.0, 1.0);
        let outcome = BranchAndCut::new()
            .solve(&model, None, &exact_settings())
            .unwrap();
        assert_eq!(outcome.status, SearchStatus::Infeasible);
        assert_eq!(outcome.stats.nodes, 1);
    }

    #[test]
    fn exhausted_time_budget_without_incumbent() {
        let model = unconstrained(vec![vec![1.0, 2.0]]);
        let settings = SearchSettings {
            time_limit: Duration::ZERO,
            ..exact_settings()
        };
        let outcome = BranchAndCut::new().solve(&model, None, &settings).unwrap();
        assert_eq!(outcome.status, SearchStatus::Infeasible);
        assert_eq!(outcome.stats.nodes, 0);
    }

    /// Accepts every candidate, but only after `delay`.
    struct SlowAcceptance {
        delay: Duration,
    }

    impl CutGenerator for SlowAcceptance {
        fn generate_cuts(&self, _candidate: &CandidateSnapshot<'_>) -> Vec<LinearConstraint> {
            std::thread::sleep(self.delay);
            Vec::new()
        }
    }

    #[test]
    fn time_limit_after_first_incumbent_keeps_it() {
        // both cheap edges cannot be used fully, so the root relaxation (3)
        // is fractional and every integral assignment costs at least 4
        let model = unconstrained(vec![vec![1.0, 3.0], vec![3.0, 1.0]]);
        let h = model.handles();
        let shared = LinearExpr::new()
            .with_term(h.assignment[0][0], 1.0)
            .with_term(h.assignment[1][1], 1.0);
        let model = model.with(LinearConstraint::leq("shared", shared, 1.5));

        let settings = SearchSettings {
            time_limit: Duration::from_millis(100),
            ..exact_settings()
        };
        let generator = SlowAcceptance {
            delay: Duration::from_millis(250),
        };
        let outcome = BranchAndCut::new()
            .solve(&model, Some(&generator), &settings)
            .unwrap();

        assert_eq!(outcome.status, SearchStatus::FeasibleAtTimeLimit);
        assert!((outcome.objective.unwrap() - 4.0).abs() < 1e-6);
        assert!(outcome.values.is_some());
        let gap = outcome.relative_gap.unwrap();
        assert!(gap >= 0.0);
        assert!((gap - 0.25).abs() < 1e-6, "open bound should stay at 3, gap {gap}");
        assert!(outcome.elapsed >= settings.time_limit);
    }

    #[test]
    fn nodes_pop_lowest_bound_first() {
        let mut heap = BinaryHeap::new();
        for (estimate, depth) in [(3.0, 0), (1.0, 1), (1.0, 4), (2.0, 2)] {
            heap.push(Node {
                bounds: Vec::new(),
                estimate,
                depth,
            });
        }
        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|n| (n.estimate, n.depth))
            .collect();
        assert_eq!(order, vec![(1.0, 4), (1.0, 1), (2.0, 2), (3.0, 0)]);
    }
}

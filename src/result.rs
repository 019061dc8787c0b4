use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{FairnessConfig, PNorm};
use crate::engine::{SearchOutcome, SearchStatus};
use crate::instance::{Instance, Vertex, round_to};
use crate::model::FairnessModel;

/// An edge counts as selected when its binary is above this value.
const ASSIGNMENT_THRESHOLD: f64 = 0.9;

/// Result file written for every run, feasible or not.
///
/// Assignment, cost, objective and gap fields are `null` when no feasible
/// assignment was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub instance_name: String,
    pub num_source: usize,
    pub num_target: usize,
    pub p_norm: PNorm,
    pub fairness_coefficient: f64,
    pub assignment_costs: Option<Vec<f64>>,
    pub objective_value: Option<f64>,
    pub computation_time_in_sec: f64,
    pub optimality_gap_percent: Option<f64>,
    pub assignments: Option<Vec<Vec<usize>>>,
    pub source_vertices: Vec<Vertex>,
    pub target_vertices: Vec<Vertex>,
}

/// A feasible assignment read back from the search.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub p_norm: PNorm,
    pub fairness_coefficient: f64,
    pub status: SearchStatus,
    /// Target indices served by each source.
    pub assignments: Vec<Vec<usize>>,
    /// `l[i]`, rounded to four decimals.
    pub assignment_costs: Vec<f64>,
    pub objective_value: f64,
    /// Relative gap as a fraction, when the engine could bound it.
    pub optimality_gap: Option<f64>,
    pub computation_time: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfeasibleReport {
    pub computation_time: Duration,
    pub p_norm: PNorm,
    pub fairness_coefficient: f64,
}

impl InfeasibleReport {
    /// Timing-only record: every solution field is left empty.
    pub fn to_result(&self, instance: &Instance) -> AllocationResult {
        AllocationResult {
            instance_name: instance.name.clone(),
            num_source: instance.num_sources(),
            num_target: instance.num_targets(),
            p_norm: self.p_norm,
            fairness_coefficient: self.fairness_coefficient,
            assignment_costs: None,
            objective_value: None,
            computation_time_in_sec: round_to(self.computation_time.as_secs_f64(), 2),
            optimality_gap_percent: None,
            assignments: None,
            source_vertices: instance.sources.clone(),
            target_vertices: instance.targets.clone(),
        }
    }
}

impl Allocation {
    pub fn to_result(&self, instance: &Instance) -> AllocationResult {
        AllocationResult {
            instance_name: instance.name.clone(),
            num_source: instance.num_sources(),
            num_target: instance.num_targets(),
            p_norm: self.p_norm,
            fairness_coefficient: self.fairness_coefficient,
            assignment_costs: Some(self.assignment_costs.clone()),
            objective_value: Some(self.objective_value),
            computation_time_in_sec: round_to(self.computation_time.as_secs_f64(), 2),
            optimality_gap_percent: self.optimality_gap.map(|gap| round_to(gap * 100.0, 2)),
            assignments: Some(self.assignments.clone()),
            source_vertices: instance.sources.clone(),
            target_vertices: instance.targets.clone(),
        }
    }
}

/// What a run produced. Infeasibility is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Solved(Allocation),
    Infeasible(InfeasibleReport),
}

impl Outcome {
    pub fn computation_time(&self) -> Duration {
        match self {
            Outcome::Solved(allocation) => allocation.computation_time,
            Outcome::Infeasible(report) => report.computation_time,
        }
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            Outcome::Solved(allocation) => Some(allocation),
            Outcome::Infeasible(_) => None,
        }
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(self, Outcome::Infeasible(_))
    }

    pub fn to_result(&self, instance: &Instance) -> AllocationResult {
        match self {
            Outcome::Solved(allocation) => allocation.to_result(instance),
            Outcome::Infeasible(report) => report.to_result(instance),
        }
    }
}

/// Reads assignments and costs out of a finished search.
pub struct ResultExtractor<'a> {
    model: &'a FairnessModel,
    config: &'a FairnessConfig,
}

impl<'a> ResultExtractor<'a> {
    pub fn new(model: &'a FairnessModel, config: &'a FairnessConfig) -> Self {
        Self { model, config }
    }

    pub fn extract(&self, search: &SearchOutcome) -> Outcome {
        let (Some(values), Some(objective)) = (&search.values, search.objective) else {
            warn!(
                "no feasible assignment for p = {} and fc = {} after {:.2}s",
                self.config.p_norm(),
                self.config.fairness_coefficient(),
                search.elapsed.as_secs_f64()
            );
            return Outcome::Infeasible(InfeasibleReport {
                computation_time: search.elapsed,
                p_norm: self.config.p_norm(),
                fairness_coefficient: self.config.fairness_coefficient(),
            });
        };

        let handles = self.model.handles();
        let assignments: Vec<Vec<usize>> = handles
            .assignment
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|&(_, x)| values[x.index()] > ASSIGNMENT_THRESHOLD)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        let assignment_costs: Vec<f64> = handles
            .source_cost
            .iter()
            .map(|l| round_to(values[l.index()], 4))
            .collect();

        info!("objective value {objective}");
        info!("assignment costs {assignment_costs:?}");
        info!("computation time: {:.2}s", search.elapsed.as_secs_f64());
        if search.status == SearchStatus::FeasibleAtTimeLimit {
            warn!("time limit reached, returning best assignment found");
        }

        Outcome::Solved(Allocation {
            p_norm: self.config.p_norm(),
            fairness_coefficient: self.config.fairness_coefficient(),
            status: search.status,
            assignments,
            assignment_costs,
            objective_value: objective,
            optimality_gap: search.relative_gap,
            computation_time: search.elapsed,
        })
    }
}

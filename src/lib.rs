pub mod config;
pub mod cuts;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod instance;
pub mod model;
pub mod result;

pub use config::{FairnessConfig, PNorm, RunFile};
pub use cuts::{CandidateSnapshot, CutGenerator, CutPool, OuterApproximation};
pub use engine::{BranchAndCut, SearchEngine, SearchOutcome, SearchSettings, SearchStatus};
pub use error::{AllocationError, Result};
pub use instance::{CostMatrix, Instance, generate_instances, write_instances};
pub use model::FairnessModel;
pub use result::{Allocation, AllocationResult, InfeasibleReport, Outcome, ResultExtractor};

use tracing::info;

/// Solves `instance` with the default branch-and-cut engine.
pub fn solve(instance: &Instance, config: &FairnessConfig) -> Result<Outcome> {
    if instance.num_sources() == 0 || instance.num_targets() == 0 {
        return Err(AllocationError::EmptyCosts);
    }
    info!(
        "solving {} with {} sources and {} targets",
        instance.name,
        instance.num_sources(),
        instance.num_targets()
    );
    solve_costs(&CostMatrix::from_instance(instance), config)
}

pub fn solve_costs(costs: &CostMatrix, config: &FairnessConfig) -> Result<Outcome> {
    solve_with(costs, config, &BranchAndCut::new())
}

pub fn solve_with(
    costs: &CostMatrix,
    config: &FairnessConfig,
    engine: &dyn SearchEngine,
) -> Result<Outcome> {
    solve_model(&FairnessModel::build(costs, config), config, engine)
}

/// Runs `engine` on an already built model, attaching the outer approximation
/// whenever the norm is finite.
pub fn solve_model(
    model: &FairnessModel,
    config: &FairnessConfig,
    engine: &dyn SearchEngine,
) -> Result<Outcome> {
    info!(
        "p = {}, fc = {}, epsBar = {:.4}",
        config.p_norm(),
        config.fairness_coefficient(),
        model.eps_bar()
    );
    let generator = OuterApproximation::new(model);
    let search = engine.solve(
        model,
        generator.as_ref().map(|g| g as &dyn CutGenerator),
        &SearchSettings::from_config(config),
    )?;
    Ok(ResultExtractor::new(model, config).extract(&search))
}

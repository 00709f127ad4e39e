mod engine;
mod eval;
mod runner;
mod sections;
mod steps;
mod store;

pub use engine::{AdvanceSignal, EngineOptions, ScriptEngine, ABORT_STEP_NAME};
pub use eval::{
    evaluate_boolean, evaluate_expression, render_scalar_literal, substitute_variables,
};
pub use runner::{run_cells, CellPlan, RunnerOptions, SharedRuntime};
pub use sections::CriticalSections;
pub use steps::{
    register_builtin_steps, NullObserver, RunObserver, Step, StepContext, StepFactory,
    StepOutcome, StepRegistry,
};
pub use store::{GlobalStore, VariableStore};

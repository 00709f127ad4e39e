use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use st_core::{RunOutcome, RunReport, ScriptProgram, ScriptStatus, StepLangError};

use crate::engine::{EngineOptions, ScriptEngine};
use crate::sections::CriticalSections;
use crate::steps::{NullObserver, RunObserver, StepRegistry};
use crate::store::GlobalStore;

/// One concurrent script instance: a compiled program bound to a cell id.
pub struct CellPlan {
    pub cell_id: u32,
    pub program: Arc<ScriptProgram>,
}

/// State shared by every cell in a run: the global variable tier, the
/// critical-section table, the step registry, the observer, and one abort
/// flag that stops all cells together.
pub struct SharedRuntime {
    pub globals: Arc<GlobalStore>,
    pub sections: Arc<CriticalSections>,
    pub registry: Arc<StepRegistry>,
    pub observer: Arc<dyn RunObserver>,
    pub abort: Arc<AtomicBool>,
}

impl SharedRuntime {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            globals: Arc::new(GlobalStore::new()),
            sections: Arc::new(CriticalSections::new()),
            registry,
            observer: Arc::new(NullObserver),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    pub fail_step: Option<String>,
    pub continue_on_fail: bool,
}

/// Runs every cell on its own thread and collects the reports in plan
/// order. A cell whose thread panics yields an error report; either way its
/// section-queue entries are released so waiting cells can proceed.
pub fn run_cells(
    plans: Vec<CellPlan>,
    shared: &SharedRuntime,
    options: &RunnerOptions,
) -> Vec<RunReport> {
    let mut handles = Vec::with_capacity(plans.len());
    for plan in plans {
        let cell_id = plan.cell_id;
        let mut engine_options = EngineOptions::new(plan.program, Arc::clone(&shared.registry));
        engine_options.globals = Arc::clone(&shared.globals);
        engine_options.sections = Arc::clone(&shared.sections);
        engine_options.observer = Arc::clone(&shared.observer);
        engine_options.abort = Arc::clone(&shared.abort);
        engine_options.cell_id = cell_id;
        engine_options.fail_step = options.fail_step.clone();
        engine_options.continue_on_fail = options.continue_on_fail;
        let sections = Arc::clone(&shared.sections);
        let handle = thread::spawn(move || {
            let mut engine = ScriptEngine::new(engine_options);
            let report = engine.run();
            sections.remove_cell_from_all(cell_id);
            report
        });
        handles.push((cell_id, handle));
    }
    handles
        .into_iter()
        .map(|(cell_id, handle)| match handle.join() {
            Ok(report) => report,
            Err(_) => {
                shared.sections.remove_cell_from_all(cell_id);
                panicked_report(cell_id)
            }
        })
        .collect()
}

fn panicked_report(cell_id: u32) -> RunReport {
    RunReport {
        cell_id,
        status: ScriptStatus::Error,
        outcome: RunOutcome::Error,
        results: Vec::new(),
        error: Some(StepLangError::new(
            "ENGINE_CELL_PANIC",
            format!("cell {} panicked during execution", cell_id),
        )),
        total_elapsed_ms: 0,
    }
}

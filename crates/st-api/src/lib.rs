//! Embedding facade: compile a script against a step catalog, stand up a
//! single engine, or run a set of concurrent cells, without touching the
//! lower crates directly.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use st_runtime::{run_cells, CellPlan, RunnerOptions, SharedRuntime};

pub use st_compiler::{classify_line, parse_scalar_literal};
pub use st_core::{
    CompileIssue, RunOutcome, RunReport, ScalarValue, ScriptProgram, ScriptStatus, StepCatalog,
    StepLangError, StepResult, StepStatus, TypedVariable,
};
pub use st_runtime::{
    register_builtin_steps, CriticalSections, EngineOptions, GlobalStore, NullObserver,
    RunObserver, ScriptEngine, Step, StepContext, StepFactory, StepOutcome, StepRegistry,
};

#[derive(Clone)]
pub struct CreateEngineOptions {
    pub program: Arc<ScriptProgram>,
    pub registry: Arc<StepRegistry>,
    pub globals: Vec<TypedVariable>,
    pub sections: Option<Arc<CriticalSections>>,
    pub observer: Option<Arc<dyn RunObserver>>,
    pub cell_id: u32,
    pub fail_step: Option<String>,
    pub continue_on_fail: bool,
}

impl CreateEngineOptions {
    pub fn new(program: Arc<ScriptProgram>, registry: Arc<StepRegistry>) -> Self {
        Self {
            program,
            registry,
            globals: Vec::new(),
            sections: None,
            observer: None,
            cell_id: 0,
            fail_step: None,
            continue_on_fail: false,
        }
    }
}

#[derive(Clone)]
pub struct RunScriptOptions {
    pub sources: Vec<String>,
    pub registry: Arc<StepRegistry>,
    pub globals: Vec<TypedVariable>,
    pub observer: Option<Arc<dyn RunObserver>>,
    pub fail_step: Option<String>,
    pub continue_on_fail: bool,
}

impl RunScriptOptions {
    pub fn new(source: impl Into<String>, registry: Arc<StepRegistry>) -> Self {
        Self {
            sources: vec![source.into()],
            registry,
            globals: Vec::new(),
            observer: None,
            fail_step: None,
            continue_on_fail: false,
        }
    }
}

pub fn compile_script(
    source: &str,
    catalog: &dyn StepCatalog,
) -> Result<ScriptProgram, Vec<CompileIssue>> {
    st_compiler::compile(source, catalog)
}

/// Wires up a single-cell engine ready to step or run. Absent sections and
/// observer default to a private section table and silence.
pub fn create_engine(options: CreateEngineOptions) -> ScriptEngine {
    let globals = Arc::new(GlobalStore::new());
    for variable in options.globals {
        globals.set(variable);
    }
    let mut engine_options = EngineOptions::new(options.program, options.registry);
    engine_options.globals = globals;
    if let Some(sections) = options.sections {
        engine_options.sections = sections;
    }
    if let Some(observer) = options.observer {
        engine_options.observer = observer;
    }
    engine_options.cell_id = options.cell_id;
    engine_options.fail_step = options.fail_step;
    engine_options.continue_on_fail = options.continue_on_fail;
    ScriptEngine::new(engine_options)
}

/// Compiles and runs one script to completion.
pub fn run_script(options: RunScriptOptions) -> Result<RunReport, StepLangError> {
    let mut reports = run_concurrent(options)?;
    reports.pop().ok_or_else(|| {
        StepLangError::new("API_NO_SCRIPT", "run_script needs at least one source")
    })
}

/// Compiles every source and runs them as concurrent cells (cell ids are
/// assigned 1..N in source order) over one shared global tier and section
/// table. Compilation failures abort before any cell starts.
pub fn run_concurrent(options: RunScriptOptions) -> Result<Vec<RunReport>, StepLangError> {
    if options.sources.is_empty() {
        return Err(StepLangError::new(
            "API_NO_SCRIPT",
            "run_concurrent needs at least one source",
        ));
    }
    let mut plans = Vec::with_capacity(options.sources.len());
    for (index, source) in options.sources.iter().enumerate() {
        let program =
            compile_script(source, options.registry.as_ref()).map_err(issues_to_error)?;
        plans.push(CellPlan {
            cell_id: index as u32 + 1,
            program: Arc::new(program),
        });
    }
    let shared = SharedRuntime {
        globals: Arc::new(GlobalStore::new()),
        sections: Arc::new(CriticalSections::new()),
        registry: options.registry,
        observer: options.observer.unwrap_or_else(|| Arc::new(NullObserver)),
        abort: Arc::new(AtomicBool::new(false)),
    };
    for variable in options.globals {
        shared.globals.set(variable);
    }
    let runner_options = RunnerOptions {
        fail_step: options.fail_step,
        continue_on_fail: options.continue_on_fail,
    };
    Ok(run_cells(plans, &shared, &runner_options))
}

fn issues_to_error(issues: Vec<CompileIssue>) -> StepLangError {
    let mut rendered = Vec::with_capacity(issues.len());
    for issue in &issues {
        rendered.push(format!("line {}: {}", issue.line.number, issue.message));
    }
    StepLangError::new(
        "API_COMPILE_FAILED",
        format!(
            "script has {} compile issue(s): {}",
            issues.len(),
            rendered.join("; ")
        ),
    )
}

/// A fresh registry preloaded with the builtin step library.
pub fn default_registry() -> Arc<StepRegistry> {
    let mut registry = StepRegistry::new();
    register_builtin_steps(&mut registry);
    Arc::new(registry)
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use st_core::{
    argument_name, return_value_name, FunctionSpan, LineKind, LoopSpan, RunOutcome, RunReport,
    ScalarValue, ScriptLine, ScriptProgram, ScriptStatus, StepLangError, StepResult, StepStatus,
    TypedVariable, TOTAL_ARGUMENTS_NAME,
};

use crate::eval::{evaluate_boolean, evaluate_expression};
use crate::steps::{NullObserver, RunObserver, StepContext, StepRegistry};
use crate::store::{GlobalStore, VariableStore};
use crate::CriticalSections;

/// Bound on dispatches per `advance` call; a non-observable cycle that never
/// reaches a step or the end is reported instead of spinning forever.
const DISPATCH_GUARD: usize = 10_000;

/// Step name recorded on the trail when an external abort ends the run.
pub const ABORT_STEP_NAME: &str = "Abort";

/// What `advance` stopped on: a step line ready to execute (1-based line
/// number), an armed breakpoint, or termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceSignal {
    AtStep(usize),
    Breakpoint(usize),
    Finished,
}

pub struct EngineOptions {
    pub program: Arc<ScriptProgram>,
    pub registry: Arc<StepRegistry>,
    pub globals: Arc<GlobalStore>,
    pub sections: Arc<CriticalSections>,
    pub observer: Arc<dyn RunObserver>,
    pub abort: Arc<AtomicBool>,
    pub cell_id: u32,
    pub fail_step: Option<String>,
    pub continue_on_fail: bool,
}

impl EngineOptions {
    pub fn new(program: Arc<ScriptProgram>, registry: Arc<StepRegistry>) -> Self {
        Self {
            program,
            registry,
            globals: Arc::new(GlobalStore::new()),
            sections: Arc::new(CriticalSections::new()),
            observer: Arc::new(NullObserver),
            abort: Arc::new(AtomicBool::new(false)),
            cell_id: 0,
            fail_step: None,
            continue_on_fail: false,
        }
    }
}

/// Instruction-pointer interpreter over the immutable compiled line array.
/// State is the cursor, a call-return stack of line indexes, a while-loop
/// stack of spans, the two-tier variable store, and the result trail. One
/// engine is owned by exactly one script instance; only the global store and
/// the section table are shared across cells.
pub struct ScriptEngine {
    program: Arc<ScriptProgram>,
    registry: Arc<StepRegistry>,
    sections: Arc<CriticalSections>,
    observer: Arc<dyn RunObserver>,
    abort: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    cell_id: u32,
    fail_step: Option<String>,
    continue_on_fail: bool,

    store: VariableStore,
    cursor: usize,
    call_stack: Vec<usize>,
    while_stack: Vec<LoopSpan>,
    status: ScriptStatus,
    results: Vec<StepResult>,
    skip_breakpoint_at: Option<usize>,
    started_at: Option<Instant>,
}

impl ScriptEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            program: options.program,
            registry: options.registry,
            sections: options.sections,
            observer: options.observer,
            abort: options.abort,
            pause: Arc::new(AtomicBool::new(false)),
            cell_id: options.cell_id,
            fail_step: options.fail_step,
            continue_on_fail: options.continue_on_fail,
            store: VariableStore::new(options.globals),
            cursor: 0,
            call_stack: Vec::new(),
            while_stack: Vec::new(),
            status: ScriptStatus::Ready,
            results: Vec::new(),
            skip_breakpoint_at: None,
            started_at: None,
        }
    }

    pub fn status(&self) -> ScriptStatus {
        self.status
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn while_depth(&self) -> usize {
        self.while_stack.len()
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VariableStore {
        &mut self.store
    }

    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// Advances the cursor through non-observable lines until it reaches a
    /// step line, an armed breakpoint, or termination.
    pub fn advance(&mut self) -> Result<AdvanceSignal, StepLangError> {
        if matches!(self.status, ScriptStatus::Finished | ScriptStatus::Error) {
            return Ok(AdvanceSignal::Finished);
        }
        for _ in 0..DISPATCH_GUARD {
            if self.cursor >= self.program.len() {
                self.status = ScriptStatus::Finished;
                return Ok(AdvanceSignal::Finished);
            }
            if self.program.lines[self.cursor].breakpoint {
                if self.skip_breakpoint_at == Some(self.cursor) {
                    self.skip_breakpoint_at = None;
                } else {
                    self.skip_breakpoint_at = Some(self.cursor);
                    self.status = ScriptStatus::AtBreakpoint;
                    return Ok(AdvanceSignal::Breakpoint(self.cursor + 1));
                }
            }
            match self.program.lines[self.cursor].kind {
                LineKind::Blank | LineKind::Comment | LineKind::Label | LineKind::LeftBracket => {
                    self.cursor += 1;
                }
                LineKind::End => {
                    self.status = ScriptStatus::Finished;
                    return Ok(AdvanceSignal::Finished);
                }
                LineKind::Function => self.dispatch_function_header()?,
                LineKind::Goto => {
                    let target = self.structural_text(self.cursor)?;
                    self.cursor = self.label_index(&target)?;
                }
                LineKind::Call => {
                    let target = self.structural_text(self.cursor)?;
                    let span = self.function_span(&target)?;
                    self.call_stack.push(self.cursor);
                    self.cursor = span.start + 1;
                }
                LineKind::Return => {
                    if self.dispatch_return() {
                        self.status = ScriptStatus::Finished;
                        return Ok(AdvanceSignal::Finished);
                    }
                }
                LineKind::ScriptIf => self.dispatch_script_if()?,
                LineKind::If => self.dispatch_if()?,
                LineKind::WhileLoop => self.dispatch_while()?,
                LineKind::RightBracket => match self.while_stack.last() {
                    Some(span) if span.end == self.cursor => self.cursor = span.start,
                    _ => self.cursor += 1,
                },
                LineKind::Break => match self.while_stack.last().copied() {
                    Some(span) if span.contains(self.cursor) => {
                        self.while_stack.pop();
                        self.cursor = span.end;
                    }
                    _ => self.cursor += 1,
                },
                LineKind::Continue => match self.while_stack.last().copied() {
                    Some(span) if span.contains(self.cursor) => self.cursor = span.start,
                    _ => self.cursor += 1,
                },
                LineKind::Evaluate => self.dispatch_evaluate()?,
                LineKind::Step => return Ok(AdvanceSignal::AtStep(self.cursor + 1)),
                LineKind::Unknown => {
                    return Err(StepLangError::with_line(
                        "ENGINE_UNKNOWN_LINE",
                        "unclassified line reached the executor",
                        self.cursor + 1,
                    ));
                }
            }
        }
        Err(StepLangError::with_line(
            "ENGINE_GUARD_EXCEEDED",
            format!("no observable progress after {} dispatches", DISPATCH_GUARD),
            self.cursor + 1,
        ))
    }

    /// A function header reached by sequential flow means the definition
    /// region has begun; bodies only execute through `call`.
    fn dispatch_function_header(&mut self) -> Result<(), StepLangError> {
        let span = self
            .program
            .functions
            .values()
            .find(|span| span.start == self.cursor)
            .cloned()
            .ok_or_else(|| {
                StepLangError::with_line(
                    "ENGINE_FUNCTION_UNRESOLVED",
                    "function header has no resolved span",
                    self.cursor + 1,
                )
            })?;
        self.cursor = span.end + 1;
        Ok(())
    }

    /// Returns true when a top-level `return` finishes the run.
    fn dispatch_return(&mut self) -> bool {
        let Some(call_line) = self.call_stack.pop() else {
            return true;
        };
        // A function must not leak loop context into its caller.
        if let Some(function) = self.program.function_containing(self.cursor).cloned() {
            self.while_stack
                .retain(|span| !(span.start >= function.start && span.end <= function.end));
        }
        self.cursor = call_line + 1;
        false
    }

    fn dispatch_script_if(&mut self) -> Result<(), StepLangError> {
        let number = self.cursor + 1;
        let condition = match self.script_if_argument(0)? {
            ScalarValue::Boolean(flag) => flag,
            ScalarValue::String(text) if text.eq_ignore_ascii_case("TRUE") => true,
            ScalarValue::String(text) if text.eq_ignore_ascii_case("FALSE") => false,
            other => {
                return Err(StepLangError::with_line(
                    "ENGINE_SCRIPTIF_CONDITION",
                    format!("ScriptIf condition must be boolean, got {}", other.type_name()),
                    number,
                ));
            }
        };
        let mode = self.script_if_text(1)?.to_ascii_uppercase();
        let target = self.script_if_text(if condition { 2 } else { 3 })?;
        if target.is_empty() {
            self.cursor += 1;
            return Ok(());
        }
        match mode.as_str() {
            "GOTO" => self.cursor = self.label_index(&target)?,
            "CALL" => {
                let span = self.function_span(&target)?;
                self.call_stack.push(self.cursor);
                self.cursor = span.start + 1;
            }
            other => {
                return Err(StepLangError::with_line(
                    "ENGINE_SCRIPTIF_MODE",
                    format!("ScriptIf mode must be CALL or GOTO, got '{}'", other),
                    number,
                ));
            }
        }
        Ok(())
    }

    fn dispatch_if(&mut self) -> Result<(), StepLangError> {
        let condition = self.structural_text(self.cursor)?;
        if self.condition_holds(&condition)? {
            self.cursor += 1;
        } else {
            self.cursor = self.block_end(self.cursor)? + 1;
        }
        Ok(())
    }

    fn dispatch_while(&mut self) -> Result<(), StepLangError> {
        let span = *self.program.loops.get(&self.cursor).ok_or_else(|| {
            StepLangError::with_line(
                "ENGINE_LOOP_UNRESOLVED",
                "while line has no precomputed span",
                self.cursor + 1,
            )
        })?;
        let condition = self.structural_text(self.cursor)?;
        if self.condition_holds(&condition)? {
            // Re-entry from the loop's own bracket must not push twice.
            if self.while_stack.last() != Some(&span) {
                self.while_stack.push(span);
            }
            self.cursor += 1;
        } else {
            if self.while_stack.last() == Some(&span) {
                self.while_stack.pop();
            }
            self.cursor = span.end + 1;
        }
        Ok(())
    }

    fn dispatch_evaluate(&mut self) -> Result<(), StepLangError> {
        let number = self.cursor + 1;
        let expression = self.structural_text(self.cursor)?;
        let outputs = self.program.lines[self.cursor].output_variables.clone();
        let value = evaluate_expression(&self.store, &expression)
            .map_err(|error| at_line(error, number))?;
        for name in outputs {
            self.store.set(TypedVariable::new(name, value.clone()));
        }
        self.cursor += 1;
        Ok(())
    }

    fn condition_holds(&self, condition: &str) -> Result<bool, StepLangError> {
        evaluate_boolean(&self.store, condition).map_err(|error| at_line(error, self.cursor + 1))
    }

    fn block_end(&self, opener: usize) -> Result<usize, StepLangError> {
        self.program.block_skip(opener).ok_or_else(|| {
            StepLangError::with_line(
                "ENGINE_BLOCK_UNCLOSED",
                "block has no matching closing bracket",
                opener + 1,
            )
        })
    }

    fn structural_text(&self, index: usize) -> Result<String, StepLangError> {
        self.program.lines[index]
            .arguments
            .first()
            .and_then(|entry| entry.value.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                StepLangError::with_line(
                    "ENGINE_MALFORMED_LINE",
                    "line carries no parsed text",
                    index + 1,
                )
            })
    }

    /// Pre-bound ScriptIf argument, with variable references dereferenced
    /// through the local tier.
    fn script_if_argument(&self, index: usize) -> Result<ScalarValue, StepLangError> {
        let number = self.cursor + 1;
        let bound = self.program.lines[self.cursor]
            .argument(index)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| {
                StepLangError::with_line(
                    "ENGINE_SCRIPTIF_BINDING",
                    format!("ScriptIf is missing argument {}", index),
                    number,
                )
            })?;
        match bound {
            ScalarValue::VariableRef(name) => self
                .store
                .get(&name)
                .map(|entry| entry.value.clone())
                .ok_or_else(|| {
                    StepLangError::with_line(
                        "ENGINE_SCRIPTIF_BINDING",
                        format!("variable '{}' is not defined", name),
                        number,
                    )
                }),
            literal => Ok(literal),
        }
    }

    fn script_if_text(&self, index: usize) -> Result<String, StepLangError> {
        match self.script_if_argument(index)? {
            ScalarValue::String(text) => Ok(text),
            other => Err(StepLangError::with_line(
                "ENGINE_SCRIPTIF_BINDING",
                format!(
                    "ScriptIf argument {} must be a string, got {}",
                    index,
                    other.type_name()
                ),
                self.cursor + 1,
            )),
        }
    }

    fn label_index(&self, name: &str) -> Result<usize, StepLangError> {
        self.program.labels.get(name).copied().ok_or_else(|| {
            StepLangError::with_line(
                "ENGINE_GOTO_TARGET",
                format!("label '{}' is not defined", name),
                self.cursor + 1,
            )
        })
    }

    fn function_span(&self, name: &str) -> Result<FunctionSpan, StepLangError> {
        self.program.functions.get(name).cloned().ok_or_else(|| {
            StepLangError::with_line(
                "ENGINE_CALL_TARGET",
                format!("function '{}' is not defined", name),
                self.cursor + 1,
            )
        })
    }

    /// Binds the current step line's arguments into the store, invokes the
    /// registered step, copies its return slots into the declared output
    /// variables, and records a timed result. Binding failures are data
    /// (a `Fail` result), not engine errors.
    pub fn execute_current_step(&mut self) -> Result<StepResult, StepLangError> {
        let line = self
            .program
            .line(self.cursor)
            .cloned()
            .ok_or_else(|| StepLangError::new("ENGINE_CURSOR_RANGE", "cursor is past the end"))?;
        if line.kind != LineKind::Step {
            return Err(StepLangError::with_line(
                "ENGINE_NOT_AT_STEP",
                "execute_current_step called away from a step line",
                line.number,
            ));
        }
        let name = line.step_name.clone().ok_or_else(|| {
            StepLangError::with_line("ENGINE_MALFORMED_LINE", "step line has no name", line.number)
        })?;

        let resolved = match self.resolve_step_arguments(&line) {
            Ok(values) => values,
            Err(message) => {
                let result =
                    self.push_result(&name, "argument binding", StepStatus::Fail, Some(message), Duration::ZERO, line.number);
                self.cursor += 1;
                return Ok(result);
            }
        };
        for (index, value) in resolved.iter().enumerate() {
            self.store
                .set(TypedVariable::new(argument_name(index), value.clone()));
        }
        self.store.set(TypedVariable::new(
            TOTAL_ARGUMENTS_NAME,
            ScalarValue::Integer(resolved.len() as i64),
        ));
        // Stale slots from an earlier step must not satisfy this line's outputs.
        for index in 0..line.output_variables.len() {
            self.store.remove(&return_value_name(index));
        }

        let factory = self.registry.lookup(&name).ok_or_else(|| {
            StepLangError::with_line(
                "ENGINE_STEP_UNKNOWN",
                format!("step '{}' is not registered", name),
                line.number,
            )
        })?;
        let mut step = factory.create();
        let description = step.description();
        let step_started = Instant::now();
        let outcome = {
            let mut ctx = StepContext::new(
                &mut self.store,
                self.cell_id,
                &self.sections,
                &self.abort,
                self.observer.as_ref(),
            );
            step.execute(&mut ctx)
        };
        let elapsed = step_started.elapsed();

        let mut status = outcome.status;
        let mut message = outcome.error_message;
        if status == StepStatus::Pass {
            for (index, output) in line.output_variables.iter().enumerate() {
                match self.store.get(&return_value_name(index)).cloned() {
                    Some(entry) => self
                        .store
                        .set(TypedVariable::new(output.clone(), entry.value)),
                    None => {
                        status = StepStatus::Fail;
                        message = Some(format!(
                            "step '{}' did not produce ReturnValue{}",
                            name, index
                        ));
                        break;
                    }
                }
            }
        }

        let result = self.push_result(&name, &description, status, message, elapsed, line.number);
        self.cursor += 1;
        Ok(result)
    }

    fn resolve_step_arguments(&self, line: &ScriptLine) -> Result<Vec<ScalarValue>, String> {
        let mut resolved = Vec::with_capacity(line.arguments.len());
        for argument in &line.arguments {
            match &argument.value {
                ScalarValue::VariableRef(name) => match self.store.get(name) {
                    Some(entry) => resolved.push(entry.value.clone()),
                    None => return Err(format!("variable '{}' is not defined", name)),
                },
                literal => resolved.push(literal.clone()),
            }
        }
        Ok(resolved)
    }

    /// Drives the run to completion (or to a breakpoint/pause). Structural
    /// failures surface in the report's `error`; step failures stay on the
    /// result trail and feed the fail policy.
    pub fn run(&mut self) -> RunReport {
        match self.run_loop() {
            Ok(()) => self.report(None),
            Err(error) => {
                self.status = ScriptStatus::Error;
                self.observer
                    .event("completed", RunOutcome::Error.as_str());
                self.report(Some(error))
            }
        }
    }

    /// Continues after a breakpoint or pause.
    pub fn resume(&mut self) -> RunReport {
        self.run()
    }

    fn run_loop(&mut self) -> Result<(), StepLangError> {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        if matches!(self.status, ScriptStatus::Finished | ScriptStatus::Error) {
            return Ok(());
        }
        self.status = ScriptStatus::Running;
        loop {
            if self.abort.load(Ordering::SeqCst) {
                self.push_result(
                    ABORT_STEP_NAME,
                    "run aborted by external request",
                    StepStatus::Abort,
                    None,
                    Duration::ZERO,
                    (self.cursor + 1).min(self.program.len().max(1)),
                );
                self.status = ScriptStatus::Finished;
                self.observer.event("completed", RunOutcome::Abort.as_str());
                return Ok(());
            }
            if self.pause.swap(false, Ordering::SeqCst) {
                self.status = ScriptStatus::Paused;
                return Ok(());
            }
            match self.advance()? {
                AdvanceSignal::Finished => {
                    self.observer
                        .event("completed", self.derive_outcome(false).as_str());
                    return Ok(());
                }
                AdvanceSignal::Breakpoint(_) => return Ok(()),
                AdvanceSignal::AtStep(_) => {
                    let result = self.execute_current_step()?;
                    match result.status {
                        StepStatus::Pass | StepStatus::NotRun => {}
                        StepStatus::Abort => {
                            self.status = ScriptStatus::Finished;
                            self.observer.event("completed", RunOutcome::Abort.as_str());
                            return Ok(());
                        }
                        StepStatus::Fail => {
                            if let Some(fail_step) = self.fail_step.clone() {
                                self.invoke_fail_step(&fail_step)?;
                            }
                            if !self.continue_on_fail {
                                self.status = ScriptStatus::Finished;
                                self.observer.event("completed", RunOutcome::Fail.as_str());
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// The configured fail step runs with no bound arguments; its result
    /// joins the trail but does not re-trigger the fail policy.
    fn invoke_fail_step(&mut self, name: &str) -> Result<(), StepLangError> {
        let factory = self.registry.lookup(name).ok_or_else(|| {
            StepLangError::new(
                "ENGINE_FAIL_STEP_UNKNOWN",
                format!("fail step '{}' is not registered", name),
            )
        })?;
        self.store.set(TypedVariable::new(
            TOTAL_ARGUMENTS_NAME,
            ScalarValue::Integer(0),
        ));
        let mut step = factory.create();
        let description = step.description();
        let step_started = Instant::now();
        let outcome = {
            let mut ctx = StepContext::new(
                &mut self.store,
                self.cell_id,
                &self.sections,
                &self.abort,
                self.observer.as_ref(),
            );
            step.execute(&mut ctx)
        };
        let line_number = (self.cursor).min(self.program.len().max(1));
        self.push_result(
            name,
            &description,
            outcome.status,
            outcome.error_message,
            step_started.elapsed(),
            line_number,
        );
        Ok(())
    }

    fn push_result(
        &mut self,
        step_name: &str,
        description: &str,
        status: StepStatus,
        error_message: Option<String>,
        elapsed: Duration,
        line_number: usize,
    ) -> StepResult {
        let result = StepResult {
            step_name: step_name.to_string(),
            description: description.to_string(),
            status,
            error_message,
            line_number,
            elapsed_ms: elapsed.as_millis() as u64,
            total_elapsed_ms: self.total_elapsed_ms(),
        };
        self.results.push(result.clone());
        result
    }

    fn total_elapsed_ms(&self) -> u64 {
        self.started_at
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    fn derive_outcome(&self, has_error: bool) -> RunOutcome {
        if has_error || self.status == ScriptStatus::Error {
            RunOutcome::Error
        } else if self
            .results
            .iter()
            .any(|result| result.status == StepStatus::Abort)
        {
            RunOutcome::Abort
        } else if self
            .results
            .iter()
            .any(|result| result.status == StepStatus::Fail)
        {
            RunOutcome::Fail
        } else {
            RunOutcome::Pass
        }
    }

    pub fn report(&self, error: Option<StepLangError>) -> RunReport {
        RunReport {
            cell_id: self.cell_id,
            status: self.status,
            outcome: self.derive_outcome(error.is_some()),
            results: self.results.clone(),
            error,
            total_elapsed_ms: self.total_elapsed_ms(),
        }
    }
}

fn at_line(mut error: StepLangError, line_number: usize) -> StepLangError {
    if error.line.is_none() {
        error.line = Some(line_number);
    }
    error
}

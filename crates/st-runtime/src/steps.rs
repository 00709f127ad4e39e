use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use st_core::{
    argument_name, return_value_name, ScalarValue, StepCatalog, StepStatus,
    TypedVariable, TOTAL_ARGUMENTS_NAME,
};

use crate::{CriticalSections, VariableStore};

const SECTION_POLL_INTERVAL: Duration = Duration::from_millis(5);
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Name/message callback for run diagnostics: `debug` messages from steps
/// and a `completed` event at run termination.
pub trait RunObserver: Send + Sync {
    fn event(&self, name: &str, message: &str);
}

#[derive(Debug, Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {
    fn event(&self, _name: &str, _message: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub error_message: Option<String>,
}

impl StepOutcome {
    pub fn pass() -> Self {
        Self {
            status: StepStatus::Pass,
            error_message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Fail,
            error_message: Some(message.into()),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Abort,
            error_message: Some(message.into()),
        }
    }
}

/// Everything a step implementation may touch while executing: the run's
/// variable store, the shared section table, the abort flag, and the
/// observer. Bound arguments are read back out of the store under their
/// reserved `Argument{N}` names.
pub struct StepContext<'a> {
    store: &'a mut VariableStore,
    cell_id: u32,
    sections: &'a CriticalSections,
    abort: &'a AtomicBool,
    observer: &'a dyn RunObserver,
}

impl<'a> StepContext<'a> {
    pub fn new(
        store: &'a mut VariableStore,
        cell_id: u32,
        sections: &'a CriticalSections,
        abort: &'a AtomicBool,
        observer: &'a dyn RunObserver,
    ) -> Self {
        Self {
            store,
            cell_id,
            sections,
            abort,
            observer,
        }
    }

    pub fn store(&mut self) -> &mut VariableStore {
        self.store
    }

    pub fn cell_id(&self) -> u32 {
        self.cell_id
    }

    pub fn sections(&self) -> &CriticalSections {
        self.sections
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn debug(&self, message: &str) {
        self.observer.event("debug", message);
    }

    pub fn argument(&self, index: usize) -> Option<ScalarValue> {
        self.store
            .get(&argument_name(index))
            .map(|entry| entry.value.clone())
    }

    pub fn argument_count(&self) -> usize {
        self.store
            .get(TOTAL_ARGUMENTS_NAME)
            .and_then(|entry| entry.value.as_integer())
            .map(|count| count.max(0) as usize)
            .unwrap_or(0)
    }

    pub fn set_return(&mut self, index: usize, value: ScalarValue) {
        self.store
            .set(TypedVariable::new(return_value_name(index), value));
    }
}

pub trait Step {
    fn description(&self) -> String;
    fn execute(&mut self, ctx: &mut StepContext<'_>) -> StepOutcome;
}

pub trait StepFactory: Send + Sync {
    fn create(&self) -> Box<dyn Step>;
}

/// Explicit name-to-factory registry; steps are registered at startup,
/// never discovered. Doubles as the compile-time step catalog.
#[derive(Default)]
pub struct StepRegistry {
    factories: BTreeMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn StepFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Closure registration for steps without state of their own.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, description: impl Into<String>, body: F)
    where
        F: Fn(&mut StepContext<'_>) -> StepOutcome + Send + Sync + 'static,
    {
        self.register(
            name,
            Arc::new(FnStepFactory {
                description: description.into(),
                body: Arc::new(body),
            }),
        );
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn StepFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl StepCatalog for StepRegistry {
    fn has_step(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

type FnStepBody = Arc<dyn Fn(&mut StepContext<'_>) -> StepOutcome + Send + Sync>;

struct FnStepFactory {
    description: String,
    body: FnStepBody,
}

impl StepFactory for FnStepFactory {
    fn create(&self) -> Box<dyn Step> {
        Box::new(FnStep {
            description: self.description.clone(),
            body: Arc::clone(&self.body),
        })
    }
}

struct FnStep {
    description: String,
    body: FnStepBody,
}

impl Step for FnStep {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>) -> StepOutcome {
        (self.body)(ctx)
    }
}

fn string_argument(ctx: &StepContext<'_>, index: usize) -> Result<String, StepOutcome> {
    match ctx.argument(index) {
        Some(ScalarValue::String(text)) => Ok(text),
        Some(other) => Err(StepOutcome::fail(format!(
            "argument {} must be a string, got {}",
            index,
            other.type_name()
        ))),
        None => Err(StepOutcome::fail(format!("argument {} is missing", index))),
    }
}

/// The builtin step library: Echo, Wait, SetGlobal, GetGlobal, GlobalExists,
/// EnterCritical, LeaveCritical, Fail, NoOp.
pub fn register_builtin_steps(registry: &mut StepRegistry) {
    registry.register_fn("Echo", "emit a debug message", |ctx| {
        let message = ctx
            .argument(0)
            .map(|value| value.to_string())
            .unwrap_or_default();
        ctx.debug(&message);
        StepOutcome::pass()
    });

    registry.register_fn("Wait", "abort-aware sleep in milliseconds", |ctx| {
        let Some(ScalarValue::Integer(total)) = ctx.argument(0) else {
            return StepOutcome::fail("Wait expects an integer millisecond count");
        };
        let mut remaining = Duration::from_millis(total.max(0) as u64);
        while !remaining.is_zero() {
            if ctx.abort_requested() {
                return StepOutcome::abort("aborted during Wait");
            }
            let slice = remaining.min(WAIT_SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        StepOutcome::pass()
    });

    registry.register_fn("SetGlobal", "write a shared global variable", |ctx| {
        let name = match string_argument(ctx, 0) {
            Ok(name) => name,
            Err(outcome) => return outcome,
        };
        let Some(value) = ctx.argument(1) else {
            return StepOutcome::fail("SetGlobal expects a value argument");
        };
        ctx.store().set_global(TypedVariable::new(name, value));
        StepOutcome::pass()
    });

    registry.register_fn("GetGlobal", "read a shared global variable", |ctx| {
        let name = match string_argument(ctx, 0) {
            Ok(name) => name,
            Err(outcome) => return outcome,
        };
        match ctx.store().get_global(&name) {
            Some(entry) => {
                ctx.set_return(0, entry.value);
                StepOutcome::pass()
            }
            None => StepOutcome::fail(format!("global '{}' is not defined", name)),
        }
    });

    registry.register_fn("GlobalExists", "probe a shared global variable", |ctx| {
        let name = match string_argument(ctx, 0) {
            Ok(name) => name,
            Err(outcome) => return outcome,
        };
        let exists = ctx.store().global_exists(&name);
        ctx.set_return(0, ScalarValue::Boolean(exists));
        StepOutcome::pass()
    });

    registry.register_fn(
        "EnterCritical",
        "queue for a named section and wait for its head",
        |ctx| {
            let name = match string_argument(ctx, 0) {
                Ok(name) => name,
                Err(outcome) => return outcome,
            };
            let cell = ctx.cell_id();
            ctx.sections().add_cell(&name, cell);
            while ctx.sections().is_blocked(&name, cell) {
                if ctx.abort_requested() {
                    ctx.sections().remove_cell(&name, cell);
                    return StepOutcome::abort("aborted while waiting for critical section");
                }
                std::thread::sleep(SECTION_POLL_INTERVAL);
            }
            StepOutcome::pass()
        },
    );

    registry.register_fn("LeaveCritical", "release a named section", |ctx| {
        let name = match string_argument(ctx, 0) {
            Ok(name) => name,
            Err(outcome) => return outcome,
        };
        let cell = ctx.cell_id();
        ctx.sections().remove_cell(&name, cell);
        StepOutcome::pass()
    });

    registry.register_fn("Fail", "fail unconditionally", |ctx| {
        let message = match ctx.argument(0) {
            Some(ScalarValue::String(text)) => text,
            _ => "Fail step executed".to_string(),
        };
        StepOutcome::fail(message)
    });

    registry.register_fn("NoOp", "do nothing", |_ctx| StepOutcome::pass());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::GlobalStore;

    #[derive(Default)]
    struct CollectingObserver {
        events: Mutex<Vec<(String, String)>>,
    }

    impl RunObserver for CollectingObserver {
        fn event(&self, name: &str, message: &str) {
            self.events
                .lock()
                .expect("event lock")
                .push((name.to_string(), message.to_string()));
        }
    }

    struct Harness {
        store: VariableStore,
        sections: CriticalSections,
        abort: AtomicBool,
        observer: CollectingObserver,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: VariableStore::new(Arc::new(GlobalStore::new())),
                sections: CriticalSections::new(),
                abort: AtomicBool::new(false),
                observer: CollectingObserver::default(),
            }
        }

        fn bind(&mut self, arguments: &[ScalarValue]) {
            for (index, value) in arguments.iter().enumerate() {
                self.store
                    .set(TypedVariable::new(argument_name(index), value.clone()));
            }
            self.store.set(TypedVariable::new(
                TOTAL_ARGUMENTS_NAME,
                ScalarValue::Integer(arguments.len() as i64),
            ));
        }

        fn run(&mut self, registry: &StepRegistry, name: &str) -> StepOutcome {
            let factory = registry.lookup(name).expect("step registered");
            let mut step = factory.create();
            let mut ctx = StepContext::new(
                &mut self.store,
                1,
                &self.sections,
                &self.abort,
                &self.observer,
            );
            step.execute(&mut ctx)
        }
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        register_builtin_steps(&mut registry);
        registry
    }

    #[test]
    fn registry_is_a_step_catalog() {
        let registry = registry();
        assert!(registry.has_step("Echo"));
        assert!(registry.has_step("EnterCritical"));
        assert!(!registry.has_step("Missing"));
    }

    #[test]
    fn echo_emits_a_debug_event() {
        let mut harness = Harness::new();
        harness.bind(&[ScalarValue::String("hello".to_string())]);
        let outcome = harness.run(&registry(), "Echo");
        assert_eq!(outcome, StepOutcome::pass());
        let events = harness.observer.events.lock().expect("events");
        assert_eq!(
            events.as_slice(),
            &[("debug".to_string(), "hello".to_string())]
        );
    }

    #[test]
    fn set_and_get_global_round_trip() {
        let mut harness = Harness::new();
        harness.bind(&[
            ScalarValue::String("shared".to_string()),
            ScalarValue::Integer(42),
        ]);
        assert_eq!(harness.run(&registry(), "SetGlobal"), StepOutcome::pass());

        harness.bind(&[ScalarValue::String("shared".to_string())]);
        assert_eq!(harness.run(&registry(), "GetGlobal"), StepOutcome::pass());
        let returned = harness
            .store
            .get(&return_value_name(0))
            .expect("return slot bound");
        assert_eq!(returned.value, ScalarValue::Integer(42));
    }

    #[test]
    fn get_global_fails_on_missing_name() {
        let mut harness = Harness::new();
        harness.bind(&[ScalarValue::String("absent".to_string())]);
        let outcome = harness.run(&registry(), "GetGlobal");
        assert_eq!(outcome.status, StepStatus::Fail);
        assert!(outcome.error_message.expect("message").contains("absent"));
    }

    #[test]
    fn global_exists_returns_boolean() {
        let mut harness = Harness::new();
        harness.bind(&[ScalarValue::String("flag".to_string())]);
        assert_eq!(harness.run(&registry(), "GlobalExists"), StepOutcome::pass());
        assert_eq!(
            harness.store.get(&return_value_name(0)).map(|e| e.value.clone()),
            Some(ScalarValue::Boolean(false))
        );
    }

    #[test]
    fn enter_critical_passes_when_head_of_queue() {
        let mut harness = Harness::new();
        harness.bind(&[ScalarValue::String("lock".to_string())]);
        assert_eq!(
            harness.run(&registry(), "EnterCritical"),
            StepOutcome::pass()
        );
        assert!(harness.sections.is_blocked("lock", 2));
        harness.bind(&[ScalarValue::String("lock".to_string())]);
        assert_eq!(
            harness.run(&registry(), "LeaveCritical"),
            StepOutcome::pass()
        );
        assert!(!harness.sections.is_blocked("lock", 2));
    }

    #[test]
    fn enter_critical_aborts_instead_of_spinning() {
        let mut harness = Harness::new();
        harness.sections.add_cell("lock", 9);
        harness.abort.store(true, Ordering::SeqCst);
        harness.bind(&[ScalarValue::String("lock".to_string())]);
        let outcome = harness.run(&registry(), "EnterCritical");
        assert_eq!(outcome.status, StepStatus::Abort);
        assert!(!harness.sections.is_blocked("lock", 1));
    }

    #[test]
    fn wait_observes_the_abort_flag() {
        let mut harness = Harness::new();
        harness.abort.store(true, Ordering::SeqCst);
        harness.bind(&[ScalarValue::Integer(10_000)]);
        let outcome = harness.run(&registry(), "Wait");
        assert_eq!(outcome.status, StepStatus::Abort);
    }

    #[test]
    fn fail_step_uses_its_message_argument() {
        let mut harness = Harness::new();
        harness.bind(&[ScalarValue::String("deliberate".to_string())]);
        let outcome = harness.run(&registry(), "Fail");
        assert_eq!(outcome, StepOutcome::fail("deliberate"));
    }

    #[test]
    fn closure_steps_see_bound_arguments() {
        let mut registry = StepRegistry::new();
        registry.register_fn("Sum", "add the bound integers", |ctx| {
            let mut total = 0i64;
            for index in 0..ctx.argument_count() {
                match ctx.argument(index) {
                    Some(ScalarValue::Integer(value)) => total += value,
                    _ => return StepOutcome::fail("Sum expects integers"),
                }
            }
            ctx.set_return(0, ScalarValue::Integer(total));
            StepOutcome::pass()
        });

        let mut harness = Harness::new();
        harness.bind(&[ScalarValue::Integer(2), ScalarValue::Integer(5)]);
        assert_eq!(harness.run(&registry, "Sum"), StepOutcome::pass());
        assert_eq!(
            harness.store.get(&return_value_name(0)).map(|e| e.value.clone()),
            Some(ScalarValue::Integer(7))
        );
    }
}

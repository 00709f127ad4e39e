use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use st_core::TypedVariable;

/// Process-shared variable tier. Constructed once and injected into every
/// engine; never a process-wide static.
#[derive(Debug, Default)]
pub struct GlobalStore {
    entries: Mutex<BTreeMap<String, TypedVariable>>,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<TypedVariable> {
        self.entries
            .lock()
            .expect("global store lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn set(&self, variable: TypedVariable) {
        self.entries
            .lock()
            .expect("global store lock poisoned")
            .insert(variable.name.clone(), variable);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries
            .lock()
            .expect("global store lock poisoned")
            .contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries
            .lock()
            .expect("global store lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("global store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

/// Two-tier typed variable store: a per-run local map owned by one engine,
/// layered over a shared global tier. Local lookups never fall through to
/// the global tier; global access is a separately-named operation.
#[derive(Debug)]
pub struct VariableStore {
    locals: BTreeMap<String, TypedVariable>,
    globals: Arc<GlobalStore>,
}

impl VariableStore {
    pub fn new(globals: Arc<GlobalStore>) -> Self {
        Self {
            locals: BTreeMap::new(),
            globals,
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypedVariable> {
        self.locals.get(name)
    }

    /// Insert or update in place; an update may change the stored type.
    pub fn set(&mut self, variable: TypedVariable) {
        self.locals.insert(variable.name.clone(), variable);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.locals.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.locals.keys().cloned().collect()
    }

    pub fn get_global(&self, name: &str) -> Option<TypedVariable> {
        self.globals.get(name)
    }

    pub fn set_global(&self, variable: TypedVariable) {
        self.globals.set(variable);
    }

    pub fn global_exists(&self, name: &str) -> bool {
        self.globals.exists(name)
    }

    pub fn remove_global(&self, name: &str) -> bool {
        self.globals.remove(name)
    }

    pub fn globals(&self) -> &Arc<GlobalStore> {
        &self.globals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::ScalarValue;

    fn store() -> VariableStore {
        VariableStore::new(Arc::new(GlobalStore::new()))
    }

    #[test]
    fn set_inserts_and_updates_in_place() {
        let mut store = store();
        store.set(TypedVariable::new("count", ScalarValue::Integer(1)));
        store.set(TypedVariable::new("count", ScalarValue::String("x".to_string())));
        let entry = store.get("count").expect("entry exists");
        assert_eq!(entry.value, ScalarValue::String("x".to_string()));
        assert_eq!(store.names(), vec!["count".to_string()]);
    }

    #[test]
    fn local_lookup_does_not_fall_through_to_global() {
        let store = store();
        store.set_global(TypedVariable::new("shared", ScalarValue::Boolean(true)));
        assert!(store.get("shared").is_none());
        assert!(!store.exists("shared"));
        assert!(store.global_exists("shared"));
        assert_eq!(
            store.get_global("shared").map(|entry| entry.value),
            Some(ScalarValue::Boolean(true))
        );
    }

    #[test]
    fn global_tier_is_shared_between_stores() {
        let globals = Arc::new(GlobalStore::new());
        let first = VariableStore::new(Arc::clone(&globals));
        let second = VariableStore::new(Arc::clone(&globals));
        first.set_global(TypedVariable::new("handoff", ScalarValue::Integer(9)));
        assert_eq!(
            second.get_global("handoff").map(|entry| entry.value),
            Some(ScalarValue::Integer(9))
        );
        assert!(second.remove_global("handoff"));
        assert!(!first.global_exists("handoff"));
    }

    #[test]
    fn remove_reports_presence() {
        let mut store = store();
        assert!(!store.remove("absent"));
        store.set(TypedVariable::new("present", ScalarValue::Integer(1)));
        assert!(store.remove("present"));
        assert!(store.get("present").is_none());
    }
}

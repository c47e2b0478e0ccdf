//! Process registry: the explicit owner of an application's runtimes
//!
//! There is no process-wide list. Applications create a registry, register
//! each runtime and start or stop them together.

use crate::runtime::BusinessProcessRuntime;
use casework_types::{WorkflowError, WorkflowResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of business process runtimes, keyed by process name
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    runtimes: HashMap<String, Arc<BusinessProcessRuntime>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime under its process name.
    ///
    /// A runtime already registered under the same name stops listening
    /// and is replaced.
    pub fn register(
        &mut self,
        runtime: BusinessProcessRuntime,
    ) -> WorkflowResult<Arc<BusinessProcessRuntime>> {
        let name = runtime.name().to_string();
        if let Some(previous) = self.runtimes.remove(&name) {
            previous.stop_listening_for_events()?;
            tracing::warn!(process = %name, "Replacing registered business process");
        }

        let runtime = Arc::new(runtime);
        self.runtimes.insert(name.clone(), Arc::clone(&runtime));
        tracing::info!(process = %name, "Business process registered");
        Ok(runtime)
    }

    pub fn get(&self, name: &str) -> WorkflowResult<Arc<BusinessProcessRuntime>> {
        self.runtimes
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::ProcessNotFound(name.to_string()))
    }

    /// Registered process names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.runtimes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start listening on every registered runtime
    pub fn start_all(&self) -> WorkflowResult<()> {
        for name in self.names() {
            self.runtimes[name].start_listening_for_events()?;
        }
        Ok(())
    }

    /// Stop listening on every registered runtime
    pub fn stop_all(&self) -> WorkflowResult<()> {
        for runtime in self.runtimes.values() {
            runtime.stop_listening_for_events()?;
        }
        Ok(())
    }

    /// Unregister a runtime. It stops listening before it is returned.
    pub fn remove(&mut self, name: &str) -> WorkflowResult<Arc<BusinessProcessRuntime>> {
        let runtime = self
            .runtimes
            .remove(name)
            .ok_or_else(|| WorkflowError::ProcessNotFound(name.to_string()))?;
        runtime.stop_listening_for_events()?;
        Ok(runtime)
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::definition::BusinessProcessBuilder;
    use crate::event_bus::EventBus;
    use crate::step::SystemProcess;
    use crate::store::InMemoryCaseStore;
    use casework_types::Case;

    fn runtime(bus: &EventBus, name: &str, event: &str) -> BusinessProcessRuntime {
        let definition = BusinessProcessBuilder::new(name, "case")
            .step("a", SystemProcess::new("a", |_c: &mut Case| Ok(())))
            .start("a")
            .transition("a", event, "end")
            .build()
            .unwrap();
        BusinessProcessRuntime::new(
            definition,
            bus.clone(),
            Arc::new(InMemoryCaseStore::new()),
            RuntimeConfig::default(),
        )
    }

    #[test]
    fn test_register_and_get() {
        let bus = EventBus::new();
        let mut registry = ProcessRegistry::new();
        assert!(registry.is_empty());

        registry.register(runtime(&bus, "renewal", "renewed")).unwrap();
        registry.register(runtime(&bus, "appeal", "appealed")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["appeal", "renewal"]);
        assert_eq!(registry.get("appeal").unwrap().name(), "appeal");
        assert!(matches!(
            registry.get("missing"),
            Err(WorkflowError::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_start_and_stop_all() {
        let bus = EventBus::new();
        let mut registry = ProcessRegistry::new();
        registry.register(runtime(&bus, "renewal", "renewed")).unwrap();
        registry.register(runtime(&bus, "appeal", "appealed")).unwrap();

        registry.start_all().unwrap();
        registry.start_all().unwrap();
        assert_eq!(bus.total_subscriptions(), 2);

        registry.stop_all().unwrap();
        assert_eq!(bus.total_subscriptions(), 0);
    }

    #[test]
    fn test_replacing_stops_previous() {
        let bus = EventBus::new();
        let mut registry = ProcessRegistry::new();

        let first = registry.register(runtime(&bus, "renewal", "renewed")).unwrap();
        first.start_listening_for_events().unwrap();
        assert_eq!(bus.subscriber_count("renewed"), 1);

        registry.register(runtime(&bus, "renewal", "renewed_v2")).unwrap();
        assert!(!first.is_listening());
        assert_eq!(bus.subscriber_count("renewed"), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_stops_listening() {
        let bus = EventBus::new();
        let mut registry = ProcessRegistry::new();
        registry.register(runtime(&bus, "renewal", "renewed")).unwrap();
        registry.start_all().unwrap();

        let removed = registry.remove("renewal").unwrap();
        assert!(!removed.is_listening());
        assert_eq!(bus.total_subscriptions(), 0);
        assert!(registry.remove("renewal").is_err());
    }
}

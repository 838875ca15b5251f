use std::sync::Arc;

use log::{debug, warn};

use crate::collectors::live_system::{LiveSystemUnit, LIVE_SYSTEM_UNIT_ID};
use crate::collectors::network::{NetworkUnit, NETWORK_UNIT_ID};
use crate::collectors::tool::{ToolDefinition, ToolUnit};
use crate::collectors::unit::CollectionUnit;

type UnitFactory = Box<dyn Fn() -> Arc<dyn CollectionUnit> + Send + Sync>;

/// Ordered map from unit identifier to a factory producing fresh instances.
///
/// Units are instantiated once per run so no state leaks between runs.
#[derive(Default)]
pub struct UnitRegistry {
    entries: Vec<(String, UnitFactory)>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in live units plus one unit per tool.
    pub fn with_builtin_units(tools: &[ToolDefinition]) -> Self {
        let mut registry = Self::new();
        registry.register(LIVE_SYSTEM_UNIT_ID, || Arc::new(LiveSystemUnit::new()));
        registry.register(NETWORK_UNIT_ID, || Arc::new(NetworkUnit::new()));

        for tool in tools {
            let definition = tool.clone();
            registry.register(&tool.id, move || Arc::new(ToolUnit::new(definition.clone())));
        }
        registry
    }

    /// Register a factory. A later registration replaces an earlier one
    /// with the same id but keeps its position.
    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Arc<dyn CollectionUnit> + Send + Sync + 'static,
    {
        if let Some(entry) = self.entries.iter_mut().find(|(existing, _)| existing == id) {
            warn!("Replacing registered collection unit {}", id);
            entry.1 = Box::new(factory);
            return;
        }
        debug!("Registered collection unit {}", id);
        self.entries.push((id.to_string(), Box::new(factory)));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == id)
    }

    /// Fresh instance of the unit registered under `id`
    pub fn instantiate(&self, id: &str) -> Option<Arc<dyn CollectionUnit>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, factory)| factory())
    }

    /// Registered identifiers in registration order
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceClass;

    fn imager() -> ToolDefinition {
        ToolDefinition {
            id: "memory".to_string(),
            display_name: "Memory Image".to_string(),
            program: "winpmem".to_string(),
            args: vec!["{output_dir}/memory.raw".to_string()],
            resource_class: ResourceClass::ExclusiveMemory,
            requires_privilege: true,
            outputs: vec!["memory.raw".to_string()],
            timeout_secs: None,
        }
    }

    #[test]
    fn test_builtin_units_are_registered_in_order() {
        let registry = UnitRegistry::with_builtin_units(&[imager()]);
        assert_eq!(registry.ids(), vec!["live_system", "network", "memory"]);
        assert!(registry.contains("memory"));
        assert!(!registry.contains("browser"));
    }

    #[test]
    fn test_instantiate_returns_fresh_instances() {
        let registry = UnitRegistry::with_builtin_units(&[imager()]);

        let first = registry.instantiate("memory").unwrap();
        let second = registry.instantiate("memory").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.resource_class(), ResourceClass::ExclusiveMemory);
        assert!(first.requires_privilege());

        assert!(registry.instantiate("unknown").is_none());
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = UnitRegistry::with_builtin_units(&[]);
        registry.register(LIVE_SYSTEM_UNIT_ID, || Arc::new(NetworkUnit::new()));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids()[0], LIVE_SYSTEM_UNIT_ID);
        let unit = registry.instantiate(LIVE_SYSTEM_UNIT_ID).unwrap();
        assert_eq!(unit.resource_class(), ResourceClass::Network);
    }
}

use std::collections::HashMap;

use crate::engine::PropertyFormat;

#[derive(Debug, Clone, PartialEq)]
pub struct ObservedProperty {
    pub name: String,
    pub format: PropertyFormat,
    /// Correlation id passed to the engine.
    pub reply_id: u64,
    /// Id the host supplied, kept for diagnostics only.
    pub client_id: Option<i64>,
}

/// Observation registrations, keyed by property name.
#[derive(Debug, Default)]
pub struct ObservedProperties {
    by_name: HashMap<String, ObservedProperty>,
}

impl ObservedProperties {
    /// Records a new observation. Returns `false` if `name` is already observed.
    pub fn register(&mut self, property: ObservedProperty) -> bool {
        if self.by_name.contains_key(&property.name) {
            return false;
        }
        self.by_name.insert(property.name.clone(), property);
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<ObservedProperty> {
        self.by_name.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ObservedProperty> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
    }
}

//! FILENAME: grouping-engine/src/registry.rs
//! Named custom group and aggregation functions.
//!
//! Custom behavior is never built from configuration text: a definition
//! refers to a function by id, and the id must have been registered with
//! compiled code. Registration happens at startup; runs only read.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tabular::Record;

use crate::definition::GroupParams;

/// Splits records into keyed subsets.
///
/// Receives the records of the node being partitioned and the level's
/// params. Returns `(key, positions)` pairs in the desired key order, where
/// positions index into the given slice.
pub type GroupFn = Arc<dyn Fn(&[&Record], &GroupParams) -> Vec<(String, Vec<usize>)> + Send + Sync>;

/// Reduces the numeric values of a group to one number. Must be total.
pub type AggregateFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

static GLOBAL_REGISTRY: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::new);

/// Lookup tables for custom functions.
#[derive(Default)]
pub struct FunctionRegistry {
    group_functions: RwLock<FxHashMap<String, GroupFn>>,
    aggregation_functions: RwLock<FxHashMap<String, AggregateFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// The process-wide registry used by the convenience entry points.
    pub fn global() -> &'static FunctionRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn register_group_function<F>(&self, id: impl Into<String>, function: F)
    where
        F: Fn(&[&Record], &GroupParams) -> Vec<(String, Vec<usize>)> + Send + Sync + 'static,
    {
        let id = id.into();
        log::debug!("registering group function '{}'", id);
        write(&self.group_functions).insert(id, Arc::new(function));
    }

    pub fn register_aggregation_function<F>(&self, id: impl Into<String>, function: F)
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        let id = id.into();
        log::debug!("registering aggregation function '{}'", id);
        write(&self.aggregation_functions).insert(id, Arc::new(function));
    }

    pub fn group_function(&self, id: &str) -> Option<GroupFn> {
        read(&self.group_functions).get(id).cloned()
    }

    pub fn aggregation_function(&self, id: &str) -> Option<AggregateFn> {
        read(&self.aggregation_functions).get(id).cloned()
    }

    pub fn has_group_function(&self, id: &str) -> bool {
        read(&self.group_functions).contains_key(id)
    }

    pub fn has_aggregation_function(&self, id: &str) -> bool {
        read(&self.aggregation_functions).contains_key(id)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut group_ids: Vec<String> = read(&self.group_functions).keys().cloned().collect();
        let mut aggregation_ids: Vec<String> = read(&self.aggregation_functions).keys().cloned().collect();
        group_ids.sort();
        aggregation_ids.sort();
        f.debug_struct("FunctionRegistry")
            .field("group_functions", &group_ids)
            .field("aggregation_functions", &aggregation_ids)
            .finish()
    }
}

// A panic inside a registration cannot leave a map half-written, so a
// poisoned lock still guards consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registers a group function in the global registry.
pub fn register_group_function<F>(id: impl Into<String>, function: F)
where
    F: Fn(&[&Record], &GroupParams) -> Vec<(String, Vec<usize>)> + Send + Sync + 'static,
{
    FunctionRegistry::global().register_group_function(id, function);
}

/// Registers an aggregation function in the global registry.
pub fn register_aggregation_function<F>(id: impl Into<String>, function: F)
where
    F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
{
    FunctionRegistry::global().register_aggregation_function(id, function);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = FunctionRegistry::new();
        registry.register_aggregation_function("range", |values: &[f64]| {
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            if values.is_empty() { 0.0 } else { max - min }
        });

        let f = registry.aggregation_function("range").unwrap();
        assert_eq!(f(&[3.0, 9.0, 4.0]), 6.0);
        assert!(registry.has_aggregation_function("range"));
        assert!(!registry.has_group_function("range"));
        assert!(registry.aggregation_function("missing").is_none());
    }

    #[test]
    fn test_group_function_receives_params() {
        let registry = FunctionRegistry::new();
        registry.register_group_function("halves", |records: &[&Record], params: &GroupParams| {
            let prefix = params
                .get("prefix")
                .and_then(|v| v.display_string())
                .unwrap_or_default();
            let mid = records.len() / 2;
            vec![
                (format!("{}A", prefix), (0..mid).collect()),
                (format!("{}B", prefix), (mid..records.len()).collect()),
            ]
        });

        let records = vec![Record::new(), Record::new(), Record::new()];
        let refs: Vec<&Record> = records.iter().collect();
        let mut params = GroupParams::new();
        params.insert("prefix".to_string(), tabular::Value::text("half-"));

        let f = registry.group_function("halves").unwrap();
        let buckets = f(&refs, &params);
        assert_eq!(buckets[0], ("half-A".to_string(), vec![0]));
        assert_eq!(buckets[1], ("half-B".to_string(), vec![1, 2]));
    }

    #[test]
    fn test_global_registry_is_shared() {
        register_aggregation_function("registry_test_double_sum", |values: &[f64]| {
            values.iter().sum::<f64>() * 2.0
        });
        assert!(FunctionRegistry::global().has_aggregation_function("registry_test_double_sum"));
    }
}

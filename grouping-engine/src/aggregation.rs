//! FILENAME: grouping-engine/src/aggregation.rs
//! Aggregation Evaluator - attaches computed values to group tree nodes.
//!
//! Each spec is computed from a running accumulator over a node's member
//! records. Scope decides which nodes receive a value:
//! - ExactLevel / IncludeSubgroups: nodes whose level equals the target
//! - CrossAllGroups: one value merged over every node of the target level,
//!   attached to each of them (the root when the target is 0)

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tabular::{format_value, FormatSpec, Record, RecordIndex};

use crate::definition::{
    AggregationScope, AggregationSpec, AggregationType, DisplayPosition,
};
use crate::error::{Diagnostic, GroupingError, Result};
use crate::hierarchy::{GroupNode, GroupTree};
use crate::registry::FunctionRegistry;

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// Running state for one aggregate. Two accumulators over disjoint record
/// sets merge into the accumulator of their union.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateAccumulator {
    pub sum: f64,
    /// Records that passed the condition.
    pub count: u64,
    /// Records whose source value coerced to a number.
    pub count_numbers: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Raw numbers, kept only for custom functions.
    pub values: Option<Vec<f64>>,
}

impl AggregateAccumulator {
    pub fn new() -> Self {
        AggregateAccumulator::default()
    }

    /// Custom functions need the raw values, so only they collect them.
    pub fn for_aggregation(aggregation: &AggregationType) -> Self {
        match aggregation {
            AggregationType::Custom(_) => AggregateAccumulator {
                values: Some(Vec::new()),
                ..AggregateAccumulator::default()
            },
            _ => AggregateAccumulator::default(),
        }
    }

    pub fn add_number(&mut self, value: f64) {
        self.count_numbers += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        if let Some(values) = &mut self.values {
            values.push(value);
        }
    }

    pub fn merge(&mut self, other: &AggregateAccumulator) {
        self.sum += other.sum;
        self.count += other.count;
        self.count_numbers += other.count_numbers;

        if let Some(other_min) = other.min {
            self.min = Some(self.min.map_or(other_min, |m| m.min(other_min)));
        }
        if let Some(other_max) = other.max {
            self.max = Some(self.max.map_or(other_max, |m| m.max(other_max)));
        }
        if let (Some(values), Some(other_values)) = (&mut self.values, &other.values) {
            values.extend_from_slice(other_values);
        }
    }

    /// Average derived from the running sum and count. 0 when empty.
    pub fn average(&self) -> f64 {
        if self.count_numbers > 0 {
            self.sum / self.count_numbers as f64
        } else {
            0.0
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// One computed value attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub path: Vec<String>,
    pub label: String,
    /// `None` when the computation is undefined (Min/Max over nothing).
    pub value: Option<f64>,
    /// Records counted for Count, numeric values used otherwise.
    pub source_value_count: u64,
    pub aggregation: AggregationType,
    pub scope: AggregationScope,
    pub display_position: DisplayPosition,
    pub format: Option<FormatSpec>,
    /// Declaration index of the spec that produced this value.
    pub spec_index: usize,
}

impl AggregationResult {
    pub fn formatted(&self) -> String {
        match &self.format {
            Some(spec) => format_value(self.value, spec),
            None => format_value(self.value, &FormatSpec::Plain),
        }
    }
}

/// Results keyed by (node path, label), in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationResultMap {
    results: Vec<AggregationResult>,
    #[serde(skip)]
    index: FxHashMap<(Vec<String>, String), usize>,
}

impl AggregationResultMap {
    pub fn new() -> Self {
        AggregationResultMap::default()
    }

    /// Inserts a result, replacing any value with the same key in place.
    /// Returns true when a value was replaced.
    pub fn insert(&mut self, result: AggregationResult) -> bool {
        let key = (result.path.clone(), result.label.clone());
        match self.index.get(&key) {
            Some(&pos) => {
                self.results[pos] = result;
                true
            }
            None => {
                self.index.insert(key, self.results.len());
                self.results.push(result);
                false
            }
        }
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S], label: &str) -> Option<&AggregationResult> {
        let key = (
            path.iter().map(|s| s.as_ref().to_string()).collect::<Vec<String>>(),
            label.to_string(),
        );
        self.index.get(&key).map(|&pos| &self.results[pos])
    }

    /// Shorthand for the value at (path, label). `None` for absent or null.
    pub fn value<S: AsRef<str>>(&self, path: &[S], label: &str) -> Option<f64> {
        self.get(path, label).and_then(|r| r.value)
    }

    /// All results attached to one node, in insertion order.
    pub fn for_node<S: AsRef<str>>(&self, path: &[S]) -> Vec<&AggregationResult> {
        self.results
            .iter()
            .filter(|r| same_path(&r.path, path))
            .collect()
    }

    pub fn header_results<S: AsRef<str>>(&self, path: &[S]) -> Vec<&AggregationResult> {
        self.results
            .iter()
            .filter(|r| r.display_position.in_header() && same_path(&r.path, path))
            .collect()
    }

    pub fn footer_results<S: AsRef<str>>(&self, path: &[S]) -> Vec<&AggregationResult> {
        self.results
            .iter()
            .filter(|r| r.display_position.in_footer() && same_path(&r.path, path))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregationResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

fn same_path<S: AsRef<str>>(a: &[String], b: &[S]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y.as_ref())
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Checks every spec before any computation runs.
pub fn validate_specs(specs: &[AggregationSpec]) -> Result<()> {
    for spec in specs {
        if spec.aggregation.requires_source_field() && spec.source_field.is_none() {
            return Err(GroupingError::MissingSourceField(spec.label.clone()));
        }
        if let Some(condition) = &spec.condition {
            condition
                .validate()
                .map_err(|reason| GroupingError::InvalidCondition {
                    label: spec.label.clone(),
                    reason,
                })?;
        }
    }
    Ok(())
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Computes aggregate values over record subsets, collecting diagnostics.
pub(crate) struct Aggregator<'a> {
    records: &'a [Record],
    registry: &'a FunctionRegistry,
    warned: FxHashSet<usize>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Aggregator<'a> {
    pub(crate) fn new(records: &'a [Record], registry: &'a FunctionRegistry) -> Self {
        Aggregator {
            records,
            registry,
            warned: FxHashSet::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Folds the given records into a fresh accumulator for `spec`.
    pub(crate) fn accumulate(
        &self,
        spec: &AggregationSpec,
        members: impl IntoIterator<Item = RecordIndex>,
    ) -> AggregateAccumulator {
        let mut acc = AggregateAccumulator::for_aggregation(&spec.aggregation);

        for idx in members {
            let record = &self.records[idx];
            if let Some(condition) = &spec.condition {
                if !condition.evaluate(record) {
                    continue;
                }
            }
            acc.count += 1;
            if let Some(field) = &spec.source_field {
                if let Some(n) = record.value(field).as_number() {
                    acc.add_number(n);
                }
            }
        }
        acc
    }

    /// Final value and source value count of an accumulator.
    pub(crate) fn finish(
        &mut self,
        spec_index: usize,
        spec: &AggregationSpec,
        acc: &AggregateAccumulator,
    ) -> (Option<f64>, u64) {
        let value = match &spec.aggregation {
            AggregationType::Sum => Some(acc.sum),
            AggregationType::Count => return (Some(acc.count as f64), acc.count),
            AggregationType::Average => Some(acc.average()),
            AggregationType::Min => acc.min,
            AggregationType::Max => acc.max,
            AggregationType::Custom(id) => match self.registry.aggregation_function(id) {
                Some(function) => {
                    let values = acc.values.as_deref().unwrap_or(&[]);
                    Some(function(values))
                }
                None => {
                    if self.warned.insert(spec_index) {
                        log::warn!(
                            "aggregation function '{}' is not registered; '{}' falls back to 0",
                            id,
                            spec.label
                        );
                        self.diagnostics.push(Diagnostic::UnregisteredCustomAggregation {
                            id: id.clone(),
                            label: spec.label.clone(),
                        });
                    }
                    Some(0.0)
                }
            },
        };
        (value, acc.count_numbers)
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Evaluates every spec against the tree.
///
/// Nodes are visited pre-order and specs in declaration order, so when two
/// specs attach the same label to the same node the later one wins.
pub fn evaluate(
    tree: &GroupTree,
    specs: &[AggregationSpec],
    records: &[Record],
    registry: &FunctionRegistry,
) -> Result<(AggregationResultMap, Vec<Diagnostic>)> {
    if tree.record_count != records.len() {
        return Err(GroupingError::MismatchedRecordStore {
            rows: tree.record_count,
            columns: records.len(),
        });
    }
    validate_specs(specs)?;

    let mut aggregator = Aggregator::new(records, registry);

    // Cross-group values do not depend on the visited node.
    let mut cross: FxHashMap<usize, (Option<f64>, u64)> = FxHashMap::default();
    for (i, spec) in specs.iter().enumerate() {
        if spec.scope == AggregationScope::CrossAllGroups {
            let mut total = AggregateAccumulator::for_aggregation(&spec.aggregation);
            for node in tree.nodes_at_level(spec.target_level) {
                let acc = aggregator.accumulate(spec, node.member_records.iter().copied());
                total.merge(&acc);
            }
            cross.insert(i, aggregator.finish(i, spec, &total));
        }
    }

    let mut results = AggregationResultMap::new();
    let mut nodes: Vec<&GroupNode> = Vec::new();
    tree.root.walk(&mut |node| nodes.push(node));

    for node in nodes {
        for (i, spec) in specs.iter().enumerate() {
            if spec.target_level != node.level {
                continue;
            }
            let (value, source_value_count) = match cross.get(&i) {
                Some(&computed) => computed,
                None => {
                    let acc = aggregator.accumulate(spec, node.member_records.iter().copied());
                    aggregator.finish(i, spec, &acc)
                }
            };

            let replaced = results.insert(AggregationResult {
                path: node.path.clone(),
                label: spec.label.clone(),
                value,
                source_value_count,
                aggregation: spec.aggregation.clone(),
                scope: spec.scope,
                display_position: spec.display_position,
                format: spec.format.clone(),
                spec_index: i,
            });
            if replaced {
                log::debug!("aggregation '{}' overwritten at {:?}", spec.label, node.path);
                aggregator.push_diagnostic(Diagnostic::LabelOverwritten {
                    path: node.path.clone(),
                    label: spec.label.clone(),
                });
            }
        }
    }

    log::debug!(
        "evaluated {} aggregation specs into {} results",
        specs.len(),
        results.len()
    );
    Ok((results, aggregator.into_diagnostics()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ComparisonOperator, Condition};
    use crate::definition::{ColumnGrouping, EngineOptions};
    use crate::hierarchy::build_tree;
    use crate::resolver::resolve_levels;

    fn sales() -> Vec<Record> {
        vec![
            Record::new().with("region", "North").with("city", "Oslo").with("amt", 10),
            Record::new().with("region", "North").with("city", "Bergen").with("amt", 20),
            Record::new().with("region", "South").with("city", "Rome").with("amt", 5),
        ]
    }

    fn run(
        records: &[Record],
        columns: &[ColumnGrouping],
        specs: &[AggregationSpec],
        registry: &FunctionRegistry,
    ) -> Result<(AggregationResultMap, Vec<Diagnostic>)> {
        let options = EngineOptions::default();
        let levels = resolve_levels(columns, &options, registry)?;
        let (tree, _) = build_tree(records, &levels, &options, registry);
        evaluate(&tree, specs, records, registry)
    }

    fn region() -> Vec<ColumnGrouping> {
        vec![ColumnGrouping::new("region", 1), ColumnGrouping::new("city", 2)]
    }

    #[test]
    fn test_exact_level_sum() {
        let specs = [AggregationSpec::new("Total", AggregationType::Sum, 1).on_field("amt")];
        let (results, diagnostics) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();

        assert_eq!(results.value(&["North"], "Total"), Some(30.0));
        assert_eq!(results.value(&["South"], "Total"), Some(5.0));
        assert!(results.get(&["North", "Oslo"], "Total").is_none());
        assert_eq!(results.len(), 2);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_average_min_max() {
        let specs = [
            AggregationSpec::new("Avg", AggregationType::Average, 1).on_field("amt"),
            AggregationSpec::new("Min", AggregationType::Min, 1).on_field("amt"),
            AggregationSpec::new("Max", AggregationType::Max, 1).on_field("amt"),
        ];
        let (results, _) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.value(&["North"], "Avg"), Some(15.0));
        assert_eq!(results.value(&["North"], "Min"), Some(10.0));
        assert_eq!(results.value(&["North"], "Max"), Some(20.0));
        assert_eq!(results.get(&["North"], "Avg").map(|r| r.source_value_count), Some(2));
    }

    #[test]
    fn test_non_numeric_values_are_excluded() {
        let records = vec![
            Record::new().with("g", "a").with("v", 4),
            Record::new().with("g", "a").with("v", "four"),
            Record::new().with("g", "a"),
        ];
        let specs = [
            AggregationSpec::new("Sum", AggregationType::Sum, 1).on_field("v"),
            AggregationSpec::new("Avg", AggregationType::Average, 1).on_field("v"),
            AggregationSpec::new("Count", AggregationType::Count, 1),
        ];
        let (results, _) = run(&records, &[ColumnGrouping::new("g", 1)], &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.value(&["a"], "Sum"), Some(4.0));
        assert_eq!(results.value(&["a"], "Avg"), Some(4.0));
        assert_eq!(results.value(&["a"], "Count"), Some(3.0));
    }

    #[test]
    fn test_min_of_nothing_is_null() {
        let records = vec![Record::new().with("g", "a")];
        let specs = [
            AggregationSpec::new("Min", AggregationType::Min, 1).on_field("v"),
            AggregationSpec::new("Avg", AggregationType::Average, 1).on_field("v"),
        ];
        let (results, _) = run(&records, &[ColumnGrouping::new("g", 1)], &specs, &FunctionRegistry::new()).unwrap();
        let min = results.get(&["a"], "Min").unwrap();
        assert_eq!(min.value, None);
        assert_eq!(min.formatted(), "");
        assert_eq!(results.value(&["a"], "Avg"), Some(0.0));
    }

    #[test]
    fn test_include_subgroups_matches_flattened_subtree() {
        let specs = [
            AggregationSpec::new("Exact", AggregationType::Average, 1).on_field("amt"),
            AggregationSpec::new("Deep", AggregationType::Average, 1)
                .on_field("amt")
                .with_scope(AggregationScope::IncludeSubgroups),
        ];
        let (results, _) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.value(&["North"], "Deep"), results.value(&["North"], "Exact"));
        assert_eq!(results.value(&["North"], "Deep"), Some(15.0));
    }

    #[test]
    fn test_cross_all_groups_root() {
        let specs = [AggregationSpec::new("All", AggregationType::Count, 0)
            .with_scope(AggregationScope::CrossAllGroups)];
        let (results, _) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        let empty: [&str; 0] = [];
        assert_eq!(results.value(&empty, "All"), Some(3.0));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_cross_all_groups_on_level() {
        let specs = [AggregationSpec::new("Grand", AggregationType::Sum, 2)
            .on_field("amt")
            .with_scope(AggregationScope::CrossAllGroups)];
        let (results, _) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.value == Some(35.0)));
        assert_eq!(results.value(&["South", "Rome"], "Grand"), Some(35.0));
    }

    #[test]
    fn test_conditional_count() {
        let specs = [AggregationSpec::new("Big", AggregationType::Count, 1)
            .with_condition(Condition::compare("amt", ComparisonOperator::GreaterThanOrEqual, 15))];
        let (results, _) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.value(&["North"], "Big"), Some(1.0));
        assert_eq!(results.value(&["South"], "Big"), Some(0.0));
    }

    #[test]
    fn test_invalid_condition_fails_before_computation() {
        let specs = [AggregationSpec::new("Bad", AggregationType::Count, 1)
            .with_condition(Condition::Or(vec![]))];
        let err = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap_err();
        assert!(matches!(err, GroupingError::InvalidCondition { ref label, .. } if label == "Bad"));
    }

    #[test]
    fn test_missing_source_field_rejected() {
        let specs = [AggregationSpec::new("Sum", AggregationType::Sum, 1)];
        let err = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap_err();
        assert_eq!(err, GroupingError::MissingSourceField("Sum".to_string()));
    }

    #[test]
    fn test_records_must_match_tree() {
        let options = EngineOptions::default();
        let registry = FunctionRegistry::new();
        let records = sales();
        let levels = resolve_levels(&region(), &options, &registry).unwrap();
        let (tree, _) = build_tree(&records, &levels, &options, &registry);

        let specs = [AggregationSpec::new("Total", AggregationType::Sum, 1).on_field("amt")];
        let err = evaluate(&tree, &specs, &records[..2], &registry).unwrap_err();
        assert_eq!(err, GroupingError::MismatchedRecordStore { rows: 3, columns: 2 });
    }

    #[test]
    fn test_overflowed_sum_formats_plain() {
        let records = vec![
            Record::new().with("g", "a").with("v", 1e308),
            Record::new().with("g", "a").with("v", 1e308),
        ];
        let specs = [AggregationSpec::new("Sum", AggregationType::Sum, 1)
            .on_field("v")
            .with_format(FormatSpec::Currency { code: "USD".to_string(), precision: 2 })];
        let (results, _) = run(&records, &[ColumnGrouping::new("g", 1)], &specs, &FunctionRegistry::new()).unwrap();
        let sum = results.get(&["a"], "Sum").unwrap();
        assert_eq!(sum.value, Some(f64::INFINITY));
        assert_eq!(sum.formatted(), "inf");
    }

    #[test]
    fn test_custom_aggregation() {
        let registry = FunctionRegistry::new();
        registry.register_aggregation_function("spread", |values: &[f64]| {
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            if values.is_empty() { 0.0 } else { max - min }
        });
        let specs = [AggregationSpec::new("Spread", AggregationType::Custom("spread".to_string()), 1)
            .on_field("amt")];
        let (results, diagnostics) = run(&sales(), &region(), &specs, &registry).unwrap();
        assert_eq!(results.value(&["North"], "Spread"), Some(10.0));
        assert_eq!(results.value(&["South"], "Spread"), Some(0.0));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_unregistered_custom_aggregation_is_recoverable() {
        let specs = [AggregationSpec::new("Mystery", AggregationType::Custom("nope".to_string()), 1)
            .on_field("amt")];
        let (results, diagnostics) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.value(&["North"], "Mystery"), Some(0.0));
        assert_eq!(results.value(&["South"], "Mystery"), Some(0.0));
        assert_eq!(
            diagnostics,
            vec![Diagnostic::UnregisteredCustomAggregation {
                id: "nope".to_string(),
                label: "Mystery".to_string(),
            }]
        );
    }

    #[test]
    fn test_same_label_last_spec_wins() {
        let specs = [
            AggregationSpec::new("Value", AggregationType::Sum, 1).on_field("amt"),
            AggregationSpec::new("Value", AggregationType::Max, 1).on_field("amt"),
        ];
        let (results, diagnostics) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.value(&["North"], "Value"), Some(20.0));
        assert_eq!(results.len(), 2);
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(&diagnostics[0], Diagnostic::LabelOverwritten { path, .. } if path == &vec!["North".to_string()]));
    }

    #[test]
    fn test_header_and_footer_filters() {
        let specs = [
            AggregationSpec::new("Top", AggregationType::Count, 1).with_position(DisplayPosition::Header),
            AggregationSpec::new("Bottom", AggregationType::Count, 1),
            AggregationSpec::new("Everywhere", AggregationType::Count, 1).with_position(DisplayPosition::Both),
        ];
        let (results, _) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        let header: Vec<&str> = results.header_results(&["North"]).iter().map(|r| r.label.as_str()).collect();
        let footer: Vec<&str> = results.footer_results(&["North"]).iter().map(|r| r.label.as_str()).collect();
        assert_eq!(header, vec!["Top", "Everywhere"]);
        assert_eq!(footer, vec!["Bottom", "Everywhere"]);
        assert_eq!(results.for_node(&["North"]).len(), 3);
    }

    #[test]
    fn test_formatted_value() {
        let specs = [AggregationSpec::new("Total", AggregationType::Sum, 1)
            .on_field("amt")
            .with_format(FormatSpec::Currency { code: "USD".to_string(), precision: 2 })];
        let (results, _) = run(&sales(), &region(), &specs, &FunctionRegistry::new()).unwrap();
        assert_eq!(results.get(&["North"], "Total").map(|r| r.formatted()), Some("$30.00".to_string()));
    }

    #[test]
    fn test_accumulator_merge_matches_single_pass() {
        let mut left = AggregateAccumulator::new();
        let mut right = AggregateAccumulator::new();
        let mut whole = AggregateAccumulator::new();
        for v in [1.0, 4.0] {
            left.add_number(v);
            whole.add_number(v);
        }
        for v in [-2.0, 9.0, 3.0] {
            right.add_number(v);
            whole.add_number(v);
        }
        left.merge(&right);
        assert_eq!(left, whole);
        assert_eq!(left.average(), 3.0);
    }
}

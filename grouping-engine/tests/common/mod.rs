//! FILENAME: tests/common/mod.rs
//! Fixtures and assertion helpers for grouping-engine integration tests.

#![allow(dead_code)]

use grouping_engine::{AggregationResultMap, GroupNode, GroupTree, Record, RecordIndex};

// ============================================================================
// FIXTURES
// ============================================================================

pub struct SalesFixture;

impl SalesFixture {
    /// (region, product, date, amount)
    pub fn data() -> Vec<(&'static str, &'static str, &'static str, f64)> {
        vec![
            ("North", "Widget", "2024-01-15", 100.0),
            ("North", "Gadget", "2024-02-20", 80.0),
            ("North", "Widget", "2024-04-02", 120.0),
            ("South", "Widget", "2024-01-05", 150.0),
            ("South", "Gadget", "2024-05-30", 110.0),
            ("East", "Gadget", "2024-03-11", 70.0),
            ("East", "Widget", "2024-06-18", 90.0),
            ("East", "Widget", "not a date", 40.0),
        ]
    }

    pub fn records() -> Vec<Record> {
        Self::data()
            .into_iter()
            .map(|(region, product, date, amount)| {
                Record::new()
                    .with("region", region)
                    .with("product", product)
                    .with("date", date)
                    .with("amount", amount)
            })
            .collect()
    }
}

/// The three-record region example.
pub fn region_records() -> Vec<Record> {
    vec![
        Record::new().with("region", "North").with("amt", 10),
        Record::new().with("region", "North").with("amt", 20),
        Record::new().with("region", "South").with("amt", 5),
    ]
}

// ============================================================================
// ASSERTION HELPERS
// ============================================================================

/// Child keys of a node, in build order.
pub fn child_keys(node: &GroupNode) -> Vec<String> {
    node.children.iter().map(|c| c.key.clone()).collect()
}

/// Asserts the leaves partition the record indices `0..tree.record_count`.
pub fn assert_partition(tree: &GroupTree) {
    let mut seen = vec![false; tree.record_count];
    for leaf in tree.leaves() {
        for &idx in &leaf.member_records {
            assert!(!seen[idx], "record {} appears in more than one leaf", idx);
            seen[idx] = true;
        }
    }
    assert!(seen.iter().all(|&s| s), "some records are in no leaf");
}

/// Asserts every interior node's members are exactly its children's members.
pub fn assert_subtree_unions(node: &GroupNode) {
    if node.is_leaf() {
        return;
    }
    let mut union: Vec<RecordIndex> = node
        .children
        .iter()
        .flat_map(|c| c.member_records.iter().copied())
        .collect();
    union.sort_unstable();
    assert_eq!(union, node.member_records, "members of {:?} differ from its children", node.path);
    for child in &node.children {
        assert_subtree_unions(child);
    }
}

/// Asserts a numeric result within a small tolerance.
pub fn assert_value(results: &AggregationResultMap, path: &[&str], label: &str, expected: f64) {
    match results.value(path, label) {
        Some(v) => assert!(
            (v - expected).abs() < 1e-9,
            "{:?}/{} expected {} but got {}",
            path,
            label,
            expected,
            v
        ),
        None => panic!("{:?}/{} expected {} but got no value", path, label, expected),
    }
}

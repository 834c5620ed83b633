//! FILENAME: grouping-engine/src/pivot.rs
//! Pivot Matrix Builder - crosses a row tree with a column tree.
//!
//! Both trees index the same record store. A cell's records are the
//! intersection of its row leaf and column leaf member sets; since member
//! indices are kept sorted, the intersection is a linear merge.

use serde::Serialize;
use tabular::{Record, RecordIndex};

use crate::aggregation::{validate_specs, Aggregator};
use crate::definition::AggregationSpec;
use crate::error::{Diagnostic, GroupingError, Result};
use crate::hierarchy::{GroupNode, GroupTree, HeaderItem};
use crate::registry::FunctionRegistry;

// ============================================================================
// MATRIX TYPES
// ============================================================================

/// One measure at one (row leaf, column leaf) intersection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotCell {
    pub row_path: Vec<String>,
    pub column_path: Vec<String>,
    pub measure_id: String,
    pub value: Option<f64>,
    pub source_value_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PivotAxis {
    Row,
    Column,
}

/// A subtotal: one header node against the whole opposite axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotTotal {
    pub axis: PivotAxis,
    pub path: Vec<String>,
    pub measure_id: String,
    pub value: Option<f64>,
    pub source_value_count: u64,
}

/// The computed pivot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotMatrix {
    /// Flattened row headers (depth-first, root excluded).
    pub row_headers: Vec<HeaderItem>,
    pub column_headers: Vec<HeaderItem>,
    /// Measure ids in declaration order.
    pub measures: Vec<String>,
    /// Leaf paths, one per matrix row.
    pub row_paths: Vec<Vec<String>>,
    /// Leaf paths, one per matrix column.
    pub column_paths: Vec<Vec<String>>,
    /// `cells[row][column * measures.len() + measure]`.
    pub cells: Vec<Vec<PivotCell>>,
    /// Every non-root row node against all columns.
    pub row_totals: Vec<PivotTotal>,
    /// Every non-root column node against all rows.
    pub column_totals: Vec<PivotTotal>,
    /// Root against root, one per measure.
    pub grand_totals: Vec<PivotTotal>,
}

impl PivotMatrix {
    pub fn row_count(&self) -> usize {
        self.row_paths.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_paths.len()
    }

    /// Cell by leaf positions and measure position.
    pub fn cell(&self, row: usize, column: usize, measure: usize) -> Option<&PivotCell> {
        if measure >= self.measures.len() {
            return None;
        }
        self.cells
            .get(row)?
            .get(column * self.measures.len() + measure)
    }

    /// Cell by leaf paths and measure id.
    pub fn find_cell<S: AsRef<str>>(
        &self,
        row_path: &[S],
        column_path: &[S],
        measure_id: &str,
    ) -> Option<&PivotCell> {
        let row = position_of(&self.row_paths, row_path)?;
        let column = position_of(&self.column_paths, column_path)?;
        let measure = self.measures.iter().position(|m| m == measure_id)?;
        self.cell(row, column, measure)
    }

    pub fn row_total<S: AsRef<str>>(&self, path: &[S], measure_id: &str) -> Option<&PivotTotal> {
        find_total(&self.row_totals, path, measure_id)
    }

    pub fn column_total<S: AsRef<str>>(&self, path: &[S], measure_id: &str) -> Option<&PivotTotal> {
        find_total(&self.column_totals, path, measure_id)
    }

    pub fn grand_total(&self, measure_id: &str) -> Option<&PivotTotal> {
        self.grand_totals.iter().find(|t| t.measure_id == measure_id)
    }
}

fn same_path<S: AsRef<str>>(a: &[String], b: &[S]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y.as_ref())
}

fn position_of<S: AsRef<str>>(paths: &[Vec<String>], path: &[S]) -> Option<usize> {
    paths.iter().position(|p| same_path(p, path))
}

fn find_total<'a, S: AsRef<str>>(
    totals: &'a [PivotTotal],
    path: &[S],
    measure_id: &str,
) -> Option<&'a PivotTotal> {
    totals
        .iter()
        .find(|t| t.measure_id == measure_id && same_path(&t.path, path))
}

// ============================================================================
// BUILDER
// ============================================================================

/// Sorted-merge intersection of two ascending index lists.
pub fn intersect_sorted(a: &[RecordIndex], b: &[RecordIndex]) -> Vec<RecordIndex> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Builds the matrix for two trees over `records`.
///
/// Measures are computed per cell over the intersection, whatever their
/// declared target level or scope.
pub fn build_matrix(
    row_tree: &GroupTree,
    column_tree: &GroupTree,
    measures: &[AggregationSpec],
    records: &[Record],
    registry: &FunctionRegistry,
) -> Result<(PivotMatrix, Vec<Diagnostic>)> {
    if row_tree.record_count != column_tree.record_count || row_tree.record_count != records.len() {
        return Err(GroupingError::MismatchedRecordStore {
            rows: row_tree.record_count,
            columns: column_tree.record_count,
        });
    }
    validate_specs(measures)?;

    let mut aggregator = Aggregator::new(records, registry);
    let row_leaves = row_tree.leaves();
    let column_leaves = column_tree.leaves();

    let mut cells = Vec::with_capacity(row_leaves.len());
    for row in &row_leaves {
        let mut line = Vec::with_capacity(column_leaves.len() * measures.len());
        for column in &column_leaves {
            let members = intersect_sorted(&row.member_records, &column.member_records);
            for (i, spec) in measures.iter().enumerate() {
                let acc = aggregator.accumulate(spec, members.iter().copied());
                let (value, source_value_count) = aggregator.finish(i, spec, &acc);
                line.push(PivotCell {
                    row_path: row.path.clone(),
                    column_path: column.path.clone(),
                    measure_id: spec.label.clone(),
                    value,
                    source_value_count,
                });
            }
        }
        cells.push(line);
    }

    let row_totals = axis_totals(&mut aggregator, &row_tree.root, PivotAxis::Row, measures);
    let column_totals = axis_totals(&mut aggregator, &column_tree.root, PivotAxis::Column, measures);

    let all: Vec<RecordIndex> = (0..records.len()).collect();
    let grand_totals = measures
        .iter()
        .enumerate()
        .map(|(i, spec)| total(&mut aggregator, i, spec, PivotAxis::Row, Vec::new(), &all))
        .collect();

    let matrix = PivotMatrix {
        row_headers: row_tree.flatten(),
        column_headers: column_tree.flatten(),
        measures: measures.iter().map(|m| m.label.clone()).collect(),
        row_paths: row_leaves.iter().map(|n| n.path.clone()).collect(),
        column_paths: column_leaves.iter().map(|n| n.path.clone()).collect(),
        cells,
        row_totals,
        column_totals,
        grand_totals,
    };
    log::debug!(
        "built pivot matrix: {} rows x {} columns x {} measures",
        matrix.row_count(),
        matrix.column_count(),
        matrix.measures.len()
    );

    Ok((matrix, aggregator.into_diagnostics()))
}

/// Subtotals of every non-root node of one axis. The opposite root holds
/// every record, so a node's own members are its intersection with it.
fn axis_totals(
    aggregator: &mut Aggregator<'_>,
    root: &GroupNode,
    axis: PivotAxis,
    measures: &[AggregationSpec],
) -> Vec<PivotTotal> {
    let mut nodes: Vec<&GroupNode> = Vec::new();
    root.walk(&mut |node| {
        if !node.is_root() {
            nodes.push(node);
        }
    });

    let mut totals = Vec::with_capacity(nodes.len() * measures.len());
    for node in nodes {
        for (i, spec) in measures.iter().enumerate() {
            totals.push(total(aggregator, i, spec, axis, node.path.clone(), &node.member_records));
        }
    }
    totals
}

fn total(
    aggregator: &mut Aggregator<'_>,
    spec_index: usize,
    spec: &AggregationSpec,
    axis: PivotAxis,
    path: Vec<String>,
    members: &[RecordIndex],
) -> PivotTotal {
    let acc = aggregator.accumulate(spec, members.iter().copied());
    let (value, source_value_count) = aggregator.finish(spec_index, spec, &acc);
    PivotTotal {
        axis,
        path,
        measure_id: spec.label.clone(),
        value,
        source_value_count,
    }
}

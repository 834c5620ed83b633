//! FILENAME: grouping-engine/src/engine.rs
//! Grouping Engine - entry points tying the stages together.
//!
//! Algorithm:
//! 1. Resolve column declarations into ordered levels (fails fast)
//! 2. Validate aggregation specs (fails fast)
//! 3. Build the group tree(s)
//! 4. Evaluate aggregations, or build the pivot matrix
//!
//! Every run is a pure function of its inputs and the registry contents.

use serde::Serialize;
use tabular::{Record, RecordIndex};

use crate::aggregation::{evaluate, validate_specs, AggregationResultMap};
use crate::definition::{GroupingDefinition, PivotDefinition};
use crate::error::{Diagnostic, Result};
use crate::hierarchy::{build_tree, GroupTree};
use crate::pivot::{build_matrix, PivotMatrix};
use crate::registry::FunctionRegistry;
use crate::resolver::resolve_levels;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Output of a single-hierarchy run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingResult {
    pub tree: GroupTree,
    pub results: AggregationResultMap,
    /// Recoverable conditions met during the run.
    pub diagnostics: Vec<Diagnostic>,
}

/// Output of a pivot run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotResult {
    pub row_tree: GroupTree,
    pub column_tree: GroupTree,
    pub matrix: PivotMatrix,
    pub diagnostics: Vec<Diagnostic>,
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Groups `records` and evaluates the definition's aggregations, using the
/// global function registry.
pub fn process(definition: &GroupingDefinition, records: &[Record]) -> Result<GroupingResult> {
    process_with_registry(definition, records, FunctionRegistry::global())
}

/// Same as [`process`] with an explicit registry.
pub fn process_with_registry(
    definition: &GroupingDefinition,
    records: &[Record],
    registry: &FunctionRegistry,
) -> Result<GroupingResult> {
    let levels = resolve_levels(&definition.columns, &definition.options, registry)?;
    validate_specs(&definition.aggregations)?;

    let (tree, mut diagnostics) = build_tree(records, &levels, &definition.options, registry);
    let (results, evaluation_diagnostics) = evaluate(&tree, &definition.aggregations, records, registry)?;
    diagnostics.extend(evaluation_diagnostics);

    log::debug!(
        "grouping run: {} records, {} nodes, {} results, {} diagnostics",
        records.len(),
        tree.node_count(),
        results.len(),
        diagnostics.len()
    );

    Ok(GroupingResult {
        tree,
        results,
        diagnostics,
    })
}

/// Builds both hierarchies and the matrix of measures, using the global
/// function registry.
pub fn calculate_pivot(definition: &PivotDefinition, records: &[Record]) -> Result<PivotResult> {
    calculate_pivot_with_registry(definition, records, FunctionRegistry::global())
}

/// Same as [`calculate_pivot`] with an explicit registry.
pub fn calculate_pivot_with_registry(
    definition: &PivotDefinition,
    records: &[Record],
    registry: &FunctionRegistry,
) -> Result<PivotResult> {
    let row_levels = resolve_levels(&definition.row_groups, &definition.options, registry)?;
    let column_levels = resolve_levels(&definition.column_groups, &definition.options, registry)?;
    validate_specs(&definition.measures)?;

    let (row_tree, mut diagnostics) = build_tree(records, &row_levels, &definition.options, registry);
    let (column_tree, column_diagnostics) = build_tree(records, &column_levels, &definition.options, registry);
    diagnostics.extend(column_diagnostics);

    let (matrix, matrix_diagnostics) =
        build_matrix(&row_tree, &column_tree, &definition.measures, records, registry)?;
    diagnostics.extend(matrix_diagnostics);

    Ok(PivotResult {
        row_tree,
        column_tree,
        matrix,
        diagnostics,
    })
}

/// Record indices of the node at `path`, or `None` if no such node exists.
pub fn drill_down<'t, S: AsRef<str>>(tree: &'t GroupTree, path: &[S]) -> Option<&'t [RecordIndex]> {
    tree.drill_down(path)
}

//! FILENAME: grouping-engine/src/lib.rs
//! Hierarchical grouping and aggregation over flat record sets.
//!
//! Depends on `tabular` for the shared record, value and format types.
//!
//! Layers:
//! - `definition`: Serializable configuration (what to group and compute)
//! - `resolver`: Turns column declarations into ordered levels
//! - `hierarchy`: Builds the group tree
//! - `aggregation`: Attaches computed values to tree nodes
//! - `pivot`: Crosses two trees into a matrix of measures
//! - `engine`: Entry points running the whole pipeline

pub mod aggregation;
pub mod condition;
pub mod definition;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod pivot;
pub mod registry;
pub mod resolver;

pub use aggregation::{evaluate, validate_specs, AggregateAccumulator, AggregationResult, AggregationResultMap};
pub use condition::{ComparisonOperator, Condition, TextOperator};
pub use definition::*;
pub use engine::{
    calculate_pivot, calculate_pivot_with_registry, drill_down, process, process_with_registry,
    GroupingResult, PivotResult,
};
pub use error::{Diagnostic, GroupingError, Result};
pub use hierarchy::{build_tree, numeric_range_key, time_period_key, GroupNode, GroupTree, HeaderItem, HierarchyBuilder};
pub use pivot::{build_matrix, intersect_sorted, PivotAxis, PivotCell, PivotMatrix, PivotTotal};
pub use registry::{register_aggregation_function, register_group_function, FunctionRegistry};
pub use resolver::resolve_levels;

pub use tabular::{format_value, FormatSpec, Record, RecordIndex, Value};

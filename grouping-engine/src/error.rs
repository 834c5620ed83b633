//! FILENAME: grouping-engine/src/error.rs

use serde::Serialize;
use thiserror::Error;

use crate::definition::Level;

/// Validation failures. All of them are raised before any record is
/// processed, so a failed run never yields partial output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GroupingError {
    #[error("Conflicting group functions on level {level}: {first} vs {second}")]
    ConflictingGroupFunction {
        level: Level,
        first: String,
        second: String,
    },

    #[error("Unknown group function: {0}")]
    UnknownGroupFunction(String),

    #[error("Invalid condition in aggregation '{label}': {reason}")]
    InvalidCondition { label: String, reason: String },

    #[error("Invalid grouping level {level} on field '{field}': levels start at 1")]
    InvalidLevel { field: String, level: Level },

    #[error("Invalid numeric range on level {level}: min={min}, step={step}")]
    InvalidNumericRange { level: Level, min: f64, step: f64 },

    #[error("Aggregation '{0}' requires a source field")]
    MissingSourceField(String),

    /// For a single tree, `rows` is the tree's record count and `columns`
    /// the length of the record slice it was paired with.
    #[error("Group trees and records cover different record stores ({rows} vs {columns} records)")]
    MismatchedRecordStore { rows: usize, columns: usize },
}

pub type Result<T> = std::result::Result<T, GroupingError>;

/// Recoverable conditions met during a run. The run continues and the
/// affected values are degraded rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Diagnostic {
    /// A `Custom` aggregation named a function that is not registered.
    /// The value was substituted with 0.
    UnregisteredCustomAggregation { id: String, label: String },

    /// Two aggregation specs attached the same label to the same node.
    /// The later spec in declaration order replaced the earlier value.
    LabelOverwritten { path: Vec<String>, label: String },

    /// A custom group function left records without a bucket. They were
    /// collected under the missing-value sentinel.
    UnassignedRecords { level: Level, id: String, count: usize },
}

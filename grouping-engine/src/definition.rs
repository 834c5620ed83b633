//! FILENAME: grouping-engine/src/definition.rs
//! Grouping Definition - The serializable configuration.
//!
//! This module contains all the types needed to DESCRIBE a grouping run.
//! These structures are designed to be:
//! - Serializable (callers load them from JSON alongside the records)
//! - Immutable snapshots of user intent
//! - Resolved once into `GroupingLevel`s before any record is touched

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tabular::{FormatSpec, Value};

use crate::condition::Condition;

/// Grouping pass number as declared by the caller. 1 is the outermost pass;
/// 0 is reserved for the synthetic root.
pub type Level = u32;

/// Free-form parameters handed to a custom group function.
pub type GroupParams = BTreeMap<String, Value>;

// ============================================================================
// GROUPING FUNCTIONS
// ============================================================================

/// Calendar unit for time-period bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Year,
    Quarter,
    Month,
    Week,
}

/// How records are turned into group keys on one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupFunction {
    /// Field values as display strings, joined with the level separator.
    ByField,
    /// Like `ByField`, but a level template shapes the key.
    MultiFieldComposite,
    /// Equal-width numeric buckets starting at `min`.
    NumericRange { min: f64, step: f64 },
    /// Dates truncated to a calendar unit.
    TimePeriod { unit: TimeUnit },
    /// A function registered under `id`.
    Custom {
        id: String,
        #[serde(default)]
        params: GroupParams,
    },
}

impl Default for GroupFunction {
    fn default() -> Self {
        GroupFunction::ByField
    }
}

impl fmt::Display for GroupFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupFunction::ByField => f.write_str("ByField"),
            GroupFunction::MultiFieldComposite => f.write_str("MultiFieldComposite"),
            GroupFunction::NumericRange { min, step } => {
                write!(f, "NumericRange(min={}, step={})", min, step)
            }
            GroupFunction::TimePeriod { unit } => write!(f, "TimePeriod({:?})", unit),
            GroupFunction::Custom { id, .. } => write!(f, "Custom({})", id),
        }
    }
}

/// Order of sibling groups within a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
    /// First-seen order of keys in the record store.
    DataSourceOrder,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::DataSourceOrder
    }
}

// ============================================================================
// COLUMN GROUPING DECLARATIONS
// ============================================================================

/// A grouping declaration attached to one column.
///
/// Several columns may declare the same `level`; the resolver merges them
/// into a single composite-key pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnGrouping {
    /// Field (column) name in the records.
    pub field: String,

    /// Grouping pass this column takes part in.
    pub level: Level,

    #[serde(default)]
    pub function: GroupFunction,

    /// Display template with `{field}` placeholders.
    #[serde(default)]
    pub template: Option<String>,

    /// Separator joining field values of a composite key.
    #[serde(default)]
    pub separator: Option<String>,

    #[serde(default)]
    pub sort: Option<SortOrder>,
}

impl ColumnGrouping {
    pub fn new(field: impl Into<String>, level: Level) -> Self {
        ColumnGrouping {
            field: field.into(),
            level,
            function: GroupFunction::ByField,
            template: None,
            separator: None,
            sort: None,
        }
    }

    pub fn with_function(mut self, function: GroupFunction) -> Self {
        self.function = function;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// A resolved grouping pass: one or more fields sharing a level number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingLevel {
    pub level: Level,
    pub fields: Vec<String>,
    pub function: GroupFunction,
    pub template: Option<String>,
    pub separator: String,
    pub sort: SortOrder,
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationType {
    Sum,
    Count,
    #[serde(alias = "Avg")]
    Average,
    Min,
    Max,
    /// A function registered under this id, applied to the numeric values.
    Custom(String),
}

impl Default for AggregationType {
    fn default() -> Self {
        AggregationType::Sum
    }
}

impl AggregationType {
    /// Only `Count` can run without a source field.
    pub fn requires_source_field(&self) -> bool {
        !matches!(self, AggregationType::Count)
    }
}

/// Which tree node(s) an aggregation result attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationScope {
    /// Only nodes whose level equals the target level.
    ExactLevel,
    /// Nodes at the target level, over everything beneath them.
    IncludeSubgroups,
    /// One value over every node of the target level (or every record
    /// when the target level is 0).
    CrossAllGroups,
}

impl Default for AggregationScope {
    fn default() -> Self {
        AggregationScope::ExactLevel
    }
}

/// Where a UI should show the value relative to its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayPosition {
    Header,
    Footer,
    Both,
}

impl Default for DisplayPosition {
    fn default() -> Self {
        DisplayPosition::Footer
    }
}

impl DisplayPosition {
    pub fn in_header(self) -> bool {
        matches!(self, DisplayPosition::Header | DisplayPosition::Both)
    }

    pub fn in_footer(self) -> bool {
        matches!(self, DisplayPosition::Footer | DisplayPosition::Both)
    }
}

/// One aggregate to compute, where, and how to present it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Display label, also the result key together with the node path.
    pub label: String,

    pub aggregation: AggregationType,

    /// Field whose values are aggregated. Required except for `Count`.
    #[serde(default)]
    pub source_field: Option<String>,

    /// Level at which the value is computed (0 = root / all records).
    #[serde(default)]
    pub target_level: Level,

    #[serde(default)]
    pub scope: AggregationScope,

    /// Only records satisfying this predicate take part.
    #[serde(default)]
    pub condition: Option<Condition>,

    #[serde(default)]
    pub display_position: DisplayPosition,

    #[serde(default)]
    pub format: Option<FormatSpec>,
}

impl AggregationSpec {
    pub fn new(label: impl Into<String>, aggregation: AggregationType, target_level: Level) -> Self {
        AggregationSpec {
            label: label.into(),
            aggregation,
            source_field: None,
            target_level,
            scope: AggregationScope::ExactLevel,
            condition: None,
            display_position: DisplayPosition::Footer,
            format: None,
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.source_field = Some(field.into());
        self
    }

    pub fn with_scope(mut self, scope: AggregationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_position(mut self, position: DisplayPosition) -> Self {
        self.display_position = position;
        self
    }

    pub fn with_format(mut self, format: FormatSpec) -> Self {
        self.format = Some(format);
        self
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Labels and defaults used while building keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Stands in for a missing field value in a group key.
    pub missing_sentinel: String,

    /// Separator for composite keys when a level declares none.
    pub default_separator: String,

    /// Bucket for values outside a numeric range (below min or non-numeric).
    pub other_label: String,

    /// Bucket for values that do not parse as dates.
    pub unparsed_label: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            missing_sentinel: "N/A".to_string(),
            default_separator: " + ".to_string(),
            other_label: "Other".to_string(),
            unparsed_label: "Unparsed".to_string(),
        }
    }
}

// ============================================================================
// MAIN DEFINITION STRUCTS
// ============================================================================

/// A complete single-hierarchy run: grouping columns plus aggregations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingDefinition {
    pub columns: Vec<ColumnGrouping>,

    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,

    #[serde(default)]
    pub options: EngineOptions,
}

/// A pivot run: two independent hierarchies and the measures per cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotDefinition {
    /// Row hierarchy (ordered from outer to inner by level).
    pub row_groups: Vec<ColumnGrouping>,

    /// Column hierarchy (ordered from outer to inner by level).
    pub column_groups: Vec<ColumnGrouping>,

    /// Measures computed for every cell; `label` is the measure id.
    pub measures: Vec<AggregationSpec>,

    #[serde(default)]
    pub options: EngineOptions,
}

//! FILENAME: grouping-engine/src/resolver.rs
//! Grouping Spec Resolver - turns per-column declarations into ordered passes.
//!
//! Columns declaring the same level are merged into one composite-key pass.
//! All checks run here so that no record is touched by an invalid plan.

use std::collections::BTreeMap;

use crate::definition::{
    ColumnGrouping, EngineOptions, GroupFunction, GroupingLevel, Level, SortOrder,
};
use crate::error::{GroupingError, Result};
use crate::registry::FunctionRegistry;

/// Resolves column declarations into levels sorted by level number.
///
/// Gaps are allowed: levels 1 and 3 become the first and second pass. On a
/// shared level the first explicitly declared template, separator and sort
/// win.
pub fn resolve_levels(
    columns: &[ColumnGrouping],
    options: &EngineOptions,
    registry: &FunctionRegistry,
) -> Result<Vec<GroupingLevel>> {
    let mut by_level: BTreeMap<Level, GroupingLevel> = BTreeMap::new();
    // Explicit separator and sort per level; defaults apply only when no
    // column on the level declares one.
    let mut declared: BTreeMap<Level, (Option<String>, Option<SortOrder>)> = BTreeMap::new();

    for column in columns {
        if column.level == 0 {
            return Err(GroupingError::InvalidLevel {
                field: column.field.clone(),
                level: column.level,
            });
        }

        match by_level.get_mut(&column.level) {
            Some(existing) => {
                if existing.function != column.function {
                    return Err(GroupingError::ConflictingGroupFunction {
                        level: column.level,
                        first: existing.function.to_string(),
                        second: column.function.to_string(),
                    });
                }
                if !existing.fields.contains(&column.field) {
                    existing.fields.push(column.field.clone());
                }
                if existing.template.is_none() {
                    existing.template = column.template.clone();
                }
                let (separator, sort) = declared.entry(column.level).or_default();
                if separator.is_none() {
                    *separator = column.separator.clone();
                }
                if sort.is_none() {
                    *sort = column.sort;
                }
            }
            None => {
                validate_function(column.level, &column.function, registry)?;
                declared.insert(column.level, (column.separator.clone(), column.sort));
                by_level.insert(
                    column.level,
                    GroupingLevel {
                        level: column.level,
                        fields: vec![column.field.clone()],
                        function: column.function.clone(),
                        template: column.template.clone(),
                        separator: options.default_separator.clone(),
                        sort: SortOrder::default(),
                    },
                );
            }
        }
    }

    for (level, (separator, sort)) in declared {
        if let Some(resolved) = by_level.get_mut(&level) {
            if let Some(separator) = separator {
                resolved.separator = separator;
            }
            if let Some(sort) = sort {
                resolved.sort = sort;
            }
        }
    }

    let levels: Vec<GroupingLevel> = by_level.into_values().collect();
    log::debug!(
        "resolved {} grouping columns into {} levels {:?}",
        columns.len(),
        levels.len(),
        levels.iter().map(|l| l.level).collect::<Vec<_>>()
    );
    Ok(levels)
}

fn validate_function(level: Level, function: &GroupFunction, registry: &FunctionRegistry) -> Result<()> {
    match function {
        GroupFunction::NumericRange { min, step } => {
            if !min.is_finite() || !step.is_finite() || *step <= 0.0 {
                return Err(GroupingError::InvalidNumericRange {
                    level,
                    min: *min,
                    step: *step,
                });
            }
            Ok(())
        }
        GroupFunction::Custom { id, .. } => {
            if registry.has_group_function(id) {
                Ok(())
            } else {
                Err(GroupingError::UnknownGroupFunction(id.clone()))
            }
        }
        _ => Ok(()),
    }
}

//! FILENAME: grouping-engine/src/condition.rs
//! Record predicates for conditional aggregation.
//!
//! Conditions are data, not code: a tree of comparisons combined with
//! And/Or/Not. They are validated once before bulk computation and then
//! evaluated per record with no side effects.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tabular::{Record, Value};

/// Comparison operators for number, date and text operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    NotBetween,
}

impl ComparisonOperator {
    fn is_range(self) -> bool {
        matches!(self, ComparisonOperator::Between | ComparisonOperator::NotBetween)
    }

    fn is_ordering(self) -> bool {
        !matches!(self, ComparisonOperator::Equals | ComparisonOperator::NotEquals)
    }
}

/// Text operators, applied to the display string of the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    BeginsWith,
    EndsWith,
}

/// A predicate over a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Compare {
        field: String,
        operator: ComparisonOperator,
        value: Value,
        /// Upper bound for Between/NotBetween.
        #[serde(default)]
        value2: Option<Value>,
    },
    Text {
        field: String,
        operator: TextOperator,
        value: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    IsEmpty {
        field: String,
    },
    IsNotEmpty {
        field: String,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(field: impl Into<String>, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            field: field.into(),
            operator,
            value: value.into(),
            value2: None,
        }
    }

    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Condition::Compare {
            field: field.into(),
            operator: ComparisonOperator::Between,
            value: low.into(),
            value2: Some(high.into()),
        }
    }

    pub fn text(field: impl Into<String>, operator: TextOperator, value: impl Into<String>) -> Self {
        Condition::Text {
            field: field.into(),
            operator,
            value: value.into(),
            case_sensitive: false,
        }
    }

    /// Checks the predicate is well formed. Returns the reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Condition::Compare {
                field,
                operator,
                value,
                value2,
            } => {
                check_field(field)?;
                if operator.is_ordering() {
                    check_ordered_operand(value)?;
                }
                if let Value::Number(n) = value {
                    if !n.is_finite() {
                        return Err(format!("non-finite operand for '{}'", field));
                    }
                }
                if operator.is_range() {
                    let upper = value2
                        .as_ref()
                        .ok_or_else(|| format!("{:?} on '{}' needs an upper bound", operator, field))?;
                    check_ordered_operand(upper)?;
                    if std::mem::discriminant(value) != std::mem::discriminant(upper) {
                        return Err(format!("range bounds on '{}' have different types", field));
                    }
                    if value.compare(upper) == Ordering::Greater {
                        return Err(format!("range on '{}' has lower bound above upper bound", field));
                    }
                }
                Ok(())
            }
            Condition::Text { field, .. }
            | Condition::IsEmpty { field }
            | Condition::IsNotEmpty { field } => check_field(field),
            Condition::And(parts) | Condition::Or(parts) => {
                if parts.is_empty() {
                    return Err("empty condition group".to_string());
                }
                parts.iter().try_for_each(Condition::validate)
            }
            Condition::Not(inner) => inner.validate(),
        }
    }

    /// Evaluates the predicate. Operands that cannot be compared with the
    /// field value make the comparison false.
    pub fn evaluate(&self, record: &Record) -> bool {
        match self {
            Condition::Compare {
                field,
                operator,
                value,
                value2,
            } => {
                let actual = record.value(field);
                match operator {
                    ComparisonOperator::Equals => values_equal(actual, value),
                    ComparisonOperator::NotEquals => !values_equal(actual, value),
                    ComparisonOperator::GreaterThan => {
                        compare_operand(actual, value) == Some(Ordering::Greater)
                    }
                    ComparisonOperator::GreaterThanOrEqual => matches!(
                        compare_operand(actual, value),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    ComparisonOperator::LessThan => {
                        compare_operand(actual, value) == Some(Ordering::Less)
                    }
                    ComparisonOperator::LessThanOrEqual => matches!(
                        compare_operand(actual, value),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    ComparisonOperator::Between | ComparisonOperator::NotBetween => {
                        let upper = match value2 {
                            Some(v) => v,
                            None => return false,
                        };
                        let within = match (compare_operand(actual, value), compare_operand(actual, upper)) {
                            (Some(lo), Some(hi)) => lo != Ordering::Less && hi != Ordering::Greater,
                            _ => return false,
                        };
                        if *operator == ComparisonOperator::Between {
                            within
                        } else {
                            !within
                        }
                    }
                }
            }
            Condition::Text {
                field,
                operator,
                value,
                case_sensitive,
            } => {
                let actual = record.value(field).display_string().unwrap_or_default();
                let (actual, expected) = if *case_sensitive {
                    (actual, value.clone())
                } else {
                    (actual.to_lowercase(), value.to_lowercase())
                };
                match operator {
                    TextOperator::Equals => actual == expected,
                    TextOperator::NotEquals => actual != expected,
                    TextOperator::Contains => actual.contains(&expected),
                    TextOperator::NotContains => !actual.contains(&expected),
                    TextOperator::BeginsWith => actual.starts_with(&expected),
                    TextOperator::EndsWith => actual.ends_with(&expected),
                }
            }
            Condition::IsEmpty { field } => is_blank(record.value(field)),
            Condition::IsNotEmpty { field } => !is_blank(record.value(field)),
            Condition::And(parts) => parts.iter().all(|c| c.evaluate(record)),
            Condition::Or(parts) => parts.iter().any(|c| c.evaluate(record)),
            Condition::Not(inner) => !inner.evaluate(record),
        }
    }
}

fn check_field(field: &str) -> Result<(), String> {
    if field.trim().is_empty() {
        Err("condition references an empty field name".to_string())
    } else {
        Ok(())
    }
}

fn check_ordered_operand(value: &Value) -> Result<(), String> {
    match value {
        Value::Number(_) | Value::Date(_) | Value::Text(_) => Ok(()),
        other => Err(format!("operand {:?} cannot be ordered", other)),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Empty => true,
        Value::Text(s) => s.is_empty(),
        _ => false,
    }
}

/// Equality in the operand's domain: numbers compare numerically, dates as
/// dates, text by display string.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Empty => is_blank(actual),
        Value::Boolean(b) => matches!(actual, Value::Boolean(a) if a == b),
        _ => compare_operand(actual, expected) == Some(Ordering::Equal),
    }
}

fn compare_operand(actual: &Value, operand: &Value) -> Option<Ordering> {
    match operand {
        Value::Number(n) => actual.as_number()?.partial_cmp(n),
        Value::Date(d) => Some(actual.as_date()?.cmp(d)),
        Value::Text(s) => Some(actual.display_string()?.as_str().cmp(s.as_str())),
        _ => None,
    }
}

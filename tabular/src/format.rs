//! FILENAME: tabular/src/format.rs
//! PURPOSE: Converts aggregate values to display strings.
//! CONTEXT: Pure and stateless. Has no bearing on aggregation correctness;
//! it only fixes the textual output contract of computed values.

use serde::{Deserialize, Serialize};

/// How an aggregate value should be rendered.
///
/// Deserialized from `{"kind": "Currency", "code": "USD", "precision": 2}`.
/// Unrecognised kinds deserialize to `Plain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FormatSpec {
    Number {
        #[serde(default)]
        precision: u8,
        #[serde(default)]
        thousands_separator: bool,
    },
    Currency {
        code: String,
        #[serde(default = "default_currency_precision")]
        precision: u8,
    },
    Percentage {
        #[serde(default)]
        precision: u8,
    },
    #[serde(other)]
    Plain,
}

fn default_currency_precision() -> u8 {
    2
}

impl Default for FormatSpec {
    fn default() -> Self {
        FormatSpec::Plain
    }
}

/// Position of a currency symbol relative to the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolPosition {
    Before,
    After,
}

/// Formats an aggregate value. A null value renders as the empty string and
/// a non-finite one (an overflowed sum, say) falls back to plain conversion.
pub fn format_value(value: Option<f64>, spec: &FormatSpec) -> String {
    let value = match value {
        Some(v) if v.is_finite() => v,
        Some(v) => return format_general(v),
        None => return String::new(),
    };

    match spec {
        FormatSpec::Number {
            precision,
            thousands_separator,
        } => {
            let digits = fixed(value, *precision);
            if *thousands_separator {
                add_thousands_separator(&digits)
            } else {
                digits
            }
        }
        FormatSpec::Currency { code, precision } => {
            let (symbol, position) = currency_symbol(code);
            let amount = add_thousands_separator(&fixed(value.abs(), *precision));
            let amount = match position {
                SymbolPosition::Before => format!("{}{}", symbol, amount),
                SymbolPosition::After => format!("{}{}", amount, symbol),
            };
            // Accounting style: negatives in parentheses
            if value < 0.0 {
                format!("({})", amount)
            } else {
                amount
            }
        }
        FormatSpec::Percentage { precision } => format!("{}%", fixed(value * 100.0, *precision)),
        FormatSpec::Plain => format_general(value),
    }
}

/// Plain conversion: integers without a decimal point, other values with
/// trailing zeros trimmed.
fn format_general(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{:.0}", value);
    }

    let formatted = format!("{:.10}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn fixed(value: f64, precision: u8) -> String {
    format!("{:.*}", precision as usize, value)
}

/// Inserts a comma every three digits of the integer part of a plain
/// decimal string such as `-1234.50`.
fn add_thousands_separator(s: &str) -> String {
    let (sign, unsigned) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s),
    };
    let (integer, fraction) = match unsigned.find('.') {
        Some(dot) => unsigned.split_at(dot),
        None => (unsigned, ""),
    };

    let mut grouped = String::with_capacity(s.len() + integer.len() / 3);
    grouped.push_str(sign);
    for (i, c) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(fraction);
    grouped
}

fn currency_symbol(code: &str) -> (String, SymbolPosition) {
    match code.to_ascii_uppercase().as_str() {
        "USD" => ("$".to_string(), SymbolPosition::Before),
        "EUR" => ("€".to_string(), SymbolPosition::Before),
        "GBP" => ("£".to_string(), SymbolPosition::Before),
        "JPY" | "CNY" => ("¥".to_string(), SymbolPosition::Before),
        "SEK" | "NOK" | "DKK" => (" kr".to_string(), SymbolPosition::After),
        other => (format!("{} ", other), SymbolPosition::Before),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_general() {
        assert_eq!(format_general(0.0), "0");
        assert_eq!(format_general(42.0), "42");
        assert_eq!(format_general(3.14159), "3.14159");
        assert_eq!(format_general(-7.5), "-7.5");
    }

    #[test]
    fn test_format_number() {
        let spec = FormatSpec::Number { precision: 2, thousands_separator: true };
        assert_eq!(format_value(Some(1234.567), &spec), "1,234.57");
        let spec = FormatSpec::Number { precision: 0, thousands_separator: false };
        assert_eq!(format_value(Some(1234567.0), &spec), "1234567");
    }

    #[test]
    fn test_format_currency() {
        let usd = FormatSpec::Currency { code: "USD".to_string(), precision: 2 };
        assert_eq!(format_value(Some(1234.56), &usd), "$1,234.56");
        assert_eq!(format_value(Some(-1234.56), &usd), "($1,234.56)");
        let sek = FormatSpec::Currency { code: "sek".to_string(), precision: 0 };
        assert_eq!(format_value(Some(1500.0), &sek), "1,500 kr");
        let chf = FormatSpec::Currency { code: "CHF".to_string(), precision: 1 };
        assert_eq!(format_value(Some(3.0), &chf), "CHF 3.0");
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_value(Some(0.5), &FormatSpec::Percentage { precision: 0 }), "50%");
        assert_eq!(format_value(Some(0.1234), &FormatSpec::Percentage { precision: 2 }), "12.34%");
    }

    #[test]
    fn test_null_renders_empty() {
        assert_eq!(format_value(None, &FormatSpec::Plain), "");
        assert_eq!(format_value(None, &FormatSpec::Percentage { precision: 1 }), "");
    }

    #[test]
    fn test_thousands_separator() {
        assert_eq!(add_thousands_separator("1234567"), "1,234,567");
        assert_eq!(add_thousands_separator("123"), "123");
        assert_eq!(add_thousands_separator("-1234.56"), "-1,234.56");
    }

    #[test]
    fn test_non_finite_values_render_plain() {
        let grouped = FormatSpec::Number { precision: 2, thousands_separator: true };
        let usd = FormatSpec::Currency { code: "USD".to_string(), precision: 2 };
        assert_eq!(format_value(Some(f64::INFINITY), &grouped), "inf");
        assert_eq!(format_value(Some(f64::INFINITY), &usd), "inf");
        assert_eq!(format_value(Some(f64::NEG_INFINITY), &usd), "-inf");
        assert_eq!(format_value(Some(f64::NAN), &FormatSpec::Percentage { precision: 1 }), "NaN");
    }

    #[test]
    fn test_unknown_kind_falls_back_to_plain() {
        let spec: FormatSpec = serde_json::from_str(r#"{"kind":"Scientific","precision":3}"#).unwrap();
        assert_eq!(spec, FormatSpec::Plain);
        assert_eq!(format_value(Some(12.0), &spec), "12");

        let spec: FormatSpec = serde_json::from_str(r#"{"kind":"Currency","code":"EUR"}"#).unwrap();
        assert_eq!(format_value(Some(9.5), &spec), "€9.50");
    }
}

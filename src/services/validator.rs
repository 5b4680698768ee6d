//! Cell value validation.
//!
//! Pure and synchronous. Declared type names are reduced to a coarse
//! [`TypeClass`] by case-insensitive substring match, so `VARCHAR(40)`,
//! `character varying` and `TEXT` all land in [`TypeClass::Text`].

use crate::models::{CellChange, ColumnInfo};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok()
});

const BOOLEAN_TOKENS: [&str; 6] = ["true", "false", "1", "0", "t", "f"];
const TRUTHY_TOKENS: [&str; 5] = ["true", "1", "t", "yes", "on"];

/// Coarse classification of a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// `int`, `serial` and friends.
    Integer,
    /// `float`, `double`, `real`.
    Float,
    /// `decimal`, `numeric`.
    Decimal,
    /// `bool`, `boolean`.
    Boolean,
    /// `datetime`, `timestamp`.
    DateTime,
    /// `date`.
    Date,
    /// `time`.
    Time,
    /// `json`, `jsonb`.
    Json,
    /// `uuid`.
    Uuid,
    /// Any type whose name mentions `email`.
    Email,
    /// Everything else.
    Text,
}

impl TypeClass {
    /// Classifies a declared type name. First match wins.
    #[must_use]
    pub fn of(data_type: &str) -> Self {
        let t = data_type.to_lowercase();
        if t.contains("int") || t.contains("serial") {
            Self::Integer
        } else if t.contains("float") || t.contains("double") || t.contains("real") {
            Self::Float
        } else if t.contains("decimal") || t.contains("numeric") {
            Self::Decimal
        } else if t.contains("bool") {
            Self::Boolean
        } else if t.contains("timestamp") || (t.contains("date") && t.contains("time")) {
            Self::DateTime
        } else if t.contains("date") {
            Self::Date
        } else if t.contains("time") {
            Self::Time
        } else if t.contains("json") {
            Self::Json
        } else if t.contains("uuid") {
            Self::Uuid
        } else if t.contains("email") {
            Self::Email
        } else {
            Self::Text
        }
    }
}

/// Textual form of a value; `None` for null.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Validates a proposed change against its column.
///
/// Returns every reason the value is unacceptable; an empty list means
/// valid. A blank value against a NOT NULL column yields exactly one error
/// and skips the remaining checks.
#[must_use]
pub fn validate_cell_change(change: &CellChange, column: &ColumnInfo) -> Vec<String> {
    let mut errors = Vec::new();

    if is_blank(&change.new_value) {
        if !column.nullable {
            errors.push(format!("Column '{}' cannot be null", change.column));
        }
        return errors;
    }

    errors.extend(type_errors(&change.new_value, column));

    if let (Some(max), Some(text)) = (column.max_length, text_of(&change.new_value)) {
        let len = text.chars().count();
        if len > max as usize {
            errors.push(format!("Value length ({len}) exceeds maximum ({max})"));
        }
    }

    errors
}

fn type_errors(value: &Value, column: &ColumnInfo) -> Vec<String> {
    let data_type = column.data_type.as_str();
    let invalid = |reason: &dyn std::fmt::Display| vec![format!("Invalid {data_type}: {reason}")];
    let Some(text) = text_of(value) else {
        return Vec::new();
    };

    match TypeClass::of(data_type) {
        TypeClass::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Vec::new(),
            Value::Number(n) if n.as_f64().is_some_and(|f| f.fract() == 0.0) => Vec::new(),
            Value::Number(_) => invalid(&"not an integer"),
            _ => match text.trim().parse::<i64>() {
                Ok(_) => Vec::new(),
                Err(e) => invalid(&e),
            },
        },
        TypeClass::Float => match value {
            Value::Number(_) => Vec::new(),
            _ => match text.trim().parse::<f64>() {
                Ok(_) => Vec::new(),
                Err(e) => invalid(&e),
            },
        },
        TypeClass::Decimal => decimal_errors(text.trim(), column).unwrap_or_else(|e| invalid(&e)),
        TypeClass::Boolean => match value {
            Value::Bool(_) => Vec::new(),
            _ if BOOLEAN_TOKENS.contains(&text.to_lowercase().as_str()) => Vec::new(),
            _ => vec!["Invalid boolean value".to_string()],
        },
        TypeClass::DateTime => match parse_datetime(text.trim()) {
            Ok(()) => Vec::new(),
            Err(e) => invalid(&e),
        },
        TypeClass::Date => match NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
            Ok(_) => Vec::new(),
            Err(e) => invalid(&e),
        },
        TypeClass::Time => match NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f") {
            Ok(_) => Vec::new(),
            Err(e) => invalid(&e),
        },
        TypeClass::Json => match value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(_) => Vec::new(),
                Err(e) => invalid(&e),
            },
            _ => Vec::new(),
        },
        TypeClass::Uuid => match uuid::Uuid::parse_str(text.trim()) {
            Ok(_) => Vec::new(),
            Err(e) => invalid(&e),
        },
        TypeClass::Email => {
            let valid = EMAIL.as_ref().is_some_and(|re| re.is_match(&text));
            if valid {
                Vec::new()
            } else {
                vec!["Invalid email format".to_string()]
            }
        },
        TypeClass::Text => Vec::new(),
    }
}

/// Checks decimal syntax, then precision and scale.
fn decimal_errors(text: &str, column: &ColumnInfo) -> Result<Vec<String>, String> {
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let well_formed = !(whole.is_empty() && fraction.is_empty())
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit());
    if !well_formed {
        return Err(format!("'{text}' is not a decimal number"));
    }

    let mut errors = Vec::new();
    let digits = format!("{whole}{fraction}");
    let significant = digits.trim_start_matches('0').len().max(1);
    if let Some(precision) = column.numeric_precision.filter(|p| significant > *p as usize) {
        errors.push(format!("Value exceeds precision of {precision}"));
    }
    let scale_used = fraction.trim_end_matches('0').len();
    if let Some(scale) = column.numeric_scale.filter(|s| scale_used > *s as usize) {
        errors.push(format!("Value exceeds scale of {scale}"));
    }
    Ok(errors)
}

fn parse_datetime(text: &str) -> Result<(), chrono::ParseError> {
    if DateTime::parse_from_rfc3339(text).is_ok() {
        return Ok(());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|_| ())
        // A bare date reads as midnight.
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|_| ()))
}

/// Coerces a raw value to its best-effort typed form.
///
/// Blank values become null. Text that fails to coerce is returned as text;
/// this never fails.
#[must_use]
pub fn sanitize_value(value: &Value, data_type: &str) -> Value {
    if is_blank(value) {
        return Value::Null;
    }
    let Value::String(text) = value else {
        return value.clone();
    };
    let trimmed = text.trim();
    let coerced = match TypeClass::of(data_type) {
        TypeClass::Integer => trimmed.parse::<i64>().ok().map(Value::from),
        TypeClass::Float | TypeClass::Decimal => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        TypeClass::Boolean => Some(Value::Bool(
            TRUTHY_TOKENS.contains(&trimmed.to_lowercase().as_str()),
        )),
        _ => None,
    };
    coerced.unwrap_or_else(|| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RowKey;
    use serde_json::json;
    use test_case::test_case;

    fn change(new_value: Value) -> CellChange {
        CellChange::update("t", None, RowKey::Single(json!(1)), "c", Value::Null, new_value)
    }

    fn check(data_type: &str, value: Value) -> Vec<String> {
        validate_cell_change(&change(value), &ColumnInfo::new("c", data_type))
    }

    #[test]
    fn test_null_against_not_null_is_single_error() {
        let column = ColumnInfo::new("c", "INTEGER").not_null().with_max_length(1);
        let errors = validate_cell_change(&change(Value::Null), &column);
        assert_eq!(errors, vec!["Column 'c' cannot be null".to_string()]);
        let errors = validate_cell_change(&change(json!("")), &column);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_null_against_nullable_is_valid() {
        assert!(check("INTEGER", Value::Null).is_empty());
    }

    #[test]
    fn test_type_error_keeps_length_check() {
        let column = ColumnInfo::new("c", "int").with_max_length(2);
        let errors = validate_cell_change(&change(json!("abc")), &column);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("Invalid int: "));
        assert_eq!(errors[1], "Value length (3) exceeds maximum (2)");
    }

    #[test]
    fn test_length_limit() {
        let column = ColumnInfo::new("c", "VARCHAR(255)").with_max_length(255);
        let errors = validate_cell_change(&change(json!("x".repeat(300))), &column);
        assert_eq!(errors, vec!["Value length (300) exceeds maximum (255)".to_string()]);
        assert!(validate_cell_change(&change(json!("x".repeat(255))), &column).is_empty());
    }

    #[test_case("INTEGER", json!("42"), true ; "int text")]
    #[test_case("bigint", json!(7), true ; "int number")]
    #[test_case("serial", json!(2.5), false ; "fractional int")]
    #[test_case("INTEGER", json!("abc"), false ; "int garbage")]
    #[test_case("double precision", json!("1e3"), true ; "float text")]
    #[test_case("REAL", json!("x"), false ; "float garbage")]
    #[test_case("boolean", json!("T"), true ; "bool token")]
    #[test_case("bool", json!("yes"), false ; "bool not a token")]
    #[test_case("bool", json!(true), true ; "bool native")]
    #[test_case("date", json!("2024-02-29"), true ; "date ok")]
    #[test_case("date", json!("2023-02-29"), false ; "date invalid day")]
    #[test_case("datetime", json!("2024-01-01 12:30:00"), true ; "datetime space")]
    #[test_case("timestamp with time zone", json!("2024-01-01T12:30:00Z"), true ; "timestamp rfc3339")]
    #[test_case("timestamp", json!("2024-01-02"), true ; "timestamp date only")]
    #[test_case("datetime", json!("2024-02-30"), false ; "datetime impossible date")]
    #[test_case("timestamp", json!("noon"), false ; "timestamp garbage")]
    #[test_case("time", json!("23:59:59"), true ; "time ok")]
    #[test_case("time", json!("25:00:00"), false ; "time invalid")]
    #[test_case("jsonb", json!("{\"a\": 1}"), true ; "json text")]
    #[test_case("json", json!("{bad"), false ; "json garbage")]
    #[test_case("uuid", json!("67e55044-10b1-426f-9247-bb680e5fe0c8"), true ; "uuid ok")]
    #[test_case("uuid", json!("nope"), false ; "uuid garbage")]
    #[test_case("email_address", json!("a.b@example.com"), true ; "email ok")]
    #[test_case("email_address", json!("a@b"), false ; "email garbage")]
    #[test_case("TEXT", json!("anything"), true ; "text")]
    fn test_type_checks(data_type: &str, value: Value, valid: bool) {
        assert_eq!(check(data_type, value).is_empty(), valid);
    }

    #[test]
    fn test_decimal_precision_and_scale() {
        let column = ColumnInfo::new("c", "DECIMAL(5,2)").with_precision(5, Some(2));
        assert!(validate_cell_change(&change(json!("123.45")), &column).is_empty());
        assert!(validate_cell_change(&change(json!("00012.5")), &column).is_empty());
        assert_eq!(
            validate_cell_change(&change(json!("1234.56")), &column),
            vec!["Value exceeds precision of 5".to_string()]
        );
        assert_eq!(
            validate_cell_change(&change(json!("1.234")), &column),
            vec!["Value exceeds scale of 2".to_string()]
        );
        let errors = validate_cell_change(&change(json!("1.2.3")), &column);
        assert!(errors[0].starts_with("Invalid DECIMAL(5,2): "));
    }

    #[test]
    fn test_email_message() {
        assert_eq!(check("email", json!("nope")), vec!["Invalid email format".to_string()]);
    }

    #[test_case(json!("42"), "integer", json!(42) ; "int")]
    #[test_case(json!("4x"), "integer", json!("4x") ; "int fallback")]
    #[test_case(json!("1.5"), "numeric(4,1)", json!(1.5) ; "decimal")]
    #[test_case(json!("on"), "boolean", json!(true) ; "bool truthy")]
    #[test_case(json!("nah"), "boolean", json!(false) ; "bool falsy")]
    #[test_case(json!(""), "text", Value::Null ; "blank")]
    #[test_case(json!("hi"), "varchar", json!("hi") ; "text passthrough")]
    #[test_case(json!(3), "text", json!(3) ; "non text passthrough")]
    fn test_sanitize_value(input: Value, data_type: &str, expected: Value) {
        assert_eq!(sanitize_value(&input, data_type), expected);
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(TypeClass::of("TIMESTAMP"), TypeClass::DateTime);
        assert_eq!(TypeClass::of("datetime2"), TypeClass::DateTime);
        assert_eq!(TypeClass::of("DATE"), TypeClass::Date);
        assert_eq!(TypeClass::of("time without time zone"), TypeClass::Time);
        assert_eq!(TypeClass::of("tinyint(1)"), TypeClass::Integer);
        assert_eq!(TypeClass::of("character varying"), TypeClass::Text);
    }
}

//! Field types and typed field values.
//!
//! Every filterable field of a record is declared with a [`FieldType`]. Filter
//! literals arrive as strings and are parsed into a [`FieldValue`] of the
//! declared type before any comparison happens.

use crate::{error::Result, Error};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Field types supported in record shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Decimal,
    Bool,
    Byte,
    Char,
    DateTime,
}

impl FieldType {
    /// Whether values of this type support the substring operators.
    pub fn is_string(self) -> bool {
        matches!(self, FieldType::String)
    }

    /// Whether values of this type have a meaningful ordering.
    pub fn is_ordered(self) -> bool {
        !matches!(self, FieldType::Bool)
    }

    /// Whether values of this type are stored as integers.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Int16
                | FieldType::Int32
                | FieldType::Int64
                | FieldType::UInt16
                | FieldType::UInt32
                | FieldType::UInt64
                | FieldType::Byte
        )
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "String",
            FieldType::Int16 => "Int16",
            FieldType::Int32 => "Int32",
            FieldType::Int64 => "Int64",
            FieldType::UInt16 => "UInt16",
            FieldType::UInt32 => "UInt32",
            FieldType::UInt64 => "UInt64",
            FieldType::Float32 => "Float32",
            FieldType::Float64 => "Float64",
            FieldType::Decimal => "Decimal",
            FieldType::Bool => "Bool",
            FieldType::Byte => "Byte",
            FieldType::Char => "Char",
            FieldType::DateTime => "DateTime",
        };
        f.write_str(name)
    }
}

/// A typed value read from a record field or parsed from a filter literal.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent value of an optional field
    Null,
    String(String),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    Bool(bool),
    Byte(u8),
    Char(char),
    DateTime(DateTime<Utc>),
}

impl FieldValue {
    /// Parse a filter literal into a value of the given type.
    ///
    /// `field` is only used to build the error message.
    pub fn parse(field_type: FieldType, field: &str, literal: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue {
            field: field.to_string(),
            value: literal.to_string(),
            expected: field_type,
        };
        let trimmed = literal.trim();

        let value = match field_type {
            FieldType::String => FieldValue::String(literal.to_string()),
            FieldType::Int16 => FieldValue::Int16(trimmed.parse().map_err(|_| invalid())?),
            FieldType::Int32 => FieldValue::Int32(trimmed.parse().map_err(|_| invalid())?),
            FieldType::Int64 => FieldValue::Int64(trimmed.parse().map_err(|_| invalid())?),
            FieldType::UInt16 => FieldValue::UInt16(trimmed.parse().map_err(|_| invalid())?),
            FieldType::UInt32 => FieldValue::UInt32(trimmed.parse().map_err(|_| invalid())?),
            FieldType::UInt64 => FieldValue::UInt64(trimmed.parse().map_err(|_| invalid())?),
            FieldType::Float32 => FieldValue::Float32(trimmed.parse().map_err(|_| invalid())?),
            FieldType::Float64 => FieldValue::Float64(trimmed.parse().map_err(|_| invalid())?),
            FieldType::Decimal => {
                FieldValue::Decimal(Decimal::from_str(trimmed).map_err(|_| invalid())?)
            }
            FieldType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" => FieldValue::Bool(true),
                "false" => FieldValue::Bool(false),
                _ => return Err(invalid()),
            },
            FieldType::Byte => FieldValue::Byte(trimmed.parse().map_err(|_| invalid())?),
            FieldType::Char => {
                let mut chars = literal.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => FieldValue::Char(c),
                    _ => return Err(invalid()),
                }
            }
            FieldType::DateTime => FieldValue::DateTime(parse_datetime(trimmed).ok_or_else(invalid)?),
        };

        Ok(value)
    }

    /// The type of this value, or `None` for [`FieldValue::Null`].
    pub fn field_type(&self) -> Option<FieldType> {
        let ty = match self {
            FieldValue::Null => return None,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Int16(_) => FieldType::Int16,
            FieldValue::Int32(_) => FieldType::Int32,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::UInt16(_) => FieldType::UInt16,
            FieldValue::UInt32(_) => FieldType::UInt32,
            FieldValue::UInt64(_) => FieldType::UInt64,
            FieldValue::Float32(_) => FieldType::Float32,
            FieldValue::Float64(_) => FieldType::Float64,
            FieldValue::Decimal(_) => FieldType::Decimal,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Byte(_) => FieldType::Byte,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::DateTime(_) => FieldType::DateTime,
        };
        Some(ty)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values of the same type.
    ///
    /// Returns `None` when either side is null, the types differ, or a float
    /// comparison involves NaN.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::String(a), FieldValue::String(b)) => Some(a.cmp(b)),
            (FieldValue::Int16(a), FieldValue::Int16(b)) => Some(a.cmp(b)),
            (FieldValue::Int32(a), FieldValue::Int32(b)) => Some(a.cmp(b)),
            (FieldValue::Int64(a), FieldValue::Int64(b)) => Some(a.cmp(b)),
            (FieldValue::UInt16(a), FieldValue::UInt16(b)) => Some(a.cmp(b)),
            (FieldValue::UInt32(a), FieldValue::UInt32(b)) => Some(a.cmp(b)),
            (FieldValue::UInt64(a), FieldValue::UInt64(b)) => Some(a.cmp(b)),
            (FieldValue::Float32(a), FieldValue::Float32(b)) => a.partial_cmp(b),
            (FieldValue::Float64(a), FieldValue::Float64(b)) => a.partial_cmp(b),
            (FieldValue::Decimal(a), FieldValue::Decimal(b)) => Some(a.cmp(b)),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            (FieldValue::Byte(a), FieldValue::Byte(b)) => Some(a.cmp(b)),
            (FieldValue::Char(a), FieldValue::Char(b)) => Some(a.cmp(b)),
            (FieldValue::DateTime(a), FieldValue::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, then [`FieldValue::compare`].
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// JSON form of the value, matching what serde produces for the Rust type.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Int16(v) => Value::from(*v),
            FieldValue::Int32(v) => Value::from(*v),
            FieldValue::Int64(v) => Value::from(*v),
            FieldValue::UInt16(v) => Value::from(*v),
            FieldValue::UInt32(v) => Value::from(*v),
            FieldValue::UInt64(v) => Value::from(*v),
            FieldValue::Float32(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Float64(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Decimal(d) => Value::String(d.to_string()),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Byte(v) => Value::from(*v),
            FieldValue::Char(c) => Value::String(c.to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// Fixed-width text form of a timestamp.
///
/// Stored timestamps use this form so that text ordering equals time ordering.
pub fn canonical_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp literal. Naive forms are interpreted as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

macro_rules! impl_from_for_field_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_field_value! {
    String => String,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    Decimal => Decimal,
    bool => Bool,
    u8 => Byte,
    char => Char,
    DateTime<Utc> => DateTime,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_integers_respect_width() {
        assert_eq!(
            FieldValue::parse(FieldType::Int16, "n", "-300").unwrap(),
            FieldValue::Int16(-300)
        );
        assert!(matches!(
            FieldValue::parse(FieldType::Int16, "n", "70000"),
            Err(Error::InvalidValue { expected: FieldType::Int16, .. })
        ));
        assert!(FieldValue::parse(FieldType::UInt32, "n", "-1").is_err());
        assert_eq!(
            FieldValue::parse(FieldType::UInt64, "n", " 18446744073709551615 ").unwrap(),
            FieldValue::UInt64(u64::MAX)
        );
        assert!(FieldValue::parse(FieldType::Byte, "n", "256").is_err());
    }

    #[test]
    fn parse_decimal_and_floats() {
        assert_eq!(
            FieldValue::parse(FieldType::Decimal, "price", "12.50").unwrap(),
            FieldValue::Decimal(Decimal::new(1250, 2))
        );
        assert_eq!(
            FieldValue::parse(FieldType::Float64, "ratio", "0.25").unwrap(),
            FieldValue::Float64(0.25)
        );
        assert!(FieldValue::parse(FieldType::Float32, "ratio", "abc").is_err());
    }

    #[test]
    fn parse_bool_is_case_insensitive() {
        assert_eq!(
            FieldValue::parse(FieldType::Bool, "active", "True").unwrap(),
            FieldValue::Bool(true)
        );
        assert_eq!(
            FieldValue::parse(FieldType::Bool, "active", "false").unwrap(),
            FieldValue::Bool(false)
        );
        assert!(FieldValue::parse(FieldType::Bool, "active", "yes").is_err());
    }

    #[test]
    fn parse_char_requires_one_character() {
        assert_eq!(
            FieldValue::parse(FieldType::Char, "grade", "A").unwrap(),
            FieldValue::Char('A')
        );
        assert!(FieldValue::parse(FieldType::Char, "grade", "").is_err());
        assert!(FieldValue::parse(FieldType::Char, "grade", "AB").is_err());
    }

    #[test]
    fn parse_datetime_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        for literal in [
            "2024-03-01T12:30:00Z",
            "2024-03-01T14:30:00+02:00",
            "2024-03-01 12:30:00",
            "2024-03-01T12:30:00",
        ] {
            assert_eq!(
                FieldValue::parse(FieldType::DateTime, "at", literal).unwrap(),
                FieldValue::DateTime(expected),
                "literal {literal}"
            );
        }

        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            FieldValue::parse(FieldType::DateTime, "at", "2024-03-01").unwrap(),
            FieldValue::DateTime(midnight)
        );
        assert!(FieldValue::parse(FieldType::DateTime, "at", "yesterday").is_err());
    }

    #[test]
    fn string_literal_is_kept_verbatim() {
        assert_eq!(
            FieldValue::parse(FieldType::String, "name", "  padded ").unwrap(),
            FieldValue::String("  padded ".into())
        );
    }

    #[test]
    fn compare_requires_same_type() {
        assert_eq!(
            FieldValue::Int32(1).compare(&FieldValue::Int32(2)),
            Some(Ordering::Less)
        );
        assert_eq!(FieldValue::Int32(1).compare(&FieldValue::Int64(1)), None);
        assert_eq!(FieldValue::Null.compare(&FieldValue::Null), None);
        assert_eq!(
            FieldValue::Float64(f64::NAN).compare(&FieldValue::Float64(1.0)),
            None
        );
    }

    #[test]
    fn sort_puts_nulls_first() {
        let mut values = vec![
            FieldValue::Int32(3),
            FieldValue::Null,
            FieldValue::Int32(1),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![FieldValue::Null, FieldValue::Int32(1), FieldValue::Int32(3)]
        );
    }

    #[test]
    fn canonical_timestamp_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert_eq!(canonical_timestamp(&a), "2024-01-01T00:00:00.000000Z");
        assert_eq!(canonical_timestamp(&b), "2024-01-01T00:00:01.500000Z");
        assert!(canonical_timestamp(&a) < canonical_timestamp(&b));
    }

    #[test]
    fn option_conversion() {
        let none: Option<String> = None;
        assert_eq!(FieldValue::from(none), FieldValue::Null);
        assert_eq!(
            FieldValue::from(Some(5i64)),
            FieldValue::Int64(5)
        );
    }
}

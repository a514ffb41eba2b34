//! Per-field comparators.
//!
//! A [`Comparator`] is one compiled condition: the literal already parsed into
//! the field's type and the operator already checked for legality. Applying
//! it to a field value is pure and cannot fail.

use crate::{error::Result, ComparisonOp, Error, FieldType, FieldValue, FilterCondition};
use std::cmp::Ordering;

/// A compiled, type-checked condition for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparator {
    field_type: FieldType,
    op: ComparisonOp,
    operand: FieldValue,
    case_sensitive: bool,
}

/// Check that `op` may be applied to a field of `field_type`.
pub fn check_operator(field: &str, field_type: FieldType, op: ComparisonOp) -> Result<()> {
    let legal = if field_type.is_string() {
        true
    } else if op.is_substring() {
        false
    } else if op.is_ordering() {
        field_type.is_ordered()
    } else {
        true
    };

    if legal {
        Ok(())
    } else {
        Err(Error::UnsupportedOperator {
            field: field.to_string(),
            op,
            field_type,
        })
    }
}

impl Comparator {
    /// Compile a condition against a field of the given type.
    ///
    /// The operator is checked before the literal is parsed, so an illegal
    /// operator is reported even when the literal is also malformed.
    pub fn compile(field_type: FieldType, condition: &FilterCondition) -> Result<Self> {
        check_operator(&condition.field_name, field_type, condition.operator)?;

        let mut operand =
            FieldValue::parse(field_type, &condition.field_name, &condition.literal_value)?;
        let case_sensitive = condition.case_sensitive || !field_type.is_string();
        if !case_sensitive {
            if let FieldValue::String(s) = &operand {
                operand = FieldValue::String(s.to_lowercase());
            }
        }

        Ok(Self {
            field_type,
            op: condition.operator,
            operand,
            case_sensitive,
        })
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn op(&self) -> ComparisonOp {
        self.op
    }

    /// The parsed literal (lower-cased for case-insensitive string conditions).
    pub fn operand(&self) -> &FieldValue {
        &self.operand
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Test a field value. Null values never match.
    pub fn matches(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Null => false,
            FieldValue::String(s) if !self.case_sensitive => {
                self.matches_string(&s.to_lowercase())
            }
            FieldValue::String(s) => self.matches_string(s),
            other => match other.compare(&self.operand) {
                Some(ordering) => self.accepts(ordering),
                None => false,
            },
        }
    }

    fn matches_string(&self, value: &str) -> bool {
        let Some(operand) = self.operand.as_str() else {
            return false;
        };

        match self.op {
            ComparisonOp::StartsWith => value.starts_with(operand),
            ComparisonOp::EndsWith => value.ends_with(operand),
            ComparisonOp::Contains => value.contains(operand),
            _ => self.accepts(value.cmp(operand)),
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self.op {
            ComparisonOp::Equals => ordering == Ordering::Equal,
            ComparisonOp::NotEquals => ordering != Ordering::Equal,
            ComparisonOp::LessThan => ordering == Ordering::Less,
            ComparisonOp::GreaterThan => ordering == Ordering::Greater,
            ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
            ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
            // Rejected by check_operator for every non-string type
            ComparisonOp::StartsWith | ComparisonOp::EndsWith | ComparisonOp::Contains => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn compile(field_type: FieldType, op: ComparisonOp, literal: &str) -> Result<Comparator> {
        Comparator::compile(field_type, &FilterCondition::new("f", op, literal))
    }

    fn compile_cs(field_type: FieldType, op: ComparisonOp, literal: &str) -> Comparator {
        Comparator::compile(
            field_type,
            &FilterCondition::new("f", op, literal).case_sensitive(true),
        )
        .unwrap()
    }

    #[test]
    fn string_case_insensitive_equals() {
        let c = compile(FieldType::String, ComparisonOp::Equals, "Rocky").unwrap();
        assert!(c.matches(&"rocky".into()));
        assert!(c.matches(&"ROCKY".into()));

        let c = compile_cs(FieldType::String, ComparisonOp::Equals, "Rocky");
        assert!(!c.matches(&"rocky".into()));
        assert!(c.matches(&"Rocky".into()));
    }

    #[test]
    fn string_substring_operators() {
        let starts = compile(FieldType::String, ComparisonOp::StartsWith, "j").unwrap();
        assert!(starts.matches(&"Jenny Jones".into()));
        assert!(!starts.matches(&"Isadora Jarr".into()));

        let ends = compile_cs(FieldType::String, ComparisonOp::EndsWith, "Jarr");
        assert!(ends.matches(&"Isadora Jarr".into()));
        assert!(!ends.matches(&"Isadora jarr".into()));

        let contains = compile(FieldType::String, ComparisonOp::Contains, "DOR").unwrap();
        assert!(contains.matches(&"Isadora Jarr".into()));
    }

    #[test]
    fn empty_literal_semantics() {
        let contains = compile(FieldType::String, ComparisonOp::Contains, "").unwrap();
        assert!(contains.matches(&"anything".into()));
        assert!(contains.matches(&"".into()));

        let equals = compile(FieldType::String, ComparisonOp::Equals, "").unwrap();
        assert!(equals.matches(&"".into()));
        assert!(!equals.matches(&"anything".into()));
    }

    #[test]
    fn string_ordering_is_ordinal() {
        let lt = compile_cs(FieldType::String, ComparisonOp::LessThan, "b");
        assert!(lt.matches(&"a".into()));
        assert!(lt.matches(&"B".into()));
        assert!(!lt.matches(&"c".into()));

        let lt = compile(FieldType::String, ComparisonOp::LessThan, "b").unwrap();
        assert!(!lt.matches(&"B".into()));
    }

    #[test]
    fn substring_operators_rejected_for_non_strings() {
        for ty in [
            FieldType::Int16,
            FieldType::Int32,
            FieldType::Int64,
            FieldType::UInt16,
            FieldType::UInt32,
            FieldType::UInt64,
            FieldType::Float32,
            FieldType::Float64,
            FieldType::Decimal,
            FieldType::Bool,
            FieldType::Byte,
            FieldType::Char,
            FieldType::DateTime,
        ] {
            for op in [ComparisonOp::StartsWith, ComparisonOp::EndsWith, ComparisonOp::Contains] {
                assert!(
                    matches!(compile(ty, op, "1"), Err(Error::UnsupportedOperator { .. })),
                    "{ty} {op}"
                );
            }
        }
    }

    #[test]
    fn bool_only_supports_equality() {
        assert!(compile(FieldType::Bool, ComparisonOp::Equals, "true").is_ok());
        assert!(compile(FieldType::Bool, ComparisonOp::NotEquals, "true").is_ok());
        assert!(matches!(
            compile(FieldType::Bool, ComparisonOp::LessThan, "true"),
            Err(Error::UnsupportedOperator { .. })
        ));

        let ne = compile(FieldType::Bool, ComparisonOp::NotEquals, "TRUE").unwrap();
        assert!(ne.matches(&FieldValue::Bool(false)));
        assert!(!ne.matches(&FieldValue::Bool(true)));
    }

    #[test]
    fn operator_checked_before_literal() {
        assert!(matches!(
            compile(FieldType::Int32, ComparisonOp::Contains, "not-a-number"),
            Err(Error::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            compile(FieldType::Int32, ComparisonOp::Equals, "not-a-number"),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn numeric_comparisons() {
        let ge = compile(FieldType::Int64, ComparisonOp::GreaterThanOrEqual, "10").unwrap();
        assert!(ge.matches(&FieldValue::Int64(10)));
        assert!(ge.matches(&FieldValue::Int64(11)));
        assert!(!ge.matches(&FieldValue::Int64(9)));

        let le = compile(FieldType::Decimal, ComparisonOp::LessThanOrEqual, "12.5").unwrap();
        assert!(le.matches(&FieldValue::Decimal(Decimal::new(1250, 2))));
        assert!(!le.matches(&FieldValue::Decimal(Decimal::new(1251, 2))));

        let lt = compile(FieldType::Float32, ComparisonOp::LessThan, "0.5").unwrap();
        assert!(lt.matches(&FieldValue::Float32(0.25)));
        assert!(!lt.matches(&FieldValue::Float32(f32::NAN)));

        let ne = compile(FieldType::Byte, ComparisonOp::NotEquals, "7").unwrap();
        assert!(ne.matches(&FieldValue::Byte(8)));
    }

    #[test]
    fn char_and_datetime() {
        let gt = compile(FieldType::Char, ComparisonOp::GreaterThan, "B").unwrap();
        assert!(gt.matches(&FieldValue::Char('C')));
        assert!(!gt.matches(&FieldValue::Char('A')));

        let before = compile(FieldType::DateTime, ComparisonOp::LessThan, "2024-01-01").unwrap();
        let dec = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        assert!(before.matches(&FieldValue::DateTime(dec)));
        assert!(!before.matches(&FieldValue::DateTime(jan)));
    }

    #[test]
    fn null_never_matches() {
        for op in [ComparisonOp::Equals, ComparisonOp::NotEquals, ComparisonOp::Contains] {
            let c = compile(FieldType::String, op, "").unwrap();
            assert!(!c.matches(&FieldValue::Null), "{op}");
        }
        let ne = compile(FieldType::Int32, ComparisonOp::NotEquals, "1").unwrap();
        assert!(!ne.matches(&FieldValue::Null));
    }

    #[test]
    fn case_flag_ignored_for_non_strings() {
        let c = compile(FieldType::Int32, ComparisonOp::Equals, "5").unwrap();
        assert!(c.is_case_sensitive());
        assert_eq!(c.operand(), &FieldValue::Int32(5));
    }
}

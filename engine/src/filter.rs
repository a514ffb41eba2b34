//! Backend-agnostic query descriptions.
//!
//! A [`QueryFilter`] is what callers build (or send over the wire): a flat
//! conjunction of [`FilterCondition`]s plus ordering and projection. It holds
//! field names as strings; resolving them against a record shape happens in
//! [`crate::query::CompiledFilter`].

use serde::{Deserialize, Serialize};

/// Comparison operators. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    Contains,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
}

impl ComparisonOp {
    pub const ALL: [ComparisonOp; 9] = [
        ComparisonOp::Equals,
        ComparisonOp::NotEquals,
        ComparisonOp::StartsWith,
        ComparisonOp::EndsWith,
        ComparisonOp::Contains,
        ComparisonOp::LessThan,
        ComparisonOp::GreaterThan,
        ComparisonOp::LessThanOrEqual,
        ComparisonOp::GreaterThanOrEqual,
    ];

    /// Substring operators, legal on string fields only.
    pub fn is_substring(self) -> bool {
        matches!(
            self,
            ComparisonOp::StartsWith | ComparisonOp::EndsWith | ComparisonOp::Contains
        )
    }

    /// Ordering operators, illegal on boolean fields.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            ComparisonOp::LessThan
                | ComparisonOp::GreaterThan
                | ComparisonOp::LessThanOrEqual
                | ComparisonOp::GreaterThanOrEqual
        )
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One field-level comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    pub field_name: String,
    /// Always a string; parsed into the field's type at evaluation time
    #[serde(default)]
    pub literal_value: String,
    pub operator: ComparisonOp,
    /// Only meaningful for string fields
    #[serde(default)]
    pub case_sensitive: bool,
}

impl FilterCondition {
    /// Create a case-insensitive condition.
    pub fn new(field_name: impl Into<String>, operator: ComparisonOp, literal_value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            literal_value: literal_value.into(),
            operator,
            case_sensitive: false,
        }
    }

    /// Builder-style: set case sensitivity.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// A complete query: AND-ed conditions, optional ordering, projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    /// Fields to include in the response; empty means all
    #[serde(default)]
    pub include_fields: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by_field: Option<String>,
    #[serde(default)]
    pub order_by_descending: bool,
}

impl QueryFilter {
    /// The identity filter: matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: add a condition.
    pub fn with_condition(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Builder-style: add a case-insensitive condition.
    pub fn filter(self, field: impl Into<String>, op: ComparisonOp, value: impl Into<String>) -> Self {
        self.with_condition(FilterCondition::new(field, op, value))
    }

    /// Builder-style: order ascending by a field.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by_field = Some(field.into());
        self.order_by_descending = false;
        self
    }

    /// Builder-style: order descending by a field.
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by_field = Some(field.into());
        self.order_by_descending = true;
        self
    }

    /// Builder-style: project onto the given fields.
    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// The same query with the projection removed.
    pub fn without_projection(&self) -> Self {
        Self {
            include_fields: Vec::new(),
            ..self.clone()
        }
    }

    pub fn is_identity(&self) -> bool {
        self.conditions.is_empty() && self.order_by_field.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_subsets() {
        let substring: Vec<_> = ComparisonOp::ALL
            .iter()
            .filter(|op| op.is_substring())
            .collect();
        assert_eq!(substring.len(), 3);

        let ordering: Vec<_> = ComparisonOp::ALL
            .iter()
            .filter(|op| op.is_ordering())
            .collect();
        assert_eq!(ordering.len(), 4);
        assert!(!ComparisonOp::Equals.is_ordering());
    }

    #[test]
    fn builder() {
        let filter = QueryFilter::new()
            .filter("Name", ComparisonOp::StartsWith, "J")
            .with_condition(FilterCondition::new("Age", ComparisonOp::GreaterThan, "30").case_sensitive(true))
            .order_by_desc("Name")
            .include(["Name", "Age"]);

        assert_eq!(filter.conditions.len(), 2);
        assert!(!filter.conditions[0].case_sensitive);
        assert!(filter.conditions[1].case_sensitive);
        assert_eq!(filter.order_by_field.as_deref(), Some("Name"));
        assert!(filter.order_by_descending);
        assert_eq!(filter.include_fields, vec!["Name", "Age"]);
        assert!(filter.without_projection().include_fields.is_empty());
        assert!(!filter.is_identity());
        assert!(QueryFilter::new().is_identity());
    }

    #[test]
    fn wire_format() {
        let json = r#"{
            "includeFields": ["name"],
            "conditions": [
                {"fieldName": "name", "literalValue": "J", "operator": "StartsWith"}
            ],
            "orderByField": "name"
        }"#;

        let filter: QueryFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.conditions[0].operator, ComparisonOp::StartsWith);
        assert!(!filter.conditions[0].case_sensitive);
        assert!(!filter.order_by_descending);

        let out = serde_json::to_string(&filter).unwrap();
        assert!(out.contains(r#""fieldName":"name""#));
        assert!(out.contains(r#""caseSensitive":false"#));
    }

    #[test]
    fn empty_body_is_identity() {
        let filter: QueryFilter = serde_json::from_str("{}").unwrap();
        assert!(filter.is_identity());
    }
}

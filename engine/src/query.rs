//! In-memory query evaluation.
//!
//! [`CompiledFilter`] binds a [`QueryFilter`] to a record [`Shape`]: every
//! field name is resolved and every literal parsed once, up front. Evaluation
//! is then a pure pass over the records.

use crate::{compare::Comparator, error::Result, Error, Field, QueryFilter, Shape};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
struct BoundCondition<R> {
    field: Field<R>,
    comparator: Comparator,
}

/// A query filter resolved against a record shape.
#[derive(Debug, Clone)]
pub struct CompiledFilter<R> {
    conditions: Vec<BoundCondition<R>>,
    order_by: Option<Field<R>>,
    descending: bool,
    /// Canonical names of the projected fields; empty means all
    projection: Vec<String>,
}

impl<R> CompiledFilter<R> {
    /// Resolve a filter against a shape.
    ///
    /// Fails with a Configuration error for an unknown field name (in a
    /// condition, the ordering or the projection), with UnsupportedOperator
    /// for an operator illegal on its field, and with InvalidValue for a
    /// literal that does not parse.
    pub fn compile(shape: &Shape<R>, filter: &QueryFilter) -> Result<Self> {
        let conditions = filter
            .conditions
            .iter()
            .map(|condition| {
                let field = shape.resolve(&condition.field_name)?;
                let comparator = Comparator::compile(field.field_type, condition)?;
                Ok(BoundCondition {
                    field: field.clone(),
                    comparator,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let order_by = filter
            .order_by_field
            .as_deref()
            .map(|name| shape.resolve(name).cloned())
            .transpose()?;

        let mut projection: Vec<String> = Vec::with_capacity(filter.include_fields.len());
        for name in &filter.include_fields {
            let canonical = &shape.resolve(name)?.name;
            if !projection.contains(canonical) {
                projection.push(canonical.clone());
            }
        }

        Ok(Self {
            conditions,
            order_by,
            descending: filter.order_by_descending,
            projection,
        })
    }

    /// Whether a single record satisfies every condition.
    pub fn matches(&self, record: &R) -> bool {
        self.conditions
            .iter()
            .all(|c| c.comparator.matches(&c.field.read(record)))
    }

    /// Apply the filter to a materialized record set.
    ///
    /// Conditions narrow the set one after another; the result is then
    /// stable-sorted when an ordering is set.
    pub fn evaluate(&self, records: Vec<R>) -> Vec<R> {
        let mut working = records;
        for condition in &self.conditions {
            working.retain(|record| condition.comparator.matches(&condition.field.read(record)));
        }

        if let Some(field) = &self.order_by {
            let mut keyed: Vec<_> = working
                .into_iter()
                .map(|record| (field.read(&record), record))
                .collect();
            if self.descending {
                keyed.sort_by(|(a, _), (b, _)| b.sort_cmp(a));
            } else {
                keyed.sort_by(|(a, _), (b, _)| a.sort_cmp(b));
            }
            working = keyed.into_iter().map(|(_, record)| record).collect();
        }

        working
    }

    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    pub fn is_projected(&self) -> bool {
        !self.projection.is_empty()
    }
}

impl<R: Serialize> CompiledFilter<R> {
    /// Serialize a record, keeping only the projected fields.
    pub fn project(&self, record: &R) -> Result<Value> {
        let value = serde_json::to_value(record)
            .map_err(|e| Error::Configuration(format!("record is not serializable: {e}")))?;
        Ok(self.project_value(value))
    }

    /// Keep only the projected fields of an already-serialized record.
    pub fn project_value(&self, value: Value) -> Value {
        if self.projection.is_empty() {
            return value;
        }

        match value {
            Value::Object(mut object) => {
                let mut projected = Map::with_capacity(self.projection.len());
                for name in &self.projection {
                    if let Some(v) = object.remove(name) {
                        projected.insert(name.clone(), v);
                    }
                }
                Value::Object(projected)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComparisonOp, Entity, FieldType, FilterCondition};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        id: i32,
        name: String,
        age: i32,
        nickname: Option<String>,
        active: bool,
    }

    impl Entity for Person {
        type Key = i32;

        fn shape() -> Shape<Self> {
            Shape::<Self>::new("people", "id")
                .generated_key(true)
                .field("id", FieldType::Int32, |p| p.id.into())
                .field("name", FieldType::String, |p| p.name.clone().into())
                .field("age", FieldType::Int32, |p| p.age.into())
                .field("nickname", FieldType::String, |p| p.nickname.clone().into())
                .field("active", FieldType::Bool, |p| p.active.into())
        }

        fn key(&self) -> i32 {
            self.id
        }

        fn set_key(&mut self, key: i32) {
            self.id = key;
        }
    }

    fn person(id: i32, name: &str, age: i32) -> Person {
        Person {
            id,
            name: name.into(),
            age,
            nickname: None,
            active: true,
        }
    }

    fn people() -> Vec<Person> {
        vec![
            person(1, "Isadora Jarr", 41),
            person(2, "Jenny Jones", 29),
            person(3, "jack", 29),
            Person {
                nickname: Some("Rocky".into()),
                ..person(4, "Rocco", 35)
            },
        ]
    }

    fn run(filter: QueryFilter) -> Vec<i32> {
        CompiledFilter::compile(&Person::shape(), &filter)
            .unwrap()
            .evaluate(people())
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    #[test]
    fn identity_filter_preserves_order() {
        assert_eq!(run(QueryFilter::new()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn starts_with_scenario() {
        let filter = QueryFilter::new()
            .filter("Name", ComparisonOp::StartsWith, "J")
            .order_by("Name");
        // Ordering is ordinal, so "Jenny Jones" sorts before "jack"
        assert_eq!(run(filter), vec![2, 3]);

        let records = vec![person(1, "Isadora Jarr", 1), person(2, "Jenny Jones", 2)];
        let filter = QueryFilter::new()
            .filter("Name", ComparisonOp::StartsWith, "J")
            .order_by("Name");
        let result = CompiledFilter::compile(&Person::shape(), &filter)
            .unwrap()
            .evaluate(records);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "Jenny Jones");
    }

    #[test]
    fn conditions_are_conjoined() {
        let filter = QueryFilter::new()
            .filter("age", ComparisonOp::Equals, "29")
            .with_condition(FilterCondition::new("name", ComparisonOp::StartsWith, "J").case_sensitive(true));
        assert_eq!(run(filter), vec![2]);
    }

    #[test]
    fn stable_sort_both_directions() {
        assert_eq!(run(QueryFilter::new().order_by("age")), vec![2, 3, 4, 1]);
        assert_eq!(run(QueryFilter::new().order_by_desc("age")), vec![1, 4, 2, 3]);
    }

    #[test]
    fn nulls_never_match_and_sort_first() {
        let filter = QueryFilter::new().filter("nickname", ComparisonOp::Equals, "rocky");
        assert_eq!(run(filter), vec![4]);

        let filter = QueryFilter::new().filter("nickname", ComparisonOp::NotEquals, "rocky");
        assert!(run(filter).is_empty());

        assert_eq!(run(QueryFilter::new().order_by_desc("nickname")), vec![4, 1, 2, 3]);
    }

    #[test]
    fn unknown_field_fails_loudly() {
        let shape = Person::shape();
        for filter in [
            QueryFilter::new().filter("Nmae", ComparisonOp::Equals, "x"),
            QueryFilter::new().order_by("height"),
            QueryFilter::new().include(["name", "email"]),
        ] {
            assert!(matches!(
                CompiledFilter::compile(&shape, &filter),
                Err(Error::Configuration(_))
            ));
        }
    }

    #[test]
    fn errors_surface_before_records_are_visited() {
        let shape = Person::shape();
        let filter = QueryFilter::new().filter("age", ComparisonOp::Contains, "2");
        assert!(matches!(
            CompiledFilter::compile(&shape, &filter),
            Err(Error::UnsupportedOperator { .. })
        ));

        let filter = QueryFilter::new().filter("active", ComparisonOp::GreaterThan, "true");
        assert!(matches!(
            CompiledFilter::compile(&shape, &filter),
            Err(Error::UnsupportedOperator { .. })
        ));

        let filter = QueryFilter::new().filter("age", ComparisonOp::Equals, "old");
        assert!(matches!(
            CompiledFilter::compile(&shape, &filter),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn projection_keeps_canonical_names() {
        let filter = QueryFilter::new().include(["NAME", "id", "name"]);
        let compiled = CompiledFilter::compile(&Person::shape(), &filter).unwrap();
        assert_eq!(compiled.projection(), ["name", "id"]);

        let projected = compiled.project(&person(7, "Ada", 36)).unwrap();
        assert_eq!(projected, json!({"name": "Ada", "id": 7}));
    }

    #[test]
    fn projection_does_not_affect_matching() {
        let filter = QueryFilter::new()
            .filter("age", ComparisonOp::GreaterThan, "30")
            .include(["name"]);
        assert_eq!(run(filter), vec![1, 4]);
    }

    #[test]
    fn empty_projection_keeps_everything() {
        let compiled = CompiledFilter::compile(&Person::shape(), &QueryFilter::new()).unwrap();
        let value = compiled.project(&person(1, "Ada", 36)).unwrap();
        assert_eq!(value["age"], json!(36));
        assert_eq!(value["nickname"], Value::Null);
    }
}

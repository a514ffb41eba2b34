//! Record shapes.
//!
//! A [`Shape`] describes one record type: the table it lives in, its identity
//! field, and an accessor table mapping field names to typed getters. Shapes
//! are built once per adapter instance; filters arriving over the wire name
//! fields by string and are resolved against the shape a single time.

use crate::{error::Result, Error, FieldType, FieldValue};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// The three identity types a record may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Int32,
    Int64,
    String,
}

impl KeyKind {
    pub fn field_type(self) -> FieldType {
        match self {
            KeyKind::Int32 => FieldType::Int32,
            KeyKind::Int64 => FieldType::Int64,
            KeyKind::String => FieldType::String,
        }
    }
}

/// Type-erased identity value.
///
/// Integer keys order before text keys, numerically; text keys order
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Text(s) => f.write_str(s),
        }
    }
}

/// Prefix carried by client-generated provisional string keys.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// An identity type usable as a record key.
pub trait RecordKey:
    Clone + Eq + Hash + Ord + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: KeyKind;

    /// The "no identity yet" value (`0` or the empty string).
    fn unset() -> Self;

    fn is_unset(&self) -> bool {
        *self == Self::unset()
    }

    /// Next key after the current maximum. `None` for keys that cannot be
    /// derived arithmetically.
    fn successor(max: Option<&Self>) -> Option<Self>;

    /// Whether this key was assigned locally and never confirmed remotely.
    fn is_provisional(&self) -> bool;

    fn to_key_value(&self) -> KeyValue;

    fn from_key_value(value: KeyValue) -> Result<Self>;

    /// Parse a key from its textual form (e.g. a URL path segment).
    fn parse_key(s: &str) -> Result<Self>;
}

impl RecordKey for i32 {
    const KIND: KeyKind = KeyKind::Int32;

    fn unset() -> Self {
        0
    }

    fn successor(max: Option<&Self>) -> Option<Self> {
        Some(max.copied().unwrap_or(0).max(0).saturating_add(1))
    }

    fn is_provisional(&self) -> bool {
        *self < 0
    }

    fn to_key_value(&self) -> KeyValue {
        KeyValue::Int(i64::from(*self))
    }

    fn from_key_value(value: KeyValue) -> Result<Self> {
        match value {
            KeyValue::Int(v) => i32::try_from(v)
                .map_err(|_| Error::Configuration(format!("key {v} does not fit an Int32 key"))),
            KeyValue::Text(s) => Self::parse_key(&s),
        }
    }

    fn parse_key(s: &str) -> Result<Self> {
        s.trim().parse().map_err(|_| Error::InvalidValue {
            field: "key".into(),
            value: s.to_string(),
            expected: FieldType::Int32,
        })
    }
}

impl RecordKey for i64 {
    const KIND: KeyKind = KeyKind::Int64;

    fn unset() -> Self {
        0
    }

    fn successor(max: Option<&Self>) -> Option<Self> {
        Some(max.copied().unwrap_or(0).max(0).saturating_add(1))
    }

    fn is_provisional(&self) -> bool {
        *self < 0
    }

    fn to_key_value(&self) -> KeyValue {
        KeyValue::Int(*self)
    }

    fn from_key_value(value: KeyValue) -> Result<Self> {
        match value {
            KeyValue::Int(v) => Ok(v),
            KeyValue::Text(s) => Self::parse_key(&s),
        }
    }

    fn parse_key(s: &str) -> Result<Self> {
        s.trim().parse().map_err(|_| Error::InvalidValue {
            field: "key".into(),
            value: s.to_string(),
            expected: FieldType::Int64,
        })
    }
}

impl RecordKey for String {
    const KIND: KeyKind = KeyKind::String;

    fn unset() -> Self {
        String::new()
    }

    fn successor(_max: Option<&Self>) -> Option<Self> {
        None
    }

    fn is_provisional(&self) -> bool {
        self.starts_with(PROVISIONAL_PREFIX)
    }

    fn to_key_value(&self) -> KeyValue {
        KeyValue::Text(self.clone())
    }

    fn from_key_value(value: KeyValue) -> Result<Self> {
        Ok(value.to_string())
    }

    fn parse_key(s: &str) -> Result<Self> {
        Ok(s.to_string())
    }
}

/// Accessor for one field of a record type.
pub struct Field<R> {
    pub name: String,
    pub field_type: FieldType,
    pub get: fn(&R) -> FieldValue,
}

impl<R> Field<R> {
    pub fn new(name: impl Into<String>, field_type: FieldType, get: fn(&R) -> FieldValue) -> Self {
        Self {
            name: name.into(),
            field_type,
            get,
        }
    }

    /// Read the field from a record.
    pub fn read(&self, record: &R) -> FieldValue {
        (self.get)(record)
    }
}

impl<R> Clone for Field<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            field_type: self.field_type,
            get: self.get,
        }
    }
}

impl<R> Debug for Field<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .finish()
    }
}

/// Description of a record type: table, identity and field accessors.
pub struct Shape<R> {
    pub table: String,
    pub key_field: String,
    /// Whether the storage engine assigns keys (auto-increment).
    pub key_generated: bool,
    pub fields: Vec<Field<R>>,
}

impl<R> Shape<R> {
    pub fn new(table: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_field: key_field.into(),
            key_generated: false,
            fields: Vec::new(),
        }
    }

    /// Builder-style: mark the key as storage-generated.
    pub fn generated_key(mut self, generated: bool) -> Self {
        self.key_generated = generated;
        self
    }

    /// Builder-style: add a field accessor.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType, get: fn(&R) -> FieldValue) -> Self {
        self.fields.push(Field::new(name, field_type, get));
        self
    }

    /// Look a field up by name. Exact matches win over case-insensitive ones.
    pub fn lookup(&self, name: &str) -> Option<&Field<R>> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    /// Look a field up by name, failing with a configuration error.
    pub fn resolve(&self, name: &str) -> Result<&Field<R>> {
        self.lookup(name)
            .ok_or_else(|| Error::unknown_field(&self.table, name))
    }

    /// The identity field accessor.
    pub fn key(&self) -> Result<&Field<R>> {
        self.lookup(&self.key_field).ok_or_else(|| {
            Error::Configuration(format!(
                "table '{}' has no identity field '{}'",
                self.table, self.key_field
            ))
        })
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Check structural invariants: identity field present with a legal type,
    /// and no duplicate field names.
    pub fn validate(&self, kind: KeyKind) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::Configuration("table name must not be empty".into()));
        }

        let key = self.key()?;
        if key.field_type != kind.field_type() {
            return Err(Error::Configuration(format!(
                "identity field '{}' is declared {} but the key type is {}",
                key.name,
                key.field_type,
                kind.field_type()
            )));
        }
        if self.key_generated && kind == KeyKind::String {
            return Err(Error::Configuration(
                "string keys cannot be storage-generated".into(),
            ));
        }

        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&field.name))
            {
                return Err(Error::Configuration(format!(
                    "field '{}' is declared twice on table '{}'",
                    field.name, self.table
                )));
            }
        }

        Ok(())
    }
}

impl<R> Clone for Shape<R> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            key_field: self.key_field.clone(),
            key_generated: self.key_generated,
            fields: self.fields.clone(),
        }
    }
}

impl<R> Debug for Shape<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("table", &self.table)
            .field("key_field", &self.key_field)
            .field("key_generated", &self.key_generated)
            .field("fields", &self.fields)
            .finish()
    }
}

/// A record type that can be stored by any adapter.
///
/// Shape field names must equal the record's serialized field names.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: RecordKey;

    /// Build the shape for this record type. Adapters call this once.
    fn shape() -> Shape<Self>;

    fn key(&self) -> Self::Key;

    fn set_key(&mut self, key: Self::Key);

    /// Copy of the record with a different key.
    fn with_key(&self, key: Self::Key) -> Self {
        let mut record = self.clone();
        record.set_key(key);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tag {
        id: String,
        label: String,
    }

    impl Entity for Tag {
        type Key = String;

        fn shape() -> Shape<Self> {
            Shape::<Self>::new("tags", "id")
                .field("id", FieldType::String, |t| t.id.clone().into())
                .field("label", FieldType::String, |t| t.label.clone().into())
        }

        fn key(&self) -> String {
            self.id.clone()
        }

        fn set_key(&mut self, key: String) {
            self.id = key;
        }
    }

    #[test]
    fn lookup_prefers_exact_then_case_insensitive() {
        let shape = Tag::shape();
        assert_eq!(shape.lookup("label").unwrap().name, "label");
        assert_eq!(shape.lookup("Label").unwrap().name, "label");
        assert!(shape.lookup("colour").is_none());
        assert!(matches!(shape.resolve("colour"), Err(Error::Configuration(_))));
    }

    #[test]
    fn validate_checks_identity() {
        assert!(Tag::shape().validate(KeyKind::String).is_ok());
        assert!(Tag::shape().validate(KeyKind::Int32).is_err());

        let missing_key = Shape::<Tag>::new("tags", "uuid")
            .field("label", FieldType::String, |t| t.label.clone().into());
        assert!(matches!(
            missing_key.validate(KeyKind::String),
            Err(Error::Configuration(_))
        ));

        let generated_text = Tag::shape().generated_key(true);
        assert!(generated_text.validate(KeyKind::String).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_fields() {
        let shape = Tag::shape().field("LABEL", FieldType::String, |t| t.label.clone().into());
        assert!(shape.validate(KeyKind::String).is_err());
    }

    #[test]
    fn integer_keys() {
        assert!(0i32.is_unset());
        assert_eq!(i32::successor(None), Some(1));
        assert_eq!(i32::successor(Some(&41)), Some(42));
        assert_eq!(i64::successor(Some(&-3)), Some(1));
        assert!((-1i64).is_provisional());
        assert!(!5i64.is_provisional());
        assert_eq!(i32::parse_key(" 7 ").unwrap(), 7);
        assert!(i32::parse_key("seven").is_err());
        assert!(i32::from_key_value(KeyValue::Int(i64::MAX)).is_err());
    }

    #[test]
    fn string_keys() {
        assert!(String::new().is_unset());
        assert_eq!(String::successor(Some(&"a".to_string())), None);
        assert!("local-123".to_string().is_provisional());
        assert_eq!(
            String::from_key_value(KeyValue::Int(9)).unwrap(),
            "9".to_string()
        );
    }

    #[test]
    fn key_values_order_ints_before_text() {
        let mut keys = vec![
            KeyValue::Text("b".into()),
            KeyValue::Int(10),
            KeyValue::Text("a".into()),
            KeyValue::Int(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                KeyValue::Int(2),
                KeyValue::Int(10),
                KeyValue::Text("a".into()),
                KeyValue::Text("b".into()),
            ]
        );
    }
}

//! Record types served by the binary.

use chrono::{DateTime, Utc};
use quarry_engine::{Entity, FieldType, Shape};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A customer account. The database assigns the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub balance: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Customer {
    /// New active customer with no key and a zero balance.
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            email: None,
            balance: Decimal::ZERO,
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Customer {
    type Key = i32;

    fn shape() -> Shape<Self> {
        Shape::<Self>::new("customers", "id")
            .generated_key(true)
            .field("id", FieldType::Int32, |c| c.id.into())
            .field("name", FieldType::String, |c| c.name.clone().into())
            .field("email", FieldType::String, |c| c.email.clone().into())
            .field("balance", FieldType::Decimal, |c| c.balance.into())
            .field("active", FieldType::Bool, |c| c.active.into())
            .field("created_at", FieldType::DateTime, |c| c.created_at.into())
    }

    fn key(&self) -> i32 {
        self.id
    }

    fn set_key(&mut self, key: i32) {
        self.id = key;
    }
}

/// A short note keyed by a string identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            body: String::new(),
            pinned: false,
            priority: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Entity for Note {
    type Key = String;

    fn shape() -> Shape<Self> {
        Shape::<Self>::new("notes", "id")
            .field("id", FieldType::String, |n| n.id.clone().into())
            .field("title", FieldType::String, |n| n.title.clone().into())
            .field("body", FieldType::String, |n| n.body.clone().into())
            .field("pinned", FieldType::Bool, |n| n.pinned.into())
            .field("priority", FieldType::Byte, |n| n.priority.into())
            .field("updated_at", FieldType::DateTime, |n| n.updated_at.into())
    }

    fn key(&self) -> String {
        self.id.clone()
    }

    fn set_key(&mut self, key: String) {
        self.id = key;
    }
}

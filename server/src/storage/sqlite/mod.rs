//! SQLite-backed tables.
//!
//! Two flavours share the pool and row-decoding helpers in this module:
//! [`OrmTable`] maps records through the shape with query builders and
//! filters in memory, while [`SqlTable`] runs the engine's rendered SQL.

mod orm;
mod raw;

pub use orm::OrmTable;
pub use raw::SqlTable;

use std::str::FromStr;

use quarry_engine::{
    parse_datetime, Dialect, Entity, Error, FieldType, FieldValue, Result, Shape, SqlParam,
    SqlRenderer,
};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, QueryBuilder, Row, Sqlite, SqlitePool};

/// Open a pool for `url`, creating the database file if needed.
///
/// An in-memory database exists per connection, so memory URLs get a single
/// connection that is never recycled.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| Error::Configuration(format!("invalid database url '{url}': {e}")))?
        .create_if_missing(true);

    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
    };

    pool.map_err(|e| map_sqlx("connect", e))
}

/// Create the table for a shape if it does not exist.
pub(crate) async fn ensure_table<R>(pool: &SqlitePool, shape: &Shape<R>) -> Result<()> {
    let ddl = SqlRenderer::new(shape, Dialect::Sqlite).create_table()?;
    sqlx::query(&ddl)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx(&shape.table, e))?;
    tracing::debug!(table = %shape.table, "Ensured table");
    Ok(())
}

/// Convert a driver error at the adapter boundary.
pub(crate) fn map_sqlx(table: &str, err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::DuplicateKey(format!("{table}: {}", db.message()))
        }
        _ => {
            tracing::warn!(table = %table, error = %err, "SQLite call failed");
            Error::Transport(err.to_string())
        }
    }
}

pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: Vec<SqlParam>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<i64>),
            SqlParam::Int(v) => query.bind(v),
            SqlParam::Real(v) => query.bind(v),
            SqlParam::Text(s) => query.bind(s),
            SqlParam::Bool(b) => query.bind(b),
        };
    }
    query
}

pub(crate) fn push_param(builder: &mut QueryBuilder<'_, Sqlite>, param: SqlParam) {
    match param {
        SqlParam::Null => builder.push_bind(None::<i64>),
        SqlParam::Int(v) => builder.push_bind(v),
        SqlParam::Real(v) => builder.push_bind(v),
        SqlParam::Text(s) => builder.push_bind(s),
        SqlParam::Bool(b) => builder.push_bind(b),
    };
}

/// Read one column as the field's typed value.
fn decode_column(row: &SqliteRow, name: &str, field_type: FieldType) -> sqlx::Result<FieldValue> {
    let invalid = |raw: String| -> sqlx::Error {
        sqlx::Error::Decode(format!("column '{name}' holds '{raw}', not a {field_type}").into())
    };

    let value = match field_type {
        FieldType::String => row.try_get::<Option<String>, _>(name)?.map(FieldValue::String),
        FieldType::Char => match row.try_get::<Option<String>, _>(name)? {
            Some(s) => Some(FieldValue::Char(s.chars().next().ok_or_else(|| invalid(s.clone()))?)),
            None => None,
        },
        FieldType::DateTime => match row.try_get::<Option<String>, _>(name)? {
            Some(s) => Some(FieldValue::DateTime(parse_datetime(&s).ok_or_else(|| invalid(s.clone()))?)),
            None => None,
        },
        FieldType::Float32 => row
            .try_get::<Option<f64>, _>(name)?
            .map(|v| FieldValue::Float32(v as f32)),
        FieldType::Float64 => row.try_get::<Option<f64>, _>(name)?.map(FieldValue::Float64),
        FieldType::Decimal => match row.try_get::<Option<String>, _>(name)? {
            Some(s) => Some(FieldValue::Decimal(
                Decimal::from_str(&s).map_err(|_| invalid(s.clone()))?,
            )),
            None => None,
        },
        FieldType::Bool => row.try_get::<Option<i64>, _>(name)?.map(|v| FieldValue::Bool(v != 0)),
        integer => match row.try_get::<Option<i64>, _>(name)? {
            Some(v) => Some(integer_value(integer, v).ok_or_else(|| invalid(v.to_string()))?),
            None => None,
        },
    };

    Ok(value.unwrap_or(FieldValue::Null))
}

fn integer_value(field_type: FieldType, v: i64) -> Option<FieldValue> {
    let value = match field_type {
        FieldType::Int16 => FieldValue::Int16(i16::try_from(v).ok()?),
        FieldType::Int32 => FieldValue::Int32(i32::try_from(v).ok()?),
        FieldType::Int64 => FieldValue::Int64(v),
        FieldType::UInt16 => FieldValue::UInt16(u16::try_from(v).ok()?),
        FieldType::UInt32 => FieldValue::UInt32(u32::try_from(v).ok()?),
        FieldType::UInt64 => FieldValue::UInt64(u64::try_from(v).ok()?),
        FieldType::Byte => FieldValue::Byte(u8::try_from(v).ok()?),
        _ => return None,
    };
    Some(value)
}

/// JSON object holding every shape field present in the row.
pub(crate) fn row_to_json<R>(shape: &Shape<R>, row: &SqliteRow) -> Result<Value> {
    let mut object = Map::new();
    for column in row.columns() {
        let Some(field) = shape.lookup(column.name()) else {
            continue;
        };
        let value = decode_column(row, column.name(), field.field_type)
            .map_err(|e| map_sqlx(&shape.table, e))?;
        object.insert(field.name.clone(), value.to_json());
    }
    Ok(Value::Object(object))
}

/// Decode a full row into a record.
pub(crate) fn row_to_record<R: Entity>(shape: &Shape<R>, row: &SqliteRow) -> Result<R> {
    let json = row_to_json(shape, row)?;
    serde_json::from_value(json).map_err(|e| {
        Error::Transport(format!("row from '{}' does not decode: {e}", shape.table))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Customer;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_row_decodes_into_record() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let shape = Customer::shape();
        ensure_table(&pool, &shape).await.unwrap();

        sqlx::query(
            r#"INSERT INTO "customers" ("name", "email", "balance", "active", "created_at")
               VALUES (?, NULL, ?, ?, ?)"#,
        )
        .bind("Ada")
        .bind(12.5f64)
        .bind(1i64)
        .bind("2024-03-01T10:00:00.000000Z")
        .execute(&pool)
        .await
        .unwrap();

        let row = sqlx::query("SELECT * FROM \"customers\"")
            .fetch_one(&pool)
            .await
            .unwrap();
        let customer: Customer = row_to_record(&shape, &row).unwrap();

        assert_eq!(customer.id, 1);
        assert_eq!(customer.email, None);
        assert_eq!(customer.balance, Decimal::new(125, 1));
        assert!(customer.active);
        assert_eq!(
            customer.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unique_violation_maps_to_duplicate_key() {
        let pool = connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        let err = sqlx::query("INSERT INTO t (id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(matches!(map_sqlx("t", err), Error::DuplicateKey(_)));
    }
}

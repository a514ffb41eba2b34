//! Entity-mapped SQLite table.
//!
//! Statements are assembled from the record shape with `sqlx::QueryBuilder`,
//! much like an ORM maps an entity class to its table. Filtering happens in
//! memory after loading every row.

use async_trait::async_trait;
use quarry_engine::{
    sql::quote_ident, Dialect, Entity, Error, KeyKind, KeyValue, QueryFilter, RecordKey, Result,
    Shape, SqlParam,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use super::{ensure_table, map_sqlx, push_param, row_to_record};
use crate::storage::{entity_shape, filter_in_memory, not_found, Repository};

/// Repository over a SQLite table whose rows map one-to-one onto records.
#[derive(Debug, Clone)]
pub struct OrmTable<R: Entity> {
    pool: SqlitePool,
    shape: Shape<R>,
}

impl<R: Entity> OrmTable<R> {
    /// Bind to the record's table, creating it if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let shape = entity_shape::<R>()?;
        ensure_table(&pool, &shape).await?;
        Ok(Self { pool, shape })
    }

    fn table_ident(&self) -> String {
        quote_ident(&self.shape.table)
    }

    fn key_ident(&self) -> Result<String> {
        Ok(quote_ident(&self.shape.key()?.name))
    }

    fn insert_query(&self, record: &R, include_key: bool) -> Result<QueryBuilder<'static, Sqlite>> {
        let key = self.shape.key()?;
        let fields: Vec<_> = self
            .shape
            .fields
            .iter()
            .filter(|f| include_key || f.name != key.name)
            .collect();

        let mut builder = QueryBuilder::new(format!("INSERT INTO {} (", self.table_ident()));
        let columns: Vec<String> = fields.iter().map(|f| quote_ident(&f.name)).collect();
        builder.push(columns.join(", ")).push(") VALUES (");
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            push_param(
                &mut builder,
                SqlParam::encode(&field.name, &field.read(record), Dialect::Sqlite)?,
            );
        }
        builder.push(") RETURNING *");
        Ok(builder)
    }

    async fn insert_with(&self, conn: &mut SqliteConnection, record: &R, include_key: bool) -> Result<R> {
        let mut query = self.insert_query(record, include_key)?;
        let row = query
            .build()
            .fetch_one(conn)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;
        row_to_record(&self.shape, &row)
    }

    /// Largest stored key plus one, read on the caller's connection.
    async fn next_key(&self, conn: &mut SqliteConnection) -> Result<R::Key> {
        let sql = format!("SELECT MAX({}) FROM {}", self.key_ident()?, self.table_ident());
        let max: Option<i64> = sqlx::query_scalar(&sql)
            .fetch_one(conn)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;

        let current = max
            .map(|m| R::Key::from_key_value(KeyValue::Int(m)))
            .transpose()?;
        R::Key::successor(current.as_ref()).ok_or_else(|| {
            Error::Configuration(format!("table '{}' cannot derive a next key", self.shape.table))
        })
    }
}

#[async_trait]
impl<R: Entity> Repository<R> for OrmTable<R> {
    fn shape(&self) -> &Shape<R> {
        &self.shape
    }

    async fn fetch_all(&self) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} ASC",
            self.table_ident(),
            self.key_ident()?
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;
        rows.iter().map(|row| row_to_record(&self.shape, row)).collect()
    }

    async fn fetch_filtered(&self, filter: &QueryFilter) -> Result<Vec<R>> {
        let records = self.fetch_all().await?;
        filter_in_memory(&self.shape, filter, records)
    }

    async fn fetch_by_id(&self, id: &R::Key) -> Result<Option<R>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT * FROM {} WHERE {} = ",
            self.table_ident(),
            self.key_ident()?
        ));
        push_param(&mut query, SqlParam::from(&id.to_key_value()));

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;
        row.map(|row| row_to_record(&self.shape, &row)).transpose()
    }

    async fn insert(&self, mut record: R) -> Result<R> {
        let key = record.key();

        let stored = if !key.is_unset() {
            let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            self.insert_with(&mut *conn, &record, true).await?
        } else if self.shape.key_generated {
            let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            self.insert_with(&mut *conn, &record, false).await?
        } else if R::Key::KIND == KeyKind::String {
            record.set_key(R::Key::from_key_value(KeyValue::Text(
                uuid::Uuid::new_v4().to_string(),
            ))?);
            let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            self.insert_with(&mut *conn, &record, true).await?
        } else {
            let mut tx = self.pool.begin().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            record.set_key(self.next_key(&mut *tx).await?);
            let stored = self.insert_with(&mut *tx, &record, true).await?;
            tx.commit().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            stored
        };

        tracing::debug!(table = %self.shape.table, key = %stored.key(), "Inserted record");
        Ok(stored)
    }

    async fn update(&self, record: R) -> Result<R> {
        let key = self.shape.key()?;
        let mut query = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", self.table_ident()));
        let mut first = true;
        for field in self.shape.fields.iter().filter(|f| f.name != key.name) {
            if !first {
                query.push(", ");
            }
            first = false;
            query.push(quote_ident(&field.name)).push(" = ");
            push_param(
                &mut query,
                SqlParam::encode(&field.name, &field.read(&record), Dialect::Sqlite)?,
            );
        }
        query.push(format!(" WHERE {} = ", quote_ident(&key.name)));
        push_param(&mut query, SqlParam::from(&record.key().to_key_value()));
        query.push(" RETURNING *");

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;

        match row {
            Some(row) => row_to_record(&self.shape, &row),
            None => Err(not_found::<R>(&self.shape.table, &record.key())),
        }
    }

    async fn delete_by_id(&self, id: &R::Key) -> Result<bool> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "DELETE FROM {} WHERE {} = ",
            self.table_ident(),
            self.key_ident()?
        ));
        push_param(&mut query, SqlParam::from(&id.to_key_value()));

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> Result<()> {
        let sql = format!("DELETE FROM {}", self.table_ident());
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;
        tracing::debug!(table = %self.shape.table, "Cleared table");
        Ok(())
    }
}

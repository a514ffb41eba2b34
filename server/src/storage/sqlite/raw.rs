//! Raw-SQL SQLite table.
//!
//! Every statement comes from the engine's [`SqlRenderer`], so filters run
//! inside the database instead of in memory.

use async_trait::async_trait;
use quarry_engine::{
    Dialect, Entity, Error, KeyKind, KeyValue, QueryFilter, RecordKey, Result, Shape, SqlRenderer,
    SqlStatement,
};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{SqliteConnection, SqlitePool};

use super::{bind_params, ensure_table, map_sqlx, row_to_json, row_to_record};
use crate::storage::{entity_shape, not_found, Repository};

/// Repository that executes rendered, parameterized SQL.
#[derive(Debug, Clone)]
pub struct SqlTable<R: Entity> {
    pool: SqlitePool,
    shape: Shape<R>,
    /// Whether SQLite assigns keys (the key column is the rowid alias)
    key_generated: bool,
}

impl<R: Entity> SqlTable<R> {
    /// Bind to the record's table, creating it if needed, and inspect it to
    /// learn whether the database generates keys.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let shape = entity_shape::<R>()?;
        ensure_table(&pool, &shape).await?;

        let columns: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT name, type, pk FROM pragma_table_info(?)")
                .bind(&shape.table)
                .fetch_all(&pool)
                .await
                .map_err(|e| map_sqlx(&shape.table, e))?;

        let key_name = shape.key()?.name.clone();
        let key_generated = columns
            .iter()
            .any(|(name, ty, pk)| *pk == 1 && *name == key_name && ty.eq_ignore_ascii_case("INTEGER"));

        tracing::debug!(table = %shape.table, key_generated, "Inspected table");
        Ok(Self {
            pool,
            shape,
            key_generated,
        })
    }

    pub fn key_generated(&self) -> bool {
        self.key_generated
    }

    fn renderer(&self) -> SqlRenderer<'_, R> {
        SqlRenderer::new(&self.shape, Dialect::Sqlite)
    }

    async fn rows(&self, stmt: SqlStatement) -> Result<Vec<SqliteRow>> {
        let SqlStatement { sql, params } = stmt;
        bind_params(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))
    }

    async fn affected(&self, stmt: SqlStatement) -> Result<u64> {
        let SqlStatement { sql, params } = stmt;
        let result = bind_params(sqlx::query(&sql), params)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;
        Ok(result.rows_affected())
    }

    async fn insert_on(&self, conn: &mut SqliteConnection, record: &R, include_key: bool) -> Result<R> {
        let SqlStatement { sql, params } = self.renderer().insert(record, include_key)?;
        let row = bind_params(sqlx::query(&sql), params)
            .fetch_one(conn)
            .await
            .map_err(|e| map_sqlx(&self.shape.table, e))?;
        row_to_record(&self.shape, &row)
    }

    /// `max(key) + 1` read on the caller's connection.
    ///
    /// Run inside a transaction this narrows, but does not close, the window
    /// in which two writers can pick the same key; the primary key constraint
    /// turns the loser into a duplicate-key error.
    async fn next_key(&self, conn: &mut SqliteConnection) -> Result<R::Key> {
        let SqlStatement { sql, .. } = self.renderer().select_max_key()?;
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
impl<R: Entity> Repository<R> for SqlTable<R> {
    fn shape(&self) -> &Shape<R> {
        &self.shape
    }

    async fn fetch_all(&self) -> Result<Vec<R>> {
        let rows = self.rows(self.renderer().select_all()?).await?;
        rows.iter().map(|row| row_to_record(&self.shape, row)).collect()
    }

    async fn fetch_filtered(&self, filter: &QueryFilter) -> Result<Vec<R>> {
        let stmt = self.renderer().select(&filter.without_projection())?;
        tracing::debug!(table = %self.shape.table, sql = %stmt.sql, "Running filtered select");
        let rows = self.rows(stmt).await?;
        rows.iter().map(|row| row_to_record(&self.shape, row)).collect()
    }

    async fn fetch_projected(&self, filter: &QueryFilter) -> Result<Vec<Value>> {
        let rows = self.rows(self.renderer().select(filter)?).await?;
        rows.iter().map(|row| row_to_json(&self.shape, row)).collect()
    }

    async fn fetch_by_id(&self, id: &R::Key) -> Result<Option<R>> {
        let rows = self
            .rows(self.renderer().select_by_key(&id.to_key_value())?)
            .await?;
        rows.first()
            .map(|row| row_to_record(&self.shape, row))
            .transpose()
    }

    async fn insert(&self, mut record: R) -> Result<R> {
        let key = record.key();

        let stored = if !key.is_unset() || self.key_generated {
            let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            self.insert_on(&mut *conn, &record, !key.is_unset()).await?
        } else if R::Key::KIND == KeyKind::String {
            record.set_key(R::Key::from_key_value(KeyValue::Text(
                uuid::Uuid::new_v4().to_string(),
            ))?);
            let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            self.insert_on(&mut *conn, &record, true).await?
        } else {
            let mut tx = self.pool.begin().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            record.set_key(self.next_key(&mut *tx).await?);
            let stored = self.insert_on(&mut *tx, &record, true).await?;
            tx.commit().await.map_err(|e| map_sqlx(&self.shape.table, e))?;
            stored
        };

        tracing::debug!(table = %self.shape.table, key = %stored.key(), "Inserted record");
        Ok(stored)
    }

    async fn update(&self, record: R) -> Result<R> {
        let affected = self.affected(self.renderer().update(&record)?).await?;
        if affected == 0 {
            return Err(not_found::<R>(&self.shape.table, &record.key()));
        }
        Ok(record)
    }

    async fn delete_by_id(&self, id: &R::Key) -> Result<bool> {
        let affected = self
            .affected(self.renderer().delete_by_key(&id.to_key_value())?)
            .await?;
        Ok(affected > 0)
    }

    async fn delete_all(&self) -> Result<()> {
        self.affected(self.renderer().delete_all()).await?;
        tracing::debug!(table = %self.shape.table, "Cleared table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Customer;
    use crate::storage::sqlite::connect;
    use crate::storage::MemoryTable;
    use quarry_engine::{ComparisonOp, FieldType, FilterCondition};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ticket {
        id: i64,
        title: String,
        priority: i16,
        estimate: Option<f64>,
    }

    impl Entity for Ticket {
        type Key = i64;

        fn shape() -> Shape<Self> {
            Shape::<Self>::new("tickets", "id")
                .field("id", FieldType::Int64, |t| t.id.into())
                .field("title", FieldType::String, |t| t.title.clone().into())
                .field("priority", FieldType::Int16, |t| t.priority.into())
                .field("estimate", FieldType::Float64, |t| t.estimate.into())
        }

        fn key(&self) -> i64 {
            self.id
        }

        fn set_key(&mut self, key: i64) {
            self.id = key;
        }
    }

    fn ticket(title: &str, priority: i16, estimate: Option<f64>) -> Ticket {
        Ticket {
            id: 0,
            title: title.into(),
            priority,
            estimate,
        }
    }

    fn tickets() -> Vec<Ticket> {
        vec![
            ticket("Fix login", 2, Some(3.0)),
            ticket("fix logout", 1, None),
            ticket("Write docs", 3, Some(1.5)),
            ticket("Review 100% of PRs", 2, Some(8.0)),
            ticket("release_v2", 1, Some(0.5)),
            ticket("FIX build", 3, None),
        ]
    }

    #[tokio::test]
    async fn test_detects_generated_key() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let customers = SqlTable::<Customer>::new(pool.clone()).await.unwrap();
        let tickets = SqlTable::<Ticket>::new(pool).await.unwrap();

        assert!(customers.key_generated());
        assert!(!tickets.key_generated());
    }

    #[tokio::test]
    async fn test_external_keys_use_max_plus_one() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let table = SqlTable::<Ticket>::new(pool).await.unwrap();

        let first = table.insert(ticket("a", 1, None)).await.unwrap();
        assert_eq!(first.id, 1);

        let mut chosen = ticket("b", 1, None);
        chosen.id = 40;
        table.insert(chosen.clone()).await.unwrap();

        let next = table.insert(ticket("c", 1, None)).await.unwrap();
        assert_eq!(next.id, 41);

        assert!(matches!(
            table.insert(chosen).await,
            Err(Error::DuplicateKey(_))
        ));
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let table = SqlTable::<Customer>::new(pool).await.unwrap();

        let mut ada = table.insert(Customer::new("Ada")).await.unwrap();
        assert_ne!(ada.id, 0);

        ada.name = "Ada L.".into();
        table.update(ada.clone()).await.unwrap();
        assert_eq!(table.fetch_by_id(&ada.id).await.unwrap().unwrap().name, "Ada L.");

        assert!(matches!(
            table.update(Customer::new("Ghost").with_key(77)).await,
            Err(Error::NotFound(_))
        ));

        assert!(table.delete_by_id(&ada.id).await.unwrap());
        assert!(table.fetch_by_id(&ada.id).await.unwrap().is_none());
        table.delete_all().await.unwrap();
        table.delete_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_sql_and_memory_agree() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let sql = SqlTable::<Ticket>::new(pool).await.unwrap();
        let memory = MemoryTable::<Ticket>::new().unwrap();
        for t in tickets() {
            sql.insert(t.clone()).await.unwrap();
            memory.insert(t).await.unwrap();
        }

        let filters = vec![
            QueryFilter::new(),
            QueryFilter::new().filter("title", ComparisonOp::StartsWith, "fix"),
            QueryFilter::new().with_condition(
                FilterCondition::new("title", ComparisonOp::StartsWith, "fix").case_sensitive(true),
            ),
            QueryFilter::new().filter("title", ComparisonOp::Contains, "100%"),
            QueryFilter::new().filter("title", ComparisonOp::Contains, "_"),
            QueryFilter::new().filter("title", ComparisonOp::EndsWith, "S"),
            QueryFilter::new().filter("title", ComparisonOp::Equals, "write DOCS"),
            QueryFilter::new()
                .filter("priority", ComparisonOp::GreaterThanOrEqual, "2")
                .order_by_desc("priority"),
            QueryFilter::new().filter("estimate", ComparisonOp::LessThan, "4"),
            QueryFilter::new().filter("estimate", ComparisonOp::NotEquals, "3"),
            QueryFilter::new().order_by("estimate"),
            QueryFilter::new().order_by_desc("estimate"),
            QueryFilter::new().order_by("title"),
        ];

        for filter in filters {
            let from_sql = sql.fetch_filtered(&filter).await.unwrap();
            let from_memory = memory.fetch_filtered(&filter).await.unwrap();
            assert_eq!(from_sql, from_memory, "filter {filter:?}");
        }
    }

    #[tokio::test]
    async fn test_decimals_keep_precision_and_order_by_value() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let sql = SqlTable::<Customer>::new(pool).await.unwrap();
        let memory = MemoryTable::<Customer>::new().unwrap();
        for (name, balance) in [
            ("Ada", "12345678901234567.89"),
            ("Grace", "9.5"),
            ("Linus", "10.25"),
            ("Ken", "100.005"),
        ] {
            let mut customer = Customer::new(name);
            customer.balance = balance.parse().unwrap();
            sql.insert(customer.clone()).await.unwrap();
            memory.insert(customer).await.unwrap();
        }

        let ada = sql.fetch_by_id(&1).await.unwrap().unwrap();
        assert_eq!(ada.balance.to_string(), "12345678901234567.89");

        let filters = vec![
            QueryFilter::new().order_by("balance"),
            QueryFilter::new()
                .filter("balance", ComparisonOp::GreaterThan, "9.75")
                .order_by_desc("balance"),
            QueryFilter::new().filter("balance", ComparisonOp::Equals, "9.50"),
        ];
        for filter in filters {
            let from_sql = sql.fetch_filtered(&filter).await.unwrap();
            let from_memory = memory.fetch_filtered(&filter).await.unwrap();
            let names = |rows: Vec<Customer>| rows.into_iter().map(|c| c.name).collect::<Vec<_>>();
            assert_eq!(names(from_sql), names(from_memory), "filter {filter:?}");
        }
    }

    #[tokio::test]
    async fn test_projection_runs_in_sql() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let table = SqlTable::<Ticket>::new(pool).await.unwrap();
        for t in tickets() {
            table.insert(t).await.unwrap();
        }

        let filter = QueryFilter::new()
            .filter("priority", ComparisonOp::Equals, "3")
            .include(["TITLE"]);
        let projected = table.fetch_projected(&filter).await.unwrap();
        assert_eq!(
            projected,
            vec![
                serde_json::json!({"title": "Write docs"}),
                serde_json::json!({"title": "FIX build"}),
            ]
        );

        let bad = QueryFilter::new().filter("title", ComparisonOp::LessThan, "x").include(["nope"]);
        assert!(matches!(
            table.fetch_projected(&bad).await,
            Err(Error::Configuration(_))
        ));
    }
}

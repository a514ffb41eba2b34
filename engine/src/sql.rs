//! Parameterized SQL rendering.
//!
//! [`SqlRenderer`] turns a [`QueryFilter`] (and the plain CRUD statements the
//! raw-SQL adapter needs) into SQL text plus an ordered parameter list.
//! Identifiers always come from the record shape and are quoted; values are
//! always bound, never spliced into the text.

use crate::{
    compare::Comparator, error::Result, value::canonical_timestamp, ComparisonOp, Error, FieldType,
    FieldValue, KeyValue, QueryFilter, Shape,
};
use serde::{Deserialize, Serialize};

/// Target SQL flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
}

impl Dialect {
    fn collation(self) -> &'static str {
        match self {
            Dialect::Sqlite => "COLLATE BINARY",
            Dialect::Postgres => "COLLATE \"C\"",
        }
    }
}

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl SqlParam {
    /// Storage form of a field value.
    ///
    /// Text-like values (strings, chars, timestamps) are stored as text with
    /// timestamps in fixed-width form, integers as 64-bit integers and floats
    /// as reals. Decimals are stored as their exact text and compared through
    /// a numeric cast. SQLite has no boolean type and stores 0/1.
    ///
    /// Unsigned 64-bit values above `i64::MAX` have no SQL integer form and
    /// are rejected as invalid values.
    pub fn encode(field: &str, value: &FieldValue, dialect: Dialect) -> Result<Self> {
        let param = match value {
            FieldValue::Null => SqlParam::Null,
            FieldValue::String(s) => SqlParam::Text(s.clone()),
            FieldValue::Char(c) => SqlParam::Text(c.to_string()),
            FieldValue::DateTime(dt) => SqlParam::Text(canonical_timestamp(dt)),
            FieldValue::Int16(v) => SqlParam::Int(i64::from(*v)),
            FieldValue::Int32(v) => SqlParam::Int(i64::from(*v)),
            FieldValue::Int64(v) => SqlParam::Int(*v),
            FieldValue::UInt16(v) => SqlParam::Int(i64::from(*v)),
            FieldValue::UInt32(v) => SqlParam::Int(i64::from(*v)),
            FieldValue::UInt64(v) => SqlParam::Int(i64::try_from(*v).map_err(|_| Error::InvalidValue {
                field: field.to_string(),
                value: v.to_string(),
                expected: FieldType::Int64,
            })?),
            FieldValue::Byte(v) => SqlParam::Int(i64::from(*v)),
            FieldValue::Float32(v) => SqlParam::Real(f64::from(*v)),
            FieldValue::Float64(v) => SqlParam::Real(*v),
            FieldValue::Decimal(d) => SqlParam::Text(d.to_string()),
            FieldValue::Bool(b) => match dialect {
                Dialect::Sqlite => SqlParam::Int(i64::from(*b)),
                Dialect::Postgres => SqlParam::Bool(*b),
            },
        };
        Ok(param)
    }
}

impl From<&KeyValue> for SqlParam {
    fn from(key: &KeyValue) -> Self {
        match key {
            KeyValue::Int(v) => SqlParam::Int(*v),
            KeyValue::Text(s) => SqlParam::Text(s.clone()),
        }
    }
}

/// Rendered SQL text with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape `%`, `_` and the escape character itself for a `LIKE … ESCAPE '\'`.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape SQLite `GLOB` metacharacters by wrapping them in brackets.
pub fn escape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            other => out.push(other),
        }
    }
    out
}

struct Builder {
    dialect: Dialect,
    sql: String,
    params: Vec<SqlParam>,
}

impl Builder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    fn bind(&mut self, param: SqlParam) -> &mut Self {
        self.params.push(param);
        match self.dialect {
            Dialect::Sqlite => self.sql.push('?'),
            Dialect::Postgres => {
                let n = self.params.len();
                self.sql.push_str(&format!("${n}"));
            }
        }
        self
    }

    fn finish(self) -> SqlStatement {
        SqlStatement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Renders statements for one record shape.
#[derive(Debug)]
pub struct SqlRenderer<'a, R> {
    shape: &'a Shape<R>,
    dialect: Dialect,
}

impl<'a, R> SqlRenderer<'a, R> {
    pub fn new(shape: &'a Shape<R>, dialect: Dialect) -> Self {
        Self { shape, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn table(&self) -> String {
        quote_ident(&self.shape.table)
    }

    fn key_column(&self) -> Result<String> {
        Ok(quote_ident(&self.shape.key()?.name))
    }

    /// `CREATE TABLE IF NOT EXISTS` for the shape.
    ///
    /// A storage-generated integer key becomes the rowid alias
    /// (`INTEGER PRIMARY KEY`) so the engine assigns it on insert.
    pub fn create_table(&self) -> Result<String> {
        let key = self.shape.key()?;
        let columns: Vec<String> = self
            .shape
            .fields
            .iter()
            .map(|field| {
                let ty = if field.name == key.name {
                    self.key_column_type(field.field_type)
                } else {
                    column_type(field.field_type, self.dialect).to_string()
                };
                format!("{} {ty}", quote_ident(&field.name))
            })
            .collect();

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table(),
            columns.join(", ")
        ))
    }

    fn key_column_type(&self, field_type: FieldType) -> String {
        match (self.dialect, field_type.is_string(), self.shape.key_generated) {
            (_, true, _) => "TEXT PRIMARY KEY NOT NULL".into(),
            (Dialect::Sqlite, false, true) => "INTEGER PRIMARY KEY".into(),
            (Dialect::Postgres, false, true) => "BIGSERIAL PRIMARY KEY".into(),
            (_, false, false) => "BIGINT PRIMARY KEY NOT NULL".into(),
        }
    }

    /// `SELECT` for a query filter.
    pub fn select(&self, filter: &QueryFilter) -> Result<SqlStatement> {
        let mut columns: Vec<&str> = Vec::new();
        for name in &filter.include_fields {
            let canonical = self.shape.resolve(name)?.name.as_str();
            if !columns.contains(&canonical) {
                columns.push(canonical);
            }
        }

        let mut b = Builder::new(self.dialect);
        b.push("SELECT ");
        if columns.is_empty() {
            b.push("*");
        } else {
            let list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            b.push(&list.join(", "));
        }
        b.push(" FROM ").push(&self.table());

        for (i, condition) in filter.conditions.iter().enumerate() {
            let field = self.shape.resolve(&condition.field_name)?;
            let comparator = Comparator::compile(field.field_type, condition)?;
            b.push(if i == 0 { " WHERE " } else { " AND " });
            self.condition(&mut b, &field.name, &comparator)?;
        }

        if let Some(name) = &filter.order_by_field {
            let field = self.shape.resolve(name)?;
            let key = self.shape.key()?;
            let direction = if filter.order_by_descending {
                "DESC NULLS LAST"
            } else {
                "ASC NULLS FIRST"
            };
            b.push(" ORDER BY ")
                .push(&sort_expr(&quote_ident(&field.name), field.field_type))
                .push(" ")
                .push(direction);
            if field.name != key.name {
                b.push(", ").push(&quote_ident(&key.name)).push(" ASC");
            }
        } else {
            b.push(" ORDER BY ").push(&self.key_column()?).push(" ASC");
        }

        Ok(b.finish())
    }

    fn condition(&self, b: &mut Builder, name: &str, comparator: &Comparator) -> Result<()> {
        let column = quote_ident(name);
        let op = comparator.op();
        let operand = comparator.operand();

        if !comparator.field_type().is_string() {
            let param = SqlParam::encode(name, operand, self.dialect)?;
            let field_type = comparator.field_type();
            b.push(&sort_expr(&column, field_type))
                .push(" ")
                .push(binary_operator(op))
                .push(" ");
            if field_type == FieldType::Decimal {
                b.push("CAST(").bind(param).push(" AS NUMERIC)");
            } else {
                b.bind(param);
            }
            return Ok(());
        }

        let text = operand.as_str().unwrap_or_default().to_string();
        let case_sensitive = comparator.is_case_sensitive();

        if op.is_substring() {
            let (prefix, suffix) = match op {
                ComparisonOp::StartsWith => ("", true),
                ComparisonOp::EndsWith => ("%", false),
                _ => ("%", true),
            };

            if case_sensitive && self.dialect == Dialect::Sqlite {
                let wild = |s: &str| s.replace('%', "*");
                b.push(&column).push(" GLOB (");
                if !prefix.is_empty() {
                    b.push(&format!("'{}' || ", wild(prefix)));
                }
                b.bind(SqlParam::Text(escape_glob(&text)));
                if suffix {
                    b.push(" || '*'");
                }
                b.push(")");
                return Ok(());
            }

            if case_sensitive {
                b.push(&column).push(" ").push(self.dialect.collation());
            } else {
                b.push("lower(").push(&column).push(")");
            }
            b.push(" LIKE (");
            if !prefix.is_empty() {
                b.push(&format!("'{prefix}' || "));
            }
            if case_sensitive {
                b.bind(SqlParam::Text(escape_like(&text)));
            } else {
                b.push("lower(").bind(SqlParam::Text(escape_like(&text))).push(")");
            }
            if suffix {
                b.push(" || '%'");
            }
            b.push(") ESCAPE '\\'");
            return Ok(());
        }

        if case_sensitive {
            b.push(&column)
                .push(" ")
                .push(binary_operator(op))
                .push(" ")
                .bind(SqlParam::Text(text))
                .push(" ")
                .push(self.dialect.collation());
        } else {
            b.push("lower(")
                .push(&column)
                .push(") ")
                .push(binary_operator(op))
                .push(" lower(")
                .bind(SqlParam::Text(text))
                .push(")");
        }
        Ok(())
    }

    /// Every row in key order.
    pub fn select_all(&self) -> Result<SqlStatement> {
        let mut b = Builder::new(self.dialect);
        b.push("SELECT * FROM ")
            .push(&self.table())
            .push(" ORDER BY ")
            .push(&self.key_column()?)
            .push(" ASC");
        Ok(b.finish())
    }

    pub fn select_by_key(&self, key: &KeyValue) -> Result<SqlStatement> {
        let mut b = Builder::new(self.dialect);
        b.push("SELECT * FROM ")
            .push(&self.table())
            .push(" WHERE ")
            .push(&self.key_column()?)
            .push(" = ")
            .bind(key.into());
        Ok(b.finish())
    }

    pub fn select_max_key(&self) -> Result<SqlStatement> {
        let mut b = Builder::new(self.dialect);
        b.push("SELECT MAX(")
            .push(&self.key_column()?)
            .push(") FROM ")
            .push(&self.table());
        Ok(b.finish())
    }

    /// `INSERT … RETURNING *`. The key column is left out when the storage
    /// engine assigns it.
    pub fn insert(&self, record: &R, include_key: bool) -> Result<SqlStatement> {
        let key = self.shape.key()?;
        let fields: Vec<_> = self
            .shape
            .fields
            .iter()
            .filter(|f| include_key || f.name != key.name)
            .collect();

        let mut b = Builder::new(self.dialect);
        let columns: Vec<String> = fields.iter().map(|f| quote_ident(&f.name)).collect();
        b.push("INSERT INTO ")
            .push(&self.table())
            .push(" (")
            .push(&columns.join(", "))
            .push(") VALUES (");
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.bind(SqlParam::encode(&field.name, &field.read(record), self.dialect)?);
        }
        b.push(") RETURNING *");
        Ok(b.finish())
    }

    /// `UPDATE … WHERE key = ?` setting every non-key column.
    pub fn update(&self, record: &R) -> Result<SqlStatement> {
        let key = self.shape.key()?;
        let mut b = Builder::new(self.dialect);
        b.push("UPDATE ").push(&self.table()).push(" SET ");
        let mut first = true;
        for field in self.shape.fields.iter().filter(|f| f.name != key.name) {
            if !first {
                b.push(", ");
            }
            first = false;
            b.push(&quote_ident(&field.name))
                .push(" = ")
                .bind(SqlParam::encode(&field.name, &field.read(record), self.dialect)?);
        }
        b.push(" WHERE ")
            .push(&quote_ident(&key.name))
            .push(" = ")
            .bind(SqlParam::encode(&key.name, &key.read(record), self.dialect)?);
        Ok(b.finish())
    }

    pub fn delete_by_key(&self, key: &KeyValue) -> Result<SqlStatement> {
        let mut b = Builder::new(self.dialect);
        b.push("DELETE FROM ")
            .push(&self.table())
            .push(" WHERE ")
            .push(&self.key_column()?)
            .push(" = ")
            .bind(key.into());
        Ok(b.finish())
    }

    pub fn delete_all(&self) -> SqlStatement {
        let mut b = Builder::new(self.dialect);
        b.push("DELETE FROM ").push(&self.table());
        b.finish()
    }
}

fn binary_operator(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Equals => "=",
        ComparisonOp::NotEquals => "<>",
        ComparisonOp::LessThan => "<",
        ComparisonOp::GreaterThan => ">",
        ComparisonOp::LessThanOrEqual => "<=",
        ComparisonOp::GreaterThanOrEqual => ">=",
        ComparisonOp::StartsWith | ComparisonOp::EndsWith | ComparisonOp::Contains => "LIKE",
    }
}

/// Expression a column is compared and ordered by. Decimal text is cast so
/// it orders by value.
fn sort_expr(column: &str, field_type: FieldType) -> String {
    match field_type {
        FieldType::Decimal => format!("CAST({column} AS NUMERIC)"),
        _ => column.to_string(),
    }
}

/// Column type used to store a field.
pub fn column_type(field_type: FieldType, dialect: Dialect) -> &'static str {
    match (dialect, field_type) {
        (_, FieldType::String | FieldType::Char | FieldType::DateTime) => "TEXT",
        (Dialect::Sqlite, FieldType::Decimal) => "TEXT",
        (Dialect::Sqlite, FieldType::Float32 | FieldType::Float64) => "REAL",
        (Dialect::Sqlite, _) => "INTEGER",
        (Dialect::Postgres, FieldType::Int16 | FieldType::Byte) => "SMALLINT",
        (Dialect::Postgres, FieldType::Int32 | FieldType::UInt16) => "INTEGER",
        (Dialect::Postgres, FieldType::Int64 | FieldType::UInt32 | FieldType::UInt64) => "BIGINT",
        (Dialect::Postgres, FieldType::Float32) => "REAL",
        (Dialect::Postgres, FieldType::Float64) => "DOUBLE PRECISION",
        (Dialect::Postgres, FieldType::Decimal) => "NUMERIC",
        (Dialect::Postgres, FieldType::Bool) => "BOOLEAN",
    }
}

//! Storage backend adapter - one query interface over two SQL dialects
//!
//! Logical SQL is written once with `$n` placeholders and a dialect token
//! for case-insensitive substring match; the active backend translates at
//! execution time. Rows come back as uniform name->value records so nothing
//! backend-native leaks past this module.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::application::errors::StorageError;

pub mod postgres;
pub mod repository;
pub mod schema;
pub mod sqlite;
pub mod state;

pub use repository::Repository;
pub use state::StateStore;

/// The relational engine behind the adapter. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Auto-incrementing primary key column definition.
    pub fn pk_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Column type for foreign keys referencing a primary key.
    pub fn ref_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER",
            Dialect::Postgres => "BIGINT",
        }
    }

    /// Timestamp column default clause.
    pub fn timestamp_default(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "DEFAULT CURRENT_TIMESTAMP",
            Dialect::Postgres => "DEFAULT NOW()",
        }
    }

    /// Case-insensitive substring match operator. SQLite `LIKE` is already
    /// case-insensitive for ASCII; Postgres needs `ILIKE`.
    pub fn like_operator(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "LIKE",
            Dialect::Postgres => "ILIKE",
        }
    }

    /// Whether `INSERT ... RETURNING id` is available.
    pub fn supports_returning(&self) -> bool {
        match self {
            Dialect::Sqlite => false,
            Dialect::Postgres => true,
        }
    }
}

/// A parameter or result value. The one value representation both backends
/// bind from and normalize to.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A normalized row: column name -> value, identical for both backends.
#[derive(Debug, Clone, Default)]
pub struct Record(BTreeMap<String, SqlValue>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: SqlValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&SqlValue> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            SqlValue::Float(v) => Some(*v),
            SqlValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            SqlValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_str(key).map(|s| s.to_string())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            SqlValue::Bool(v) => Some(*v),
            SqlValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, StorageError> {
        self.get_i64(key)
            .ok_or_else(|| StorageError::Execution(format!("missing integer column '{}'", key)))
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, StorageError> {
        self.get_f64(key)
            .ok_or_else(|| StorageError::Execution(format!("missing numeric column '{}'", key)))
    }

    pub fn require_string(&self, key: &str) -> Result<String, StorageError> {
        self.get_string(key)
            .ok_or_else(|| StorageError::Execution(format!("missing text column '{}'", key)))
    }
}

/// One transactional scope. Every session begins a transaction on creation;
/// the caller either commits or rolls back, and dropping an open session
/// rolls back as a backstop.
#[async_trait]
pub trait StorageSession: Send {
    fn dialect(&self) -> Dialect;

    /// Execute a statement, returning the number of affected rows. The
    /// SQLite session rewrites `$n` placeholders to `?n` outside quoted
    /// literals; Postgres executes the logical SQL as written.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError>;

    /// Run a query and normalize the first row, if any.
    async fn query_one(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Record>, StorageError>;

    /// Run a query and normalize every row.
    async fn query_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Record>, StorageError>;

    /// Most recent auto-generated primary key within this transaction.
    /// Only meaningful on backends without `RETURNING`; the Postgres
    /// session reads the table's serial sequence instead.
    async fn last_insert_id(&mut self, table: &str) -> Result<i64, StorageError>;

    async fn commit(&mut self) -> Result<(), StorageError>;

    async fn rollback(&mut self) -> Result<(), StorageError>;
}

/// Storage backend - connection management plus dialect description.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Open a transactional session.
    async fn session(&self) -> Result<Box<dyn StorageSession>, StorageError>;
}

/// Insert a row and return its generated primary key, using whichever of
/// the two id-retrieval paths the dialect supports.
pub async fn insert_returning_id(
    sess: &mut dyn StorageSession,
    sql: &str,
    params: &[SqlValue],
    table: &str,
) -> Result<i64, StorageError> {
    if sess.dialect().supports_returning() {
        let row = sess
            .query_one(&format!("{} RETURNING id", sql), params)
            .await?
            .ok_or_else(|| StorageError::Execution("insert returned no row".to_string()))?;
        row.require_i64("id")
    } else {
        sess.execute(sql, params).await?;
        sess.last_insert_id(table).await
    }
}

/// Rewrite `$n` placeholders to SQLite's `?n`, leaving anything inside
/// single-quoted literals untouched.
pub(crate) fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c == '$' && !in_literal {
            if matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                out.push('?');
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Connect to the backend selected by the configured URL. A missing URL
/// falls back to the embedded SQLite file with a warning.
pub async fn connect(url: Option<&str>) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match url {
        Some(u) if u.starts_with("postgres:") || u.starts_with("postgresql:") => {
            let backend = postgres::PostgresBackend::connect(u).await?;
            tracing::info!("Connected to PostgreSQL backend");
            Ok(Arc::new(backend))
        }
        Some(u) if u.starts_with("sqlite:") => {
            let path = sqlite_path(u);
            let backend = sqlite::SqliteBackend::open(path)?;
            tracing::info!(path, "Opened SQLite backend");
            Ok(Arc::new(backend))
        }
        Some(u) => Err(StorageError::Unavailable(format!(
            "unrecognized database url scheme: {}",
            u
        ))),
        None => {
            tracing::warn!("No database url configured, using local SQLite: mina.db");
            let backend = sqlite::SqliteBackend::open("mina.db")?;
            Ok(Arc::new(backend))
        }
    }
}

fn sqlite_path(url: &str) -> &str {
    let rest = url.trim_start_matches("sqlite:");
    if let Some(p) = rest.strip_prefix("///") {
        p
    } else if let Some(p) = rest.strip_prefix("//") {
        p
    } else {
        rest
    }
}

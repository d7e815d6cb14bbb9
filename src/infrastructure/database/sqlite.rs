//! SQLite backend (embedded, file-based default)
//!
//! A single bundled `rusqlite` connection guarded by an async mutex; a
//! session owns the lock for the duration of its transaction, so statement
//! order within a transaction is trivially serialized.

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::application::errors::StorageError;

use super::{rewrite_placeholders, Dialect, Record, SqlValue, StorageBackend, StorageSession};

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Unavailable(format!("sqlite open failed: {}", e)))?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Unavailable(format!("sqlite open failed: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(map_sqlite_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn session(&self) -> Result<Box<dyn StorageSession>, StorageError> {
        let guard = self.conn.clone().lock_owned().await;
        guard
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(map_sqlite_error)?;
        Ok(Box::new(SqliteSession { conn: guard, open: true }))
    }
}

struct SqliteSession {
    conn: OwnedMutexGuard<Connection>,
    open: bool,
}

impl SqliteSession {
    fn run_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>, StorageError> {
        let sql = rewrite_placeholders(sql);
        let mut stmt = self.conn.prepare(&sql).map_err(map_sqlite_error)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(map_sqlite_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            let mut rec = Record::new();
            for (i, name) in columns.iter().enumerate() {
                let value = match row.get_ref(i).map_err(map_sqlite_error)? {
                    ValueRef::Null => SqlValue::Null,
                    ValueRef::Integer(v) => SqlValue::Int(v),
                    ValueRef::Real(v) => SqlValue::Float(v),
                    ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(_) => SqlValue::Null,
                };
                rec.insert(name.clone(), value);
            }
            out.push(rec);
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageSession for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        let sql = rewrite_placeholders(sql);
        let affected = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(map_sqlite_error)?;
        Ok(affected as u64)
    }

    async fn query_one(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Record>, StorageError> {
        Ok(self.run_query(sql, params)?.into_iter().next())
    }

    async fn query_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Record>, StorageError> {
        self.run_query(sql, params)
    }

    async fn last_insert_id(&mut self, _table: &str) -> Result<i64, StorageError> {
        Ok(self.conn.last_insert_rowid())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        if self.open {
            self.conn.execute_batch("COMMIT").map_err(map_sqlite_error)?;
            self.open = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        if self.open {
            self.conn.execute_batch("ROLLBACK").map_err(map_sqlite_error)?;
            self.open = false;
        }
        Ok(())
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.open {
            tracing::warn!("sqlite session dropped without commit, rolling back");
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(*v as i64)),
        })
    }
}

fn map_sqlite_error(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            rusqlite::ErrorCode::ConstraintViolation => StorageError::Constraint(e.to_string()),
            rusqlite::ErrorCode::CannotOpen
            | rusqlite::ErrorCode::DatabaseBusy
            | rusqlite::ErrorCode::DatabaseLocked => StorageError::Unavailable(e.to_string()),
            _ => StorageError::Execution(e.to_string()),
        },
        _ => StorageError::Execution(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_and_query_roundtrip() {
        let backend = SqliteBackend::in_memory().unwrap();
        let mut sess = backend.session().await.unwrap();
        sess.execute("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, score FLOAT)", &[])
            .await
            .unwrap();
        sess.execute(
            "INSERT INTO t (name, score) VALUES ($1, $2)",
            &[SqlValue::from("rice"), SqlValue::from(50.0)],
        )
        .await
        .unwrap();
        let id = sess.last_insert_id("t").await.unwrap();
        assert_eq!(id, 1);

        let row = sess
            .query_one("SELECT * FROM t WHERE id = $1", &[SqlValue::from(id)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_str("name"), Some("rice"));
        assert_eq!(row.get_f64("score"), Some(50.0));
        sess.commit().await.unwrap();
    }

    #[tokio::test]
    async fn unique_violation_maps_to_constraint() {
        let backend = SqliteBackend::in_memory().unwrap();
        let mut sess = backend.session().await.unwrap();
        sess.execute("CREATE TABLE t (phone TEXT UNIQUE NOT NULL)", &[])
            .await
            .unwrap();
        sess.execute("INSERT INTO t (phone) VALUES ($1)", &[SqlValue::from("+91")])
            .await
            .unwrap();
        let err = sess
            .execute("INSERT INTO t (phone) VALUES ($1)", &[SqlValue::from("+91")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)));
        sess.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let backend = SqliteBackend::in_memory().unwrap();
        let mut sess = backend.session().await.unwrap();
        sess.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
            .await
            .unwrap();
        sess.commit().await.unwrap();
        drop(sess);

        let mut sess = backend.session().await.unwrap();
        sess.execute("INSERT INTO t (v) VALUES ($1)", &[SqlValue::from("x")])
            .await
            .unwrap();
        sess.rollback().await.unwrap();
        drop(sess);

        let mut sess = backend.session().await.unwrap();
        let rows = sess.query_all("SELECT * FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
        sess.commit().await.unwrap();
    }
}

//! PostgreSQL backend (client-server deployments)
//!
//! A deadpool connection pool; each session checks out one client and runs
//! its transaction with explicit BEGIN/COMMIT/ROLLBACK so the session can
//! be a plain owned object.

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use crate::application::errors::StorageError;

use super::{Dialect, Record, SqlValue, StorageBackend, StorageSession};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct PostgresBackend {
    pool: Pool,
}

impl PostgresBackend {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| StorageError::Unavailable(format!("bad postgres url: {}", e)))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(8)
            .build()
            .map_err(|e| StorageError::Unavailable(format!("pool build failed: {}", e)))?;

        // Fail fast on an unreachable server instead of at the first event.
        let client = pool
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(format!("postgres connect failed: {}", e)))?;
        client
            .batch_execute("SELECT 1")
            .await
            .map_err(map_pg_error)?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn session(&self) -> Result<Box<dyn StorageSession>, StorageError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(format!("postgres checkout failed: {}", e)))?;
        client.batch_execute("BEGIN").await.map_err(map_pg_error)?;
        Ok(Box::new(PgSession {
            client: Some(client),
            open: true,
        }))
    }
}

struct PgSession {
    client: Option<Object>,
    open: bool,
}

impl PgSession {
    fn client(&self) -> Result<&Object, StorageError> {
        self.client
            .as_ref()
            .ok_or_else(|| StorageError::Execution("session already closed".to_string()))
    }
}

#[async_trait]
impl StorageSession for PgSession {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        let refs = param_refs(params);
        self.client()?
            .execute(sql, &refs)
            .await
            .map_err(map_pg_error)
    }

    async fn query_one(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Record>, StorageError> {
        let refs = param_refs(params);
        let row = self
            .client()?
            .query_opt(sql, &refs)
            .await
            .map_err(map_pg_error)?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn query_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Record>, StorageError> {
        let refs = param_refs(params);
        let rows = self
            .client()?
            .query(sql, &refs)
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn last_insert_id(&mut self, table: &str) -> Result<i64, StorageError> {
        let row = self
            .query_one(
                "SELECT currval(pg_get_serial_sequence($1, 'id')) AS id",
                &[SqlValue::from(table)],
            )
            .await?
            .ok_or_else(|| StorageError::Execution("currval returned no row".to_string()))?;
        row.require_i64("id")
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        if self.open {
            self.client()?
                .batch_execute("COMMIT")
                .await
                .map_err(map_pg_error)?;
            self.open = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        if self.open {
            self.client()?
                .batch_execute("ROLLBACK")
                .await
                .map_err(map_pg_error)?;
            self.open = false;
        }
        Ok(())
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        tracing::warn!("postgres session dropped without commit, rolling back");
        let Some(client) = self.client.take() else {
            return;
        };
        // A client carrying an open transaction must never return to the
        // pool: Fast recycling would hand it to the next checkout as-is.
        // Roll back when a runtime is available; otherwise (and on rollback
        // failure) detach the client so the connection closes instead.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::warn!("rollback on drop failed, discarding connection: {}", e);
                        drop(Object::take(client));
                    }
                });
            }
            Err(_) => {
                drop(Object::take(client));
            }
        }
    }
}

fn param_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn record_from_row(row: &tokio_postgres::Row) -> Result<Record, StorageError> {
    let mut rec = Record::new();
    for (i, col) in row.columns().iter().enumerate() {
        let ty = col.type_();
        let value = if *ty == Type::INT8 {
            get_opt::<i64>(row, i)?.map(SqlValue::Int)
        } else if *ty == Type::INT4 {
            get_opt::<i32>(row, i)?.map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT2 {
            get_opt::<i16>(row, i)?.map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::FLOAT8 {
            get_opt::<f64>(row, i)?.map(SqlValue::Float)
        } else if *ty == Type::FLOAT4 {
            get_opt::<f32>(row, i)?.map(|v| SqlValue::Float(v as f64))
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
            get_opt::<String>(row, i)?.map(SqlValue::Text)
        } else if *ty == Type::BOOL {
            get_opt::<bool>(row, i)?.map(SqlValue::Bool)
        } else if *ty == Type::TIMESTAMP {
            get_opt::<NaiveDateTime>(row, i)?
                .map(|t| SqlValue::Text(t.format(TIMESTAMP_FORMAT).to_string()))
        } else if *ty == Type::TIMESTAMPTZ {
            get_opt::<DateTime<Utc>>(row, i)?
                .map(|t| SqlValue::Text(t.naive_utc().format(TIMESTAMP_FORMAT).to_string()))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            get_opt::<serde_json::Value>(row, i)?.map(|v| SqlValue::Text(v.to_string()))
        } else {
            tracing::debug!(column = col.name(), ty = %ty, "unmapped column type, normalizing as NULL");
            None
        };
        rec.insert(col.name(), value.unwrap_or(SqlValue::Null));
    }
    Ok(rec)
}

fn get_opt<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
) -> Result<Option<T>, StorageError> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| StorageError::Execution(format!("row decode failed: {}", e)))
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Int(v) => {
                if *ty == Type::INT4 {
                    (*v as i32).to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    (*v as i16).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::Text(v) => {
                if *ty == Type::TIMESTAMP {
                    NaiveDateTime::parse_from_str(v, TIMESTAMP_FORMAT)?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    DateTime::parse_from_rfc3339(v)?
                        .with_timezone(&Utc)
                        .to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::Bool(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::BOOL
            || *ty == Type::INT2
            || *ty == Type::INT4
            || *ty == Type::INT8
            || *ty == Type::FLOAT4
            || *ty == Type::FLOAT8
            || *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::TIMESTAMP
            || *ty == Type::TIMESTAMPTZ
    }

    to_sql_checked!();
}

fn map_pg_error(e: tokio_postgres::Error) -> StorageError {
    if e.is_closed() {
        return StorageError::Unavailable(e.to_string());
    }
    match e.code() {
        // Class 23: integrity constraint violations.
        Some(code) if code.code().starts_with("23") => StorageError::Constraint(e.to_string()),
        Some(code) if *code == SqlState::CONNECTION_EXCEPTION => {
            StorageError::Unavailable(e.to_string())
        }
        _ => StorageError::Execution(e.to_string()),
    }
}

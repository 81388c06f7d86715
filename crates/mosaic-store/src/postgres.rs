use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use mosaic_config::StorageBackend;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};
use tokio::sync::OnceCell;

use crate::{Database, QueryResult, Row, SqlValue, StoreError, UNIQUE_VIOLATION_CODE};

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS analysis_logs (
        seq BIGSERIAL PRIMARY KEY,
        id TEXT NOT NULL UNIQUE,
        city TEXT NOT NULL,
        latitude DOUBLE PRECISION,
        longitude DOUBLE PRECISION,
        recorded_at BIGINT NOT NULL,
        storm_probability DOUBLE PRECISION NOT NULL,
        rain_confidence DOUBLE PRECISION NOT NULL,
        atmospheric_chaos DOUBLE PRECISION NOT NULL,
        forecast_reliability DOUBLE PRECISION NOT NULL,
        dominant_state TEXT NOT NULL,
        quantum_summary TEXT NOT NULL,
        top_states_json TEXT NOT NULL DEFAULT '[]',
        volatility DOUBLE PRECISION,
        cyclone_index DOUBLE PRECISION,
        flood_risk DOUBLE PRECISION,
        final_risk_score DOUBLE PRECISION,
        chaos_velocity DOUBLE PRECISION,
        chaos_acceleration DOUBLE PRECISION,
        cyclone_momentum DOUBLE PRECISION,
        state_drift DOUBLE PRECISION
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analysis_logs_city_recorded
        ON analysis_logs (city, recorded_at)
    "#,
];

/// Networked backend. The pool is created lazily, so a missing or
/// unreachable server only shows up when a query runs.
pub struct PostgresDatabase {
    pool: Option<PgPool>,
    schema_ready: OnceCell<()>,
}

impl PostgresDatabase {
    /// Must be called inside a tokio runtime when `database_url` is set.
    pub fn connect_lazy(database_url: Option<&str>) -> Result<Self, StoreError> {
        let pool = match database_url {
            Some(url) => Some(
                PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect_lazy(url)
                    .map_err(map_pg_error)?,
            ),
            None => {
                tracing::warn!("postgres backend selected without a connection string");
                None
            }
        };

        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    fn pool(&self) -> Result<&PgPool, StoreError> {
        self.pool.as_ref().ok_or_else(|| {
            StoreError::Connection("no postgres connection string configured".to_owned())
        })
    }

    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(statement)
                        .execute(pool)
                        .await
                        .map_err(map_pg_error)?;
                }
                tracing::info!("postgres analysis_logs schema ready");
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Postgres
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, StoreError> {
        let pool = self.pool()?;
        self.ensure_schema(pool).await?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                // Every nullable column in the schema is a float.
                SqlValue::Null => query.bind(None::<f64>),
                SqlValue::Integer(value) => query.bind(*value),
                SqlValue::Real(value) => query.bind(*value),
                SqlValue::Text(value) => query.bind(value.clone()),
            };
        }

        if returns_rows(sql) {
            let rows = query.fetch_all(pool).await.map_err(map_pg_error)?;
            let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
            return Ok(QueryResult {
                row_count: rows.len() as u64,
                rows,
            });
        }

        let done = query.execute(pool).await.map_err(map_pg_error)?;
        Ok(QueryResult {
            rows: Vec::new(),
            row_count: done.rows_affected(),
        })
    }
}

fn returns_rows(sql: &str) -> bool {
    let mut tokens = sql.split_whitespace();
    let leads_with_query = tokens.next().is_some_and(|first| {
        first.eq_ignore_ascii_case("SELECT") || first.eq_ignore_ascii_case("WITH")
    });
    leads_with_query || tokens.any(|token| token.eq_ignore_ascii_case("RETURNING"))
}

fn decode_row(row: &PgRow) -> Result<Row, StoreError> {
    let mut values = BTreeMap::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(index)
                .map(|value| value.map(|value| SqlValue::Integer(i64::from(value)))),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)
                .map(|value| value.map(|value| SqlValue::Integer(i64::from(value)))),
            "INT8" => row
                .try_get::<Option<i64>, _>(index)
                .map(|value| value.map(SqlValue::Integer)),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)
                .map(|value| value.map(|value| SqlValue::Real(f64::from(value)))),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)
                .map(|value| value.map(SqlValue::Real)),
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)
                .map(|value| value.map(|value| SqlValue::Integer(i64::from(value)))),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(index)
                .map(|value| value.map(SqlValue::Text)),
            other => {
                return Err(StoreError::InvalidRow(format!(
                    "column {} has unsupported type {other}",
                    column.name()
                )));
            }
        }
        .map_err(map_pg_error)?
        .unwrap_or(SqlValue::Null);

        values.insert(column.name().to_owned(), value);
    }

    Ok(Row::new(values))
}

fn map_pg_error(err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION_CODE) {
            return StoreError::UniqueViolation {
                code: UNIQUE_VIOLATION_CODE,
                message: db_err.message().to_owned(),
            };
        }
    }

    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::Connection(err.to_string()),
        other => StoreError::Postgres(other),
    }
}

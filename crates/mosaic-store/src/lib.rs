use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use mosaic_config::{StorageBackend, StorageConfig};
use thiserror::Error;

mod analysis_log;
mod postgres;
mod sqlite;

pub use analysis_log::{AnalysisLogRecord, AnalysisLogStore, MAX_HISTORY_ENTRIES};
pub use postgres::PostgresDatabase;
pub use sqlite::{SqliteDatabase, translate_placeholders};

/// SQLSTATE for `unique_violation`. Both backends report duplicate keys with
/// this code so callers branch on one constant.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(value: Option<f64>) -> Self {
        value.map(Self::Real).unwrap_or(Self::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: BTreeMap<String, SqlValue>,
}

impl Row {
    pub fn new(values: BTreeMap<String, SqlValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    pub fn opt_f64(&self, column: &str) -> Result<Option<f64>, StoreError> {
        match self.get(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Real(value)) => Ok(Some(*value)),
            Some(SqlValue::Integer(value)) => Ok(Some(*value as f64)),
            Some(SqlValue::Text(_)) => Err(StoreError::InvalidRow(format!(
                "column {column} holds text, expected a number"
            ))),
        }
    }

    pub fn f64(&self, column: &str) -> Result<f64, StoreError> {
        self.opt_f64(column)?
            .ok_or_else(|| StoreError::InvalidRow(format!("column {column} is null")))
    }

    pub fn i64(&self, column: &str) -> Result<i64, StoreError> {
        match self.get(column) {
            Some(SqlValue::Integer(value)) => Ok(*value),
            Some(SqlValue::Real(value)) if value.fract() == 0.0 => Ok(*value as i64),
            _ => Err(StoreError::InvalidRow(format!(
                "column {column} is missing or not an integer"
            ))),
        }
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>, StoreError> {
        match self.get(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Text(value)) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::InvalidRow(format!(
                "column {column} holds a number, expected text"
            ))),
        }
    }

    pub fn text(&self, column: &str) -> Result<String, StoreError> {
        self.opt_text(column)?
            .ok_or_else(|| StoreError::InvalidRow(format!("column {column} is null")))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub row_count: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(sqlx::Error),
    #[error("unique constraint violated ({code}): {message}")]
    UniqueViolation { code: &'static str, message: String },
    #[error("database connection unavailable: {0}")]
    Connection(String),
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("failed to lock sqlite connection")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Backend-neutral SQLSTATE-style code, when one applies.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION_CODE)
    }
}

/// One asynchronous query surface over every supported SQL engine.
///
/// SQL is written in the networked dialect (`$1`, `$2`, ...); embedded
/// backends translate it before execution.
#[async_trait]
pub trait Database: Send + Sync {
    fn backend(&self) -> StorageBackend;

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, StoreError>;
}

pub fn open_database(
    config: &StorageConfig,
    workspace_root: impl AsRef<Path>,
) -> Result<Arc<dyn Database>, StoreError> {
    match config.backend {
        StorageBackend::Sqlite => {
            let path = workspace_root.as_ref().join(&config.sqlite_path);
            Ok(Arc::new(SqliteDatabase::open(path)?))
        }
        StorageBackend::Postgres => Ok(Arc::new(PostgresDatabase::connect_lazy(
            config.database_url.as_deref(),
        )?)),
    }
}

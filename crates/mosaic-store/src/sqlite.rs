use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mosaic_config::StorageBackend;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode, ToSql, ffi, params_from_iter};

use crate::{Database, QueryResult, Row, SqlValue, StoreError, UNIQUE_VIOLATION_CODE};

pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    sqlite_path: Option<PathBuf>,
}

impl SqliteDatabase {
    pub fn open(sqlite_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let sqlite_path = sqlite_path.as_ref().to_path_buf();
        if let Some(parent) = sqlite_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            sqlite_path: Some(sqlite_path),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            sqlite_path: None,
        })
    }

    pub fn sqlite_path(&self) -> Option<&Path> {
        self.sqlite_path.as_deref()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, StoreError> {
        let sql = translate_placeholders(sql).into_owned();
        let params = params.to_vec();
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            run_query(&conn, &sql, &params)
        })
        .await?
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Code,
    Literal,
    LineComment,
    BlockComment,
}

/// Rewrites `$N` placeholders to SQLite's `?N`. Dollar signs inside
/// single-quoted literals and `--` or `/* */` comments are left alone.
pub fn translate_placeholders(sql: &str) -> Cow<'_, str> {
    if !sql.contains('$') {
        return Cow::Borrowed(sql);
    }

    let mut translated = String::with_capacity(sql.len());
    let mut lexeme = Lexeme::Code;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        match (lexeme, ch) {
            (Lexeme::Code, '\'') => lexeme = Lexeme::Literal,
            (Lexeme::Code, '-') if next == Some('-') => lexeme = Lexeme::LineComment,
            (Lexeme::Code, '/') if next == Some('*') => {
                lexeme = Lexeme::BlockComment;
                translated.push(ch);
                translated.push('*');
                chars.next();
                continue;
            }
            (Lexeme::Code, '$') if next.is_some_and(|next| next.is_ascii_digit()) => {
                translated.push('?');
                continue;
            }
            (Lexeme::Literal, '\'') => lexeme = Lexeme::Code,
            (Lexeme::LineComment, '\n') => lexeme = Lexeme::Code,
            (Lexeme::BlockComment, '*') if next == Some('/') => {
                lexeme = Lexeme::Code;
                translated.push(ch);
                translated.push('/');
                chars.next();
                continue;
            }
            _ => {}
        }
        translated.push(ch);
    }

    Cow::Owned(translated)
}

fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<QueryResult, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;

    if stmt.column_count() == 0 {
        let changed = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(map_sqlite_error)?;
        return Ok(QueryResult {
            rows: Vec::new(),
            row_count: changed as u64,
        });
    }

    let columns = stmt
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();

    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(map_sqlite_error)?;
    let mut decoded = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqlite_error)? {
        let mut values = BTreeMap::new();
        for (index, column) in columns.iter().enumerate() {
            let value = match row.get_ref(index).map_err(map_sqlite_error)? {
                ValueRef::Null => SqlValue::Null,
                ValueRef::Integer(value) => SqlValue::Integer(value),
                ValueRef::Real(value) => SqlValue::Real(value),
                ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Blob(_) => {
                    return Err(StoreError::InvalidRow(format!(
                        "column {column} holds a blob"
                    )));
                }
            };
            values.insert(column.clone(), value);
        }
        decoded.push(Row::new(values));
    }

    Ok(QueryResult {
        row_count: decoded.len() as u64,
        rows: decoded,
    })
}

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let duplicate_key = matches!(
            failure.extended_code,
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        );
        if failure.code == ErrorCode::ConstraintViolation && duplicate_key {
            return StoreError::UniqueViolation {
                code: UNIQUE_VIOLATION_CODE,
                message: message.clone().unwrap_or_else(|| failure.to_string()),
            };
        }
    }

    StoreError::Sqlite(err)
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_logs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            city TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            recorded_at INTEGER NOT NULL,
            storm_probability REAL NOT NULL,
            rain_confidence REAL NOT NULL,
            atmospheric_chaos REAL NOT NULL,
            forecast_reliability REAL NOT NULL,
            dominant_state TEXT NOT NULL,
            quantum_summary TEXT NOT NULL,
            top_states_json TEXT NOT NULL DEFAULT '[]',
            volatility REAL,
            cyclone_index REAL,
            flood_risk REAL,
            final_risk_score REAL,
            chaos_velocity REAL,
            chaos_acceleration REAL,
            cyclone_momentum REAL,
            state_drift REAL
        );

        CREATE INDEX IF NOT EXISTS idx_analysis_logs_city_recorded
            ON analysis_logs (city, recorded_at);
        "#,
    )?;

    Ok(())
}

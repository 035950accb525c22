//! SQLite adapter implementing every engine port.

mod appointments;
mod consultations;
mod coordination;
mod memberships;
mod outbox;
mod references;
mod schema;
mod waiting_room;

pub use outbox::*;
pub use references::*;
pub use schema::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::ports::PortError;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for PortError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, message))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                PortError::Constraint(message.unwrap_or_else(|| failure.to_string()))
            }
            DbError::Constraint(message) => PortError::Constraint(message),
            other => PortError::Backend(other.to_string()),
        }
    }
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        debug!("database schema initialized");
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string order is time order.
pub(crate) fn to_sql_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_sql_ts(value: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|source| DbError::Timestamp {
            value: value.to_string(),
            source,
        })
}

pub(crate) fn from_sql_ts_opt(value: Option<String>) -> DbResult<Option<DateTime<Utc>>> {
    value.as_deref().map(from_sql_ts).transpose()
}

/// Turn a zero-row compare-and-swap update into a stale-version error.
pub(crate) fn check_cas(rows_affected: usize, kind: &'static str, id: &str) -> Result<(), PortError> {
    if rows_affected == 0 {
        Err(PortError::StaleVersion {
            kind,
            id: id.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Parse a stored enum column.
pub(crate) fn parse_column<T>(value: &str) -> DbResult<T>
where
    T: std::str::FromStr<Err = crate::models::DomainError>,
{
    value
        .parse()
        .map_err(|e: crate::models::DomainError| DbError::Constraint(e.to_string()))
}

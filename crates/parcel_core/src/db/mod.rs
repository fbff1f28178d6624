//! SQLite storage bootstrap for the parcel tracker.
//!
//! # Responsibility
//! - Hand out connections whose `parcel` schema is current.
//! - Report engine failures and schema/binary version skew.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version`.
//! - No parcel row is touched before migrations finish.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failure while opening, migrating or querying the tracker database.
#[derive(Debug)]
pub enum DbError {
    /// Error reported by the SQLite engine.
    Sqlite(rusqlite::Error),
    /// Database file was migrated by a newer build of the tracker.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "tracker database uses schema {db_version}; this build only knows up to {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

//! Parcel repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the six parcel access patterns over the `parcel` table.
//! - Enforce the `registered` status gate for address change and deletion.
//! - Wrap every storage failure with the failing operation and key.
//!
//! # Invariants
//! - Gated mutations evaluate the gate inside the mutating statement itself,
//!   so two callers can never both pass the gate for the same row.
//! - `replace_status` applies the same rule to status transitions.
//! - A rejected gated mutation leaves the row untouched.
//! - `get_by_client` returns the full match set or an error, never a prefix.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::parcel::{ClientId, Parcel, ParcelNumber, ParcelStatus};
use log::{debug, warn};
use rusqlite::{
    params, Connection, OptionalExtension, Params, Row, Transaction, TransactionBehavior,
};
use std::error::Error;
use std::fmt::{Display, Formatter};

const PARCEL_TABLE: &str = "parcel";
const PARCEL_COLUMNS: [&str; 5] = ["number", "client", "status", "address", "created_at"];

const PARCEL_SELECT_SQL: &str = "SELECT
    number,
    client,
    status,
    address,
    created_at
FROM parcel";

pub type RepoResult<T> = Result<T, RepoError>;

/// Store operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParcelOp {
    Add,
    Get,
    GetByClient,
    SetStatus,
    SetAddress,
    Delete,
}

impl ParcelOp {
    /// Stable snake_case name used in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Get => "get",
            Self::GetByClient => "get_by_client",
            Self::SetStatus => "set_status",
            Self::SetAddress => "set_address",
            Self::Delete => "delete",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Add => "add parcel",
            Self::Get => "get parcel",
            Self::GetByClient => "get parcels",
            Self::SetStatus => "set status of parcel",
            Self::SetAddress => "set address of parcel",
            Self::Delete => "delete parcel",
        }
    }
}

impl Display for ParcelOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup key an operation was called with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKey {
    /// Operation has no key (insert).
    None,
    Number(ParcelNumber),
    Client(ClientId),
}

impl Display for RepoKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Number(number) => write!(f, " with number {number}"),
            Self::Client(client) => write!(f, " of client {client}"),
        }
    }
}

/// Repository error for parcel persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// No parcel row matches the requested number.
    NotFound { op: ParcelOp, number: ParcelNumber },
    /// Gated mutation attempted while the parcel is not `registered`.
    NotRegistered {
        op: ParcelOp,
        number: ParcelNumber,
        status: ParcelStatus,
    },
    /// Conditional status change found a different current status.
    StatusChanged {
        op: ParcelOp,
        number: ParcelNumber,
        expected: ParcelStatus,
        actual: ParcelStatus,
    },
    /// Engine failure while executing an operation.
    Storage {
        op: ParcelOp,
        key: RepoKey,
        source: DbError,
    },
    /// Engine failure outside of a store operation (connection checks).
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl RepoError {
    /// Returns whether the error reports a missing parcel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns whether the error reports a status gate rejection.
    pub fn is_status_gate(&self) -> bool {
        matches!(self, Self::NotRegistered { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { op, number } => write!(
                f,
                "failed to {}: parcel with number {number} does not exist",
                op.describe()
            ),
            Self::NotRegistered { op, number, status } => write!(
                f,
                "failed to {} with number {number}: parcel is not registered (status `{status}`)",
                op.describe()
            ),
            Self::StatusChanged {
                op,
                number,
                expected,
                actual,
            } => write!(
                f,
                "failed to {} with number {number}: expected status `{expected}`, found `{actual}`",
                op.describe()
            ),
            Self::Storage { op, key, source } => {
                write!(f, "failed to {}{key}: {source}", op.describe())
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "parcel repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "parcel repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "parcel repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::NotFound { .. }
            | Self::NotRegistered { .. }
            | Self::StatusChanged { .. }
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Attaches operation context to raw SQLite results.
trait StorageContext<T> {
    fn in_op(self, op: ParcelOp, key: RepoKey) -> RepoResult<T>;
}

impl<T> StorageContext<T> for rusqlite::Result<T> {
    fn in_op(self, op: ParcelOp, key: RepoKey) -> RepoResult<T> {
        self.map_err(|err| RepoError::Storage {
            op,
            key,
            source: DbError::Sqlite(err),
        })
    }
}

/// Repository interface for parcel operations.
pub trait ParcelRepository {
    /// Inserts a parcel and returns its storage-assigned number.
    ///
    /// `parcel.number` is ignored.
    fn add(&self, parcel: &Parcel) -> RepoResult<ParcelNumber>;
    /// Loads one parcel by number.
    fn get(&self, number: ParcelNumber) -> RepoResult<Parcel>;
    /// Loads every parcel of a client in storage order. Empty when none match.
    fn get_by_client(&self, client: ClientId) -> RepoResult<Vec<Parcel>>;
    /// Overwrites the status without any gate.
    fn set_status(&self, number: ParcelNumber, status: &ParcelStatus) -> RepoResult<()>;
    /// Overwrites the status only while the stored status equals `expected`.
    fn replace_status(
        &self,
        number: ParcelNumber,
        expected: &ParcelStatus,
        status: &ParcelStatus,
    ) -> RepoResult<()>;
    /// Changes the address of a `registered` parcel.
    fn set_address(&self, number: ParcelNumber, address: &str) -> RepoResult<()>;
    /// Physically removes a `registered` parcel.
    fn delete(&self, number: ParcelNumber) -> RepoResult<()>;
}

/// SQLite-backed parcel store.
pub struct SqliteParcelStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteParcelStore<'conn> {
    /// Constructs a store from a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when `user_version` is not the latest migration.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` when the schema is incomplete.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_parcel_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Runs a mutation whose SQL carries a status condition in its WHERE
    /// clause and classifies a zero-row outcome.
    ///
    /// `reject` builds the error for a row whose status failed the condition.
    fn conditional_mutation<P, F>(
        &self,
        op: ParcelOp,
        number: ParcelNumber,
        sql: &str,
        params: P,
        reject: F,
    ) -> RepoResult<()>
    where
        P: Params,
        F: FnOnce(ParcelStatus) -> RepoError,
    {
        let key = RepoKey::Number(number);
        // Inside a caller-owned transaction the caller's scope already
        // isolates the mutation and the status lookup.
        let tx = if self.conn.is_autocommit() {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate);
            Some(tx.in_op(op, key)?)
        } else {
            None
        };

        let changed = self.conn.execute(sql, params).in_op(op, key)?;
        if changed == 0 {
            let status = load_status(self.conn, number).in_op(op, key)?;
            return Err(match status {
                None => RepoError::NotFound { op, number },
                Some(status) => {
                    warn!(
                        "event=parcel_{} module=repo status=rejected number={} parcel_status={}",
                        op, number, status
                    );
                    reject(status)
                }
            });
        }

        if let Some(tx) = tx {
            tx.commit().in_op(op, key)?;
        }
        debug!("event=parcel_{op} module=repo status=ok number={number}");
        Ok(())
    }
}

impl ParcelRepository for SqliteParcelStore<'_> {
    fn add(&self, parcel: &Parcel) -> RepoResult<ParcelNumber> {
        let op = ParcelOp::Add;
        self.conn
            .execute(
                "INSERT INTO parcel (
                    client,
                    status,
                    address,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4);",
                params![
                    parcel.client,
                    parcel.status.as_str(),
                    parcel.address.as_str(),
                    parcel.created_at.as_str(),
                ],
            )
            .in_op(op, RepoKey::None)?;

        let number = self.conn.last_insert_rowid();
        debug!(
            "event=parcel_add module=repo status=ok number={} client={}",
            number, parcel.client
        );
        Ok(number)
    }

    fn get(&self, number: ParcelNumber) -> RepoResult<Parcel> {
        let op = ParcelOp::Get;
        let parcel = self
            .conn
            .query_row(
                &format!("{PARCEL_SELECT_SQL} WHERE number = ?1;"),
                [number],
                parse_parcel_row,
            )
            .optional()
            .in_op(op, RepoKey::Number(number))?;

        parcel.ok_or(RepoError::NotFound { op, number })
    }

    fn get_by_client(&self, client: ClientId) -> RepoResult<Vec<Parcel>> {
        let op = ParcelOp::GetByClient;
        let key = RepoKey::Client(client);

        let mut stmt = self
            .conn
            .prepare(&format!("{PARCEL_SELECT_SQL} WHERE client = ?1;"))
            .in_op(op, key)?;
        let mut rows = stmt.query([client]).in_op(op, key)?;
        let mut parcels = Vec::new();

        while let Some(row) = rows.next().in_op(op, key)? {
            parcels.push(parse_parcel_row(row).in_op(op, key)?);
        }

        Ok(parcels)
    }

    fn set_status(&self, number: ParcelNumber, status: &ParcelStatus) -> RepoResult<()> {
        let op = ParcelOp::SetStatus;
        let changed = self
            .conn
            .execute(
                "UPDATE parcel SET status = ?1 WHERE number = ?2;",
                params![status.as_str(), number],
            )
            .in_op(op, RepoKey::Number(number))?;

        if changed == 0 {
            return Err(RepoError::NotFound { op, number });
        }

        debug!(
            "event=parcel_set_status module=repo status=ok number={} parcel_status={}",
            number, status
        );
        Ok(())
    }

    fn replace_status(
        &self,
        number: ParcelNumber,
        expected: &ParcelStatus,
        status: &ParcelStatus,
    ) -> RepoResult<()> {
        let op = ParcelOp::SetStatus;
        self.conditional_mutation(
            op,
            number,
            "UPDATE parcel
             SET status = ?1
             WHERE number = ?2
               AND status = ?3;",
            params![status.as_str(), number, expected.as_str()],
            |actual| RepoError::StatusChanged {
                op,
                number,
                expected: expected.clone(),
                actual,
            },
        )
    }

    fn set_address(&self, number: ParcelNumber, address: &str) -> RepoResult<()> {
        let op = ParcelOp::SetAddress;
        self.conditional_mutation(
            op,
            number,
            "UPDATE parcel
             SET address = ?1
             WHERE number = ?2
               AND status = ?3;",
            params![address, number, ParcelStatus::REGISTERED],
            |status| RepoError::NotRegistered { op, number, status },
        )
    }

    fn delete(&self, number: ParcelNumber) -> RepoResult<()> {
        let op = ParcelOp::Delete;
        self.conditional_mutation(
            op,
            number,
            "DELETE FROM parcel
             WHERE number = ?1
               AND status = ?2;",
            params![number, ParcelStatus::REGISTERED],
            |status| RepoError::NotRegistered { op, number, status },
        )
    }
}

fn parse_parcel_row(row: &Row<'_>) -> rusqlite::Result<Parcel> {
    let status: String = row.get("status")?;
    Ok(Parcel {
        number: row.get("number")?,
        client: row.get("client")?,
        status: ParcelStatus::from(status),
        address: row.get("address")?,
        created_at: row.get("created_at")?,
    })
}

fn load_status(conn: &Connection, number: ParcelNumber) -> rusqlite::Result<Option<ParcelStatus>> {
    conn.query_row(
        "SELECT status FROM parcel WHERE number = ?1;",
        [number],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|status| status.map(ParcelStatus::from))
}

fn ensure_parcel_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, PARCEL_TABLE)? {
        return Err(RepoError::MissingRequiredTable(PARCEL_TABLE));
    }

    for column in PARCEL_COLUMNS {
        if !table_has_column(conn, PARCEL_TABLE, column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: PARCEL_TABLE,
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

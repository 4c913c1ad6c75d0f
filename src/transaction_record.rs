//! The append-only audit log of attempted transactions.
//!
//! A record is written once per attempt, after the outcome is known, and is
//! never updated or deleted.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AccountId, Amount, Error, TransactionId};

/// What kind of money movement a transaction is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Move money from the acting account to a different account.
    TransferOut,
    /// Add money to the acting account.
    TopUp,
}

impl TransactionKind {
    /// The name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::TransferOut => "TransferOut",
            TransactionKind::TopUp => "TopUp",
        }
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TransferOut" => Ok(TransactionKind::TransferOut),
            "TopUp" => Ok(TransactionKind::TopUp),
            other => Err(Error::UnknownTransactionKind(other.to_owned())),
        }
    }
}

/// Whether an attempted transaction went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// The balances were changed and committed.
    Successful,
    /// The attempt was rolled back and no balance changed.
    Failed,
}

impl TransactionStatus {
    /// The name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Successful => "Successful",
            TransactionStatus::Failed => "Failed",
        }
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for TransactionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for TransactionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "Successful" => Ok(TransactionStatus::Successful),
            "Failed" => Ok(TransactionStatus::Failed),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    /// The generated ID of the record.
    pub id: TransactionId,
    /// The acting account.
    pub sender_id: AccountId,
    /// The account credited. Equal to `sender_id` for a top-up.
    pub recipient_id: AccountId,
    /// The amount moved or attempted.
    pub amount: Amount,
    /// The kind of transaction.
    pub kind: TransactionKind,
    /// The outcome of the attempt.
    pub status: TransactionStatus,
    /// Free text supplied by the caller.
    pub description: String,
    /// When the record was written.
    #[serde(with = "time::serde::iso8601")]
    pub created_at: OffsetDateTime,
}

/// The data for a record that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransactionRecord {
    /// The acting account.
    pub sender_id: AccountId,
    /// The account credited.
    pub recipient_id: AccountId,
    /// The amount moved or attempted.
    pub amount: Amount,
    /// The kind of transaction.
    pub kind: TransactionKind,
    /// The outcome of the attempt.
    pub status: TransactionStatus,
    /// Free text supplied by the caller.
    pub description: String,
}

impl NewTransactionRecord {
    /// The same record, marked as failed.
    pub fn failed(self) -> Self {
        Self {
            status: TransactionStatus::Failed,
            ..self
        }
    }
}

/// Create the transaction table.
///
/// The table is named `transaction`, which is an SQL keyword, so it must be quoted.
pub fn create_transaction_record_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
            id INTEGER PRIMARY KEY,
            sender_id INTEGER NOT NULL,
            recipient_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('TransferOut', 'TopUp')),
            status TEXT NOT NULL CHECK (status IN ('Successful', 'Failed')),
            description TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_transaction_sender_id ON \"transaction\"(sender_id);
        CREATE INDEX IF NOT EXISTS idx_transaction_recipient_id ON \"transaction\"(recipient_id);",
    )?;

    Ok(())
}

/// Append a record to the audit log and return its generated ID.
///
/// This works on a plain connection or inside an atomic scope. Inside a scope
/// the record is only kept if the scope commits.
///
/// # Errors
///
/// Returns an [Error::SqlError] if an SQL related error occurred.
pub fn insert_transaction_record(
    record: &NewTransactionRecord,
    connection: &Connection,
) -> Result<TransactionId, Error> {
    let id = connection
        .prepare(
            "INSERT INTO \"transaction\"
                (sender_id, recipient_id, amount, kind, status, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING id",
        )?
        .query_row(
            (
                record.sender_id,
                record.recipient_id,
                record.amount,
                record.kind,
                record.status,
                &record.description,
                OffsetDateTime::now_utc(),
            ),
            |row| row.get(0),
        )?;

    tracing::debug!(
        transaction_id = id,
        kind = %record.kind,
        status = %record.status,
        "inserted transaction record"
    );

    Ok(id)
}

/// Get the record with an ID equal to `id`.
///
/// # Errors
///
/// Returns an [Error::NotFound] if there is no such record, or an [Error::SqlError]
/// if there was an error trying to access the store.
pub fn get_transaction_record(
    id: TransactionId,
    connection: &Connection,
) -> Result<TransactionRecord, Error> {
    connection
        .prepare(
            "SELECT id, sender_id, recipient_id, amount, kind, status, description, created_at
             FROM \"transaction\" WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_row)
        .map_err(|error| error.into())
}

/// Get every record where `account_id` is the sender or the recipient, newest first.
///
/// # Errors
///
/// Returns an [Error::SqlError] if an SQL related error occurred.
pub fn get_transaction_records_for_account(
    account_id: AccountId,
    connection: &Connection,
) -> Result<Vec<TransactionRecord>, Error> {
    connection
        .prepare(
            "SELECT id, sender_id, recipient_id, amount, kind, status, description, created_at
             FROM \"transaction\"
             WHERE sender_id = :account_id OR recipient_id = :account_id
             ORDER BY id DESC",
        )?
        .query_map(&[(":account_id", &account_id)], map_row)?
        .map(|maybe_record| maybe_record.map_err(|error| error.into()))
        .collect()
}

fn map_row(row: &Row) -> Result<TransactionRecord, rusqlite::Error> {
    Ok(TransactionRecord {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        amount: row.get(3)?,
        kind: row.get(4)?,
        status: row.get(5)?,
        description: row.get(6)?,
        created_at: row.get(7)?,
    })
}

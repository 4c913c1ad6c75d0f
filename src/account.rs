//! Code for creating the account table and reading and changing account balances.

use std::fmt::Display;

use rusqlite::{Connection, Row};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{AccountId, Amount, Error, PasswordHash};

/// A wallet account holding a balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    /// The ID of the account.
    pub id: AccountId,
    /// The account holder's full name.
    pub full_name: String,
    /// The account holder's phone number. Unique across accounts.
    pub phone_number: String,
    /// The money held in the account. Never negative.
    pub balance: Amount,
    /// The password used to authorise transfers out of the account.
    #[serde(skip_serializing)]
    pub password_hash: PasswordHash,
    /// When the account was registered.
    #[serde(with = "time::serde::iso8601")]
    pub created_at: OffsetDateTime,
    /// When the balance was last changed.
    #[serde(with = "time::serde::iso8601::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// The data needed to register a new account.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    /// The account holder's full name.
    pub full_name: String,
    /// The account holder's phone number.
    pub phone_number: String,
    /// The hashed password for the account.
    pub password_hash: PasswordHash,
    /// The balance the account opens with.
    pub balance: Amount,
}

/// Which way a balance update moves the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDirection {
    /// Add the amount to the balance.
    Increment,
    /// Subtract the amount from the balance.
    Decrement,
}

impl Display for BalanceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceDirection::Increment => write!(f, "increment"),
            BalanceDirection::Decrement => write!(f, "decrement"),
        }
    }
}

/// Create the account table.
///
/// # Errors
///
/// This function will return an error if the SQL query failed.
pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY,
            full_name TEXT NOT NULL,
            phone_number TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            balance INTEGER NOT NULL CHECK (balance >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        (),
    )?;

    Ok(())
}

/// Create and insert a new account into the database.
///
/// # Errors
///
/// This function will return a:
/// - [Error::InvalidAmount] if the opening balance is negative,
/// - [Error::DuplicatePhoneNumber] if the phone number is already registered,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_account(new_account: NewAccount, connection: &Connection) -> Result<Account, Error> {
    if new_account.balance < Amount::ZERO {
        return Err(Error::InvalidAmount);
    }

    let created_at = OffsetDateTime::now_utc();

    connection.execute(
        "INSERT INTO account (full_name, phone_number, password, balance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            &new_account.full_name,
            &new_account.phone_number,
            new_account.password_hash.as_ref(),
            new_account.balance,
            created_at,
        ),
    )?;

    let id = connection.last_insert_rowid();
    tracing::info!(account_id = id, "registered account");

    Ok(Account {
        id,
        full_name: new_account.full_name,
        phone_number: new_account.phone_number,
        balance: new_account.balance,
        password_hash: new_account.password_hash,
        created_at,
        updated_at: None,
    })
}

/// Get the account with an ID equal to `account_id`.
///
/// # Errors
///
/// This function will return an [Error::AccountNotFound] if `account_id` does not
/// refer to an account, or an [Error::SqlError] if there was an error trying to access the store.
pub fn get_account(account_id: AccountId, connection: &Connection) -> Result<Account, Error> {
    connection
        .prepare(
            "SELECT id, full_name, phone_number, password, balance, created_at, updated_at
             FROM account WHERE id = :id",
        )?
        .query_row(&[(":id", &account_id)], map_row)
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::AccountNotFound(account_id),
            error => error.into(),
        })
}

/// Get the account registered to `phone_number`.
///
/// # Errors
///
/// This function will return an [Error::NotFound] if no account has the phone
/// number, or an [Error::SqlError] if there was an error trying to access the store.
pub fn get_account_by_phone_number(
    phone_number: &str,
    connection: &Connection,
) -> Result<Account, Error> {
    connection
        .prepare(
            "SELECT id, full_name, phone_number, password, balance, created_at, updated_at
             FROM account WHERE phone_number = :phone_number",
        )?
        .query_row(&[(":phone_number", phone_number)], map_row)
        .map_err(|error| error.into())
}

/// Get all accounts ordered by ID.
///
/// # Errors
///
/// Returns an [Error::SqlError] if an SQL related error occurred.
pub fn get_all_accounts(connection: &Connection) -> Result<Vec<Account>, Error> {
    connection
        .prepare(
            "SELECT id, full_name, phone_number, password, balance, created_at, updated_at
             FROM account ORDER BY id ASC",
        )?
        .query_map([], map_row)?
        .map(|maybe_account| maybe_account.map_err(|error| error.into()))
        .collect()
}

/// Apply `amount` to the balance of an account in the given `direction`.
///
/// This must be called on a connection with an open transaction, i.e. the
/// connection of an atomic scope.
///
/// # Errors
///
/// This function will return a:
/// - [Error::NoActiveScope] if `connection` is in autocommit mode,
/// - [Error::InvalidAmount] if `amount` is not positive,
/// - [Error::AccountNotFound] if no rows were updated,
/// - [Error::InsufficientFunds] if a decrement would make the balance negative,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_balance(
    account_id: AccountId,
    amount: Amount,
    direction: BalanceDirection,
    connection: &Connection,
) -> Result<(), Error> {
    if connection.is_autocommit() {
        return Err(Error::NoActiveScope);
    }

    if !amount.is_positive() {
        return Err(Error::InvalidAmount);
    }

    let query = match direction {
        BalanceDirection::Increment => {
            "UPDATE account SET balance = balance + ?1, updated_at = ?2 WHERE id = ?3"
        }
        BalanceDirection::Decrement => {
            "UPDATE account SET balance = balance - ?1, updated_at = ?2 WHERE id = ?3"
        }
    };

    let rows_affected = connection
        .execute(query, (amount, OffsetDateTime::now_utc(), account_id))
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_CHECK,
                },
                _,
            ) => Error::InsufficientFunds(account_id),
            error => error.into(),
        })?;

    if rows_affected == 0 {
        return Err(Error::AccountNotFound(account_id));
    }

    tracing::debug!(account_id, %amount, %direction, "updated balance");

    Ok(())
}

fn map_row(row: &Row) -> Result<Account, rusqlite::Error> {
    let raw_password_hash: String = row.get(3)?;

    Ok(Account {
        id: row.get(0)?,
        full_name: row.get(1)?,
        phone_number: row.get(2)?,
        password_hash: PasswordHash::new_unchecked(&raw_password_hash),
        balance: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

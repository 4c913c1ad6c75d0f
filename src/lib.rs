//! wallet_rs is a funds-transfer engine for wallet accounts backed by SQLite.
//!
//! Every movement of money is validated, serialized against other movements
//! on the same accounts with per-account locks, applied inside a single
//! database transaction, and recorded in an append-only audit log whether it
//! succeeds or fails.
//!
//! The entry point is [Engine::create_transaction].

#![warn(missing_docs)]

mod account;
mod account_lock;
mod amount;
mod config;
mod database_id;
mod db;
mod engine;
mod ledger;
pub mod logging;
mod password;
mod scope;
mod transaction_record;

pub use account::{
    Account, BalanceDirection, NewAccount, create_account, create_account_table, get_account,
    get_account_by_phone_number, get_all_accounts, update_balance,
};
pub use account_lock::{AccountLockGuard, AccountLocks};
pub use amount::Amount;
pub use config::{AuditPolicy, EngineConfig};
pub use database_id::{AccountId, TransactionId};
pub use db::{Database, initialize as initialize_db};
pub use engine::{Engine, TransferRequest};
pub use ledger::{Ledger, SqliteLedger};
pub use password::{PasswordHash, SubmittedPassword, ValidatedPassword};
pub use scope::{Scope, with_atomic_scope};
pub use transaction_record::{
    NewTransactionRecord, TransactionKind, TransactionRecord, TransactionStatus,
    create_transaction_record_table, get_transaction_record, get_transaction_records_for_account,
    insert_transaction_record,
};

/// The broad category of an [Error].
///
/// Callers that expose the engine over some transport map these to their own
/// status codes, e.g. [ErrorKind::Conflict] to a "409 Conflict".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was malformed and was rejected before any I/O.
    Validation,
    /// The caller could not prove they own the account.
    Authorization,
    /// The account does not hold enough money for the request.
    InsufficientFunds,
    /// An account or record does not exist.
    NotFound,
    /// A uniqueness constraint was violated.
    Conflict,
    /// The store failed in a way that is not the caller's fault.
    Infrastructure,
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The amount of a transaction was zero or negative.
    #[error("invalid amount")]
    InvalidAmount,

    /// A string could not be parsed as an [Amount].
    #[error("\"{0}\" is not a valid amount")]
    InvalidAmountFormat(String),

    /// A transfer was requested without a recipient.
    #[error("must specify recipient for TransferOut")]
    MissingRecipient,

    /// A transfer named the sender as its recipient.
    #[error("cannot perform TransferOut to self")]
    SelfTransfer,

    /// The transaction kind is not one the engine knows how to perform.
    #[error("unknown transaction type \"{0}\"")]
    UnknownTransactionKind(String),

    /// The submitted password did not match the account's password.
    #[error("invalid password")]
    InvalidCredentials,

    /// The submitted password does not have the shape of a valid password.
    #[error("{0}")]
    MalformedPassword(String),

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    TooWeak(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// The account balance does not cover the requested amount.
    #[error("balance of account {0} is not enough")]
    InsufficientFunds(AccountId),

    /// No account has the given ID.
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The phone number is already registered to another account.
    #[error("the phone number is already registered")]
    DuplicatePhoneNumber,

    /// Waiting for the lock on an account took longer than the lock timeout.
    #[error("timed out waiting for the lock on account {0}")]
    LockTimeout(AccountId),

    /// A thread panicked while holding the account lock table.
    #[error("the account lock table is poisoned")]
    LockPoisoned,

    /// A balance update was attempted outside of an atomic scope.
    #[error("balances can only be changed inside an atomic scope")]
    NoActiveScope,

    /// The atomic scope could not be committed and was rolled back.
    #[error("could not commit transaction: {0}")]
    CommitFailed(rusqlite::Error),

    /// The atomic scope failed and the rollback failed too.
    #[error("transaction failed: {error}, rollback failed: {rollback_error}")]
    RollbackFailed {
        /// The error that caused the rollback.
        error: Box<Error>,
        /// The error returned by the rollback.
        rollback_error: rusqlite::Error,
    },

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl Error {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount
            | Error::InvalidAmountFormat(_)
            | Error::MissingRecipient
            | Error::SelfTransfer
            | Error::UnknownTransactionKind(_)
            | Error::TooWeak(_) => ErrorKind::Validation,
            Error::InvalidCredentials | Error::MalformedPassword(_) => ErrorKind::Authorization,
            Error::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            Error::AccountNotFound(_) | Error::NotFound => ErrorKind::NotFound,
            Error::DuplicatePhoneNumber => ErrorKind::Conflict,
            Error::HashingError(_)
            | Error::LockTimeout(_)
            | Error::LockPoisoned
            | Error::NoActiveScope
            | Error::CommitFailed(_)
            | Error::RollbackFailed { .. }
            | Error::SqlError(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    && desc.ends_with("account.phone_number") =>
            {
                Error::DuplicatePhoneNumber
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

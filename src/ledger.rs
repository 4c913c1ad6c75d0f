//! The storage operations the transaction engine is built on.

use rusqlite::Connection;

use crate::{
    Account, AccountId, Amount, BalanceDirection, Error, NewTransactionRecord, Scope,
    TransactionId, TransactionRecord, account, transaction_record,
};

/// Reads and writes on accounts and the transaction audit log.
///
/// Every method takes the execution handle it should run on, either a plain
/// connection or the connection of an open [Scope]. Implementations hold no
/// per-request state, so one ledger can be shared by any number of threads.
pub trait Ledger: Send + Sync + 'static {
    /// Get the account with ID `account_id`.
    ///
    /// Fails with [Error::AccountNotFound] if there is no such account.
    fn get_account(
        &self,
        account_id: AccountId,
        connection: &Connection,
    ) -> Result<Account, Error>;

    /// Get the account registered to `phone_number`.
    ///
    /// Fails with [Error::NotFound] if no account has the phone number.
    fn get_account_by_phone_number(
        &self,
        phone_number: &str,
        connection: &Connection,
    ) -> Result<Account, Error>;

    /// Get every account, ordered by ID.
    fn list_accounts(&self, connection: &Connection) -> Result<Vec<Account>, Error>;

    /// Take the exclusive lock on `account_id` for the rest of `scope`.
    ///
    /// Fails with [Error::AccountNotFound] if there is no such account.
    fn lock_account(&self, account_id: AccountId, scope: &mut Scope<'_>) -> Result<(), Error>;

    /// Apply `amount` to the balance of `account_id` in `direction`.
    ///
    /// Fails with [Error::AccountNotFound] if no row was updated.
    fn update_balance(
        &self,
        account_id: AccountId,
        amount: Amount,
        direction: BalanceDirection,
        connection: &Connection,
    ) -> Result<(), Error>;

    /// Append `record` to the audit log and return its generated ID.
    fn insert_transaction_record(
        &self,
        record: &NewTransactionRecord,
        connection: &Connection,
    ) -> Result<TransactionId, Error>;

    /// Get the audit record with ID `id`.
    fn get_transaction_record(
        &self,
        id: TransactionId,
        connection: &Connection,
    ) -> Result<TransactionRecord, Error>;

    /// Get the audit records that involve `account_id`, newest first.
    fn list_transaction_records(
        &self,
        account_id: AccountId,
        connection: &Connection,
    ) -> Result<Vec<TransactionRecord>, Error>;
}

/// The [Ledger] backed by the SQLite tables in [crate::initialize_db].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteLedger;

impl Ledger for SqliteLedger {
    fn get_account(
        &self,
        account_id: AccountId,
        connection: &Connection,
    ) -> Result<Account, Error> {
        account::get_account(account_id, connection)
    }

    fn get_account_by_phone_number(
        &self,
        phone_number: &str,
        connection: &Connection,
    ) -> Result<Account, Error> {
        account::get_account_by_phone_number(phone_number, connection)
    }

    fn list_accounts(&self, connection: &Connection) -> Result<Vec<Account>, Error> {
        account::get_all_accounts(connection)
    }

    fn lock_account(&self, account_id: AccountId, scope: &mut Scope<'_>) -> Result<(), Error> {
        scope.lock_account(account_id)?;

        let exists: bool = scope.connection().query_row(
            "SELECT EXISTS (SELECT 1 FROM account WHERE id = ?1)",
            [account_id],
            |row| row.get(0),
        )?;

        if !exists {
            return Err(Error::AccountNotFound(account_id));
        }

        Ok(())
    }

    fn update_balance(
        &self,
        account_id: AccountId,
        amount: Amount,
        direction: BalanceDirection,
        connection: &Connection,
    ) -> Result<(), Error> {
        account::update_balance(account_id, amount, direction, connection)
    }

    fn insert_transaction_record(
        &self,
        record: &NewTransactionRecord,
        connection: &Connection,
    ) -> Result<TransactionId, Error> {
        transaction_record::insert_transaction_record(record, connection)
    }

    fn get_transaction_record(
        &self,
        id: TransactionId,
        connection: &Connection,
    ) -> Result<TransactionRecord, Error> {
        transaction_record::get_transaction_record(id, connection)
    }

    fn list_transaction_records(
        &self,
        account_id: AccountId,
        connection: &Connection,
    ) -> Result<Vec<TransactionRecord>, Error> {
        transaction_record::get_transaction_records_for_account(account_id, connection)
    }
}

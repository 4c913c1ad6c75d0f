//! Atomic scopes: a database transaction plus the account locks taken inside it.

use std::{sync::Arc, time::Duration};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::{AccountId, AccountLockGuard, AccountLocks, Error};

/// An open atomic scope.
///
/// Everything done through [Scope::connection] commits together or not at all.
/// Account locks taken with [Scope::lock_account] are held until the scope
/// ends. Dropping a scope without committing rolls it back, which covers
/// early returns and panics.
pub struct Scope<'conn> {
    // Field order matters: the transaction is rolled back before the locks are released.
    transaction: Transaction<'conn>,
    held: Vec<AccountLockGuard>,
    locks: Arc<AccountLocks>,
    lock_timeout: Duration,
}

impl Scope<'_> {
    /// The execution handle for this scope.
    pub fn connection(&self) -> &Connection {
        &self.transaction
    }

    /// Take the exclusive lock on `account_id` for the rest of the scope.
    ///
    /// Locking an account the scope already holds is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an [Error::LockTimeout] if another scope holds the lock for
    /// longer than the scope's lock timeout.
    pub fn lock_account(&mut self, account_id: AccountId) -> Result<(), Error> {
        if self.holds_lock(account_id) {
            return Ok(());
        }

        let guard = self.locks.acquire(account_id, self.lock_timeout)?;
        self.held.push(guard);

        Ok(())
    }

    /// Whether this scope holds the lock on `account_id`.
    pub fn holds_lock(&self, account_id: AccountId) -> bool {
        self.held
            .iter()
            .any(|guard| guard.account_id() == account_id)
    }

    fn commit(self) -> Result<(), Error> {
        let Scope {
            transaction, held, ..
        } = self;

        let result = transaction.commit().map_err(Error::CommitFailed);
        drop(held);

        result
    }

    fn rollback(self) -> Result<(), rusqlite::Error> {
        let Scope {
            transaction, held, ..
        } = self;

        let result = transaction.rollback();
        drop(held);

        result
    }
}

/// Run `f` inside an atomic scope on `connection`.
///
/// The scope begins an immediate transaction, so it waits for any other
/// writer on the database (up to the connection's busy timeout) before `f`
/// runs. If `f` returns `Ok` the scope is committed, otherwise it is rolled
/// back and the error from `f` is returned. Account locks taken by `f` are
/// released once the transaction has ended, whichever way it ended.
///
/// Scopes cannot be nested: `connection` stays mutably borrowed until the
/// scope has finished.
///
/// # Errors
///
/// Returns:
/// - the error from `f` after a successful rollback,
/// - [Error::RollbackFailed] with both errors if the rollback failed too,
/// - [Error::CommitFailed] if `f` succeeded but the commit failed,
/// - or [Error::SqlError] if the transaction could not be started.
pub fn with_atomic_scope<T, F>(
    connection: &mut Connection,
    locks: &Arc<AccountLocks>,
    lock_timeout: Duration,
    f: F,
) -> Result<T, Error>
where
    F: FnOnce(&mut Scope<'_>) -> Result<T, Error>,
{
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut scope = Scope {
        transaction,
        held: Vec::new(),
        locks: Arc::clone(locks),
        lock_timeout,
    };

    match f(&mut scope) {
        Ok(value) => {
            scope.commit()?;
            tracing::debug!("committed atomic scope");
            Ok(value)
        }
        Err(error) => match scope.rollback() {
            Ok(()) => {
                tracing::debug!(%error, "rolled back atomic scope");
                Err(error)
            }
            Err(rollback_error) => {
                tracing::error!(%error, %rollback_error, "could not roll back atomic scope");
                Err(Error::RollbackFailed {
                    error: Box::new(error),
                    rollback_error,
                })
            }
        },
    }
}

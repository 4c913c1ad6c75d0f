//! Exclusive per-account locks.
//!
//! A lock is represented by an [AccountLockGuard]. The lock is held until the
//! guard is dropped, which for the engine is when its atomic scope commits or
//! rolls back.

use std::{
    collections::HashSet,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{AccountId, Error};

/// The table of accounts that are currently locked.
///
/// One table is shared by every scope opened on the same [crate::Database].
#[derive(Debug, Default)]
pub struct AccountLocks {
    held: Mutex<HashSet<AccountId>>,
    released: Condvar,
}

impl AccountLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock on `account_id` is free, then take it.
    ///
    /// # Errors
    ///
    /// Returns an [Error::LockTimeout] if the lock is not released within
    /// `timeout`, or an [Error::LockPoisoned] if another thread panicked while
    /// updating the lock table.
    pub fn acquire(
        self: &Arc<Self>,
        account_id: AccountId,
        timeout: Duration,
    ) -> Result<AccountLockGuard, Error> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| Error::LockPoisoned)?;

        while held.contains(&account_id) {
            let remaining = deadline.saturating_duration_since(Instant::now());

            if remaining.is_zero() {
                tracing::warn!(account_id, "timed out waiting for account lock");
                return Err(Error::LockTimeout(account_id));
            }

            held = self
                .released
                .wait_timeout(held, remaining)
                .map_err(|_| Error::LockPoisoned)?
                .0;
        }

        held.insert(account_id);
        tracing::debug!(account_id, "acquired account lock");

        Ok(AccountLockGuard {
            locks: Arc::clone(self),
            account_id,
        })
    }

    /// Whether `account_id` is currently locked.
    pub fn is_locked(&self, account_id: AccountId) -> bool {
        let held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };

        held.contains(&account_id)
    }

    fn release(&self, account_id: AccountId) {
        // A poisoned table still has to forget the lock or every later waiter times out.
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };

        held.remove(&account_id);
        drop(held);

        self.released.notify_all();
        tracing::debug!(account_id, "released account lock");
    }
}

/// Proof that the holder has exclusive access to an account.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct AccountLockGuard {
    locks: Arc<AccountLocks>,
    account_id: AccountId,
}

impl AccountLockGuard {
    /// The locked account.
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        self.locks.release(self.account_id);
    }
}

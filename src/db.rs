//! Opening connections to the application's SQLite database.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rusqlite::{Connection, OpenFlags, TransactionBehavior};

use crate::{
    AccountLocks, Error, account::create_account_table,
    transaction_record::create_transaction_record_table,
};

/// Create the tables for the domain models if they do not exist yet.
///
/// # Errors
///
/// Returns an [Error::SqlError] if any of the tables could not be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction =
        rusqlite::Transaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_account_table(&transaction)?;
    create_transaction_record_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

/// A handle to the database file.
///
/// Every caller gets its own [Connection] from [Database::connect], so
/// concurrent requests never share an execution handle. The handle is cheap to
/// clone and all clones share one [AccountLocks] table.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
    locks: Arc<AccountLocks>,
}

impl Database {
    /// Open the database at `path`, creating the file and tables if needed.
    ///
    /// `busy_timeout` bounds how long a connection waits for another
    /// connection's write transaction before giving up.
    ///
    /// # Errors
    ///
    /// Returns an [Error::SqlError] if the file could not be opened or the
    /// tables could not be created.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, Error> {
        let database = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
            locks: Arc::new(AccountLocks::new()),
        };

        let connection = database.connect()?;
        // WAL lets readers carry on while a scope holds the write lock.
        let journal_mode: String =
            connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(%journal_mode, "set journal mode");
        initialize(&connection)?;

        tracing::info!(path = %database.path.display(), "opened database");

        Ok(database)
    }

    /// Open a new connection to the database.
    ///
    /// # Errors
    ///
    /// Returns an [Error::SqlError] if the connection could not be opened.
    pub fn connect(&self) -> Result<Connection, Error> {
        self.connect_with_busy_timeout(self.busy_timeout)
    }

    /// Open a new connection that waits up to `busy_timeout` for another
    /// connection's write transaction.
    ///
    /// # Errors
    ///
    /// Returns an [Error::SqlError] if the connection could not be opened.
    pub fn connect_with_busy_timeout(&self, busy_timeout: Duration) -> Result<Connection, Error> {
        let connection = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        connection.busy_timeout(busy_timeout)?;
        connection.execute_batch("PRAGMA foreign_keys=ON;")?;

        Ok(connection)
    }

    /// The lock table shared by every scope on this database.
    pub fn locks(&self) -> &Arc<AccountLocks> {
        &self.locks
    }

    /// The path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

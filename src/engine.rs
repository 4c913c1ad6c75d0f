//! The transaction engine: validates, applies and audits movements of money.

use std::{fmt, sync::Arc, thread};

use rusqlite::Connection;

use crate::{
    Account, AccountId, Amount, AuditPolicy, BalanceDirection, Database, EngineConfig, Error,
    Ledger, NewTransactionRecord, SqliteLedger, SubmittedPassword, TransactionId,
    TransactionKind, TransactionRecord, TransactionStatus, with_atomic_scope,
};

/// A request to move money, as submitted by a client.
#[derive(Clone)]
pub struct TransferRequest {
    /// The account that initiates the transaction.
    ///
    /// For a [TransactionKind::TopUp] this is also the account that is credited.
    pub sender_id: AccountId,
    /// The account to credit for a [TransactionKind::TransferOut].
    ///
    /// Ignored for top-ups. An ID of zero is treated the same as `None`.
    pub recipient_id: Option<AccountId>,
    /// How much money to move. Must be positive.
    pub amount: Amount,
    /// What kind of transaction this is.
    pub kind: TransactionKind,
    /// The sender's password. Only checked for transfers.
    pub password: SubmittedPassword,
    /// Free text stored with the audit record.
    pub description: String,
}

impl TransferRequest {
    /// A transfer of `amount` from `sender_id` to `recipient_id`.
    pub fn transfer_out(
        sender_id: AccountId,
        recipient_id: AccountId,
        amount: Amount,
        password: SubmittedPassword,
        description: &str,
    ) -> Self {
        Self {
            sender_id,
            recipient_id: Some(recipient_id),
            amount,
            kind: TransactionKind::TransferOut,
            password,
            description: description.to_owned(),
        }
    }

    /// A top-up of `amount` into `account_id`.
    pub fn top_up(account_id: AccountId, amount: Amount, description: &str) -> Self {
        Self {
            sender_id: account_id,
            recipient_id: None,
            amount,
            kind: TransactionKind::TopUp,
            password: SubmittedPassword::new(""),
            description: description.to_owned(),
        }
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("sender_id", &self.sender_id)
            .field("recipient_id", &self.recipient_id)
            .field("amount", &self.amount)
            .field("kind", &self.kind)
            .field("password", &"********")
            .field("description", &self.description)
            .finish()
    }
}

/// Applies [TransferRequest]s to the ledger.
///
/// The engine is shared between threads by reference. Each call opens its own
/// connection, so requests never share an execution handle.
pub struct Engine<L: Ledger = SqliteLedger> {
    database: Database,
    ledger: Arc<L>,
    config: EngineConfig,
}

impl<L: Ledger> Engine<L> {
    /// Create an engine that runs `ledger` on `database`.
    pub fn new(database: Database, ledger: L, config: EngineConfig) -> Self {
        Self {
            database,
            ledger: Arc::new(ledger),
            config,
        }
    }

    /// The settings the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The database the engine runs on.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Open a connection whose busy wait is bounded by the lock timeout.
    fn connect(&self) -> Result<Connection, Error> {
        self.database.connect_with_busy_timeout(self.config.lock_timeout)
    }

    /// Validate and apply `request`, returning the ID of its audit record.
    ///
    /// Money only moves if every step succeeds. The balance changes and the
    /// Successful audit record are written in one atomic scope while the
    /// involved accounts are locked. If the scope fails, nothing it wrote is
    /// kept and a Failed audit record is written according to the
    /// configured [AuditPolicy]. Requests rejected before the scope leave no
    /// trace in the store.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - [Error::InvalidAmount] if the amount is not positive,
    /// - [Error::AccountNotFound] if the sender or recipient does not exist,
    /// - [Error::MalformedPassword] or [Error::InvalidCredentials] if the
    ///   password of a transfer is not valid for the sender,
    /// - [Error::InsufficientFunds] if the sender cannot cover a transfer,
    /// - [Error::MissingRecipient] or [Error::SelfTransfer] if a transfer has
    ///   no usable recipient,
    /// - [Error::LockTimeout] if an account stayed locked for too long,
    /// - or an infrastructure error from the store.
    #[tracing::instrument(
        skip(self, request),
        fields(sender_id = request.sender_id, kind = %request.kind)
    )]
    pub fn create_transaction(&self, request: TransferRequest) -> Result<TransactionId, Error> {
        if !request.amount.is_positive() {
            tracing::warn!(amount = %request.amount, "rejected non-positive amount");
            return Err(Error::InvalidAmount);
        }

        let mut connection = self.connect()?;
        let account = self.ledger.get_account(request.sender_id, &connection)?;

        let result = match request.kind {
            TransactionKind::TransferOut => {
                self.perform_transfer_out(&mut connection, account, request)
            }
            TransactionKind::TopUp => self.perform_top_up(&mut connection, account, request),
        };

        if let Err(error) = &result {
            tracing::warn!(%error, kind = ?error.kind(), "transaction was not applied");
        }

        result
    }

    fn perform_transfer_out(
        &self,
        connection: &mut Connection,
        sender: Account,
        request: TransferRequest,
    ) -> Result<TransactionId, Error> {
        request.password.check_format()?;

        match sender.password_hash.verify(&request.password) {
            Ok(true) => {}
            Ok(false) => return Err(Error::InvalidCredentials),
            Err(error) => {
                tracing::error!(%error, account_id = sender.id, "could not verify password hash");
                return Err(Error::InvalidCredentials);
            }
        }

        if sender.balance < request.amount {
            return Err(Error::InsufficientFunds(sender.id));
        }

        let recipient_id = request
            .recipient_id
            .filter(|id| *id != 0)
            .ok_or(Error::MissingRecipient)?;

        if recipient_id == sender.id {
            return Err(Error::SelfTransfer);
        }

        let recipient = self.ledger.get_account(recipient_id, connection)?;

        let record = NewTransactionRecord {
            sender_id: sender.id,
            recipient_id: recipient.id,
            amount: request.amount,
            kind: TransactionKind::TransferOut,
            status: TransactionStatus::Successful,
            description: request.description,
        };
        let (first, second) = lock_order(sender.id, recipient.id);

        let result = with_atomic_scope(
            connection,
            self.database.locks(),
            self.config.lock_timeout,
            |scope| {
                self.ledger.lock_account(first, scope)?;
                self.ledger.lock_account(second, scope)?;

                // The balance may have changed since the check above.
                let sender = self.ledger.get_account(sender.id, scope.connection())?;
                if sender.balance < record.amount {
                    return Err(Error::InsufficientFunds(sender.id));
                }

                let recipient = self.ledger.get_account(recipient.id, scope.connection())?;
                if recipient.balance.checked_add(record.amount).is_none() {
                    return Err(Error::InvalidAmount);
                }

                self.ledger.update_balance(
                    sender.id,
                    record.amount,
                    BalanceDirection::Decrement,
                    scope.connection(),
                )?;
                self.ledger.update_balance(
                    recipient.id,
                    record.amount,
                    BalanceDirection::Increment,
                    scope.connection(),
                )?;

                self.ledger
                    .insert_transaction_record(&record, scope.connection())
            },
        );

        self.finish(connection, record, result)
    }

    fn perform_top_up(
        &self,
        connection: &mut Connection,
        account: Account,
        request: TransferRequest,
    ) -> Result<TransactionId, Error> {
        let record = NewTransactionRecord {
            sender_id: account.id,
            recipient_id: account.id,
            amount: request.amount,
            kind: TransactionKind::TopUp,
            status: TransactionStatus::Successful,
            description: request.description,
        };

        let result = with_atomic_scope(
            connection,
            self.database.locks(),
            self.config.lock_timeout,
            |scope| {
                self.ledger.lock_account(account.id, scope)?;

                let account = self.ledger.get_account(account.id, scope.connection())?;
                if account.balance.checked_add(record.amount).is_none() {
                    return Err(Error::InvalidAmount);
                }

                self.ledger.update_balance(
                    account.id,
                    record.amount,
                    BalanceDirection::Increment,
                    scope.connection(),
                )?;

                self.ledger
                    .insert_transaction_record(&record, scope.connection())
            },
        );

        self.finish(connection, record, result)
    }

    fn finish(
        &self,
        connection: &Connection,
        record: NewTransactionRecord,
        result: Result<TransactionId, Error>,
    ) -> Result<TransactionId, Error> {
        match result {
            Ok(transaction_id) => {
                tracing::info!(
                    transaction_id,
                    sender_id = record.sender_id,
                    recipient_id = record.recipient_id,
                    amount = %record.amount,
                    "applied transaction"
                );
                Ok(transaction_id)
            }
            Err(error) => {
                self.record_failure(connection, record.failed());
                Err(error)
            }
        }
    }

    /// Write the Failed audit record for an attempt whose scope was rolled back.
    ///
    /// Errors are logged and swallowed so the caller always sees the error
    /// that made the attempt fail.
    fn record_failure(&self, connection: &Connection, record: NewTransactionRecord) {
        match self.config.audit_policy {
            AuditPolicy::Synchronous => {
                let result = self.ledger.insert_transaction_record(&record, connection);
                log_failure_record(&record, result);
            }
            AuditPolicy::Detached => {
                let database = self.database.clone();
                let busy_timeout = self.config.lock_timeout;
                let ledger = Arc::clone(&self.ledger);
                let sender_id = record.sender_id;

                let spawned = thread::Builder::new()
                    .name("failed-record-writer".to_owned())
                    .spawn(move || {
                        let result = database
                            .connect_with_busy_timeout(busy_timeout)
                            .and_then(|connection| {
                                ledger.insert_transaction_record(&record, &connection)
                            });
                        log_failure_record(&record, result);
                    });

                if let Err(error) = spawned {
                    tracing::error!(%error, sender_id, "could not spawn failed record writer");
                }
            }
        }
    }

    /// Check that `password` is the password of the account registered to
    /// `phone_number` and return that account.
    ///
    /// # Errors
    ///
    /// Returns an [Error::InvalidCredentials] if no account has the phone
    /// number or the password does not match, or an infrastructure error from
    /// the store.
    pub fn authenticate(
        &self,
        phone_number: &str,
        password: &SubmittedPassword,
    ) -> Result<Account, Error> {
        let connection = self.connect()?;

        let account = match self
            .ledger
            .get_account_by_phone_number(phone_number, &connection)
        {
            Ok(account) => account,
            Err(Error::NotFound) => {
                tracing::warn!("log in attempted for unknown phone number");
                return Err(Error::InvalidCredentials);
            }
            Err(error) => return Err(error),
        };

        match account.password_hash.verify(password) {
            Ok(true) => {
                tracing::info!(account_id = account.id, "authenticated account");
                Ok(account)
            }
            Ok(false) => {
                tracing::warn!(account_id = account.id, "log in attempted with wrong password");
                Err(Error::InvalidCredentials)
            }
            Err(error) => {
                tracing::error!(%error, account_id = account.id, "could not verify password hash");
                Err(Error::InvalidCredentials)
            }
        }
    }

    /// Get the account with ID `account_id`.
    pub fn get_account(&self, account_id: AccountId) -> Result<Account, Error> {
        let connection = self.connect()?;
        self.ledger.get_account(account_id, &connection)
    }

    /// Get every account, ordered by ID.
    pub fn list_accounts(&self) -> Result<Vec<Account>, Error> {
        let connection = self.connect()?;
        self.ledger.list_accounts(&connection)
    }

    /// Get the audit record with ID `id`.
    pub fn get_transaction_record(&self, id: TransactionId) -> Result<TransactionRecord, Error> {
        let connection = self.connect()?;
        self.ledger.get_transaction_record(id, &connection)
    }

    /// Get the audit records that involve `account_id`, newest first.
    pub fn list_transaction_records(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionRecord>, Error> {
        let connection = self.connect()?;
        self.ledger.list_transaction_records(account_id, &connection)
    }
}

fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

fn log_failure_record(record: &NewTransactionRecord, result: Result<TransactionId, Error>) {
    match result {
        Ok(transaction_id) => tracing::info!(
            transaction_id,
            sender_id = record.sender_id,
            recipient_id = record.recipient_id,
            amount = %record.amount,
            "recorded failed transaction"
        ),
        Err(error) => tracing::error!(
            %error,
            sender_id = record.sender_id,
            recipient_id = record.recipient_id,
            amount = %record.amount,
            "could not record failed transaction"
        ),
    }
}

#[cfg(test)]
mod engine_tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::{Duration, Instant},
    };

    use rusqlite::{Connection, TransactionBehavior};
    use tempfile::TempDir;

    use crate::{
        Account, AccountId, Amount, AuditPolicy, BalanceDirection, Database, Engine,
        EngineConfig, Error, Ledger, NewTransactionRecord, Scope, SqliteLedger,
        SubmittedPassword, TransactionId, TransactionKind, TransactionRecord, TransactionStatus,
        TransferRequest,
        account::test_utils::{TEST_PASSWORD, insert_account},
    };

    use super::lock_order;

    struct TestContext<L: Ledger = SqliteLedger> {
        engine: Engine<L>,
        _dir: TempDir,
    }

    fn get_test_engine_with<L: Ledger>(ledger: L, config: EngineConfig) -> TestContext<L> {
        let dir = TempDir::new().unwrap();
        let database =
            Database::open(dir.path().join("wallet.db"), Duration::from_secs(5)).unwrap();

        TestContext {
            engine: Engine::new(database, ledger, config),
            _dir: dir,
        }
    }

    fn get_test_engine() -> TestContext {
        get_test_engine_with(SqliteLedger, EngineConfig::default())
    }

    fn add_account<L: Ledger>(engine: &Engine<L>, balance: i64, phone_number: &str) -> Account {
        let connection = engine.database().connect().unwrap();
        insert_account(Amount::from_units(balance), phone_number, &connection)
    }

    fn balance_of<L: Ledger>(engine: &Engine<L>, account_id: AccountId) -> Amount {
        engine.get_account(account_id).unwrap().balance
    }

    fn count_records<L: Ledger>(engine: &Engine<L>) -> i64 {
        engine
            .database()
            .connect()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM \"transaction\"", [], |row| row.get(0))
            .unwrap()
    }

    fn transfer(sender: &Account, recipient: &Account, amount: i64) -> TransferRequest {
        TransferRequest::transfer_out(
            sender.id,
            recipient.id,
            Amount::from_units(amount),
            SubmittedPassword::new(TEST_PASSWORD),
            "test transfer",
        )
    }

    #[test]
    fn transfer_moves_money_and_records_success() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 1_000_000, "+6421000001");
        let recipient = add_account(engine, 0, "+6421000002");

        let transaction_id = engine
            .create_transaction(transfer(&sender, &recipient, 250_000))
            .unwrap();

        assert_eq!(balance_of(engine, sender.id), Amount::from_units(750_000));
        assert_eq!(balance_of(engine, recipient.id), Amount::from_units(250_000));
        assert_eq!(count_records(engine), 1);

        let record = engine.get_transaction_record(transaction_id).unwrap();
        assert_eq!(record.sender_id, sender.id);
        assert_eq!(record.recipient_id, recipient.id);
        assert_eq!(record.amount, Amount::from_units(250_000));
        assert_eq!(record.kind, TransactionKind::TransferOut);
        assert_eq!(record.status, TransactionStatus::Successful);
        assert_eq!(record.description, "test transfer");
    }

    #[test]
    fn transfer_conserves_total_balance() {
        let context = get_test_engine();
        let engine = &context.engine;
        let first = add_account(engine, 500, "+6421000001");
        let second = add_account(engine, 250, "+6421000002");

        engine.create_transaction(transfer(&first, &second, 120)).unwrap();
        engine.create_transaction(transfer(&second, &first, 45)).unwrap();

        let total = balance_of(engine, first.id)
            .checked_add(balance_of(engine, second.id))
            .unwrap();
        assert_eq!(total, Amount::from_units(750));
    }

    #[test]
    fn transfer_with_insufficient_funds_leaves_no_trace() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 100, "+6421000001");
        let recipient = add_account(engine, 0, "+6421000002");

        let result = engine.create_transaction(transfer(&sender, &recipient, 250));

        assert_eq!(result, Err(Error::InsufficientFunds(sender.id)));
        assert_eq!(balance_of(engine, sender.id), Amount::from_units(100));
        assert_eq!(balance_of(engine, recipient.id), Amount::ZERO);
        assert_eq!(count_records(engine), 0);
    }

    #[test]
    fn top_up_credits_account_and_records_success() {
        let context = get_test_engine();
        let engine = &context.engine;
        let account = add_account(engine, 1_000_000, "+6421000001");

        let transaction_id = engine
            .create_transaction(TransferRequest::top_up(
                account.id,
                Amount::from_units(250_000),
                "top up",
            ))
            .unwrap();

        assert_eq!(balance_of(engine, account.id), Amount::from_units(1_250_000));

        let record = engine.get_transaction_record(transaction_id).unwrap();
        assert_eq!(record.sender_id, account.id);
        assert_eq!(record.recipient_id, account.id);
        assert_eq!(record.kind, TransactionKind::TopUp);
        assert_eq!(record.status, TransactionStatus::Successful);
    }

    #[test]
    fn top_up_ignores_recipient() {
        let context = get_test_engine();
        let engine = &context.engine;
        let account = add_account(engine, 0, "+6421000001");
        let other = add_account(engine, 0, "+6421000002");
        let mut request = TransferRequest::top_up(account.id, Amount::from_units(10), "");
        request.recipient_id = Some(other.id);

        let transaction_id = engine.create_transaction(request).unwrap();

        assert_eq!(balance_of(engine, account.id), Amount::from_units(10));
        assert_eq!(balance_of(engine, other.id), Amount::ZERO);
        let record = engine.get_transaction_record(transaction_id).unwrap();
        assert_eq!(record.recipient_id, account.id);
    }

    #[test]
    fn rejects_non_positive_amount_before_looking_up_sender() {
        let context = get_test_engine();
        let engine = &context.engine;

        let zero = engine.create_transaction(TransferRequest::top_up(42, Amount::ZERO, ""));
        let negative =
            engine.create_transaction(TransferRequest::top_up(42, Amount::from_units(-5), ""));

        assert_eq!(zero, Err(Error::InvalidAmount));
        assert_eq!(negative, Err(Error::InvalidAmount));
        assert_eq!(count_records(engine), 0);
    }

    #[test]
    fn rejects_missing_sender() {
        let context = get_test_engine();
        let engine = &context.engine;

        let result =
            engine.create_transaction(TransferRequest::top_up(42, Amount::from_units(5), ""));

        assert_eq!(result, Err(Error::AccountNotFound(42)));
        assert_eq!(count_records(engine), 0);
    }

    #[test]
    fn rejects_wrong_password() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 100, "+6421000001");
        let recipient = add_account(engine, 0, "+6421000002");
        let mut request = transfer(&sender, &recipient, 10);
        request.password = SubmittedPassword::new("Wrong123!");

        let result = engine.create_transaction(request);

        assert_eq!(result, Err(Error::InvalidCredentials));
        assert_eq!(balance_of(engine, sender.id), Amount::from_units(100));
        assert_eq!(count_records(engine), 0);
    }

    #[test]
    fn rejects_malformed_password() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 100, "+6421000001");
        let recipient = add_account(engine, 0, "+6421000002");
        let mut request = transfer(&sender, &recipient, 10);
        request.password = SubmittedPassword::new("short");

        let result = engine.create_transaction(request);

        assert!(matches!(result, Err(Error::MalformedPassword(_))));
        assert_eq!(count_records(engine), 0);
    }

    #[test]
    fn rejects_missing_recipient() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 100, "+6421000001");

        for recipient_id in [None, Some(0)] {
            let request = TransferRequest {
                recipient_id,
                ..TransferRequest::transfer_out(
                    sender.id,
                    0,
                    Amount::from_units(10),
                    SubmittedPassword::new(TEST_PASSWORD),
                    "",
                )
            };

            assert_eq!(
                engine.create_transaction(request),
                Err(Error::MissingRecipient)
            );
        }

        assert_eq!(balance_of(engine, sender.id), Amount::from_units(100));
        assert_eq!(count_records(engine), 0);
    }

    #[test]
    fn rejects_transfer_to_self() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 100, "+6421000001");

        let result = engine.create_transaction(transfer(&sender, &sender, 10));

        assert_eq!(result, Err(Error::SelfTransfer));
        assert_eq!(balance_of(engine, sender.id), Amount::from_units(100));
        assert_eq!(count_records(engine), 0);
    }

    #[test]
    fn rejects_unknown_recipient() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 100, "+6421000001");
        let request = TransferRequest::transfer_out(
            sender.id,
            999,
            Amount::from_units(10),
            SubmittedPassword::new(TEST_PASSWORD),
            "",
        );

        let result = engine.create_transaction(request);

        assert_eq!(result, Err(Error::AccountNotFound(999)));
        assert_eq!(balance_of(engine, sender.id), Amount::from_units(100));
        assert_eq!(count_records(engine), 0);
    }

    /// Wraps [SqliteLedger] and fails the credit to one account.
    struct FailingLedger {
        fail_increment_for: AccountId,
    }

    impl Ledger for FailingLedger {
        fn get_account(
            &self,
            account_id: AccountId,
            connection: &Connection,
        ) -> Result<Account, Error> {
            SqliteLedger.get_account(account_id, connection)
        }

        fn get_account_by_phone_number(
            &self,
            phone_number: &str,
            connection: &Connection,
        ) -> Result<Account, Error> {
            SqliteLedger.get_account_by_phone_number(phone_number, connection)
        }

        fn list_accounts(&self, connection: &Connection) -> Result<Vec<Account>, Error> {
            SqliteLedger.list_accounts(connection)
        }

        fn lock_account(&self, account_id: AccountId, scope: &mut Scope<'_>) -> Result<(), Error> {
            SqliteLedger.lock_account(account_id, scope)
        }

        fn update_balance(
            &self,
            account_id: AccountId,
            amount: Amount,
            direction: BalanceDirection,
            connection: &Connection,
        ) -> Result<(), Error> {
            if account_id == self.fail_increment_for && direction == BalanceDirection::Increment {
                return Err(Error::SqlError(rusqlite::Error::InvalidQuery));
            }

            SqliteLedger.update_balance(account_id, amount, direction, connection)
        }

        fn insert_transaction_record(
            &self,
            record: &NewTransactionRecord,
            connection: &Connection,
        ) -> Result<TransactionId, Error> {
            SqliteLedger.insert_transaction_record(record, connection)
        }

        fn get_transaction_record(
            &self,
            id: TransactionId,
            connection: &Connection,
        ) -> Result<TransactionRecord, Error> {
            SqliteLedger.get_transaction_record(id, connection)
        }

        fn list_transaction_records(
            &self,
            account_id: AccountId,
            connection: &Connection,
        ) -> Result<Vec<TransactionRecord>, Error> {
            SqliteLedger.list_transaction_records(account_id, connection)
        }
    }

    // Accounts get IDs 1 and 2 in a fresh database.
    const SENDER_ID: AccountId = 1;
    const RECIPIENT_ID: AccountId = 2;

    #[test]
    fn failed_credit_rolls_back_debit_and_records_failure() {
        let context = get_test_engine_with(
            FailingLedger {
                fail_increment_for: RECIPIENT_ID,
            },
            EngineConfig::default(),
        );
        let engine = &context.engine;
        let sender = add_account(engine, 1_000, "+6421000001");
        let recipient = add_account(engine, 0, "+6421000002");
        assert_eq!((sender.id, recipient.id), (SENDER_ID, RECIPIENT_ID));

        let result = engine.create_transaction(transfer(&sender, &recipient, 300));

        assert_eq!(result, Err(Error::SqlError(rusqlite::Error::InvalidQuery)));
        assert_eq!(balance_of(engine, sender.id), Amount::from_units(1_000));
        assert_eq!(balance_of(engine, recipient.id), Amount::ZERO);
        assert!(!engine.database().locks().is_locked(sender.id));
        assert!(!engine.database().locks().is_locked(recipient.id));

        let records = engine.list_transaction_records(sender.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransactionStatus::Failed);
        assert_eq!(records[0].kind, TransactionKind::TransferOut);
        assert_eq!(records[0].amount, Amount::from_units(300));
        assert_eq!(records[0].recipient_id, recipient.id);
    }

    #[test]
    fn failed_top_up_records_failure() {
        let context = get_test_engine_with(
            FailingLedger {
                fail_increment_for: SENDER_ID,
            },
            EngineConfig::default(),
        );
        let engine = &context.engine;
        let account = add_account(engine, 10, "+6421000001");

        let result = engine.create_transaction(TransferRequest::top_up(
            account.id,
            Amount::from_units(5),
            "",
        ));

        assert!(result.is_err());
        assert_eq!(balance_of(engine, account.id), Amount::from_units(10));

        let records = engine.list_transaction_records(account.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransactionStatus::Failed);
        assert_eq!(records[0].kind, TransactionKind::TopUp);
    }

    #[test]
    fn detached_policy_records_failure_in_background() {
        let context = get_test_engine_with(
            FailingLedger {
                fail_increment_for: RECIPIENT_ID,
            },
            EngineConfig {
                audit_policy: AuditPolicy::Detached,
                ..EngineConfig::default()
            },
        );
        let engine = &context.engine;
        let sender = add_account(engine, 1_000, "+6421000001");
        let recipient = add_account(engine, 0, "+6421000002");

        let result = engine.create_transaction(transfer(&sender, &recipient, 300));
        assert!(result.is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        let records = loop {
            let records = engine.list_transaction_records(sender.id).unwrap();
            if !records.is_empty() || Instant::now() > deadline {
                break records;
            }
            thread::sleep(Duration::from_millis(10));
        };

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransactionStatus::Failed);
        assert_eq!(balance_of(engine, sender.id), Amount::from_units(1_000));
    }

    #[test]
    fn concurrent_overdraw_applies_only_one_transfer() {
        let context = get_test_engine();
        let engine = &context.engine;
        let sender = add_account(engine, 1_000, "+6421000001");
        let first_recipient = add_account(engine, 0, "+6421000002");
        let second_recipient = add_account(engine, 0, "+6421000003");
        let barrier = Barrier::new(2);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = [&first_recipient, &second_recipient]
                .into_iter()
                .map(|recipient| {
                    let sender = &sender;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        engine.create_transaction(transfer(sender, recipient, 600))
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|result| *result == Err(Error::InsufficientFunds(sender.id)))
        );
        assert_eq!(balance_of(engine, sender.id), Amount::from_units(400));

        let credited = balance_of(engine, first_recipient.id)
            .checked_add(balance_of(engine, second_recipient.id))
            .unwrap();
        assert_eq!(credited, Amount::from_units(600));

        let successful = engine
            .list_transaction_records(sender.id)
            .unwrap()
            .into_iter()
            .filter(|record| record.status == TransactionStatus::Successful)
            .count();
        assert_eq!(successful, 1);
    }

    #[test]
    fn opposite_transfers_do_not_deadlock() {
        let context = get_test_engine();
        let engine = Arc::new(context.engine);
        let first = add_account(&engine, 1_000, "+6421000001");
        let second = add_account(&engine, 1_000, "+6421000002");

        let handles: Vec<_> = [(first.clone(), second.clone()), (second, first.clone())]
            .into_iter()
            .map(|(from, to)| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..10 {
                        engine.create_transaction(transfer(&from, &to, 1)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(balance_of(&engine, first.id), Amount::from_units(1_000));
        assert_eq!(engine.list_transaction_records(first.id).unwrap().len(), 20);
    }

    #[test]
    fn busy_database_wait_is_bounded_by_lock_timeout() {
        let context = get_test_engine_with(
            SqliteLedger,
            EngineConfig {
                lock_timeout: Duration::from_millis(50),
                ..EngineConfig::default()
            },
        );
        let engine = &context.engine;
        let account = add_account(engine, 10, "+6421000001");
        let mut other_connection = engine.database().connect().unwrap();
        let other_writer = other_connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();

        let started = Instant::now();
        let result = engine.create_transaction(TransferRequest::top_up(
            account.id,
            Amount::from_units(5),
            "",
        ));

        assert!(matches!(result, Err(Error::SqlError(_))), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(other_writer);
        assert_eq!(balance_of(engine, account.id), Amount::from_units(10));
    }

    #[test]
    fn authenticate_returns_account_for_correct_password() {
        let context = get_test_engine();
        let engine = &context.engine;
        let account = add_account(engine, 10, "+6421000001");

        let got = engine.authenticate("+6421000001", &SubmittedPassword::new(TEST_PASSWORD));

        assert_eq!(got, Ok(account));
    }

    #[test]
    fn authenticate_rejects_wrong_password_and_unknown_number() {
        let context = get_test_engine();
        let engine = &context.engine;
        add_account(engine, 10, "+6421000001");

        let wrong_password =
            engine.authenticate("+6421000001", &SubmittedPassword::new("Wrong123!"));
        let unknown_number =
            engine.authenticate("+6421999999", &SubmittedPassword::new(TEST_PASSWORD));

        assert_eq!(wrong_password, Err(Error::InvalidCredentials));
        assert_eq!(unknown_number, Err(Error::InvalidCredentials));
    }

    #[test]
    fn lock_order_is_ascending() {
        assert_eq!(lock_order(2, 1), (1, 2));
        assert_eq!(lock_order(1, 2), (1, 2));
    }

    #[test]
    fn debug_redacts_password() {
        let request = TransferRequest::transfer_out(
            1,
            2,
            Amount::from_units(1),
            SubmittedPassword::new("Secret123!"),
            "",
        );

        assert!(!format!("{request:?}").contains("Secret123!"));
    }
}

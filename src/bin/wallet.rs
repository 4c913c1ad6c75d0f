use std::{
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::{Parser, Subcommand};
use serde::Serialize;

use wallet_rs::{
    AccountId, Amount, AuditPolicy, Database, Engine, EngineConfig, Error, NewAccount,
    PasswordHash, SqliteLedger, SubmittedPassword, TransferRequest, ValidatedPassword,
    create_account, logging::setup_logging,
};

/// Operate the wallet transaction engine against a database file.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long, env = "WALLET_DB_PATH")]
    db_path: PathBuf,

    /// How long a transaction waits for an account lock, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    lock_timeout_ms: u64,

    /// Write the records of failed transactions in the background.
    #[arg(long)]
    detached_audit: bool,

    /// Also append debug logs to this file.
    #[arg(long)]
    debug_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database file and tables.
    Init,
    /// Register a new account. The password is read from the terminal.
    CreateAccount {
        /// The account holder's full name.
        #[arg(long)]
        full_name: String,
        /// The account holder's phone number.
        #[arg(long)]
        phone_number: String,
        /// The opening balance, e.g. "100.50".
        #[arg(long, default_value = "0")]
        balance: Amount,
    },
    /// Check an account's password. The password is read from the terminal.
    LogIn {
        /// The account holder's phone number.
        #[arg(long)]
        phone_number: String,
    },
    /// Add money to an account.
    TopUp {
        /// The account to credit.
        #[arg(long)]
        account_id: AccountId,
        /// How much to add, e.g. "100.50".
        #[arg(long)]
        amount: Amount,
        /// A note stored with the transaction.
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Move money between accounts. The sender's password is read from the terminal.
    Transfer {
        /// The account to debit.
        #[arg(long)]
        from: AccountId,
        /// The account to credit.
        #[arg(long)]
        to: AccountId,
        /// How much to move, e.g. "100.50".
        #[arg(long)]
        amount: Amount,
        /// A note stored with the transaction.
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List every account.
    Accounts,
    /// Show one account.
    Account {
        /// The ID of the account.
        #[arg(long)]
        id: AccountId,
    },
    /// List the transactions that involve an account, newest first.
    History {
        /// The ID of the account.
        #[arg(long)]
        account_id: AccountId,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(error) = setup_logging(args.debug_log.as_deref()) {
        print_error(format!("Could not open the debug log: {error}"));
        return ExitCode::FAILURE;
    }

    if !has_extension(&args.db_path) {
        print_error("Database path must include a file extension (e.g., 'wallet.db').");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            print_error(&error);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Error> {
    let database = Database::open(&args.db_path, Duration::from_millis(args.lock_timeout_ms))?;
    let config = EngineConfig {
        lock_timeout: Duration::from_millis(args.lock_timeout_ms),
        audit_policy: if args.detached_audit {
            AuditPolicy::Detached
        } else {
            AuditPolicy::Synchronous
        },
    };
    let engine = Engine::new(database, SqliteLedger, config);

    match args.command {
        Command::Init => {
            print_json(&serde_json::json!({ "db_path": args.db_path }));
        }
        Command::CreateAccount {
            full_name,
            phone_number,
            balance,
        } => {
            let Some(password_hash) = get_new_password_hash() else {
                return Ok(());
            };

            let connection = engine.database().connect()?;
            let account = create_account(
                NewAccount {
                    full_name,
                    phone_number,
                    password_hash,
                    balance,
                },
                &connection,
            )?;

            print_json(&account);
        }
        Command::LogIn { phone_number } => {
            let Some(password) = prompt("Enter your password: ") else {
                return Ok(());
            };

            let account =
                engine.authenticate(&phone_number, &SubmittedPassword::new(&password))?;

            print_json(&account);
        }
        Command::TopUp {
            account_id,
            amount,
            description,
        } => {
            let transaction_id = engine.create_transaction(TransferRequest::top_up(
                account_id,
                amount,
                &description,
            ))?;

            print_json(&engine.get_transaction_record(transaction_id)?);
        }
        Command::Transfer {
            from,
            to,
            amount,
            description,
        } => {
            let Some(password) = prompt("Enter the sender's password: ") else {
                return Ok(());
            };

            let transaction_id = engine.create_transaction(TransferRequest::transfer_out(
                from,
                to,
                amount,
                SubmittedPassword::new(&password),
                &description,
            ))?;

            print_json(&engine.get_transaction_record(transaction_id)?);
        }
        Command::Accounts => print_json(&engine.list_accounts()?),
        Command::Account { id } => print_json(&engine.get_account(id)?),
        Command::History { account_id } => {
            print_json(&engine.list_transaction_records(account_id)?)
        }
    }

    Ok(())
}

fn has_extension(db_path: &Path) -> bool {
    db_path
        .extension()
        .is_some_and(|extension| !extension.is_empty())
}

fn get_new_password_hash() -> Option<PasswordHash> {
    loop {
        println!();

        let first_password = prompt("Enter a new password: ")?;

        if let Err(error) = ValidatedPassword::new(&first_password) {
            print_error(error);
            continue;
        }

        if let Err(error) = SubmittedPassword::new(&first_password).check_format() {
            print_error(error);
            continue;
        }

        let second_password = prompt("Enter the same password again: ")?;

        if first_password != second_password {
            print_error("Passwords must match, try again.");
            continue;
        }

        match PasswordHash::from_raw_password(&first_password, PasswordHash::DEFAULT_COST) {
            Ok(password_hash) => return Some(password_hash),
            Err(error) => {
                print_error(format!("Could not hash password: {error}. Try again."));
                continue;
            }
        }
    }
}

fn prompt(message: &str) -> Option<String> {
    match rpassword::prompt_password(message) {
        Ok(string) => Some(string),
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => None,
        Err(error) => {
            print_error(format!("Could not read password from stdin: {error}"));
            None
        }
    }
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(error) => print_error(format!("Could not format output: {error}")),
    }
}

fn print_error(error: impl ToString) {
    eprintln!(
        "\x1b[31;1m{}\x1b[0m",
        capitalise_first_char(&error.to_string())
    )
}

fn capitalise_first_char(string: &str) -> String {
    let mut chars = string.chars();
    let Some(first) = chars.next() else {
        return String::with_capacity(0);
    };
    first.to_uppercase().chain(chars).collect()
}

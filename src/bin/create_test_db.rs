use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use rusqlite::Connection;

use wallet_rs::{
    Amount, NewAccount, PasswordHash, ValidatedPassword, create_account, initialize_db,
};

/// A utility for creating a test database for the wallet engine.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,
}

/// The password of every seeded account.
const TEST_PASSWORD: &str = "Test1234!";

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        None => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let conn = Connection::open(output_path)?;

    initialize_db(&conn)?;

    let password_hash = PasswordHash::new(
        ValidatedPassword::new_unchecked(TEST_PASSWORD),
        PasswordHash::DEFAULT_COST,
    )?;

    for (full_name, phone_number, balance) in [
        ("Alice Tester", "+6421000001", 1_000_000),
        ("Bob Tester", "+6421000002", 0),
    ] {
        println!("Creating account for {full_name}...");

        let account = create_account(
            NewAccount {
                full_name: full_name.to_owned(),
                phone_number: phone_number.to_owned(),
                password_hash: password_hash.clone(),
                balance: Amount::from_units(balance),
            },
            &conn,
        )?;

        println!("  id = {}, balance = {}", account.id, account.balance);
    }

    println!("Success! Both accounts use the password {TEST_PASSWORD:?}.");

    Ok(())
}

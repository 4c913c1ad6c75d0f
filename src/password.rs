//! Password types.
//!
//! `ValidatedPassword` wraps a string and ensures it is a strong password for a new account.
//! `PasswordHash` converts a `ValidatedPassword` into a salted and hashed password.
//! `SubmittedPassword` is the password a caller presents to authorise a transfer.

use std::fmt::{Debug, Display};

use bcrypt::{BcryptError, hash, verify};
use serde::{Deserialize, Serialize};
use zxcvbn::{Score, feedback::Feedback, zxcvbn};

use crate::Error;

/// A password that has been validated, but not yet hashed.
///
/// This struct can be used to construct a [PasswordHash].
#[derive(Clone, PartialEq)]
pub struct ValidatedPassword(String);

impl ValidatedPassword {
    /// Create and validate a new password from a string.
    ///
    /// # Errors
    ///
    /// This function will return an error if the password is considered too weak.
    /// The error message will explain why the password is considered too weak and suggest how to make it stronger.
    pub fn new(raw_password_string: &str) -> Result<Self, Error> {
        let password_analysis = zxcvbn(raw_password_string, &[]);

        match password_analysis.score() {
            Score::Three | Score::Four => Ok(Self(raw_password_string.to_string())),
            _ => Err(Error::TooWeak(
                password_analysis
                    .feedback()
                    .unwrap_or(&Feedback::default())
                    .to_string(),
            )),
        }
    }

    /// Create a new `ValidatedPassword` without any validation.
    ///
    /// The caller should ensure that `raw_password_string` is a valid and secure password.
    ///
    /// This function has `_unchecked` in the name but is not `unsafe`, because if an invalid password is provided it may cause incorrect behaviour but will not affect memory safety.
    pub fn new_unchecked(raw_password_string: &str) -> Self {
        Self(raw_password_string.to_string())
    }
}

impl Display for ValidatedPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", str::repeat("*", 8))
    }
}

impl Debug for ValidatedPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValidatedPassword({self})")
    }
}

/// A salted and hashed password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// An alias for the default encryption cost for hashing passwords.
    pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

    /// Create a hashed password from a validated password with the specified `cost`.
    ///
    /// `cost` increases the rounds of hashing and therefore the time needed to verify a password.
    /// A value of at least 12 is recommended. Pass in [PasswordHash::DEFAULT_COST] to use the recommended cost.
    ///
    /// # Errors
    ///
    /// This function will return an error if the password could not be hashed.
    pub fn new(password: ValidatedPassword, cost: u32) -> Result<Self, Error> {
        match hash(&password.0, cost) {
            Ok(password_hash) => Ok(Self(password_hash)),
            Err(e) => Err(Error::HashingError(e.to_string())),
        }
    }

    /// Create a new `PasswordHash` without any validation.
    ///
    /// The caller should ensure that `raw_password_hash` is a valid password hash.
    pub fn new_unchecked(raw_password_hash: &str) -> Self {
        Self(raw_password_hash.to_string())
    }

    /// Try to create a password hash from a raw password string.
    ///
    /// This is used instead of `From<String>` or `FromStr` to make it a bit clearer that
    /// we are not parsing an existing password hash.
    pub fn from_raw_password(raw_password: &str, cost: u32) -> Result<Self, Error> {
        let validated_password = ValidatedPassword::new(raw_password)?;
        PasswordHash::new(validated_password, cost)
    }

    /// Check that `password` matches the stored password.
    pub fn verify(&self, password: &SubmittedPassword) -> Result<bool, BcryptError> {
        verify(&password.0, &self.0)
    }
}

impl AsRef<str> for PasswordHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A password presented to authorise a transfer.
///
/// Only the format is checked here, the value itself is checked against the
/// account's [PasswordHash]. The password is never printed.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SubmittedPassword(String);

impl SubmittedPassword {
    /// The shortest password accepted, in bytes.
    pub const MIN_LENGTH: usize = 6;
    /// The longest password accepted, in bytes.
    pub const MAX_LENGTH: usize = 64;

    /// Wrap a submitted password.
    pub fn new(password: &str) -> Self {
        Self(password.to_owned())
    }

    /// Check the password has an acceptable shape.
    ///
    /// A password must be 6 to 64 bytes long and contain an upper case letter,
    /// a number, and a character that is neither a letter nor a digit.
    ///
    /// # Errors
    ///
    /// Returns [Error::MalformedPassword] describing the first rule broken.
    pub fn check_format(&self) -> Result<(), Error> {
        let password = &self.0;

        if password.len() < Self::MIN_LENGTH || password.len() > Self::MAX_LENGTH {
            return Err(Error::MalformedPassword(format!(
                "password should be {} to {} characters",
                Self::MIN_LENGTH,
                Self::MAX_LENGTH
            )));
        }

        if !password.chars().any(char::is_uppercase) {
            return Err(Error::MalformedPassword(
                "password should contain a capital letter".to_owned(),
            ));
        }

        if !password.chars().any(char::is_numeric) {
            return Err(Error::MalformedPassword(
                "password should contain a number".to_owned(),
            ));
        }

        if password.chars().all(char::is_alphanumeric) {
            return Err(Error::MalformedPassword(
                "password should contain a special character".to_owned(),
            ));
        }

        Ok(())
    }
}

impl Debug for SubmittedPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubmittedPassword({})", str::repeat("*", 8))
    }
}

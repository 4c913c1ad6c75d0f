//! Fixed-point money amounts.

use std::{fmt, str::FromStr};

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
///
/// The scaled integer is what gets written to the database, so balances never
/// pick up floating point rounding errors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    /// The number of scaled units in one whole unit of currency.
    pub const SCALE: i64 = 10_000;

    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from a whole number of currency units, e.g. `250_000`.
    ///
    /// `units` must be within `i64::MIN / SCALE..=i64::MAX / SCALE`. Use
    /// [Amount::checked_from_units] for values that may be out of range.
    ///
    /// # Panics
    ///
    /// Panics if `units` is out of range.
    pub const fn from_units(units: i64) -> Self {
        match Self::checked_from_units(units) {
            Some(amount) => amount,
            None => panic!("amount out of range"),
        }
    }

    /// Create an amount from a whole number of currency units, returning
    /// `None` if the scaled value does not fit in an `i64`.
    pub const fn checked_from_units(units: i64) -> Option<Self> {
        match units.checked_mul(Self::SCALE) {
            Some(value) => Some(Amount(value)),
            None => None,
        }
    }

    /// Create an amount from an already scaled integer.
    pub const fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// The scaled integer representation.
    pub const fn as_scaled(&self) -> i64 {
        self.0
    }

    /// Whether the amount is strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Add two amounts, returning `None` on overflow.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Subtract `rhs`, returning `None` on overflow.
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        let whole = abs / scale;
        let frac = abs % scale;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

impl FromStr for Amount {
    type Err = Error;

    /// Parse a decimal string such as `"250000"`, `"12.5"` or `"-0.0001"`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidAmountFormat] if the string is not a decimal
    /// number with at most four fractional digits, or if it does not fit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAmountFormat(s.to_owned());
        let trimmed = s.trim();

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }

        if frac.len() > 4
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<4}").parse().map_err(|_| invalid())?
        };

        let scaled = whole
            .checked_mul(Self::SCALE)
            .and_then(|value| value.checked_add(frac))
            .ok_or_else(invalid)?;

        Ok(Amount(if negative { -scaled } else { scaled }))
    }
}

impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Amount)
    }
}

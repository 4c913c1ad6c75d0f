//! Database ID type definitions.

/// Alias for the integer type used for mapping to account IDs.
pub type AccountId = i64;

/// Alias for the integer type used for mapping to transaction record IDs.
pub type TransactionId = i64;

//! Database ID type definitions.

/// Alias for the integer type used for mapping to database IDs.
pub type DatabaseId = i64;

/// The ID of a user account.
pub type UserId = i64;

/// The ID of a category.
pub type CategoryId = i64;

/// The ID of a budget.
pub type BudgetId = i64;

/// The ID of a transaction.
pub type TransactionId = i64;

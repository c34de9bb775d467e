//! The API endpoint URIs.

/// The route for registering a new user.
pub const REGISTER: &str = "/auth/register";
/// The route for signing in and receiving a bearer token.
pub const SIGN_IN: &str = "/auth/sign_in";
/// The route for listing and creating categories.
pub const CATEGORIES: &str = "/categories";
/// The route for updating or deleting a single category.
pub const CATEGORY: &str = "/categories/{category_id}";
/// The route for listing and creating budgets.
pub const BUDGETS: &str = "/budgets";
/// The route for updating or deleting a single budget.
pub const BUDGET: &str = "/budgets/{budget_id}";
/// The route for listing and creating transactions.
pub const TRANSACTIONS: &str = "/transactions";
/// The route for updating or deleting a single transaction.
pub const TRANSACTION: &str = "/transactions/{transaction_id}";
/// The route for the analytics report over a reporting period.
pub const ANALYTICS: &str = "/analytics/{period}";

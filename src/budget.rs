//! This file defines the `Budget` type, its API routes and database queries,
//! and the expense side-effect operations used by the transaction module.
//!
//! A budget is a per-user, per-category spending cap with a running `spent`
//! total. `spent` is maintained exclusively by [apply_expense] and
//! [reverse_expense], which the transaction module calls from inside its
//! atomic units. Budget update requests can never set `spent` directly.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    auth::Claims,
    category,
    database_id::{BudgetId, CategoryId, UserId},
    state::AppState,
};

/// A spending cap for one of a user's categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// The ID of the budget.
    pub id: BudgetId,
    /// The ID of the user that owns the budget.
    pub user_id: UserId,
    /// The ID of the category the budget applies to.
    #[serde(rename = "category")]
    pub category_id: CategoryId,
    /// The maximum amount that may be spent in the category.
    pub limit: f64,
    /// The cumulative amount spent in the category so far.
    pub spent: f64,
    /// The headroom left in the budget, derived as `limit - spent`.
    pub remaining: f64,
    /// The date the budget takes effect from.
    pub start_date: Date,
}

/// A budget joined with its category's display metadata for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetWithCategory {
    /// The budget itself.
    #[serde(flatten)]
    pub budget: Budget,
    /// The name of the budget's category.
    pub category_name: String,
    /// The display color of the budget's category.
    pub category_color: Option<String>,
}

/// The data sent by a client to create a budget.
#[derive(Debug, Serialize, Deserialize)]
pub struct NewBudget {
    /// The ID of the category the budget applies to.
    pub category: CategoryId,
    /// The maximum amount that may be spent in the category.
    pub limit: f64,
    /// The date the budget takes effect from. Defaults to today.
    pub start_date: Option<Date>,
}

/// The fields of a budget that a client may update.
///
/// `spent` is deliberately absent: it is derived from the category's expense
/// transactions and can only be changed through them.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateBudget {
    /// The ID of the category the budget applies to.
    pub category: Option<CategoryId>,
    /// The maximum amount that may be spent in the category.
    pub limit: Option<f64>,
    /// The date the budget takes effect from.
    pub start_date: Option<Date>,
}

/// A route handler for creating a new budget.
pub async fn create_budget_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    WithRejection(Json(data), _): WithRejection<Json<NewBudget>, Error>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let budget = create_budget(data, claims.sub, &connection)?;

    Ok((StatusCode::CREATED, Json(budget)))
}

/// A route handler for listing the caller's budgets, joined with category
/// display metadata.
pub async fn list_budgets_endpoint(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let budgets = get_all_budgets(claims.sub, &connection)?;

    Ok(Json(budgets))
}

/// A route handler for updating a budget's limit, category or start date.
pub async fn update_budget_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(budget_id): Path<BudgetId>,
    WithRejection(Json(data), _): WithRejection<Json<UpdateBudget>, Error>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let budget = update_budget(budget_id, claims.sub, data, &connection)?;

    Ok(Json(budget))
}

/// A route handler for deleting a budget.
pub async fn delete_budget_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(budget_id): Path<BudgetId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    delete_budget(budget_id, claims.sub, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Create a budget in the database.
///
/// # Errors
/// This function will return:
/// - [Error::InvalidBudgetLimit] if `limit` is not a positive finite number,
/// - [Error::InvalidCategory] if the category does not resolve to one of the
///   user's categories,
/// - [Error::DuplicateBudget] if the user already has a budget for the
///   category,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_budget(
    data: NewBudget,
    user_id: UserId,
    connection: &Connection,
) -> Result<Budget, Error> {
    if !data.limit.is_finite() || data.limit <= 0.0 {
        return Err(Error::InvalidBudgetLimit);
    }

    // Resolve the category up front so a dangling reference is reported as a
    // client error rather than a bare foreign key failure.
    category::get_category(data.category, user_id, connection)
        .map_err(|_| Error::InvalidCategory(Some(data.category)))?;

    let start_date = data
        .start_date
        .unwrap_or_else(|| OffsetDateTime::now_utc().date());

    connection.execute(
        "INSERT INTO budget (user_id, category_id, \"limit\", spent, start_date)
         VALUES (?1, ?2, ?3, 0, ?4)",
        (user_id, data.category, data.limit, start_date),
    )?;

    let id = connection.last_insert_rowid();

    Ok(Budget {
        id,
        user_id,
        category_id: data.category,
        limit: data.limit,
        spent: 0.0,
        remaining: data.limit,
        start_date,
    })
}

/// Retrieve a budget owned by `user_id` from the database.
///
/// # Errors
/// This function will return [Error::NotFound] if `budget_id` does not refer
/// to a budget owned by `user_id`, or [Error::SqlError] if there is some
/// other SQL error.
pub fn get_budget(
    budget_id: BudgetId,
    user_id: UserId,
    connection: &Connection,
) -> Result<Budget, Error> {
    let budget = connection
        .prepare(
            "SELECT id, user_id, category_id, \"limit\", spent, start_date FROM budget
             WHERE id = :id AND user_id = :user_id",
        )?
        .query_one(&[(":id", &budget_id), (":user_id", &user_id)], map_row)?;

    Ok(budget)
}

/// Retrieve all of a user's budgets, each joined with its category.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_all_budgets(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<BudgetWithCategory>, Error> {
    connection
        .prepare(
            "SELECT budget.id, budget.user_id, budget.category_id, budget.\"limit\",
                    budget.spent, budget.start_date, category.name, category.color
             FROM budget
             JOIN category ON budget.category_id = category.id
             WHERE budget.user_id = :user_id
             ORDER BY budget.start_date ASC, budget.id ASC",
        )?
        .query_map(&[(":user_id", &user_id)], |row| {
            Ok(BudgetWithCategory {
                budget: map_row(row)?,
                category_name: row.get(6)?,
                category_color: row.get(7)?,
            })
        })?
        .map(|maybe_budget| maybe_budget.map_err(|error| error.into()))
        .collect()
}

/// Update a budget's limit, category or start date.
///
/// Fields that are `None` keep their current value. The `spent` field is
/// never touched by this function.
///
/// # Errors
/// This function will return:
/// - [Error::NotFound] if `budget_id` does not refer to a budget owned by
///   `user_id`,
/// - [Error::InvalidBudgetLimit] if a non-positive limit is requested,
/// - [Error::InvalidCategory] if a new category does not resolve,
/// - [Error::DuplicateBudget] if moving the budget to a category that already
///   has one,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_budget(
    budget_id: BudgetId,
    user_id: UserId,
    data: UpdateBudget,
    connection: &Connection,
) -> Result<Budget, Error> {
    let current = get_budget(budget_id, user_id, connection)?;

    let limit = data.limit.unwrap_or(current.limit);
    if !limit.is_finite() || limit <= 0.0 {
        return Err(Error::InvalidBudgetLimit);
    }

    let category_id = data.category.unwrap_or(current.category_id);
    if category_id != current.category_id {
        category::get_category(category_id, user_id, connection)
            .map_err(|_| Error::InvalidCategory(Some(category_id)))?;
    }

    let start_date = data.start_date.unwrap_or(current.start_date);

    connection.execute(
        "UPDATE budget SET category_id = ?1, \"limit\" = ?2, start_date = ?3
         WHERE id = ?4 AND user_id = ?5",
        (category_id, limit, start_date, budget_id, user_id),
    )?;

    Ok(Budget {
        id: budget_id,
        user_id,
        category_id,
        limit,
        spent: current.spent,
        remaining: limit - current.spent,
        start_date,
    })
}

/// Delete a budget owned by `user_id`.
///
/// # Errors
/// This function will return [Error::NotFound] if `budget_id` does not refer
/// to a budget owned by `user_id`, or [Error::SqlError] if there is some
/// other SQL error.
pub fn delete_budget(
    budget_id: BudgetId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_deleted = connection.execute(
        "DELETE FROM budget WHERE id = ?1 AND user_id = ?2",
        (budget_id, user_id),
    )?;

    if rows_deleted == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Record an expense of `amount` against the budget for `(user_id, category_id)`.
///
/// Called by the transaction module from inside its atomic unit, before the
/// expense transaction itself is written. A category with no budget is a
/// no-op: transactions may reference categories with no active budget.
///
/// # Errors
/// This function will return [Error::BudgetExceeded] if the expense would
/// push `spent` over the budget's limit. The caller must abort its enclosing
/// database transaction so no state is written.
pub(crate) fn apply_expense(
    user_id: UserId,
    category_id: CategoryId,
    amount: f64,
    connection: &Connection,
) -> Result<(), Error> {
    let result = connection
        .prepare(
            "SELECT id, \"limit\", spent FROM budget
             WHERE user_id = :user_id AND category_id = :category_id",
        )?
        .query_one(
            &[(":user_id", &user_id), (":category_id", &category_id)],
            |row| Ok((row.get::<_, BudgetId>(0)?, row.get(1)?, row.get(2)?)),
        );

    let (budget_id, limit, spent): (BudgetId, f64, f64) = match result {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(()),
        Err(error) => return Err(error.into()),
    };

    let potential_spent = spent + amount.abs();
    if potential_spent > limit {
        return Err(Error::BudgetExceeded {
            remaining: limit - spent,
        });
    }

    connection.execute(
        "UPDATE budget SET spent = ?1 WHERE id = ?2",
        (potential_spent, budget_id),
    )?;

    Ok(())
}

/// Undo the effect of an expense of `amount` on the budget for
/// `(user_id, category_id)`, flooring `spent` at zero.
///
/// Called by the transaction module when an expense transaction is deleted,
/// or updated away from its old category, amount or type. A category with no
/// budget is a silent no-op.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub(crate) fn reverse_expense(
    user_id: UserId,
    category_id: CategoryId,
    amount: f64,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "UPDATE budget SET spent = MAX(0, spent - ?1)
         WHERE user_id = ?2 AND category_id = ?3",
        (amount.abs(), user_id, category_id),
    )?;

    Ok(())
}

/// Create the budget table in the database.
pub fn create_budget_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                \"limit\" REAL NOT NULL,
                spent REAL NOT NULL DEFAULT 0,
                start_date TEXT NOT NULL,
                FOREIGN KEY(user_id) REFERENCES user(id),
                FOREIGN KEY(category_id) REFERENCES category(id),
                UNIQUE(user_id, category_id)
            )",
        (),
    )?;

    Ok(())
}

fn map_row(row: &Row) -> Result<Budget, rusqlite::Error> {
    let limit: f64 = row.get(3)?;
    let spent: f64 = row.get(4)?;

    Ok(Budget {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        limit,
        spent,
        remaining: limit - spent,
        start_date: row.get(5)?,
    })
}

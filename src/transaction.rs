//! This file defines the `Transaction` type, its API routes and database
//! queries, and the atomic units that keep budgets consistent with expense
//! transactions.
//!
//! Every mutating operation on an expense transaction runs inside one SQLite
//! transaction together with its budget side effect, so a budget update is
//! never left inconsistent with its transaction. The rusqlite transaction
//! rolls back on drop, which covers every error exit path.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    Error,
    auth::Claims,
    budget,
    database_id::{CategoryId, TransactionId, UserId},
    state::AppState,
};

/// The polarity of a transaction: expenses decrement budget headroom, income
/// never touches budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Money earned.
    Income,
    /// Money spent.
    Expense,
}

impl TransactionType {
    fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
        }
    }

    /// Normalize `amount` to the signed form stored in the database:
    /// negative for expenses, positive for income, regardless of the sign
    /// the caller supplied.
    fn signed_amount(&self, amount: f64) -> f64 {
        match self {
            TransactionType::Income => amount.abs(),
            TransactionType::Expense => -amount.abs(),
        }
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "income" => Ok(TransactionType::Income),
            "expense" => Ok(TransactionType::Expense),
            other => Err(FromSqlError::Other(
                format!("invalid transaction type {other:?}").into(),
            )),
        }
    }
}

/// A dated income or expense record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The ID of the user that owns the transaction.
    pub user_id: UserId,
    /// When the transaction happened.
    pub date: Date,
    /// A text description of what the transaction was for.
    pub description: String,
    /// The ID of the category the transaction belongs to.
    #[serde(rename = "category")]
    pub category_id: CategoryId,
    /// Whether the transaction is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// The amount of money earned or spent, stored signed: negative for
    /// expenses, positive for income.
    pub amount: f64,
}

/// The data sent by a client to create a transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct NewTransaction {
    /// When the transaction happened.
    pub date: Date,
    /// A text description of what the transaction was for.
    pub description: String,
    /// The ID of the category the transaction belongs to.
    #[serde(rename = "category")]
    pub category_id: CategoryId,
    /// Whether the transaction is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// The amount of money earned or spent. The sign is normalized at write
    /// time based on the transaction type.
    pub amount: f64,
}

/// The fields of a transaction that a client may update.
///
/// Fields that are absent keep their current value. This is an explicit
/// allow-list: no other stored field can be changed through an update.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateTransaction {
    /// When the transaction happened.
    pub date: Option<Date>,
    /// A text description of what the transaction was for.
    pub description: Option<String>,
    /// The ID of the category the transaction belongs to.
    #[serde(rename = "category")]
    pub category_id: Option<CategoryId>,
    /// Whether the transaction is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// The amount of money earned or spent.
    pub amount: Option<f64>,
}

/// The field to sort a transaction listing by.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    /// Sort by transaction date.
    Date,
    /// Sort by transaction amount.
    Amount,
}

/// The direction to sort a transaction listing in.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Sort in order of increasing value.
    Asc,
    /// Sort in order of decreasing value.
    Desc,
}

/// The filters and sort options accepted by the transaction listing endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    /// Only include transactions on or after this date.
    #[serde(rename = "startDate")]
    pub start_date: Option<Date>,
    /// Only include transactions on or before this date.
    #[serde(rename = "endDate")]
    pub end_date: Option<Date>,
    /// Only include transactions in this category.
    pub category: Option<CategoryId>,
    /// Only include transactions of this type.
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// The field to sort by. Defaults to date.
    pub sort: Option<SortField>,
    /// The sort direction. Defaults to descending.
    pub order: Option<SortOrder>,
}

/// A route handler for creating a new transaction.
///
/// Expense transactions are applied to the matching budget before being
/// persisted; if the budget would be exceeded the whole operation fails with
/// a 400 response and nothing is written.
pub async fn create_transaction_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    WithRejection(Json(data), _): WithRejection<Json<NewTransaction>, Error>,
) -> Result<impl IntoResponse, Error> {
    let mut connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let transaction = create_transaction(data, claims.sub, &mut connection)?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// A route handler for listing the caller's transactions with optional
/// filtering and sorting.
pub async fn list_transactions_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<TransactionQuery>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let transactions = get_transactions(claims.sub, &query, &connection)?;

    Ok(Json(transactions))
}

/// A route handler for updating a transaction.
///
/// Responds with 404 if the transaction does not exist or belongs to another
/// user, and 400 if the new values would exceed the budget; in the latter
/// case the original transaction and budget are left untouched.
pub async fn update_transaction_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(transaction_id): Path<TransactionId>,
    WithRejection(Json(data), _): WithRejection<Json<UpdateTransaction>, Error>,
) -> Result<impl IntoResponse, Error> {
    let mut connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let transaction = update_transaction(transaction_id, claims.sub, data, &mut connection)?;

    Ok(Json(transaction))
}

/// A route handler for deleting a transaction, reversing its budget effect.
pub async fn delete_transaction_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(transaction_id): Path<TransactionId>,
) -> Result<impl IntoResponse, Error> {
    let mut connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    delete_transaction(transaction_id, claims.sub, &mut connection)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Create a transaction in the database.
///
/// If the transaction is an expense, its budget side effect is applied inside
/// the same SQLite transaction, before the row is inserted. A failed side
/// effect aborts the whole unit.
///
/// # Errors
/// This function will return:
/// - [Error::InvalidAmount] if the amount is zero or not finite,
/// - [Error::BudgetExceeded] if an expense would push the category's budget
///   over its limit,
/// - [Error::InvalidCategory] if the category ID does not refer to a real
///   category,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    data: NewTransaction,
    user_id: UserId,
    connection: &mut Connection,
) -> Result<Transaction, Error> {
    if !data.amount.is_finite() || data.amount == 0.0 {
        return Err(Error::InvalidAmount);
    }

    let amount = data.transaction_type.signed_amount(data.amount);

    let sql_transaction = connection.transaction()?;

    if data.transaction_type == TransactionType::Expense {
        budget::apply_expense(user_id, data.category_id, amount, &sql_transaction)?;
    }

    let transaction = insert_row(
        user_id,
        data.date,
        &data.description,
        data.category_id,
        data.transaction_type,
        amount,
        &sql_transaction,
    )?;

    sql_transaction.commit()?;

    Ok(transaction)
}

/// Retrieve a transaction owned by `user_id` from the database.
///
/// # Errors
/// This function will return [Error::NotFound] if `transaction_id` does not
/// refer to a transaction owned by `user_id`, or [Error::SqlError] if there
/// is some other SQL error.
pub fn get_transaction(
    transaction_id: TransactionId,
    user_id: UserId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "SELECT id, user_id, date, description, category_id, type, amount
             FROM \"transaction\" WHERE id = :id AND user_id = :user_id",
        )?
        .query_one(
            &[(":id", &transaction_id), (":user_id", &user_id)],
            map_row,
        )?;

    Ok(transaction)
}

/// Retrieve a user's transactions, filtered and sorted per `query`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_transactions(
    user_id: UserId,
    query: &TransactionQuery,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    let mut sql = String::from(
        "SELECT id, user_id, date, description, category_id, type, amount
         FROM \"transaction\" WHERE user_id = ?",
    );
    let mut params: Vec<Value> = vec![Value::from(user_id)];

    if let Some(start_date) = query.start_date {
        sql.push_str(" AND date >= ?");
        params.push(Value::from(start_date.to_string()));
    }

    if let Some(end_date) = query.end_date {
        sql.push_str(" AND date <= ?");
        params.push(Value::from(end_date.to_string()));
    }

    if let Some(category_id) = query.category {
        sql.push_str(" AND category_id = ?");
        params.push(Value::from(category_id));
    }

    if let Some(transaction_type) = query.transaction_type {
        sql.push_str(" AND type = ?");
        params.push(Value::from(transaction_type.as_str().to_owned()));
    }

    let sort_column = match query.sort {
        Some(SortField::Amount) => "amount",
        _ => "date",
    };
    let sort_direction = match query.order {
        Some(SortOrder::Asc) => "ASC",
        _ => "DESC",
    };
    // Sort by ID last to keep the order stable after updates.
    sql.push_str(&format!(
        " ORDER BY {sort_column} {sort_direction}, id ASC"
    ));

    connection
        .prepare(&sql)?
        .query_map(rusqlite::params_from_iter(params), map_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(|error| error.into()))
        .collect()
}

/// Update a transaction, keeping its budget side effect consistent.
///
/// The update runs in three steps inside one SQLite transaction: reverse the
/// old budget effect if the transaction was an expense, write the merged
/// field values, then re-apply the budget effect if the transaction is now an
/// expense. Reverse-then-reapply means a change of category, amount or type
/// can neither double-count nor lose budget impact, and a failure in the last
/// step rolls the reversal back too.
///
/// # Errors
/// This function will return:
/// - [Error::NotFound] if `transaction_id` does not refer to a transaction
///   owned by `user_id`,
/// - [Error::InvalidAmount] if a zero or non-finite amount is requested,
/// - [Error::BudgetExceeded] if the new values would exceed the budget,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_transaction(
    transaction_id: TransactionId,
    user_id: UserId,
    data: UpdateTransaction,
    connection: &mut Connection,
) -> Result<Transaction, Error> {
    if let Some(amount) = data.amount
        && (!amount.is_finite() || amount == 0.0)
    {
        return Err(Error::InvalidAmount);
    }

    let sql_transaction = connection.transaction()?;

    let old = get_transaction(transaction_id, user_id, &sql_transaction)?;

    if old.transaction_type == TransactionType::Expense {
        budget::reverse_expense(user_id, old.category_id, old.amount, &sql_transaction)?;
    }

    let transaction_type = data.transaction_type.unwrap_or(old.transaction_type);
    let amount = transaction_type.signed_amount(data.amount.unwrap_or(old.amount));
    let date = data.date.unwrap_or(old.date);
    let description = data.description.unwrap_or(old.description);
    let category_id = data.category_id.unwrap_or(old.category_id);

    if transaction_type == TransactionType::Expense {
        budget::apply_expense(user_id, category_id, amount, &sql_transaction)?;
    }

    sql_transaction.execute(
        "UPDATE \"transaction\"
         SET date = ?1, description = ?2, category_id = ?3, type = ?4, amount = ?5
         WHERE id = ?6 AND user_id = ?7",
        (
            date,
            &description,
            category_id,
            transaction_type,
            amount,
            transaction_id,
            user_id,
        ),
    )?;

    sql_transaction.commit()?;

    Ok(Transaction {
        id: transaction_id,
        user_id,
        date,
        description,
        category_id,
        transaction_type,
        amount,
    })
}

/// Delete a transaction, reversing its budget effect if it was an expense.
/// Both steps run in one SQLite transaction.
///
/// # Errors
/// This function will return [Error::NotFound] if `transaction_id` does not
/// refer to a transaction owned by `user_id`, or [Error::SqlError] if there
/// is some other SQL error.
pub fn delete_transaction(
    transaction_id: TransactionId,
    user_id: UserId,
    connection: &mut Connection,
) -> Result<(), Error> {
    let sql_transaction = connection.transaction()?;

    let old = get_transaction(transaction_id, user_id, &sql_transaction)?;

    if old.transaction_type == TransactionType::Expense {
        budget::reverse_expense(user_id, old.category_id, old.amount, &sql_transaction)?;
    }

    sql_transaction.execute(
        "DELETE FROM \"transaction\" WHERE id = ?1 AND user_id = ?2",
        (transaction_id, user_id),
    )?;

    sql_transaction.commit()?;

    Ok(())
}

fn insert_row(
    user_id: UserId,
    date: Date,
    description: &str,
    category_id: CategoryId,
    transaction_type: TransactionType,
    amount: f64,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "INSERT INTO \"transaction\" (user_id, date, description, category_id, type, amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING id, user_id, date, description, category_id, type, amount",
        )?
        .query_one(
            (
                user_id,
                date,
                description,
                category_id,
                transaction_type,
                amount,
            ),
            map_row,
        )
        .map_err(|error| match error {
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, _) if sql_error.extended_code == 787 => {
                Error::InvalidCategory(Some(category_id))
            }
            error => error.into(),
        })?;

    Ok(transaction)
}

/// Create the transaction table in the database.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                description TEXT NOT NULL,
                category_id INTEGER NOT NULL,
                type TEXT NOT NULL,
                amount REAL NOT NULL,
                FOREIGN KEY(user_id) REFERENCES user(id),
                FOREIGN KEY(category_id) REFERENCES category(id)
            )",
        (),
    )?;

    // Composite indexes for the listing filters and analytics queries.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_date ON \"transaction\"(user_id, date)",
        (),
    )?;
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_category
         ON \"transaction\"(user_id, category_id)",
        (),
    )?;

    Ok(())
}

fn map_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: row.get(2)?,
        description: row.get(3)?,
        category_id: row.get(4)?,
        transaction_type: row.get(5)?,
        amount: row.get(6)?,
    })
}



#[cfg(test)]
mod update_tests {
    use crate::{Error, budget::get_all_budgets};

    use super::{
        TransactionType, UpdateTransaction, create_transaction, get_transaction,
        test_utils::{
            create_test_budget, create_test_category, create_test_user, expense,
            get_test_connection, income,
        },
        update_transaction,
    };

    #[test]
    fn update_amount_shifts_spent_by_the_difference() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        create_test_budget(category_id, 100.0, user_id, &connection);
        let transaction = create_transaction(expense(category_id, 40.0), user_id, &mut connection)
            .expect("Could not create transaction");

        update_transaction(
            transaction.id,
            user_id,
            UpdateTransaction {
                amount: Some(55.0),
                ..Default::default()
            },
            &mut connection,
        )
        .expect("Could not update transaction");

        // Spent moves by |55| - |40|, not by |55| on top of |40|.
        let budgets = get_all_budgets(user_id, &connection).unwrap();
        assert_eq!(budgets[0].budget.spent, 55.0);
        assert_eq!(budgets[0].budget.remaining, 45.0);
    }

    #[test]
    fn update_category_moves_budget_impact() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let food = create_test_category("Food", user_id, &connection);
        let transport = create_test_category("Transport", user_id, &connection);
        create_test_budget(food, 100.0, user_id, &connection);
        create_test_budget(transport, 100.0, user_id, &connection);
        let transaction = create_transaction(expense(food, 40.0), user_id, &mut connection)
            .expect("Could not create transaction");

        update_transaction(
            transaction.id,
            user_id,
            UpdateTransaction {
                category_id: Some(transport),
                ..Default::default()
            },
            &mut connection,
        )
        .expect("Could not update transaction");

        let budgets = get_all_budgets(user_id, &connection).unwrap();
        let food_budget = budgets
            .iter()
            .find(|budget| budget.budget.category_id == food)
            .unwrap();
        let transport_budget = budgets
            .iter()
            .find(|budget| budget.budget.category_id == transport)
            .unwrap();
        assert_eq!(food_budget.budget.spent, 0.0);
        assert_eq!(transport_budget.budget.spent, 40.0);
    }

    #[test]
    fn update_type_to_income_releases_budget() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        create_test_budget(category_id, 100.0, user_id, &connection);
        let transaction = create_transaction(expense(category_id, 40.0), user_id, &mut connection)
            .expect("Could not create transaction");

        let updated = update_transaction(
            transaction.id,
            user_id,
            UpdateTransaction {
                transaction_type: Some(TransactionType::Income),
                ..Default::default()
            },
            &mut connection,
        )
        .expect("Could not update transaction");

        assert_eq!(updated.amount, 40.0);
        let budgets = get_all_budgets(user_id, &connection).unwrap();
        assert_eq!(budgets[0].budget.spent, 0.0);
    }

    #[test]
    fn update_type_to_expense_applies_budget() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        create_test_budget(category_id, 100.0, user_id, &connection);
        let transaction = create_transaction(income(category_id, 40.0), user_id, &mut connection)
            .expect("Could not create transaction");

        update_transaction(
            transaction.id,
            user_id,
            UpdateTransaction {
                transaction_type: Some(TransactionType::Expense),
                ..Default::default()
            },
            &mut connection,
        )
        .expect("Could not update transaction");

        let budgets = get_all_budgets(user_id, &connection).unwrap();
        assert_eq!(budgets[0].budget.spent, 40.0);
    }

    #[test]
    fn failed_update_rolls_back_the_reversal() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        create_test_budget(category_id, 100.0, user_id, &connection);
        let transaction = create_transaction(expense(category_id, 40.0), user_id, &mut connection)
            .expect("Could not create transaction");

        let result = update_transaction(
            transaction.id,
            user_id,
            UpdateTransaction {
                amount: Some(150.0),
                ..Default::default()
            },
            &mut connection,
        );

        assert_eq!(result, Err(Error::BudgetExceeded { remaining: 100.0 }));
        // Both the transaction and the budget revert to their old state.
        let unchanged = get_transaction(transaction.id, user_id, &connection).unwrap();
        assert_eq!(unchanged.amount, -40.0);
        let budgets = get_all_budgets(user_id, &connection).unwrap();
        assert_eq!(budgets[0].budget.spent, 40.0);
    }

    #[test]
    fn update_on_foreign_transaction_returns_not_found() {
        let mut connection = get_test_connection();
        let owner = create_test_user("foo@bar.baz", &connection);
        let other = create_test_user("baz@bar.foo", &connection);
        let category_id = create_test_category("Food", owner, &connection);
        let transaction = create_transaction(expense(category_id, 40.0), owner, &mut connection)
            .expect("Could not create transaction");

        let result = update_transaction(
            transaction.id,
            other,
            UpdateTransaction {
                amount: Some(1.0),
                ..Default::default()
            },
            &mut connection,
        );

        assert_eq!(result, Err(Error::NotFound));
    }
}


#[cfg(test)]
mod spent_reconstruction_tests {
    use crate::budget::get_all_budgets;

    use super::{
        TransactionType, UpdateTransaction, create_transaction, delete_transaction,
        get_transactions,
        test_utils::{
            create_test_budget, create_test_category, create_test_user, expense,
            get_test_connection, income,
        },
        update_transaction,
    };

    /// `spent` must always equal the sum of absolute amounts of the expense
    /// transactions that still exist in the category.
    #[test]
    fn spent_is_reconstructible_from_surviving_expenses() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        create_test_budget(category_id, 1000.0, user_id, &connection);

        let first = create_transaction(expense(category_id, 40.0), user_id, &mut connection)
            .expect("Could not create transaction");
        let second = create_transaction(expense(category_id, 25.0), user_id, &mut connection)
            .expect("Could not create transaction");
        create_transaction(income(category_id, 500.0), user_id, &mut connection)
            .expect("Could not create transaction");
        update_transaction(
            second.id,
            user_id,
            UpdateTransaction {
                amount: Some(30.0),
                ..Default::default()
            },
            &mut connection,
        )
        .expect("Could not update transaction");
        delete_transaction(first.id, user_id, &mut connection)
            .expect("Could not delete transaction");

        let spent = get_all_budgets(user_id, &connection).unwrap()[0].budget.spent;
        let expected: f64 = get_transactions(user_id, &Default::default(), &connection)
            .unwrap()
            .iter()
            .filter(|transaction| {
                transaction.transaction_type == TransactionType::Expense
                    && transaction.category_id == category_id
            })
            .map(|transaction| transaction.amount.abs())
            .sum();

        assert_eq!(spent, expected);
        assert_eq!(spent, 30.0);
    }
}

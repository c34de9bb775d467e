//! This file defines the `Category` type, the types needed to create and
//! update a category, and the API routes for the category type. A category
//! acts like a named tag for transactions and budgets, with display metadata
//! (icon and color) attached.

use std::fmt::Display;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    auth::Claims,
    database_id::{CategoryId, UserId},
    state::AppState,
};

/// The maximum number of characters allowed in a category name.
pub const MAX_CATEGORY_NAME_LENGTH: usize = 50;

/// The name of a category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct CategoryName(String);

impl CategoryName {
    /// Create a category name.
    ///
    /// # Errors
    ///
    /// This function will return an error if `name` is an empty string or
    /// longer than [MAX_CATEGORY_NAME_LENGTH] characters.
    pub fn new(name: &str) -> Result<Self, Error> {
        if name.is_empty() {
            Err(Error::EmptyCategoryName)
        } else if name.chars().count() > MAX_CATEGORY_NAME_LENGTH {
            Err(Error::CategoryNameTooLong(MAX_CATEGORY_NAME_LENGTH))
        } else {
            Ok(Self(name.to_string()))
        }
    }

    /// Create a category name without validation.
    ///
    /// The caller should ensure that the string is not empty and within the
    /// length limit.
    pub fn new_unchecked(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl AsRef<str> for CategoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for CategoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A category for expenses and income, e.g., 'Groceries', 'Eating Out', 'Wages'.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Category {
    /// The ID of the category.
    pub id: CategoryId,

    /// The ID of the user that owns the category.
    pub user_id: UserId,

    /// The name of the category. Unique within a user's category set.
    pub name: CategoryName,

    /// The name of an icon to display next to the category.
    pub icon: Option<String>,

    /// A display color for the category, e.g. a hex string.
    pub color: Option<String>,
}

/// The data sent by a client to create or update a category.
#[derive(Debug, Serialize, Deserialize)]
pub struct CategoryData {
    /// The name of the category.
    pub name: String,
    /// The name of an icon to display next to the category.
    pub icon: Option<String>,
    /// A display color for the category.
    pub color: Option<String>,
}

/// A route handler for listing the caller's categories.
pub async fn list_categories_endpoint(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let categories = get_all_categories(claims.sub, &connection)?;

    Ok(Json(categories))
}

/// A route handler for creating a new category.
pub async fn create_category_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    WithRejection(Json(data), _): WithRejection<Json<CategoryData>, Error>,
) -> Result<impl IntoResponse, Error> {
    let name = CategoryName::new(&data.name)?;
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let category = create_category(name, data.icon, data.color, claims.sub, &connection)?;

    Ok((StatusCode::CREATED, Json(category)))
}

/// A route handler for updating an existing category.
///
/// Responds with 404 if the category does not exist or belongs to another
/// user, so that callers cannot probe for other users' categories.
pub async fn update_category_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(category_id): Path<CategoryId>,
    WithRejection(Json(data), _): WithRejection<Json<CategoryData>, Error>,
) -> Result<impl IntoResponse, Error> {
    let name = CategoryName::new(&data.name)?;
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let category = update_category(
        category_id,
        claims.sub,
        name,
        data.icon,
        data.color,
        &connection,
    )?;

    Ok(Json(category))
}

/// A route handler for deleting a category.
pub async fn delete_category_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(category_id): Path<CategoryId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    delete_category(category_id, claims.sub, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Create a category in the database.
///
/// # Errors
/// This function will return [Error::DuplicateCategoryName] if the user
/// already has a category named `name`, or [Error::SqlError] if there is some
/// other SQL error.
pub fn create_category(
    name: CategoryName,
    icon: Option<String>,
    color: Option<String>,
    user_id: UserId,
    connection: &Connection,
) -> Result<Category, Error> {
    connection.execute(
        "INSERT INTO category (user_id, name, icon, color) VALUES (?1, ?2, ?3, ?4)",
        (user_id, name.as_ref(), &icon, &color),
    )?;

    let id = connection.last_insert_rowid();

    Ok(Category {
        id,
        user_id,
        name,
        icon,
        color,
    })
}

/// Retrieve a category owned by `user_id` from the database.
///
/// # Errors
/// This function will return [Error::NotFound] if `category_id` does not
/// refer to a category owned by `user_id`, or [Error::SqlError] if there is
/// some other SQL error.
pub fn get_category(
    category_id: CategoryId,
    user_id: UserId,
    connection: &Connection,
) -> Result<Category, Error> {
    let category = connection
        .prepare(
            "SELECT id, user_id, name, icon, color FROM category
             WHERE id = :id AND user_id = :user_id",
        )?
        .query_one(&[(":id", &category_id), (":user_id", &user_id)], map_row)?;

    Ok(category)
}

/// Retrieve all of a user's categories from the database.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_all_categories(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<Category>, Error> {
    connection
        .prepare("SELECT id, user_id, name, icon, color FROM category WHERE user_id = :user_id")?
        .query_map(&[(":user_id", &user_id)], map_row)?
        .map(|maybe_category| maybe_category.map_err(|error| error.into()))
        .collect()
}

/// Update a category's name, icon and color.
///
/// # Errors
/// This function will return:
/// - [Error::NotFound] if `category_id` does not refer to a category owned by
///   `user_id`,
/// - [Error::DuplicateCategoryName] if the new name collides with another of
///   the user's categories,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_category(
    category_id: CategoryId,
    user_id: UserId,
    name: CategoryName,
    icon: Option<String>,
    color: Option<String>,
    connection: &Connection,
) -> Result<Category, Error> {
    let rows_updated = connection.execute(
        "UPDATE category SET name = ?1, icon = ?2, color = ?3 WHERE id = ?4 AND user_id = ?5",
        (name.as_ref(), &icon, &color, category_id, user_id),
    )?;

    if rows_updated == 0 {
        return Err(Error::NotFound);
    }

    Ok(Category {
        id: category_id,
        user_id,
        name,
        icon,
        color,
    })
}

/// Delete a category owned by `user_id`.
///
/// A category that is still referenced by budgets or transactions cannot be
/// deleted.
///
/// # Errors
/// This function will return:
/// - [Error::NotFound] if `category_id` does not refer to a category owned
///   by `user_id`,
/// - [Error::CategoryInUse] if budgets or transactions still reference the
///   category,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_category(
    category_id: CategoryId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_deleted = connection
        .execute(
            "DELETE FROM category WHERE id = ?1 AND user_id = ?2",
            (category_id, user_id),
        )
        .map_err(|error| match error {
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, _) if sql_error.extended_code == 787 => {
                Error::CategoryInUse
            }
            error => error.into(),
        })?;

    if rows_deleted == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Create the category table in the database.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS category (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                icon TEXT,
                color TEXT,
                FOREIGN KEY(user_id) REFERENCES user(id),
                UNIQUE(user_id, name)
            )",
        (),
    )?;

    Ok(())
}

fn map_row(row: &Row) -> Result<Category, rusqlite::Error> {
    let raw_name: String = row.get(2)?;

    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: CategoryName::new_unchecked(&raw_name),
        icon: row.get(3)?,
        color: row.get(4)?,
    })
}

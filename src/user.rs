//! User accounts: the user model, registration endpoint and database queries.
//!
//! The finance modules never read this table directly, they only consume the
//! authenticated [UserId](crate::database_id::UserId) from the claims
//! extractor.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::WithRejection;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::{Error, database_id::UserId, state::AppState};

/// A registered user. Owns all other entities in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// The ID of the user.
    pub id: UserId,
    /// The email address used to sign in.
    pub email: String,
    /// The bcrypt hash of the user's password.
    pub password_hash: String,
}

/// The data sent by a client to register a new user.
#[derive(Debug, Deserialize)]
pub struct NewUser {
    /// The email address to register.
    pub email: String,
    /// The plain-text password, hashed before storage.
    pub password: String,
}

/// The public view of a user, sent back to clients.
///
/// Deliberately excludes the password hash.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    /// The ID of the user.
    pub id: UserId,
    /// The email address used to sign in.
    pub email: String,
}

/// A route handler for registering a new user.
///
/// # Errors
///
/// Returns a 409 response if the email is already registered and a 500
/// response if hashing the password fails.
pub async fn register_user(
    State(state): State<AppState>,
    WithRejection(Json(new_user), _): WithRejection<Json<NewUser>, Error>,
) -> Result<impl IntoResponse, Error> {
    let password_hash = bcrypt::hash(&new_user.password, bcrypt::DEFAULT_COST)
        .map_err(|error| Error::HashingError(error.to_string()))?;

    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let user = create_user(&new_user.email, &password_hash, &connection)?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            id: user.id,
            email: user.email,
        }),
    ))
}

/// Create a user in the database.
///
/// # Errors
/// This function will return [Error::DuplicateEmail] if the email already
/// belongs to a registered user, or [Error::SqlError] if there is some other
/// SQL error.
pub fn create_user(
    email: &str,
    password_hash: &str,
    connection: &Connection,
) -> Result<User, Error> {
    let user = connection
        .prepare(
            "INSERT INTO user (email, password_hash) VALUES (?1, ?2)
             RETURNING id, email, password_hash",
        )?
        .query_one((email, password_hash), map_user_row)?;

    Ok(user)
}

/// Retrieve the user with `email` from the database.
///
/// # Errors
/// This function will return [Error::NotFound] if no user has the given
/// email, or [Error::SqlError] if there is some other SQL error.
pub fn get_user_by_email(email: &str, connection: &Connection) -> Result<User, Error> {
    let user = connection
        .prepare("SELECT id, email, password_hash FROM user WHERE email = :email")?
        .query_one(&[(":email", email)], map_user_row)?;

    Ok(user)
}

/// Create the user table in the database.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            )",
        (),
    )?;

    Ok(())
}

fn map_user_row(row: &Row) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
    })
}

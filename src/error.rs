//! Defines the app level error type and its conversion to JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::database_id::CategoryId;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The request body was missing, malformed, or missing required fields.
    #[error("{0}")]
    InvalidRequestBody(String),

    /// A transaction amount was zero or not a finite number.
    #[error("amount must be a non-zero number")]
    InvalidAmount,

    /// An empty string was used to create a category name.
    #[error("category name cannot be empty")]
    EmptyCategoryName,

    /// A category name longer than the allowed maximum was used.
    #[error("category name cannot be longer than {0} characters")]
    CategoryNameTooLong(usize),

    /// The user already has a category with the requested name.
    #[error("a category with this name already exists")]
    DuplicateCategoryName,

    /// The category is still referenced by budgets or transactions and cannot
    /// be deleted.
    #[error("the category is still referenced by budgets or transactions")]
    CategoryInUse,

    /// The category ID used to create a budget or transaction did not match
    /// a valid category owned by the user.
    #[error("the category ID does not refer to a valid category")]
    InvalidCategory(Option<CategoryId>),

    /// A budget limit of zero or less was requested.
    ///
    /// A budget with no headroom cannot admit any expense, so such limits are
    /// treated as client errors rather than stored.
    #[error("budget limit must be greater than zero")]
    InvalidBudgetLimit,

    /// The user already has a budget for the requested category.
    #[error("a budget for this category already exists")]
    DuplicateBudget,

    /// An expense would push a budget's spent amount over its limit.
    ///
    /// The write is rejected and no state is changed. The remaining headroom
    /// is reported so the client can show how much can still be spent.
    #[error("budget exceeded: only {remaining:.2} remaining for this category")]
    BudgetExceeded {
        /// The headroom left in the budget before the rejected expense.
        remaining: f64,
    },

    /// The specified email already belongs to a registered user.
    #[error("the email address is already registered")]
    DuplicateEmail,

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    /// When communicating with the application client this error should be
    /// replaced with a general error type indicating an internal server error.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// The requested resource was not found.
    ///
    /// Also returned when the resource exists but belongs to another user, so
    /// that callers cannot probe for the existence of other users' records.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLock,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        Error::InvalidRequestBody(rejection.body_text())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(_)) if sql_error.extended_code == 787 => {
                Error::InvalidCategory(None)
            }
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("category.") =>
            {
                Error::DuplicateCategoryName
            }
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("budget.") =>
            {
                Error::DuplicateBudget
            }
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("user.email") =>
            {
                Error::DuplicateEmail
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status_code, message) = match self {
            Error::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Error::InvalidRequestBody(_)
            | Error::InvalidAmount
            | Error::EmptyCategoryName
            | Error::CategoryNameTooLong(_)
            | Error::InvalidCategory(_)
            | Error::InvalidBudgetLimit
            | Error::BudgetExceeded { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::DuplicateCategoryName
            | Error::CategoryInUse
            | Error::DuplicateBudget
            | Error::DuplicateEmail => (StatusCode::CONFLICT, self.to_string()),
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred, check the server logs for more details."
                        .to_owned(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status_code, body).into_response()
    }
}

#[cfg(test)]
mod error_response_tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use super::Error;

    #[test]
    fn not_found_maps_to_404() {
        let response = Error::NotFound.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_request_body_maps_to_400() {
        let response = Error::InvalidRequestBody("missing field".to_owned()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn budget_exceeded_maps_to_400() {
        let response = Error::BudgetExceeded { remaining: 12.5 }.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn duplicate_budget_maps_to_409() {
        let response = Error::DuplicateBudget.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn sql_error_maps_to_500() {
        let response = Error::SqlError(rusqlite::Error::InvalidQuery).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn budget_exceeded_message_reports_headroom() {
        let message = Error::BudgetExceeded { remaining: 60.0 }.to_string();

        assert!(message.contains("60.00"), "got message {message:?}");
    }
}

//! JWT authentication: token claims, the claims extractor used by protected
//! route handlers, and the sign-in endpoint.

use axum::{
    Json, RequestPartsExt,
    extract::{FromRef, FromRequestParts, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration, OffsetDateTime};

use crate::{database_id::UserId, state::AppState, user::get_user_by_email};

/// How long an auth token stays valid after being issued.
const TOKEN_DURATION: Duration = Duration::hours(24);

/// The contents of a JSON Web Token.
#[derive(Serialize, Deserialize)]
pub struct Claims {
    /// The expiry time of the token.
    pub exp: usize,
    /// The time the token was issued.
    pub iat: usize,
    /// The ID of the user the token was issued to.
    pub sub: UserId,
}

impl<S> FromRequestParts<S> for Claims
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingToken)?;

        let app_state = AppState::from_ref(state);

        let token_data = decode_jwt(bearer.token(), app_state.decoding_key())?;

        Ok(token_data.claims)
    }
}

/// The credentials sent to the sign-in endpoint.
#[derive(Deserialize)]
pub struct Credentials {
    /// Email entered during sign-in.
    pub email: String,
    /// Password entered during sign-in.
    pub password: String,
}

/// The errors that may occur during authentication.
#[derive(Debug)]
pub enum AuthError {
    /// The email and password combination did not match a registered user.
    WrongCredentials,
    /// The request did not include a bearer token.
    MissingToken,
    /// The bearer token could not be decoded or has expired.
    InvalidToken,
    /// The token could not be created.
    TokenCreation,
    /// An unexpected error occurred while verifying credentials.
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AuthError::WrongCredentials => (StatusCode::UNAUTHORIZED, "Wrong credentials"),
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing bearer token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenCreation => (StatusCode::INTERNAL_SERVER_ERROR, "Token creation error"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Handler for sign-in requests.
///
/// # Errors
///
/// This function will return an error if:
/// - the email does not belong to a registered user,
/// - the password is not correct,
/// - or an internal error occurred while verifying the password.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<String>, AuthError> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| AuthError::InternalError)?;

    let user = get_user_by_email(&credentials.email, &connection).map_err(|error| match error {
        crate::Error::NotFound => AuthError::WrongCredentials,
        error => {
            tracing::error!("Error matching user: {error}");
            AuthError::InternalError
        }
    })?;

    let password_is_correct =
        bcrypt::verify(&credentials.password, &user.password_hash).map_err(|error| {
            tracing::error!("Error verifying password: {error}");
            AuthError::InternalError
        })?;

    if !password_is_correct {
        return Err(AuthError::WrongCredentials);
    }

    let token = encode_jwt(user.id, state.encoding_key())?;

    Ok(Json(token))
}

/// Create a signed token for `user_id`.
pub fn encode_jwt(user_id: UserId, encoding_key: &EncodingKey) -> Result<String, AuthError> {
    let now = OffsetDateTime::now_utc();
    let claims = Claims {
        exp: (now + TOKEN_DURATION).unix_timestamp() as usize,
        iat: now.unix_timestamp() as usize,
        sub: user_id,
    };

    encode(&Header::default(), &claims, encoding_key).map_err(|_| AuthError::TokenCreation)
}

fn decode_jwt(token: &str, decoding_key: &DecodingKey) -> Result<TokenData<Claims>, AuthError> {
    decode(token, decoding_key, &Validation::default()).map_err(|_| AuthError::InvalidToken)
}

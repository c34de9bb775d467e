//! Application router configuration.
//!
//! All routes except registration and sign-in require a bearer token, which
//! each handler enforces through the [Claims](crate::auth::Claims) extractor.

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::{
    analytics::get_analytics_endpoint,
    auth::sign_in,
    budget::{
        create_budget_endpoint, delete_budget_endpoint, list_budgets_endpoint,
        update_budget_endpoint,
    },
    category::{
        create_category_endpoint, delete_category_endpoint, list_categories_endpoint,
        update_category_endpoint,
    },
    endpoints,
    logging::logging_middleware,
    state::AppState,
    transaction::{
        create_transaction_endpoint, delete_transaction_endpoint, list_transactions_endpoint,
        update_transaction_endpoint,
    },
    user::register_user,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::REGISTER, post(register_user))
        .route(endpoints::SIGN_IN, post(sign_in))
        .route(
            endpoints::CATEGORIES,
            get(list_categories_endpoint).post(create_category_endpoint),
        )
        .route(
            endpoints::CATEGORY,
            put(update_category_endpoint).delete(delete_category_endpoint),
        )
        .route(
            endpoints::BUDGETS,
            get(list_budgets_endpoint).post(create_budget_endpoint),
        )
        .route(
            endpoints::BUDGET,
            put(update_budget_endpoint).delete(delete_budget_endpoint),
        )
        .route(
            endpoints::TRANSACTIONS,
            get(list_transactions_endpoint).post(create_transaction_endpoint),
        )
        .route(
            endpoints::TRANSACTION,
            put(update_transaction_endpoint).delete(delete_transaction_endpoint),
        )
        .route(endpoints::ANALYTICS, get(get_analytics_endpoint))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

//! API handlers for Booklend REST endpoints

pub mod auth;
pub mod books;
pub mod borrow_records;
pub mod health;
pub mod openapi;
pub mod users;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, models::user::UserClaims, AppState};

/// Extractor for authenticated user from JWT token
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = state.services.auth.verify_token(token)?;
        Ok(AuthenticatedUser(claims))
    }
}

/// Create the application router with all routes
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, axum::http::header::CONTENT_TYPE]);

    let routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Authentication
        .route("/login", post(auth::login))
        .route("/refresh_token", get(auth::refresh_token))
        // Users
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/:id", get(users::get_user))
        // Books
        .route("/books", get(books::list_books).post(books::create_book))
        .route("/books/borrow", post(books::borrow_book))
        .route("/books/return", post(books::return_book))
        .route(
            "/books/:id",
            get(books::get_book)
                .put(books::rename_book)
                .delete(books::delete_book),
        )
        // Borrow records
        .route(
            "/borrow-records",
            get(borrow_records::list_borrow_records).post(borrow_records::create_borrow_record),
        )
        .route(
            "/borrow-records/:id",
            get(borrow_records::get_borrow_record)
                .put(borrow_records::update_borrow_record)
                .delete(borrow_records::delete_borrow_record),
        )
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(openapi::create_openapi_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

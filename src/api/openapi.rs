//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, books, borrow_records, health, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Booklend API",
        version = "1.0.0",
        description = "Book lending REST API: catalog, users and the borrow ledger",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::login,
        auth::refresh_token,
        // Users
        users::list_users,
        users::get_user,
        users::create_user,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::rename_book,
        books::delete_book,
        books::borrow_book,
        books::return_book,
        // Borrow records
        borrow_records::list_borrow_records,
        borrow_records::get_borrow_record,
        borrow_records::create_borrow_record,
        borrow_records::update_borrow_record,
        borrow_records::delete_borrow_record,
    ),
    components(
        schemas(
            // Auth
            auth::LoginRequest,
            auth::TokenResponse,
            // Users
            crate::models::user::User,
            crate::models::user::CreateUser,
            // Books
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::RenameBook,
            // Borrow records
            crate::models::borrow_record::BorrowRecord,
            crate::models::borrow_record::BorrowStatus,
            crate::models::borrow_record::Borrowing,
            crate::models::borrow_record::EntityRef,
            crate::models::borrow_record::CreateBorrowRecord,
            crate::models::borrow_record::UpdateBorrowRecord,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Authentication endpoints"),
        (name = "users", description = "User management"),
        (name = "books", description = "Book catalog, borrow and return"),
        (name = "borrow-records", description = "Borrow ledger")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by protected paths
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_ledger_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/books/borrow"));
        assert!(doc.paths.paths.contains_key("/borrow-records/{id}"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}

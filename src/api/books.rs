//! Book catalog and borrow/return endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::{
        book::{Book, BookQuery, CreateBook, RenameBook},
        borrow_record::Borrowing,
    },
    AppState,
};

use super::AuthenticatedUser;

/// List books, newest-updated first
#[utoipa::path(
    get,
    path = "/books",
    tag = "books",
    security(("bearer_auth" = [])),
    params(BookQuery),
    responses(
        (status = 200, description = "List of books", body = Vec<Book>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_books(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Query(query): Query<BookQuery>,
) -> AppResult<Json<Vec<Book>>> {
    let books = state.services.catalog.get_books(&query).await?;
    Ok(Json(books))
}

/// Get book details by ID
#[utoipa::path(
    get,
    path = "/books/{id}",
    tag = "books",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Book with owner and borrowers", body = Book),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_book(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Book>> {
    let book = state.services.catalog.get_book(id).await?;
    Ok(Json(book))
}

/// Create a new book
#[utoipa::path(
    post,
    path = "/books",
    tag = "books",
    security(("bearer_auth" = [])),
    request_body = CreateBook,
    responses(
        (status = 201, description = "Book created", body = Book),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Owner not found")
    )
)]
pub async fn create_book(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Json(book): Json<CreateBook>,
) -> AppResult<(StatusCode, Json<Book>)> {
    let created = state.services.catalog.create_book(book).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Rename a book
#[utoipa::path(
    put,
    path = "/books/{id}",
    tag = "books",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    request_body = RenameBook,
    responses(
        (status = 200, description = "Book renamed", body = Book),
        (status = 404, description = "Book not found")
    )
)]
pub async fn rename_book(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(input): Json<RenameBook>,
) -> AppResult<Json<Book>> {
    let book = state.services.catalog.rename_book(id, input).await?;
    Ok(Json(book))
}

/// Delete a book
#[utoipa::path(
    delete,
    path = "/books/{id}",
    tag = "books",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    responses(
        (status = 204, description = "Book deleted"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Book is currently on loan", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_book(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.services.catalog.delete_book(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lend a book to a user
#[utoipa::path(
    post,
    path = "/books/borrow",
    tag = "books",
    security(("bearer_auth" = [])),
    request_body = Borrowing,
    responses(
        (status = 200, description = "Book with its updated borrowers", body = Book),
        (status = 404, description = "Book or user not found"),
        (status = 409, description = "Already borrowed or no copy available", body = crate::error::ErrorResponse)
    )
)]
pub async fn borrow_book(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Json(request): Json<Borrowing>,
) -> AppResult<Json<Book>> {
    let book = state
        .services
        .borrowing
        .borrow(request.user.id, request.book.id)
        .await?;
    Ok(Json(book))
}

/// Take a book back from a user
#[utoipa::path(
    post,
    path = "/books/return",
    tag = "books",
    security(("bearer_auth" = [])),
    request_body = Borrowing,
    responses(
        (status = 200, description = "Book with its updated borrowers", body = Book),
        (status = 405, description = "The user has not borrowed this book", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Json(request): Json<Borrowing>,
) -> AppResult<Json<Book>> {
    let book = state
        .services
        .borrowing
        .return_book(request.user.id, request.book.id)
        .await?;
    Ok(Json(book))
}

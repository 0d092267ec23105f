//! Borrow record ledger endpoints.
//!
//! Writes go through the borrowing engine so the ledger and the borrower
//! sets of books never drift apart.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::{AppError, AppResult},
    models::borrow_record::{
        BorrowRecord, BorrowRecordFilter, BorrowRecordQuery, BorrowStatus, CreateBorrowRecord,
        UpdateBorrowRecord,
    },
    AppState,
};

use super::AuthenticatedUser;

/// List borrow records
#[utoipa::path(
    get,
    path = "/borrow-records",
    tag = "borrow-records",
    security(("bearer_auth" = [])),
    params(BorrowRecordQuery),
    responses(
        (status = 200, description = "Borrow records with book and user", body = Vec<BorrowRecord>),
        (status = 400, description = "Malformed filter")
    )
)]
pub async fn list_borrow_records(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Query(query): Query<BorrowRecordQuery>,
) -> AppResult<Json<Vec<BorrowRecord>>> {
    let filter = BorrowRecordFilter::try_from(query)?;
    let records = state.services.catalog.get_borrow_records(&filter).await?;
    Ok(Json(records))
}

/// Get a borrow record by ID
#[utoipa::path(
    get,
    path = "/borrow-records/{id}",
    tag = "borrow-records",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Borrow record ID")
    ),
    responses(
        (status = 200, description = "Borrow record", body = BorrowRecord),
        (status = 404, description = "Borrow record not found")
    )
)]
pub async fn get_borrow_record(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<BorrowRecord>> {
    let record = state.services.catalog.get_borrow_record(id).await?;
    Ok(Json(record))
}

/// Open a borrow record (borrow a book)
#[utoipa::path(
    post,
    path = "/borrow-records",
    tag = "borrow-records",
    security(("bearer_auth" = [])),
    request_body = CreateBorrowRecord,
    responses(
        (status = 201, description = "Borrow record created", body = BorrowRecord),
        (status = 404, description = "Book or user not found"),
        (status = 409, description = "Already borrowed or no copy available")
    )
)]
pub async fn create_borrow_record(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Json(request): Json<CreateBorrowRecord>,
) -> AppResult<(StatusCode, Json<BorrowRecord>)> {
    let record = state
        .services
        .borrowing
        .borrow_record(request.user_id, request.book_id)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Change the status of a borrow record (return a book)
#[utoipa::path(
    put,
    path = "/borrow-records/{id}",
    tag = "borrow-records",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Borrow record ID")
    ),
    request_body = UpdateBorrowRecord,
    responses(
        (status = 200, description = "Borrow record updated", body = BorrowRecord),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Borrow record not found"),
        (status = 405, description = "Record already returned"),
        (status = 409, description = "Returned records cannot reopen")
    )
)]
pub async fn update_borrow_record(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(request): Json<UpdateBorrowRecord>,
) -> AppResult<Json<BorrowRecord>> {
    let status: BorrowStatus = request.status.trim().parse().map_err(AppError::BadRequest)?;
    let record = state.services.borrowing.set_record_status(id, status).await?;
    Ok(Json(record))
}

/// Delete a returned borrow record
#[utoipa::path(
    delete,
    path = "/borrow-records/{id}",
    tag = "borrow-records",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Borrow record ID")
    ),
    responses(
        (status = 204, description = "Borrow record deleted"),
        (status = 404, description = "Borrow record not found"),
        (status = 409, description = "Record is still open")
    )
)]
pub async fn delete_borrow_record(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.services.borrowing.delete_record(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Borrow records queries

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookRow},
        borrow_record::{BorrowRecord, BorrowRecordFilter, BorrowStatus},
    },
    repository::{books, users, NewBorrowRecord},
};

const RECORD_COLUMNS: &str =
    "id, book_id, user_id, start_at, end_at, status, created_at, updated_at";

/// Count open records for a book
pub async fn count_active_for_book(conn: &mut PgConnection, book_id: i64) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM borrow_records
        WHERE book_id = $1 AND status = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(book_id)
    .bind(BorrowStatus::Borrowing)
    .fetch_one(conn)
    .await?;

    Ok(count)
}

/// Most recent open record for a (book, user) pair
pub async fn find_open(
    conn: &mut PgConnection,
    book_id: i64,
    user_id: i64,
) -> AppResult<Option<BorrowRecord>> {
    let record = sqlx::query_as::<_, BorrowRecord>(&format!(
        r#"
        SELECT {} FROM borrow_records
        WHERE book_id = $1 AND user_id = $2 AND status = $3 AND deleted_at IS NULL
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
        RECORD_COLUMNS
    ))
    .bind(book_id)
    .bind(user_id)
    .bind(BorrowStatus::Borrowing)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Get record by ID with book and user
pub async fn get_by_id(conn: &mut PgConnection, id: i64) -> AppResult<BorrowRecord> {
    let record = sqlx::query_as::<_, BorrowRecord>(&format!(
        "SELECT {} FROM borrow_records WHERE id = $1 AND deleted_at IS NULL",
        RECORD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Borrow record with id {} not found", id)))?;

    let mut records = vec![record];
    populate_relations(conn, &mut records).await?;
    records
        .pop()
        .ok_or_else(|| AppError::Internal("Borrow record vanished while loading relations".to_string()))
}

/// List records matching the filter, in id order
pub async fn search(
    conn: &mut PgConnection,
    filter: &BorrowRecordFilter,
) -> AppResult<Vec<BorrowRecord>> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {} FROM borrow_records WHERE deleted_at IS NULL",
        RECORD_COLUMNS
    ));

    if let Some(book_id) = filter.book_id {
        builder.push(" AND book_id = ").push_bind(book_id);
    }
    if let Some(ref user_ids) = filter.user_ids {
        builder.push(" AND user_id = ANY(").push_bind(user_ids.clone()).push(")");
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
    builder.push(" ORDER BY id");

    let mut records = builder
        .build_query_as::<BorrowRecord>()
        .fetch_all(&mut *conn)
        .await?;

    populate_relations(conn, &mut records).await?;
    Ok(records)
}

/// Attach book (plain, without owner or borrowers) and user to each record.
/// Soft-deleted books and users still resolve so old ledger entries stay readable.
async fn populate_relations(conn: &mut PgConnection, records: &mut [BorrowRecord]) -> AppResult<()> {
    if records.is_empty() {
        return Ok(());
    }

    let mut book_ids: Vec<i64> = records.iter().map(|r| r.book_id).collect();
    book_ids.sort_unstable();
    book_ids.dedup();
    let book_rows = sqlx::query_as::<_, BookRow>(&format!(
        "{} WHERE b.id = ANY($1)",
        books::BOOK_SELECT
    ))
    .bind(&book_ids[..])
    .fetch_all(&mut *conn)
    .await?;
    let books: HashMap<i64, Book> = book_rows
        .into_iter()
        .map(|row| (row.id, Book::from(row)))
        .collect();

    let mut user_ids: Vec<i64> = records.iter().map(|r| r.user_id).collect();
    user_ids.sort_unstable();
    user_ids.dedup();
    let users: HashMap<_, _> = users::get_many(conn, &user_ids)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    for record in records.iter_mut() {
        record.book = books.get(&record.book_id).cloned();
        record.user = users.get(&record.user_id).cloned();
    }

    Ok(())
}

/// Insert an open record
pub async fn create(conn: &mut PgConnection, record: &NewBorrowRecord) -> AppResult<BorrowRecord> {
    let created = sqlx::query_as::<_, BorrowRecord>(&format!(
        r#"
        INSERT INTO borrow_records (book_id, user_id, start_at, end_at, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        RECORD_COLUMNS
    ))
    .bind(record.book_id)
    .bind(record.user_id)
    .bind(record.start_at)
    .bind(record.end_at)
    .bind(BorrowStatus::Borrowing)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(format!(
            "Book {} is already borrowed by user {}",
            record.book_id, record.user_id
        )),
        other => AppError::Database(other),
    })?;

    Ok(created)
}

/// Mark an open record returned
pub async fn close(conn: &mut PgConnection, id: i64, end_at: DateTime<Utc>) -> AppResult<BorrowRecord> {
    sqlx::query_as::<_, BorrowRecord>(&format!(
        r#"
        UPDATE borrow_records
        SET status = $1, end_at = $2, updated_at = NOW()
        WHERE id = $3 AND status = $4 AND deleted_at IS NULL
        RETURNING {}
        "#,
        RECORD_COLUMNS
    ))
    .bind(BorrowStatus::Returned)
    .bind(end_at)
    .bind(id)
    .bind(BorrowStatus::Borrowing)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NoActiveBorrow(format!("Borrow record {} is not open", id)))
}

/// Soft delete a record
pub async fn soft_delete(conn: &mut PgConnection, id: i64) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE borrow_records SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Borrow record with id {} not found", id)));
    }
    Ok(())
}

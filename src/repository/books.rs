//! Books queries, including the `book_borrowers` projection table

use std::collections::HashMap;

use sqlx::{PgConnection, Postgres, QueryBuilder, Row};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookQuery, BookRow, CreateBook},
        user::User,
    },
    repository::users,
};

pub(crate) const BOOK_SELECT: &str = r#"
    SELECT b.id, b.name, b.author, b.translator, b.pages, b.publisher,
           b.language, b.description, b.quantity, b.owner_id, b.published_at,
           b.created_at, b.updated_at,
           (SELECT COUNT(*) FROM borrow_records r
             WHERE r.book_id = b.id
               AND r.status = 'borrowing'
               AND r.deleted_at IS NULL) AS active_borrows
    FROM books b
"#;

/// Get book by ID with owner and borrowers
pub async fn get_by_id(conn: &mut PgConnection, id: i64) -> AppResult<Book> {
    let row = sqlx::query_as::<_, BookRow>(&format!(
        "{} WHERE b.id = $1 AND b.deleted_at IS NULL",
        BOOK_SELECT
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

    let mut books = vec![Book::from(row)];
    populate_relations(conn, &mut books, None).await?;
    books
        .pop()
        .ok_or_else(|| AppError::Internal("Book vanished while loading relations".to_string()))
}

/// Lock the book row for the rest of the transaction
pub async fn lock(conn: &mut PgConnection, id: i64) -> AppResult<()> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM books WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
}

/// Oldest live book with this exact name
pub async fn find_id_by_name(conn: &mut PgConnection, name: &str) -> AppResult<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM books WHERE name = $1 AND deleted_at IS NULL ORDER BY id LIMIT 1",
    )
    .bind(name)
    .fetch_optional(conn)
    .await?;

    Ok(id)
}

/// List books, newest-updated first
pub async fn search(conn: &mut PgConnection, query: &BookQuery) -> AppResult<Vec<Book>> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(BOOK_SELECT);

    if let Some(borrower_id) = query.borrower_id {
        builder
            .push(" JOIN book_borrowers bb ON bb.book_id = b.id AND bb.user_id = ")
            .push_bind(borrower_id);
    }

    builder.push(" WHERE b.deleted_at IS NULL");

    if let Some(owner_id) = query.owner_id {
        builder.push(" AND b.owner_id = ").push_bind(owner_id);
    }

    builder.push(" ORDER BY b.updated_at DESC, b.id DESC");

    let rows = builder
        .build_query_as::<BookRow>()
        .fetch_all(&mut *conn)
        .await?;

    let mut books: Vec<Book> = rows.into_iter().map(Book::from).collect();
    populate_relations(conn, &mut books, query.borrower_id).await?;
    Ok(books)
}

/// Fill owner and borrowers. With `only_borrower` set, the borrower list is
/// narrowed to that user.
async fn populate_relations(
    conn: &mut PgConnection,
    books: &mut [Book],
    only_borrower: Option<i64>,
) -> AppResult<()> {
    if books.is_empty() {
        return Ok(());
    }

    let mut owner_ids: Vec<i64> = books.iter().filter_map(|b| b.owner_id).collect();
    owner_ids.sort_unstable();
    owner_ids.dedup();
    let owners: HashMap<i64, User> = users::get_many(&mut *conn, &owner_ids)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let book_ids: Vec<i64> = books.iter().map(|b| b.id).collect();
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        SELECT bb.book_id, u.id, u.name, u.email, u.created_at, u.updated_at
        FROM book_borrowers bb
        JOIN users u ON u.id = bb.user_id
        WHERE bb.book_id = ANY("#,
    );
    builder.push_bind(book_ids).push(")");
    if let Some(user_id) = only_borrower {
        builder.push(" AND bb.user_id = ").push_bind(user_id);
    }
    builder.push(" ORDER BY u.id");

    let rows = builder.build().fetch_all(conn).await?;

    let mut borrowers: HashMap<i64, Vec<User>> = HashMap::new();
    for row in rows {
        borrowers.entry(row.get("book_id")).or_default().push(User {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        });
    }

    for book in books.iter_mut() {
        book.owner = book.owner_id.and_then(|id| owners.get(&id).cloned());
        book.borrowers = borrowers.remove(&book.id).unwrap_or_default();
    }

    Ok(())
}

/// Create a new book
pub async fn create(conn: &mut PgConnection, book: &CreateBook) -> AppResult<Book> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO books (name, author, translator, pages, publisher, language,
                           description, quantity, owner_id, published_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(&book.name)
    .bind(&book.author)
    .bind(&book.translator)
    .bind(book.pages)
    .bind(&book.publisher)
    .bind(&book.language)
    .bind(&book.description)
    .bind(book.quantity)
    .bind(book.owner_id)
    .bind(book.published_at)
    .fetch_one(&mut *conn)
    .await?;

    get_by_id(conn, id).await
}

/// Change the name of a book
pub async fn rename(conn: &mut PgConnection, id: i64, name: &str) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE books SET name = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(name)
    .bind(id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Book with id {} not found", id)));
    }
    Ok(())
}

/// Soft delete a book
pub async fn soft_delete(conn: &mut PgConnection, id: i64) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE books SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Book with id {} not found", id)));
    }
    Ok(())
}

/// Add a user to the borrower set of a book
pub async fn append_borrower(conn: &mut PgConnection, book_id: i64, user_id: i64) -> AppResult<()> {
    let result = sqlx::query(
        "INSERT INTO book_borrowers (book_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(book_id)
    .bind(user_id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "User {} is already a borrower of book {}",
            user_id, book_id
        )));
    }
    Ok(())
}

/// Remove a user from the borrower set of a book
pub async fn remove_borrower(conn: &mut PgConnection, book_id: i64, user_id: i64) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM book_borrowers WHERE book_id = $1 AND user_id = $2")
        .bind(book_id)
        .bind(user_id)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Internal(format!(
            "Borrower projection out of sync: user {} not listed on book {}",
            user_id, book_id
        )));
    }
    Ok(())
}

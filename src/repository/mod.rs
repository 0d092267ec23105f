//! Repository layer: the entity store contract and its backends.
//!
//! Services never talk to a database handle directly. They receive an
//! [`EntityStore`] at construction and run every operation inside one
//! [`StoreTx`] unit of work. A unit of work dropped without [`StoreTx::commit`]
//! leaves storage untouched.

pub mod books;
pub mod borrow_records;
pub mod memory;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookQuery, CreateBook},
        borrow_record::{BorrowRecord, BorrowRecordFilter},
        user::{NewUser, User, UserCredentials, UserQuery},
    },
};

pub use memory::MemoryStore;

/// New open borrow record
#[derive(Debug, Clone)]
pub struct NewBorrowRecord {
    pub book_id: i64,
    pub user_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

/// Handle on the backing storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;

    /// Connectivity probe used by the readiness endpoint
    async fn ping(&self) -> AppResult<()>;
}

/// One atomic unit of work against the store.
///
/// Lookups of soft-deleted rows behave as if the row did not exist.
#[async_trait]
pub trait StoreTx: Send {
    // Users
    async fn find_user(&mut self, id: i64) -> AppResult<User>;
    async fn find_credentials_by_email(&mut self, email: &str) -> AppResult<Option<UserCredentials>>;
    async fn list_users(&mut self, query: &UserQuery) -> AppResult<Vec<User>>;
    async fn email_exists(&mut self, email: &str) -> AppResult<bool>;
    async fn insert_user(&mut self, user: &NewUser) -> AppResult<User>;

    // Books
    /// Book with owner and borrower set populated
    async fn find_book(&mut self, id: i64) -> AppResult<Book>;
    /// Take the per-book write lock held until the unit of work ends
    async fn lock_book(&mut self, id: i64) -> AppResult<()>;
    async fn find_book_id_by_name(&mut self, name: &str) -> AppResult<Option<i64>>;
    /// Books newest-updated first (ties broken by newest id)
    async fn list_books(&mut self, query: &BookQuery) -> AppResult<Vec<Book>>;
    async fn insert_book(&mut self, book: &CreateBook) -> AppResult<Book>;
    async fn rename_book(&mut self, id: i64, name: &str) -> AppResult<()>;
    async fn soft_delete_book(&mut self, id: i64) -> AppResult<()>;

    // Borrow ledger
    async fn count_active_borrows_for_book(&mut self, book_id: i64) -> AppResult<i64>;
    /// Most recently created open record for the pair, if any
    async fn find_open_borrow(&mut self, book_id: i64, user_id: i64) -> AppResult<Option<BorrowRecord>>;
    /// Record with its book and user populated
    async fn find_borrow_record(&mut self, id: i64) -> AppResult<BorrowRecord>;
    /// Records in id order with book and user populated
    async fn list_borrow_records(&mut self, filter: &BorrowRecordFilter) -> AppResult<Vec<BorrowRecord>>;
    async fn insert_borrow_record(&mut self, record: &NewBorrowRecord) -> AppResult<BorrowRecord>;
    /// Mark an open record returned at `end_at`
    async fn close_borrow_record(&mut self, id: i64, end_at: DateTime<Utc>) -> AppResult<BorrowRecord>;
    async fn soft_delete_borrow_record(&mut self, id: i64) -> AppResult<()>;

    // Borrower projection
    async fn append_borrower(&mut self, book_id: i64, user_id: i64) -> AppResult<()>;
    async fn remove_borrower(&mut self, book_id: i64, user_id: i64) -> AppResult<()>;

    /// Publish every change made in this unit of work
    async fn commit(&mut self) -> AppResult<()>;
}

/// PostgreSQL backed store
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for Repository {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Unit of work over one PostgreSQL transaction
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> AppResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| AppError::Internal("Transaction already committed".to_string()))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_user(&mut self, id: i64) -> AppResult<User> {
        users::get_by_id(self.conn()?, id).await
    }

    async fn find_credentials_by_email(&mut self, email: &str) -> AppResult<Option<UserCredentials>> {
        users::get_credentials_by_email(self.conn()?, email).await
    }

    async fn list_users(&mut self, query: &UserQuery) -> AppResult<Vec<User>> {
        users::search(self.conn()?, query).await
    }

    async fn email_exists(&mut self, email: &str) -> AppResult<bool> {
        users::email_exists(self.conn()?, email).await
    }

    async fn insert_user(&mut self, user: &NewUser) -> AppResult<User> {
        users::create(self.conn()?, user).await
    }

    async fn find_book(&mut self, id: i64) -> AppResult<Book> {
        books::get_by_id(self.conn()?, id).await
    }

    async fn lock_book(&mut self, id: i64) -> AppResult<()> {
        books::lock(self.conn()?, id).await
    }

    async fn find_book_id_by_name(&mut self, name: &str) -> AppResult<Option<i64>> {
        books::find_id_by_name(self.conn()?, name).await
    }

    async fn list_books(&mut self, query: &BookQuery) -> AppResult<Vec<Book>> {
        books::search(self.conn()?, query).await
    }

    async fn insert_book(&mut self, book: &CreateBook) -> AppResult<Book> {
        books::create(self.conn()?, book).await
    }

    async fn rename_book(&mut self, id: i64, name: &str) -> AppResult<()> {
        books::rename(self.conn()?, id, name).await
    }

    async fn soft_delete_book(&mut self, id: i64) -> AppResult<()> {
        books::soft_delete(self.conn()?, id).await
    }

    async fn count_active_borrows_for_book(&mut self, book_id: i64) -> AppResult<i64> {
        borrow_records::count_active_for_book(self.conn()?, book_id).await
    }

    async fn find_open_borrow(&mut self, book_id: i64, user_id: i64) -> AppResult<Option<BorrowRecord>> {
        borrow_records::find_open(self.conn()?, book_id, user_id).await
    }

    async fn find_borrow_record(&mut self, id: i64) -> AppResult<BorrowRecord> {
        borrow_records::get_by_id(self.conn()?, id).await
    }

    async fn list_borrow_records(&mut self, filter: &BorrowRecordFilter) -> AppResult<Vec<BorrowRecord>> {
        borrow_records::search(self.conn()?, filter).await
    }

    async fn insert_borrow_record(&mut self, record: &NewBorrowRecord) -> AppResult<BorrowRecord> {
        borrow_records::create(self.conn()?, record).await
    }

    async fn close_borrow_record(&mut self, id: i64, end_at: DateTime<Utc>) -> AppResult<BorrowRecord> {
        borrow_records::close(self.conn()?, id, end_at).await
    }

    async fn soft_delete_borrow_record(&mut self, id: i64) -> AppResult<()> {
        borrow_records::soft_delete(self.conn()?, id).await
    }

    async fn append_borrower(&mut self, book_id: i64, user_id: i64) -> AppResult<()> {
        books::append_borrower(self.conn()?, book_id, user_id).await
    }

    async fn remove_borrower(&mut self, book_id: i64, user_id: i64) -> AppResult<()> {
        books::remove_borrower(self.conn()?, book_id, user_id).await
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::Internal("Transaction already committed".to_string()))?;
        tx.commit().await?;
        Ok(())
    }
}

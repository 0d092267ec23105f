//! Catalog service: book and ledger reads, book mutations

use std::sync::Arc;

use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        book::{Book, BookQuery, CreateBook, RenameBook},
        borrow_record::{BorrowRecord, BorrowRecordFilter},
    },
    repository::EntityStore,
    services::borrowing::BorrowingEngine,
};

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn EntityStore>,
    borrowing: BorrowingEngine,
}

impl CatalogService {
    pub fn new(store: Arc<dyn EntityStore>, borrowing: BorrowingEngine) -> Self {
        Self { store, borrowing }
    }

    /// List books, newest-updated first
    pub async fn get_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let mut tx = self.store.begin().await?;
        tx.list_books(query).await
    }

    /// Get book by ID with owner and borrowers
    pub async fn get_book(&self, id: i64) -> AppResult<Book> {
        let mut tx = self.store.begin().await?;
        tx.find_book(id).await
    }

    /// List ledger entries in store order
    pub async fn get_borrow_records(&self, filter: &BorrowRecordFilter) -> AppResult<Vec<BorrowRecord>> {
        let mut tx = self.store.begin().await?;
        tx.list_borrow_records(filter).await
    }

    /// Get one ledger entry
    pub async fn get_borrow_record(&self, id: i64) -> AppResult<BorrowRecord> {
        let mut tx = self.store.begin().await?;
        tx.find_borrow_record(id).await
    }

    /// Create a new book
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        book.validate()?;

        let mut tx = self.store.begin().await?;
        if let Some(owner_id) = book.owner_id {
            tx.find_user(owner_id).await?;
        }
        let created = tx.insert_book(&book).await?;
        tx.commit().await?;

        tracing::info!(book_id = created.id, owner_id = ?created.owner_id, "Book created");
        Ok(created)
    }

    /// Rename a book. The name is the only field that changes after creation.
    pub async fn rename_book(&self, id: i64, input: RenameBook) -> AppResult<Book> {
        input.validate()?;

        let mut tx = self.store.begin().await?;
        tx.lock_book(id).await?;
        tx.rename_book(id, &input.name).await?;
        let book = tx.find_book(id).await?;
        tx.commit().await?;

        tracing::info!(book_id = id, "Book renamed");
        Ok(book)
    }

    /// Delete a book unless it is on loan
    pub async fn delete_book(&self, id: i64) -> AppResult<()> {
        self.borrowing.delete_book(id).await
    }

    /// First live book carrying exactly this name
    pub async fn find_book_by_name(&self, name: &str) -> AppResult<Option<i64>> {
        let mut tx = self.store.begin().await?;
        tx.find_book_id_by_name(name).await
    }
}

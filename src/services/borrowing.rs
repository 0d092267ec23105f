//! Borrowing engine: the loan lifecycle of a (book, user) pair.
//!
//! Every transition touches two places, the `borrow_records` ledger and the
//! `book_borrowers` projection, and both are written in the same unit of work.
//! A user is listed as borrower of a book exactly when an open record exists
//! for the pair.
//!
//! ```text
//!  [no record] --borrow--> [borrowing] --return--> [returned]
//! ```
//!
//! A returned record is terminal; borrowing again opens a new record.

use std::sync::Arc;

use chrono::{Months, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        borrow_record::{BorrowRecord, BorrowStatus},
    },
    repository::{EntityStore, NewBorrowRecord, StoreTx},
};

#[derive(Clone)]
pub struct BorrowingEngine {
    store: Arc<dyn EntityStore>,
    loan_period: Months,
}

impl BorrowingEngine {
    pub fn new(store: Arc<dyn EntityStore>, loan_period_months: u32) -> Self {
        Self {
            store,
            loan_period: Months::new(loan_period_months),
        }
    }

    /// Lend a book to a user. Returns the book with its updated borrower set.
    pub async fn borrow(&self, user_id: i64, book_id: i64) -> AppResult<Book> {
        let mut tx = self.store.begin().await?;
        let record = self.open_loan(tx.as_mut(), user_id, book_id).await?;
        let book = tx.find_book(book_id).await?;
        tx.commit().await?;

        tracing::info!(book_id, user_id, record_id = record.id, "Book borrowed");
        Ok(book)
    }

    /// Same as [`borrow`](Self::borrow) but returns the new ledger entry
    pub async fn borrow_record(&self, user_id: i64, book_id: i64) -> AppResult<BorrowRecord> {
        let mut tx = self.store.begin().await?;
        let record = self.open_loan(tx.as_mut(), user_id, book_id).await?;
        let record = tx.find_borrow_record(record.id).await?;
        tx.commit().await?;

        tracing::info!(book_id, user_id, record_id = record.id, "Book borrowed");
        Ok(record)
    }

    /// Take a book back from a user. Returns the book with its updated borrower set.
    pub async fn return_book(&self, user_id: i64, book_id: i64) -> AppResult<Book> {
        let mut tx = self.store.begin().await?;

        let record = match tx.find_open_borrow(book_id, user_id).await? {
            Some(record) => record,
            None => {
                tracing::warn!(book_id, user_id, "Return refused: no active borrow");
                return Err(AppError::NoActiveBorrow(format!(
                    "User {} has not borrowed book {}",
                    user_id, book_id
                )));
            }
        };

        let record = self.close_loan(tx.as_mut(), &record).await?;
        let book = tx.find_book(book_id).await?;
        tx.commit().await?;

        tracing::info!(book_id, user_id, record_id = record.id, "Book returned");
        Ok(book)
    }

    /// Close one specific ledger entry
    pub async fn return_record(&self, record_id: i64) -> AppResult<BorrowRecord> {
        let mut tx = self.store.begin().await?;

        let record = tx.find_borrow_record(record_id).await?;
        if !record.is_open() {
            return Err(AppError::NoActiveBorrow(format!(
                "Borrow record {} is already returned",
                record_id
            )));
        }

        self.close_loan(tx.as_mut(), &record).await?;
        let record = tx.find_borrow_record(record_id).await?;
        tx.commit().await?;

        tracing::info!(
            book_id = record.book_id,
            user_id = record.user_id,
            record_id,
            "Book returned"
        );
        Ok(record)
    }

    /// Apply a client-requested status to a ledger entry. The only allowed
    /// transition is `borrowing -> returned`; asking for the current status of
    /// an open record is a no-op.
    pub async fn set_record_status(&self, record_id: i64, status: BorrowStatus) -> AppResult<BorrowRecord> {
        match status {
            BorrowStatus::Returned => self.return_record(record_id).await,
            BorrowStatus::Borrowing => {
                let mut tx = self.store.begin().await?;
                let record = tx.find_borrow_record(record_id).await?;
                if record.is_open() {
                    Ok(record)
                } else {
                    Err(AppError::Conflict(format!(
                        "Borrow record {} is returned; borrow the book again instead",
                        record_id
                    )))
                }
            }
        }
    }

    /// Delete guard: a book can go only while nobody has it on loan
    pub async fn can_delete(&self, book_id: i64) -> AppResult<bool> {
        let mut tx = self.store.begin().await?;
        tx.find_book(book_id).await?;
        Ok(tx.count_active_borrows_for_book(book_id).await? == 0)
    }

    /// Soft delete a book once the delete guard passes
    pub async fn delete_book(&self, book_id: i64) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        tx.lock_book(book_id).await?;

        let active = tx.count_active_borrows_for_book(book_id).await?;
        if active > 0 {
            tracing::warn!(book_id, active, "Delete refused: book is on loan");
            return Err(AppError::Conflict(format!(
                "Book {} is currently on loan and cannot be deleted",
                book_id
            )));
        }

        tx.soft_delete_book(book_id).await?;
        tx.commit().await?;

        tracing::info!(book_id, "Book deleted");
        Ok(())
    }

    /// Soft delete a closed ledger entry. Open entries back a borrower
    /// association and must be returned first.
    pub async fn delete_record(&self, record_id: i64) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        let record = tx.find_borrow_record(record_id).await?;
        if record.is_open() {
            return Err(AppError::Conflict(format!(
                "Borrow record {} is still open; return the book first",
                record_id
            )));
        }

        tx.soft_delete_borrow_record(record_id).await?;
        tx.commit().await?;

        tracing::info!(record_id, "Borrow record deleted");
        Ok(())
    }

    async fn open_loan(&self, tx: &mut dyn StoreTx, user_id: i64, book_id: i64) -> AppResult<BorrowRecord> {
        tx.find_user(user_id).await?;
        tx.lock_book(book_id).await?;
        let book = tx.find_book(book_id).await?;

        if tx.find_open_borrow(book_id, user_id).await?.is_some() {
            tracing::warn!(book_id, user_id, "Borrow refused: already borrowed");
            return Err(AppError::Conflict(format!(
                "User {} already has book {} on loan",
                user_id, book_id
            )));
        }

        let active = tx.count_active_borrows_for_book(book_id).await?;
        if active >= i64::from(book.quantity) {
            tracing::warn!(book_id, user_id, active, quantity = book.quantity, "Borrow refused: no copy left");
            return Err(AppError::Conflict(format!(
                "No copy of book {} is available ({}/{} on loan)",
                book_id, active, book.quantity
            )));
        }

        let start_at = Utc::now();
        let end_at = start_at
            .checked_add_months(self.loan_period)
            .ok_or_else(|| AppError::Internal("Loan due date out of range".to_string()))?;

        let record = tx
            .insert_borrow_record(&NewBorrowRecord {
                book_id,
                user_id,
                start_at,
                end_at,
            })
            .await?;
        tx.append_borrower(book_id, user_id).await?;

        Ok(record)
    }

    async fn close_loan(&self, tx: &mut dyn StoreTx, record: &BorrowRecord) -> AppResult<BorrowRecord> {
        tx.lock_book(record.book_id).await?;
        let closed = tx.close_borrow_record(record.id, Utc::now()).await?;
        tx.remove_borrower(record.book_id, record.user_id).await?;
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            book::{BookQuery, CreateBook},
            borrow_record::BorrowRecordFilter,
            user::NewUser,
        },
        repository::{MemoryStore, MockEntityStore},
    };
    use tokio_test::{assert_err, assert_ok};

    async fn seed(store: &MemoryStore, quantity: i32) -> (i64, i64) {
        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(&NewUser {
                name: "reader".to_string(),
                email: "reader@example.org".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        let mut input = CreateBook::titled("The Left Hand of Darkness");
        input.quantity = quantity;
        let book = tx.insert_book(&input).await.unwrap();
        tx.commit().await.unwrap();
        (user.id, book.id)
    }

    fn engine(store: &MemoryStore) -> BorrowingEngine {
        BorrowingEngine::new(Arc::new(store.clone()), 1)
    }

    async fn records(store: &MemoryStore, book_id: i64) -> Vec<BorrowRecord> {
        let mut tx = store.begin().await.unwrap();
        tx.list_borrow_records(&BorrowRecordFilter {
            book_id: Some(book_id),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn borrow_opens_a_record_and_lists_the_borrower() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;

        let book = assert_ok!(engine(&store).borrow(user_id, book_id).await);
        assert_eq!(book.borrower_ids(), vec![user_id]);
        assert_eq!(book.available, 0);

        let records = records(&store, book_id).await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, BorrowStatus::Borrowing);
        assert_eq!(record.user_id, user_id);
        let due = record.end_at.expect("due date");
        assert_eq!(due, record.start_at.checked_add_months(Months::new(1)).unwrap());
    }

    #[tokio::test]
    async fn second_borrow_of_the_same_pair_is_a_conflict() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 5).await;
        let engine = engine(&store);

        assert_ok!(engine.borrow(user_id, book_id).await);
        let err = assert_err!(engine.borrow(user_id, book_id).await);
        assert!(matches!(err, AppError::Conflict(_)));

        assert_eq!(records(&store, book_id).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_borrower_write_rolls_back_the_record() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 2).await;

        // Borrower row left behind without a matching open record
        let mut tx = store.begin().await.unwrap();
        tx.append_borrower(book_id, user_id).await.unwrap();
        tx.commit().await.unwrap();

        let err = assert_err!(engine(&store).borrow(user_id, book_id).await);
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(records(&store, book_id).await.is_empty());
    }

    #[tokio::test]
    async fn borrow_needs_a_free_copy() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 0).await;

        let err = assert_err!(engine(&store).borrow(user_id, book_id).await);
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(records(&store, book_id).await.is_empty());
    }

    #[tokio::test]
    async fn borrow_of_missing_entities_is_not_found() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;
        let engine = engine(&store);

        assert!(matches!(engine.borrow(999, book_id).await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.borrow(user_id, 999).await, Err(AppError::NotFound(_))));
        assert!(records(&store, book_id).await.is_empty());
    }

    #[tokio::test]
    async fn return_without_borrow_changes_nothing() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;

        let err = assert_err!(engine(&store).return_book(user_id, book_id).await);
        assert!(matches!(err, AppError::NoActiveBorrow(_)));
        assert!(records(&store, book_id).await.is_empty());
    }

    #[tokio::test]
    async fn return_closes_the_record_and_clears_the_borrower() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;
        let engine = engine(&store);

        engine.borrow(user_id, book_id).await.unwrap();
        let book = assert_ok!(engine.return_book(user_id, book_id).await);
        assert!(book.borrowers.is_empty());
        assert_eq!(book.available, 1);

        let records = records(&store, book_id).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BorrowStatus::Returned);
        assert!(records[0].end_at.unwrap() >= records[0].start_at);
    }

    #[tokio::test]
    async fn borrowing_again_opens_a_fresh_record() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;
        let engine = engine(&store);

        engine.borrow(user_id, book_id).await.unwrap();
        engine.return_book(user_id, book_id).await.unwrap();
        engine.borrow(user_id, book_id).await.unwrap();

        let records = records(&store, book_id).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, BorrowStatus::Returned);
        assert_eq!(records[1].status, BorrowStatus::Borrowing);
    }

    #[tokio::test]
    async fn delete_guard_follows_the_loan() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;
        let engine = engine(&store);

        engine.borrow(user_id, book_id).await.unwrap();
        assert!(!engine.can_delete(book_id).await.unwrap());
        let err = assert_err!(engine.delete_book(book_id).await);
        assert!(matches!(err, AppError::Conflict(_)));

        engine.return_book(user_id, book_id).await.unwrap();
        assert!(engine.can_delete(book_id).await.unwrap());
        assert_ok!(engine.delete_book(book_id).await);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_books(&BookQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_status_only_moves_forward() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;
        let engine = engine(&store);

        let record = engine.borrow_record(user_id, book_id).await.unwrap();
        assert_eq!(record.book.as_ref().map(|b| b.id), Some(book_id));

        let unchanged = engine.set_record_status(record.id, BorrowStatus::Borrowing).await.unwrap();
        assert!(unchanged.is_open());

        let returned = engine.set_record_status(record.id, BorrowStatus::Returned).await.unwrap();
        assert_eq!(returned.status, BorrowStatus::Returned);

        assert!(matches!(
            engine.set_record_status(record.id, BorrowStatus::Borrowing).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            engine.set_record_status(record.id, BorrowStatus::Returned).await,
            Err(AppError::NoActiveBorrow(_))
        ));
    }

    #[tokio::test]
    async fn open_records_cannot_be_deleted() {
        let store = MemoryStore::new();
        let (user_id, book_id) = seed(&store, 1).await;
        let engine = engine(&store);

        let record = engine.borrow_record(user_id, book_id).await.unwrap();
        assert!(matches!(engine.delete_record(record.id).await, Err(AppError::Conflict(_))));

        engine.return_record(record.id).await.unwrap();
        assert_ok!(engine.delete_record(record.id).await);
        assert!(records(&store, book_id).await.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced_and_not_retried() {
        let mut store = MockEntityStore::new();
        store
            .expect_begin()
            .times(1)
            .returning(|| Err(AppError::Database(sqlx::Error::PoolTimedOut)));

        let engine = BorrowingEngine::new(Arc::new(store), 1);
        let err = assert_err!(engine.borrow(7, 1).await);
        assert!(matches!(err, AppError::Database(_)));
    }
}

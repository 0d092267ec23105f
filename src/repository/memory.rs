//! In-process entity store.
//!
//! A unit of work holds the store mutex for its whole lifetime and edits a
//! private copy of the state. `commit` publishes the copy; dropping the unit
//! of work discards it. Units of work are therefore fully serialized.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{available_copies, Book, BookQuery, CreateBook},
        borrow_record::{BorrowRecord, BorrowRecordFilter, BorrowStatus},
        user::{NewUser, User, UserCredentials, UserQuery},
    },
    repository::{EntityStore, NewBorrowRecord, StoreTx},
};

#[derive(Debug, Clone)]
struct UserEntry {
    user: User,
    password_hash: String,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct BookEntry {
    book: Book,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct RecordEntry {
    record: BorrowRecord,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<i64, UserEntry>,
    books: BTreeMap<i64, BookEntry>,
    records: BTreeMap<i64, RecordEntry>,
    /// (book_id, user_id)
    borrowers: BTreeSet<(i64, i64)>,
    next_user_id: i64,
    next_book_id: i64,
    next_record_id: i64,
}

impl MemoryState {
    fn live_user(&self, id: i64) -> Option<&User> {
        self.users
            .get(&id)
            .filter(|e| e.deleted_at.is_none())
            .map(|e| &e.user)
    }

    fn live_book(&self, id: i64) -> Option<&BookEntry> {
        self.books.get(&id).filter(|e| e.deleted_at.is_none())
    }

    fn active_borrows(&self, book_id: i64) -> i64 {
        self.records
            .values()
            .filter(|e| e.deleted_at.is_none())
            .filter(|e| e.record.book_id == book_id && e.record.is_open())
            .count() as i64
    }

    /// Book as stored plus derived availability, without relations
    fn plain_book(&self, entry: &BookEntry) -> Book {
        let mut book = entry.book.clone();
        book.available = available_copies(book.quantity, self.active_borrows(book.id));
        book.owner = None;
        book.borrowers = Vec::new();
        book
    }

    fn full_book(&self, entry: &BookEntry, only_borrower: Option<i64>) -> Book {
        let mut book = self.plain_book(entry);
        book.owner = book
            .owner_id
            .and_then(|id| self.users.get(&id))
            .map(|e| e.user.clone());
        book.borrowers = self
            .borrowers
            .range((book.id, i64::MIN)..=(book.id, i64::MAX))
            .map(|&(_, user_id)| user_id)
            .filter(|user_id| only_borrower.map_or(true, |only| only == *user_id))
            .filter_map(|user_id| self.users.get(&user_id).map(|e| e.user.clone()))
            .collect();
        book
    }

    fn record_with_relations(&self, entry: &RecordEntry) -> BorrowRecord {
        let mut record = entry.record.clone();
        record.book = self
            .books
            .get(&record.book_id)
            .map(|e| self.plain_book(e));
        record.user = self.users.get(&record.user_id).map(|e| e.user.clone());
        record
    }
}

/// Entity store kept in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            working,
        }))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Unit of work over a [`MemoryStore`]
pub struct MemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
}

impl MemoryTx {
    fn state(&mut self) -> AppResult<&mut MemoryState> {
        if self.guard.is_none() {
            return Err(AppError::Internal("Transaction already committed".to_string()));
        }
        Ok(&mut self.working)
    }
}

fn book_not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Book with id {} not found", id))
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_user(&mut self, id: i64) -> AppResult<User> {
        self.state()?
            .live_user(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    async fn find_credentials_by_email(&mut self, email: &str) -> AppResult<Option<UserCredentials>> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .filter(|e| e.deleted_at.is_none())
            .find(|e| e.user.email.eq_ignore_ascii_case(email))
            .map(|e| UserCredentials {
                id: e.user.id,
                email: e.user.email.clone(),
                password: e.password_hash.clone(),
            }))
    }

    async fn list_users(&mut self, query: &UserQuery) -> AppResult<Vec<User>> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .filter(|e| e.deleted_at.is_none())
            .filter(|e| query.name.as_ref().map_or(true, |n| &e.user.name == n))
            .filter(|e| query.email.as_ref().map_or(true, |m| &e.user.email == m))
            .map(|e| e.user.clone())
            .collect())
    }

    async fn email_exists(&mut self, email: &str) -> AppResult<bool> {
        Ok(self.find_credentials_by_email(email).await?.is_some())
    }

    async fn insert_user(&mut self, user: &NewUser) -> AppResult<User> {
        let state = self.state()?;
        state.next_user_id += 1;
        let now = Utc::now();
        let created = User {
            id: state.next_user_id,
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: now,
            updated_at: now,
        };
        state.users.insert(
            created.id,
            UserEntry {
                user: created.clone(),
                password_hash: user.password_hash.clone(),
                deleted_at: None,
            },
        );
        Ok(created)
    }

    async fn find_book(&mut self, id: i64) -> AppResult<Book> {
        let state = self.state()?;
        let entry = state.live_book(id).ok_or_else(|| book_not_found(id))?;
        Ok(state.full_book(entry, None))
    }

    async fn lock_book(&mut self, id: i64) -> AppResult<()> {
        // The whole store is already locked by this unit of work
        let state = self.state()?;
        state.live_book(id).map(|_| ()).ok_or_else(|| book_not_found(id))
    }

    async fn find_book_id_by_name(&mut self, name: &str) -> AppResult<Option<i64>> {
        let state = self.state()?;
        Ok(state
            .books
            .values()
            .filter(|e| e.deleted_at.is_none())
            .find(|e| e.book.name == name)
            .map(|e| e.book.id))
    }

    async fn list_books(&mut self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let state = self.state()?;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|e| e.deleted_at.is_none())
            .filter(|e| query.owner_id.map_or(true, |owner| e.book.owner_id == Some(owner)))
            .filter(|e| {
                query
                    .borrower_id
                    .map_or(true, |user| state.borrowers.contains(&(e.book.id, user)))
            })
            .map(|e| state.full_book(e, query.borrower_id))
            .collect();

        books.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(books)
    }

    async fn insert_book(&mut self, input: &CreateBook) -> AppResult<Book> {
        let state = self.state()?;
        state.next_book_id += 1;
        let now = Utc::now();
        let book = Book {
            id: state.next_book_id,
            name: input.name.clone(),
            author: input.author.clone(),
            translator: input.translator.clone(),
            pages: input.pages,
            publisher: input.publisher.clone(),
            language: input.language.clone(),
            description: input.description.clone(),
            quantity: input.quantity,
            available: input.quantity,
            owner_id: input.owner_id,
            owner: None,
            borrowers: Vec::new(),
            published_at: input.published_at,
            created_at: now,
            updated_at: now,
        };
        let entry = BookEntry {
            book,
            deleted_at: None,
        };
        let created = state.full_book(&entry, None);
        state.books.insert(created.id, entry);
        Ok(created)
    }

    async fn rename_book(&mut self, id: i64, name: &str) -> AppResult<()> {
        let state = self.state()?;
        let entry = state
            .books
            .get_mut(&id)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| book_not_found(id))?;
        entry.book.name = name.to_string();
        entry.book.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete_book(&mut self, id: i64) -> AppResult<()> {
        let state = self.state()?;
        let entry = state
            .books
            .get_mut(&id)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| book_not_found(id))?;
        entry.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn count_active_borrows_for_book(&mut self, book_id: i64) -> AppResult<i64> {
        Ok(self.state()?.active_borrows(book_id))
    }

    async fn find_open_borrow(&mut self, book_id: i64, user_id: i64) -> AppResult<Option<BorrowRecord>> {
        let state = self.state()?;
        Ok(state
            .records
            .values()
            .filter(|e| e.deleted_at.is_none())
            .map(|e| &e.record)
            .filter(|r| r.book_id == book_id && r.user_id == user_id && r.is_open())
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn find_borrow_record(&mut self, id: i64) -> AppResult<BorrowRecord> {
        let state = self.state()?;
        let entry = state
            .records
            .get(&id)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound(format!("Borrow record with id {} not found", id)))?;
        Ok(state.record_with_relations(entry))
    }

    async fn list_borrow_records(&mut self, filter: &BorrowRecordFilter) -> AppResult<Vec<BorrowRecord>> {
        let state = self.state()?;
        Ok(state
            .records
            .values()
            .filter(|e| e.deleted_at.is_none())
            .filter(|e| filter.book_id.map_or(true, |id| e.record.book_id == id))
            .filter(|e| {
                filter
                    .user_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&e.record.user_id))
            })
            .filter(|e| filter.status.map_or(true, |s| e.record.status == s))
            .map(|e| state.record_with_relations(e))
            .collect())
    }

    async fn insert_borrow_record(&mut self, input: &NewBorrowRecord) -> AppResult<BorrowRecord> {
        if self.find_open_borrow(input.book_id, input.user_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Book {} is already borrowed by user {}",
                input.book_id, input.user_id
            )));
        }

        let state = self.state()?;
        state.next_record_id += 1;
        let now = Utc::now();
        let record = BorrowRecord {
            id: state.next_record_id,
            book_id: input.book_id,
            user_id: input.user_id,
            start_at: input.start_at,
            end_at: Some(input.end_at),
            status: BorrowStatus::Borrowing,
            created_at: now,
            updated_at: now,
            book: None,
            user: None,
        };
        state.records.insert(
            record.id,
            RecordEntry {
                record: record.clone(),
                deleted_at: None,
            },
        );
        Ok(record)
    }

    async fn close_borrow_record(&mut self, id: i64, end_at: DateTime<Utc>) -> AppResult<BorrowRecord> {
        let state = self.state()?;
        let entry = state
            .records
            .get_mut(&id)
            .filter(|e| e.deleted_at.is_none() && e.record.is_open())
            .ok_or_else(|| AppError::NoActiveBorrow(format!("Borrow record {} is not open", id)))?;
        entry.record.status = BorrowStatus::Returned;
        entry.record.end_at = Some(end_at);
        entry.record.updated_at = Utc::now();
        Ok(entry.record.clone())
    }

    async fn soft_delete_borrow_record(&mut self, id: i64) -> AppResult<()> {
        let state = self.state()?;
        let entry = state
            .records
            .get_mut(&id)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound(format!("Borrow record with id {} not found", id)))?;
        entry.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn append_borrower(&mut self, book_id: i64, user_id: i64) -> AppResult<()> {
        if !self.state()?.borrowers.insert((book_id, user_id)) {
            return Err(AppError::Conflict(format!(
                "User {} is already a borrower of book {}",
                user_id, book_id
            )));
        }
        Ok(())
    }

    async fn remove_borrower(&mut self, book_id: i64, user_id: i64) -> AppResult<()> {
        if !self.state()?.borrowers.remove(&(book_id, user_id)) {
            return Err(AppError::Internal(format!(
                "Borrower projection out of sync: user {} not listed on book {}",
                user_id, book_id
            )));
        }
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| AppError::Internal("Transaction already committed".to_string()))?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: format!("{}@example.org", name),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn dropped_unit_of_work_leaves_no_trace() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&new_user("ann")).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_users(&UserQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_changes_are_visible_to_the_next_unit_of_work() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let ann = tx.insert_user(&new_user("ann")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.find_user(ann.id).await.unwrap(), ann);
        assert!(tx.email_exists("ANN@example.org").await.unwrap());
    }

    #[tokio::test]
    async fn finished_unit_of_work_refuses_further_use() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(tx.find_user(1).await, Err(AppError::Internal(_))));
        assert!(matches!(tx.commit().await, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn soft_deleted_book_is_hidden() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let book = tx.insert_book(&CreateBook::titled("Dune")).await.unwrap();
        tx.soft_delete_book(book.id).await.unwrap();

        assert!(matches!(tx.find_book(book.id).await, Err(AppError::NotFound(_))));
        assert!(tx.list_books(&BookQuery::default()).await.unwrap().is_empty());
        assert!(matches!(tx.soft_delete_book(book.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn projection_rejects_duplicate_and_missing_rows() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        tx.append_borrower(1, 7).await.unwrap();
        assert!(matches!(tx.append_borrower(1, 7).await, Err(AppError::Conflict(_))));
        tx.remove_borrower(1, 7).await.unwrap();
        assert!(matches!(tx.remove_borrower(1, 7).await, Err(AppError::Internal(_))));
    }
}

//! Data models for Booklend

pub mod book;
pub mod borrow_record;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookQuery, CreateBook, RenameBook};
pub use borrow_record::{BorrowRecord, BorrowRecordFilter, BorrowStatus, Borrowing};
pub use user::{CreateUser, User, UserClaims, UserQuery};

//! Book model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::user::User;

/// Internal row structure for book queries
#[derive(Debug, Clone, FromRow)]
pub struct BookRow {
    pub id: i64,
    pub name: String,
    pub author: String,
    pub translator: String,
    pub pages: i64,
    pub publisher: String,
    pub language: String,
    pub description: String,
    pub quantity: i32,
    pub owner_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of open borrow records for this book
    pub active_borrows: i64,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            id: row.id,
            name: row.name,
            author: row.author,
            translator: row.translator,
            pages: row.pages,
            publisher: row.publisher,
            language: row.language,
            description: row.description,
            quantity: row.quantity,
            available: available_copies(row.quantity, row.active_borrows),
            owner_id: row.owner_id,
            owner: None,
            borrowers: Vec::new(),
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Copies left on the shelf, never negative
pub fn available_copies(quantity: i32, active_borrows: i64) -> i32 {
    (i64::from(quantity) - active_borrows).max(0) as i32
}

/// Book with its owner and current borrower set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i64,
    pub name: String,
    pub author: String,
    pub translator: String,
    pub pages: i64,
    pub publisher: String,
    pub language: String,
    pub description: String,
    /// Number of physical copies
    pub quantity: i32,
    /// Copies not currently on loan
    pub available: i32,
    #[serde(rename = "ownerID")]
    pub owner_id: Option<i64>,
    pub owner: Option<User>,
    pub borrowers: Vec<User>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn borrower_ids(&self) -> Vec<i64> {
        self.borrowers.iter().map(|u| u.id).collect()
    }
}

/// Book listing filters, combined with AND
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    /// Only books owned by this user
    #[serde(rename = "ownerID")]
    pub owner_id: Option<i64>,
    /// Only books this user currently has on loan
    #[serde(rename = "borrowerID")]
    pub borrower_id: Option<i64>,
}

fn default_quantity() -> i32 {
    1
}

/// Create book request. Borrowers are never taken from the payload.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBook {
    #[validate(length(min = 1, max = 1024, message = "Name must not be empty"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub author: String,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub translator: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "Pages must not be negative"))]
    pub pages: i64,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub publisher: String,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 0, message = "Quantity must not be negative"))]
    pub quantity: i32,
    #[serde(rename = "ownerID", default)]
    pub owner_id: Option<i64>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl CreateBook {
    /// Minimal book with one copy and no owner
    pub fn titled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: String::new(),
            translator: String::new(),
            pages: 0,
            publisher: String::new(),
            language: String::new(),
            description: String::new(),
            quantity: default_quantity(),
            owner_id: None,
            published_at: None,
        }
    }
}

/// Rename request. Only the name of a book can change after creation.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RenameBook {
    #[validate(length(min = 1, max = 1024, message = "Name must not be empty"))]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_copies_never_goes_negative() {
        assert_eq!(available_copies(3, 1), 2);
        assert_eq!(available_copies(1, 1), 0);
        assert_eq!(available_copies(0, 2), 0);
    }

    #[test]
    fn create_book_defaults_to_one_copy() {
        let input: CreateBook = serde_json::from_str(r#"{"name": "Dune", "ownerID": 3}"#).unwrap();
        assert_eq!(input.quantity, 1);
        assert_eq!(input.owner_id, Some(3));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn create_book_requires_a_name() {
        let input: CreateBook = serde_json::from_str(r#"{"name": ""}"#).unwrap();
        assert!(input.validate().is_err());

        let input: CreateBook = serde_json::from_str(r#"{"name": "x", "quantity": -1}"#).unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn book_query_uses_source_parameter_names() {
        let query: BookQuery = serde_json::from_str(r#"{"ownerID": 3, "borrowerID": 7}"#).unwrap();
        assert_eq!(query.owner_id, Some(3));
        assert_eq!(query.borrower_id, Some(7));
    }
}

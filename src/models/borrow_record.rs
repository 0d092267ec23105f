//! Borrow record (loan ledger) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef},
    Decode, Encode, FromRow, Postgres,
};
use utoipa::{IntoParams, ToSchema};

use super::{book::Book, user::User};
use crate::error::AppError;

/// Lifecycle of a single borrow record. A record is created `Borrowing` and
/// moves to `Returned` exactly once; re-borrowing creates a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    Borrowing,
    Returned,
}

impl BorrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowStatus::Borrowing => "borrowing",
            BorrowStatus::Returned => "returned",
        }
    }
}

impl std::fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BorrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "borrowing" => Ok(BorrowStatus::Borrowing),
            "returned" => Ok(BorrowStatus::Returned),
            _ => Err(format!("Invalid borrow status: {}", s)),
        }
    }
}

// SQLx conversion for BorrowStatus (stored as text)
impl sqlx::Type<Postgres> for BorrowStatus {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for BorrowStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<Postgres>>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for BorrowStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// Ledger entry for one loan of a book to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRecord {
    pub id: i64,
    #[serde(rename = "bookID")]
    pub book_id: i64,
    #[serde(rename = "userID")]
    pub user_id: i64,
    pub start_at: DateTime<Utc>,
    /// Due date while borrowing, actual return time once returned
    pub end_at: Option<DateTime<Utc>>,
    pub status: BorrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub book: Option<Book>,
    #[sqlx(skip)]
    pub user: Option<User>,
}

impl BorrowRecord {
    pub fn is_open(&self) -> bool {
        self.status == BorrowStatus::Borrowing
    }
}

/// Borrow record listing filters, combined with AND
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BorrowRecordFilter {
    pub book_id: Option<i64>,
    pub user_ids: Option<Vec<i64>>,
    pub status: Option<BorrowStatus>,
}

/// Raw query string for `GET /borrow-records`
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BorrowRecordQuery {
    #[serde(rename = "bookID")]
    pub book_id: Option<i64>,
    /// Comma separated user ids
    #[serde(rename = "userIDs")]
    pub user_ids: Option<String>,
    /// `borrowing` or `returned`
    pub status: Option<String>,
}

impl TryFrom<BorrowRecordQuery> for BorrowRecordFilter {
    type Error = AppError;

    fn try_from(query: BorrowRecordQuery) -> Result<Self, Self::Error> {
        let user_ids = match query.user_ids.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(list) => Some(
                list.split(',')
                    .map(|id| {
                        id.trim()
                            .parse::<i64>()
                            .map_err(|_| AppError::BadRequest(format!("Invalid user id: {}", id)))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };

        let status = match query.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(s.parse::<BorrowStatus>().map_err(AppError::BadRequest)?),
        };

        Ok(BorrowRecordFilter {
            book_id: query.book_id,
            user_ids,
            status,
        })
    }
}

/// Reference to an entity by id, as sent by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct EntityRef {
    pub id: i64,
}

/// Body of `POST /books/borrow` and `POST /books/return`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct Borrowing {
    pub user: EntityRef,
    pub book: EntityRef,
}

/// Body of `POST /borrow-records`
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct CreateBorrowRecord {
    #[serde(rename = "bookID")]
    pub book_id: i64,
    #[serde(rename = "userID")]
    pub user_id: i64,
}

/// Body of `PUT /borrow-records/{id}`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateBorrowRecord {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_literals() {
        assert_eq!("borrowing".parse::<BorrowStatus>(), Ok(BorrowStatus::Borrowing));
        assert_eq!("Returned".parse::<BorrowStatus>(), Ok(BorrowStatus::Returned));
        assert!("lost".parse::<BorrowStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&BorrowStatus::Borrowing).unwrap(),
            "\"borrowing\""
        );
    }

    #[test]
    fn query_splits_user_ids() {
        let filter = BorrowRecordFilter::try_from(BorrowRecordQuery {
            book_id: Some(1),
            user_ids: Some("7, 8,9".to_string()),
            status: Some("borrowing".to_string()),
        })
        .unwrap();

        assert_eq!(filter.book_id, Some(1));
        assert_eq!(filter.user_ids, Some(vec![7, 8, 9]));
        assert_eq!(filter.status, Some(BorrowStatus::Borrowing));
    }

    #[test]
    fn query_rejects_garbage() {
        let bad_ids = BorrowRecordQuery {
            user_ids: Some("7,x".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            BorrowRecordFilter::try_from(bad_ids),
            Err(AppError::BadRequest(_))
        ));

        let bad_status = BorrowRecordQuery {
            status: Some("lost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            BorrowRecordFilter::try_from(bad_status),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn empty_query_means_no_filter() {
        let filter = BorrowRecordFilter::try_from(BorrowRecordQuery {
            user_ids: Some(String::new()),
            status: Some(String::new()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(filter, BorrowRecordFilter::default());
    }
}

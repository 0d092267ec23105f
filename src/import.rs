//! One-shot CSV batch loader.
//!
//! Rows are headerless and may carry a variable number of fields. Every row
//! goes through the same service calls an API client would make, so a loaded
//! ledger obeys the same invariants as one built over HTTP.

use std::io::Read;

use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::CreateBook,
        user::{CreateUser, User, UserQuery},
    },
    services::Services,
};

pub const ADMIN_NAME: &str = "admin";
pub const ADMIN_EMAIL: &str = "admin@booklend.local";
/// Password given to imported users whose row has none
pub const DEFAULT_PASSWORD: &str = "passw0rd";

/// Outcome of one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

impl ImportSummary {
    fn skip(&mut self, line: usize, reason: impl std::fmt::Display) {
        tracing::warn!(line, %reason, "Row skipped");
        self.skipped += 1;
    }
}

/// Read headerless CSV rows with any number of fields, trimmed
pub fn read_rows<R: Read>(input: R) -> AppResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| AppError::BadRequest(format!("Invalid CSV: {}", e)))
        })
        .collect()
}

fn field(row: &[String], index: usize) -> Option<&str> {
    row.get(index).map(String::as_str).filter(|s| !s.is_empty())
}

/// Client-side faults that skip a row instead of aborting the run
fn is_row_fault(err: &AppError) -> bool {
    matches!(
        err,
        AppError::NotFound(_) | AppError::Conflict(_) | AppError::Validation(_) | AppError::BadRequest(_)
    )
}

async fn find_admin(services: &Services) -> AppResult<Option<User>> {
    let query = UserQuery {
        name: None,
        email: Some(ADMIN_EMAIL.to_string()),
    };
    Ok(services.users.search_users(&query).await?.into_iter().next())
}

/// Rows `name,email[,password]`. The admin account is created afterwards if
/// it does not exist yet.
pub async fn import_users(
    services: &Services,
    rows: &[Vec<String>],
    admin_password: &str,
) -> AppResult<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (line, row) in rows.iter().enumerate().map(|(i, r)| (i + 1, r)) {
        let (Some(name), Some(email)) = (field(row, 0), field(row, 1)) else {
            summary.skip(line, "expected name,email[,password]");
            continue;
        };

        let input = CreateUser {
            name: name.to_string(),
            email: email.to_string(),
            password: field(row, 2).unwrap_or(DEFAULT_PASSWORD).to_string(),
        };
        match services.users.create_user(input).await {
            Ok(_) => summary.imported += 1,
            Err(e) if is_row_fault(&e) => summary.skip(line, e),
            Err(e) => return Err(e),
        }
    }

    if find_admin(services).await?.is_none() {
        services
            .users
            .create_user(CreateUser {
                name: ADMIN_NAME.to_string(),
                email: ADMIN_EMAIL.to_string(),
                password: admin_password.to_string(),
            })
            .await?;
        tracing::info!("Admin account created");
    }

    Ok(summary)
}

/// Rows `name,author[,quantity]`, owned by the admin account when it exists.
/// A quantity that does not parse as a non-negative number counts as one copy.
pub async fn import_books(services: &Services, rows: &[Vec<String>]) -> AppResult<ImportSummary> {
    let mut summary = ImportSummary::default();

    let owner_id = find_admin(services).await?.map(|admin| admin.id);
    if owner_id.is_none() {
        tracing::warn!("No admin account, imported books will have no owner");
    }

    for (line, row) in rows.iter().enumerate().map(|(i, r)| (i + 1, r)) {
        let Some(name) = field(row, 0) else {
            summary.skip(line, "expected name,author[,quantity]");
            continue;
        };

        let mut input = CreateBook::titled(name);
        input.author = field(row, 1).unwrap_or_default().to_string();
        input.quantity = field(row, 2)
            .and_then(|q| q.parse::<i32>().ok())
            .filter(|q| *q >= 0)
            .unwrap_or(1);
        input.owner_id = owner_id;

        match services.catalog.create_book(input).await {
            Ok(_) => summary.imported += 1,
            Err(e) if is_row_fault(&e) => summary.skip(line, e),
            Err(e) => return Err(e),
        }
    }

    Ok(summary)
}

/// Rows `bookName,userName`, each one a borrow of that book by that user
pub async fn import_records(services: &Services, rows: &[Vec<String>]) -> AppResult<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (line, row) in rows.iter().enumerate().map(|(i, r)| (i + 1, r)) {
        let (Some(book_name), Some(user_name)) = (field(row, 0), field(row, 1)) else {
            summary.skip(line, "expected bookName,userName");
            continue;
        };

        let Some(book_id) = services.catalog.find_book_by_name(book_name).await? else {
            summary.skip(line, format!("no book named {:?}", book_name));
            continue;
        };

        let query = UserQuery {
            name: Some(user_name.to_string()),
            email: None,
        };
        let Some(user) = services.users.search_users(&query).await?.into_iter().next() else {
            summary.skip(line, format!("no user named {:?}", user_name));
            continue;
        };

        match services.borrowing.borrow(user.id, book_id).await {
            Ok(_) => summary.imported += 1,
            Err(e) if is_row_fault(&e) => summary.skip(line, e),
            Err(e) => return Err(e),
        }
    }

    Ok(summary)
}

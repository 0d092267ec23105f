//! Users queries

use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    models::user::{NewUser, User, UserCredentials, UserQuery},
};

const USER_COLUMNS: &str = "id, name, email, created_at, updated_at";

/// Get user by ID
pub async fn get_by_id(conn: &mut PgConnection, id: i64) -> AppResult<User> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
}

/// Get several users at once, in id order
pub async fn get_many(conn: &mut PgConnection, ids: &[i64]) -> AppResult<Vec<User>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = ANY($1) ORDER BY id",
        USER_COLUMNS
    ))
    .bind(ids)
    .fetch_all(conn)
    .await?;

    Ok(users)
}

/// Get login data by email (case-insensitive)
pub async fn get_credentials_by_email(
    conn: &mut PgConnection,
    email: &str,
) -> AppResult<Option<UserCredentials>> {
    let credentials = sqlx::query_as::<_, UserCredentials>(
        "SELECT id, email, password FROM users WHERE LOWER(email) = LOWER($1) AND deleted_at IS NULL",
    )
    .bind(email)
    .fetch_optional(conn)
    .await?;

    Ok(credentials)
}

/// Check if email already exists
pub async fn email_exists(conn: &mut PgConnection, email: &str) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1) AND deleted_at IS NULL)",
    )
    .bind(email)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

/// Exact-match search on name and email
pub async fn search(conn: &mut PgConnection, query: &UserQuery) -> AppResult<Vec<User>> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {} FROM users WHERE deleted_at IS NULL",
        USER_COLUMNS
    ));

    if let Some(ref name) = query.name {
        builder.push(" AND name = ").push_bind(name);
    }
    if let Some(ref email) = query.email {
        builder.push(" AND email = ").push_bind(email);
    }
    builder.push(" ORDER BY id");

    let users = builder.build_query_as::<User>().fetch_all(conn).await?;
    Ok(users)
}

/// Create a new user
pub async fn create(conn: &mut PgConnection, user: &NewUser) -> AppResult<User> {
    let created = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (name, email, password) VALUES ($1, $2, $3) RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::Conflict("Email already exists".to_string())
        }
        other => AppError::Database(other),
    })?;

    Ok(created)
}

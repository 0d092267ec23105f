//! User management service

use std::sync::Arc;

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::user::{CreateUser, NewUser, User, UserQuery},
    repository::EntityStore,
    services::auth::hash_password,
};

#[derive(Clone)]
pub struct UsersService {
    store: Arc<dyn EntityStore>,
}

impl UsersService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Search users by exact name and email
    pub async fn search_users(&self, query: &UserQuery) -> AppResult<Vec<User>> {
        let mut tx = self.store.begin().await?;
        tx.list_users(query).await
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i64) -> AppResult<User> {
        let mut tx = self.store.begin().await?;
        tx.find_user(id).await
    }

    /// Create a new user
    pub async fn create_user(&self, user: CreateUser) -> AppResult<User> {
        user.validate()?;

        let mut tx = self.store.begin().await?;
        if tx.email_exists(&user.email).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let created = tx
            .insert_user(&NewUser {
                name: user.name,
                email: user.email,
                password_hash: hash_password(&user.password)?,
            })
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = created.id, "User created");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    fn input(name: &str, email: &str) -> CreateUser {
        CreateUser {
            name: name.to_string(),
            email: email.to_string(),
            password: "passw0rd".to_string(),
        }
    }

    #[tokio::test]
    async fn email_must_be_unique() {
        let users = UsersService::new(Arc::new(MemoryStore::new()));

        users.create_user(input("ann", "ann@example.org")).await.unwrap();
        let err = users.create_user(input("ann2", "ANN@example.org")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn search_matches_exactly_and_combines_filters() {
        let users = UsersService::new(Arc::new(MemoryStore::new()));
        let ann = users.create_user(input("ann", "ann@example.org")).await.unwrap();
        users.create_user(input("bob", "bob@example.org")).await.unwrap();

        let query = UserQuery {
            name: Some("ann".to_string()),
            email: Some("ann@example.org".to_string()),
        };
        assert_eq!(users.search_users(&query).await.unwrap(), vec![ann]);

        let query = UserQuery {
            name: Some("an".to_string()),
            email: None,
        };
        assert!(users.search_users(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_storage() {
        let users = UsersService::new(Arc::new(MemoryStore::new()));
        let err = users.create_user(input("", "ann@example.org")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

//! Business logic services

pub mod auth;
pub mod borrowing;
pub mod catalog;
pub mod users;

use std::sync::Arc;

use crate::{
    config::{AuthConfig, LoansConfig},
    error::AppResult,
    repository::EntityStore,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub users: users::UsersService,
    pub catalog: catalog::CatalogService,
    pub borrowing: borrowing::BorrowingEngine,
    store: Arc<dyn EntityStore>,
}

impl Services {
    /// Create all services on top of the given store
    pub fn new(store: Arc<dyn EntityStore>, auth_config: AuthConfig, loans_config: LoansConfig) -> Self {
        let borrowing = borrowing::BorrowingEngine::new(store.clone(), loans_config.period_months);
        Self {
            auth: auth::AuthService::new(store.clone(), auth_config),
            users: users::UsersService::new(store.clone()),
            catalog: catalog::CatalogService::new(store.clone(), borrowing.clone()),
            borrowing,
            store,
        }
    }

    /// Check that the backing store answers
    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }
}

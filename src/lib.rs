//! Booklend server
//!
//! A small library catalog: books, users, and a borrow ledger kept in step
//! with the borrower set of every book, exposed as a REST JSON API.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

impl AppState {
    /// Wire services on top of a store
    pub fn new(config: AppConfig, store: Arc<dyn repository::EntityStore>) -> Self {
        let services = services::Services::new(store, config.auth.clone(), config.loans.clone());
        Self {
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }
}

//! Authentication service: login and token refresh

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::UserClaims,
    repository::EntityStore,
};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Check a password against a stored Argon2 hash
pub fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn EntityStore>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(store: Arc<dyn EntityStore>, config: AuthConfig) -> Self {
        Self { store, config }
    }

    /// Authenticate by email and password. Returns the token and its expiry.
    pub async fn login(&self, email: &str, password: &str) -> AppResult<(String, DateTime<Utc>)> {
        let mut tx = self.store.begin().await?;
        let credentials = tx
            .find_credentials_by_email(email)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid username or password".to_string()))?;

        if !verify_password(&credentials.password, password)? {
            tracing::warn!(user_id = credentials.id, "Login refused: wrong password");
            return Err(AppError::Authentication("Invalid username or password".to_string()));
        }

        let now = Utc::now().timestamp();
        let claims = UserClaims {
            sub: credentials.email,
            user_id: credentials.id,
            exp: now + self.expiration_secs(),
            orig_iat: now,
        };

        tracing::info!(user_id = claims.user_id, "User logged in");
        self.sign(&claims)
    }

    /// Issue a fresh token for a still valid one, as long as the refresh
    /// window counted from the first login has not closed
    pub async fn refresh(&self, claims: &UserClaims) -> AppResult<(String, DateTime<Utc>)> {
        let now = Utc::now().timestamp();
        let max_refresh = self.config.jwt_max_refresh_hours as i64 * 3600;
        if now > claims.orig_iat + max_refresh {
            return Err(AppError::Authentication("Token is too old to refresh".to_string()));
        }

        // The account may have been removed since the token was issued
        let mut tx = self.store.begin().await?;
        tx.find_user(claims.user_id).await.map_err(|e| match e {
            AppError::NotFound(_) => AppError::Authentication("Unknown user".to_string()),
            other => other,
        })?;

        let refreshed = UserClaims {
            exp: now + self.expiration_secs(),
            ..claims.clone()
        };
        self.sign(&refreshed)
    }

    /// Decode and validate a bearer token
    pub fn verify_token(&self, token: &str) -> AppResult<UserClaims> {
        UserClaims::from_token(token, &self.config.jwt_secret)
            .map_err(|_| AppError::Authentication("Invalid or expired token".to_string()))
    }

    fn expiration_secs(&self) -> i64 {
        self.config.jwt_expiration_hours as i64 * 3600
    }

    fn sign(&self, claims: &UserClaims) -> AppResult<(String, DateTime<Utc>)> {
        let token = claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;
        let expire = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?;
        Ok((token, expire))
    }
}

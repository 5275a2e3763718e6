use std::sync::Arc;

use anyhow::anyhow;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::user_repo::{CreateUserError, User, UserRepository, user_repository_capsule};

pub fn auth_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn AuthService> {
    let user_repo = Arc::clone(get.as_ref(user_repository_capsule));
    Arc::new(AuthServiceImpl { user_repo })
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn register(&self, email: &str, password: &str) -> Result<User, RegisterError>;
    async fn login(&self, email: &str, password: &str) -> Result<User, LoginError>;
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("empty email")]
    EmptyEmail,
    #[error("empty password")]
    EmptyPassword,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum LoginError {
    /// Covers both an unknown email and a wrong password.
    #[error("wrong email or password")]
    WrongCredentials,
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

/// Hashes `password` with Argon2id and a random salt, as a PHC string.
///
/// # Errors
/// Returns [`Err`] if hashing fails.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// # Errors
/// Returns [`Err`] if `hash` is not a valid PHC string.
pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|err| anyhow!("failed to parse password hash: {err}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

struct AuthServiceImpl {
    user_repo: Arc<dyn UserRepository>,
}

#[async_trait]
impl AuthService for AuthServiceImpl {
    #[instrument(skip(self, password))]
    async fn register(&self, email: &str, password: &str) -> Result<User, RegisterError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(RegisterError::EmptyEmail);
        }
        if password.is_empty() {
            return Err(RegisterError::EmptyPassword);
        }

        // NOTE: checked up front so a duplicate does not pay for hashing;
        // create_user still enforces uniqueness
        let existing = self
            .user_repo
            .find_by_email(email)
            .await
            .map_err(RegisterError::Internal)?;
        if existing.is_some() {
            warn!("Registration rejected: email already registered");
            return Err(RegisterError::DuplicateEmail);
        }

        let password_hash = hash_password(password).map_err(RegisterError::Internal)?;
        match self.user_repo.create_user(email, password_hash).await {
            Ok(user) => {
                info!(user_id = %user.id, "Registered new user");
                Ok(user)
            }
            Err(CreateUserError::DuplicateEmail) => Err(RegisterError::DuplicateEmail),
            Err(CreateUserError::Internal(err)) => Err(RegisterError::Internal(err)),
        }
    }

    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<User, LoginError> {
        let user = self
            .user_repo
            .find_by_email(email.trim())
            .await
            .map_err(LoginError::Internal)?;

        let Some(user) = user else {
            warn!("Login failed: user not found");
            return Err(LoginError::WrongCredentials);
        };

        let verified = verify_password(password, &user.password_hash).map_err(|err| {
            error!(?err, user_id = %user.id, "Stored password hash is unreadable");
            LoginError::Internal(err)
        })?;
        if !verified {
            warn!(user_id = %user.id, "Login failed: wrong password");
            return Err(LoginError::WrongCredentials);
        }

        info!(user_id = %user.id, "User authenticated");
        Ok(user)
    }
}

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

pub fn user_repository_capsule(_: CapsuleHandle) -> Arc<dyn UserRepository> {
    Arc::new(InMemoryUserRepository::default())
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Creates a user, rejecting an email that is already registered.
    async fn create_user(&self, email: &str, password_hash: String)
    -> Result<User, CreateUserError>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_id(&self, id: UserId) -> anyhow::Result<Option<User>>;
}

#[derive(Debug, Error)]
pub enum CreateUserError {
    #[error("email is already registered")]
    DuplicateEmail,
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(Uuid);

impl UserId {
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// PHC string of the Argon2id hash.
    pub password_hash: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct UserTables {
    users: HashMap<UserId, User>,
    ids_by_email: HashMap<String, UserId>,
}

/// Process-lifetime user store. Users are never deleted.
#[derive(Default)]
pub struct InMemoryUserRepository {
    tables: RwLock<UserTables>,
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    #[instrument(skip(self, password_hash))]
    async fn create_user(
        &self,
        email: &str,
        password_hash: String,
    ) -> Result<User, CreateUserError> {
        let mut tables = self.tables.write();
        if tables.ids_by_email.contains_key(email) {
            return Err(CreateUserError::DuplicateEmail);
        }

        let user = User {
            id: UserId::new_random(),
            email: email.to_owned(),
            password_hash,
        };
        tables.ids_by_email.insert(user.email.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let tables = self.tables.read();
        Ok(tables
            .ids_by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: UserId) -> anyhow::Result<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }
}

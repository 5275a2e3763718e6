use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{info, instrument};

use crate::{config::seed_links_capsule, user_repo::UserId};

pub fn link_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkRepository> {
    let repo = if *get.as_ref(seed_links_capsule) {
        InMemoryLinkRepository::with_demo_links()
    } else {
        InMemoryLinkRepository::default()
    };
    Arc::new(repo)
}

#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn retrieve_link(&self, code: &ShortCode) -> anyhow::Result<Option<ShortLink>>;

    /// Finds the code of a link owned by `owner` that points at `target_url`.
    async fn find_code_for_url(
        &self,
        owner: UserId,
        target_url: &str,
    ) -> anyhow::Result<Option<ShortCode>>;

    /// All links, ordered by code.
    async fn list_links(&self) -> anyhow::Result<Vec<ShortLink>>;

    /// Saves the [`ShortLink`] unless its code is already in use.
    async fn insert_link(&self, link: ShortLink) -> Result<ShortLink, SaveLinkError>;

    /// Returns the updated link, or `None` if the code is unknown.
    async fn update_target(
        &self,
        code: &ShortCode,
        target_url: &str,
    ) -> anyhow::Result<Option<ShortLink>>;

    /// Returns the removed link, or `None` if the code is unknown.
    async fn delete_link(&self, code: &ShortCode) -> anyhow::Result<Option<ShortLink>>;
}

#[derive(Debug, Error)]
pub enum SaveLinkError {
    #[error("short code is already taken")]
    CodeTaken(ShortLink),
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortLink {
    pub code: ShortCode,
    pub target_url: String,
    /// `None` only for links seeded at startup.
    pub owner: Option<UserId>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code is empty")]
    Empty,
    #[error("short code is {actual} characters long; at most {max} are allowed")]
    TooLong { max: usize, actual: usize },
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    pub const MAX_LEN: usize = 32;
    pub const GENERATED_LEN: usize = 6;

    /// # Errors
    /// Returns [`Err`] if `code` is empty, too long, or not ASCII alphanumeric.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        if code.is_empty() {
            return Err(ShortCodeValidationError::Empty);
        }

        let actual = code.chars().count();
        if actual > Self::MAX_LEN {
            return Err(ShortCodeValidationError::TooLong {
                max: Self::MAX_LEN,
                actual,
            });
        }

        let invalid_chars: String = code
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric())
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        Ok(Self(code))
    }

    /// A fresh code of [`Self::GENERATED_LEN`] lowercase hex characters.
    ///
    /// Uniqueness is not checked here; see [`LinkRepository::insert_link`].
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0; Self::GENERATED_LEN / 2];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-lifetime link store. Everything is lost on restart.
#[derive(Default)]
pub struct InMemoryLinkRepository {
    links: RwLock<BTreeMap<ShortCode, ShortLink>>,
}

impl InMemoryLinkRepository {
    #[must_use]
    pub fn with_demo_links() -> Self {
        const DEMO_LINKS: [(&str, &str); 2] = [
            ("b2xVn2", "http://www.lighthouselabs.ca"),
            ("9sm5xK", "http://www.google.com"),
        ];

        let links = DEMO_LINKS
            .into_iter()
            .map(|(code, target_url)| {
                let code = ShortCode(code.to_owned());
                let link = ShortLink {
                    code: code.clone(),
                    target_url: target_url.to_owned(),
                    owner: None,
                };
                (code, link)
            })
            .collect();
        info!("Seeded demo links");

        Self {
            links: RwLock::new(links),
        }
    }
}

#[async_trait]
impl LinkRepository for InMemoryLinkRepository {
    #[instrument(skip(self))]
    async fn retrieve_link(&self, code: &ShortCode) -> anyhow::Result<Option<ShortLink>> {
        Ok(self.links.read().get(code).cloned())
    }

    #[instrument(skip(self))]
    async fn find_code_for_url(
        &self,
        owner: UserId,
        target_url: &str,
    ) -> anyhow::Result<Option<ShortCode>> {
        Ok(self
            .links
            .read()
            .values()
            .find(|link| link.owner == Some(owner) && link.target_url == target_url)
            .map(|link| link.code.clone()))
    }

    #[instrument(skip(self))]
    async fn list_links(&self) -> anyhow::Result<Vec<ShortLink>> {
        Ok(self.links.read().values().cloned().collect())
    }

    #[instrument(skip(self))]
    async fn insert_link(&self, link: ShortLink) -> Result<ShortLink, SaveLinkError> {
        let mut links = self.links.write();
        if let Some(existing) = links.get(&link.code) {
            return Err(SaveLinkError::CodeTaken(existing.clone()));
        }
        links.insert(link.code.clone(), link.clone());
        Ok(link)
    }

    #[instrument(skip(self))]
    async fn update_target(
        &self,
        code: &ShortCode,
        target_url: &str,
    ) -> anyhow::Result<Option<ShortLink>> {
        Ok(self.links.write().get_mut(code).map(|link| {
            target_url.clone_into(&mut link.target_url);
            link.clone()
        }))
    }

    #[instrument(skip(self))]
    async fn delete_link(&self, code: &ShortCode) -> anyhow::Result<Option<ShortLink>> {
        Ok(self.links.write().remove(code))
    }
}

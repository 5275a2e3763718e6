use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::{
    link_repo::{LinkRepository, SaveLinkError, ShortCode, ShortLink, link_repository_capsule},
    user_repo::UserId,
};

pub fn link_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkService> {
    let link_repo = Arc::clone(get.as_ref(link_repository_capsule));
    Arc::new(LinkServiceImpl { link_repo })
}

#[async_trait]
pub trait LinkService: Send + Sync {
    async fn get_link(&self, code: &str) -> Result<ShortLink, GetLinkError>;
    async fn list_links(&self) -> anyhow::Result<Vec<ShortLink>>;
    async fn create_link(
        &self,
        owner: UserId,
        long_url: &str,
    ) -> Result<(ShortLink, LinkCreationStatus), CreateLinkError>;
    async fn update_link(&self, code: &str, long_url: &str) -> Result<ShortLink, UpdateLinkError>;
    async fn delete_link(&self, code: &str) -> Result<ShortLink, DeleteLinkError>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum LinkCreationStatus {
    NewlyCreated,
    /// The owner already had a link to the same URL; that link is returned.
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum GetLinkError {
    #[error("short URL not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

/// Why a submitted long URL was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LongUrlError {
    #[error("empty url")]
    Empty,
    /// Control characters cannot be sent back in a `Location` header.
    #[error("invalid url")]
    ControlCharacters,
}

#[derive(Debug, Error)]
pub enum CreateLinkError {
    #[error(transparent)]
    InvalidUrl(#[from] LongUrlError),
    #[error("internal error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum UpdateLinkError {
    #[error(transparent)]
    InvalidUrl(#[from] LongUrlError),
    #[error("short URL not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DeleteLinkError {
    #[error("short URL not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

/// Prefixes `http://` onto anything that does not already name an http(s)
/// scheme. Beyond rejecting blank input and control characters, no other
/// validation is done.
///
/// # Errors
/// Returns [`Err`] if `long_url` is blank or contains a control character.
pub fn normalize_long_url(long_url: &str) -> Result<String, LongUrlError> {
    let long_url = long_url.trim();
    if long_url.is_empty() {
        return Err(LongUrlError::Empty);
    }
    if long_url.chars().any(char::is_control) {
        return Err(LongUrlError::ControlCharacters);
    }

    let lowercase = long_url.to_ascii_lowercase();
    if lowercase.starts_with("http://") || lowercase.starts_with("https://") {
        Ok(long_url.to_owned())
    } else {
        Ok(format!("http://{long_url}"))
    }
}

struct LinkServiceImpl {
    link_repo: Arc<dyn LinkRepository>,
}

#[async_trait]
impl LinkService for LinkServiceImpl {
    #[instrument(skip(self))]
    async fn get_link(&self, code: &str) -> Result<ShortLink, GetLinkError> {
        // NOTE: a code we could never have stored is simply unknown
        let Ok(code) = ShortCode::new(code.to_owned()) else {
            return Err(GetLinkError::NotFound);
        };
        match self.link_repo.retrieve_link(&code).await {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(GetLinkError::NotFound),
            Err(err) => Err(GetLinkError::Internal(err)),
        }
    }

    #[instrument(skip(self))]
    async fn list_links(&self) -> anyhow::Result<Vec<ShortLink>> {
        self.link_repo.list_links().await
    }

    #[instrument(skip(self))]
    async fn create_link(
        &self,
        owner: UserId,
        long_url: &str,
    ) -> Result<(ShortLink, LinkCreationStatus), CreateLinkError> {
        const INSERT_ATTEMPTS: usize = 3;

        let target_url = normalize_long_url(long_url)?;

        let existing_code = self
            .link_repo
            .find_code_for_url(owner, &target_url)
            .await
            .map_err(CreateLinkError::Internal)?;
        if let Some(code) = existing_code {
            info!(%code, "Owner already has a link to this URL");
            return Ok((
                ShortLink {
                    code,
                    target_url,
                    owner: Some(owner),
                },
                LinkCreationStatus::AlreadyExists,
            ));
        }

        for _ in 0..INSERT_ATTEMPTS {
            let to_save = ShortLink {
                code: ShortCode::generate(),
                target_url: target_url.clone(),
                owner: Some(owner),
            };

            match self.link_repo.insert_link(to_save).await {
                Ok(link) => {
                    info!(code = %link.code, "Created short link");
                    return Ok((link, LinkCreationStatus::NewlyCreated));
                }
                Err(SaveLinkError::CodeTaken(existing)) => {
                    warn!(code = %existing.code, "Generated short code that was already taken");
                }
                Err(SaveLinkError::Internal(err)) => {
                    error!(?err, "Encountered internal error while saving link");
                    return Err(CreateLinkError::Internal(err));
                }
            }
        }

        Err(CreateLinkError::Internal(anyhow!(
            "Exhausted short code generation attempts"
        )))
    }

    #[instrument(skip(self))]
    async fn update_link(&self, code: &str, long_url: &str) -> Result<ShortLink, UpdateLinkError> {
        let Ok(code) = ShortCode::new(code.to_owned()) else {
            return Err(UpdateLinkError::NotFound);
        };
        let target_url = normalize_long_url(long_url)?;

        match self.link_repo.update_target(&code, &target_url).await {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(UpdateLinkError::NotFound),
            Err(err) => Err(UpdateLinkError::Internal(err)),
        }
    }

    #[instrument(skip(self))]
    async fn delete_link(&self, code: &str) -> Result<ShortLink, DeleteLinkError> {
        let Ok(code) = ShortCode::new(code.to_owned()) else {
            return Err(DeleteLinkError::NotFound);
        };

        match self.link_repo.delete_link(&code).await {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(DeleteLinkError::NotFound),
            Err(err) => Err(DeleteLinkError::Internal(err)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mockall::{mock, predicate::*};

    use crate::link_repo::InMemoryLinkRepository;

    use super::*;

    mock! {
        LinkRepository {}

        #[async_trait]
        impl LinkRepository for LinkRepository {
            async fn retrieve_link(&self, code: &ShortCode) -> anyhow::Result<Option<ShortLink>>;
            async fn find_code_for_url(&self, owner: UserId, target_url: &str) -> anyhow::Result<Option<ShortCode>>;
            async fn list_links(&self) -> anyhow::Result<Vec<ShortLink>>;
            async fn insert_link(&self, link: ShortLink) -> Result<ShortLink, SaveLinkError>;
            async fn update_target(&self, code: &ShortCode, target_url: &str) -> anyhow::Result<Option<ShortLink>>;
            async fn delete_link(&self, code: &ShortCode) -> anyhow::Result<Option<ShortLink>>;
        }
    }

    fn code(code: &str) -> ShortCode {
        ShortCode::new(code.to_owned()).unwrap()
    }

    fn in_memory_service() -> LinkServiceImpl {
        LinkServiceImpl {
            link_repo: Arc::new(InMemoryLinkRepository::default()),
        }
    }

    #[test]
    fn test_normalize_long_url() {
        assert_eq!(
            normalize_long_url("www.example.com").as_deref(),
            Ok("http://www.example.com")
        );
        assert_eq!(
            normalize_long_url("  https://example.com/a ").as_deref(),
            Ok("https://example.com/a")
        );
        assert_eq!(
            normalize_long_url("HTTP://EXAMPLE.COM").as_deref(),
            Ok("HTTP://EXAMPLE.COM")
        );
        assert_eq!(normalize_long_url("   "), Err(LongUrlError::Empty));
        assert_eq!(
            normalize_long_url("http://a.example/\nSet-Cookie: x=1"),
            Err(LongUrlError::ControlCharacters)
        );
        assert_eq!(
            normalize_long_url("http://a.example/caf\u{e9}").as_deref(),
            Ok("http://a.example/caf\u{e9}")
        );
    }

    #[tokio::test]
    async fn test_get_link_success() {
        let mut mock_repo = MockLinkRepository::new();
        let expected = ShortLink {
            code: code("abc123"),
            target_url: "http://example.com".to_owned(),
            owner: None,
        };

        let mock_return_value = Ok(Some(expected.clone()));
        mock_repo
            .expect_retrieve_link()
            .with(eq(code("abc123")))
            .once()
            .return_once(move |_| mock_return_value);

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
        };
        assert_eq!(service.get_link("abc123").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_get_link_invalid_code_is_not_found_without_lookup() {
        let service = LinkServiceImpl {
            link_repo: Arc::new(MockLinkRepository::new()),
        };
        let err = service.get_link("../etc").await.unwrap_err();
        assert!(matches!(err, GetLinkError::NotFound));
    }

    #[tokio::test]
    async fn test_get_link_db_error() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_retrieve_link()
            .once()
            .return_once(|_| Err(anyhow!("test error")));

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
        };
        let err = service.get_link("abc123").await.unwrap_err();
        assert!(matches!(err, GetLinkError::Internal(err) if err.to_string() == "test error"));
    }

    #[tokio::test]
    async fn test_create_link_newly_created() {
        let service = in_memory_service();
        let owner = UserId::new_random();

        let (link, status) = service.create_link(owner, "example.com").await.unwrap();

        assert_eq!(status, LinkCreationStatus::NewlyCreated);
        assert_eq!(link.target_url, "http://example.com");
        assert_eq!(link.owner, Some(owner));
        assert_eq!(link.code.as_str().len(), ShortCode::GENERATED_LEN);
        assert_eq!(service.get_link(link.code.as_str()).await.unwrap(), link);
    }

    #[tokio::test]
    async fn test_create_link_dedupes_per_owner() {
        let service = in_memory_service();
        let owner = UserId::new_random();
        let other = UserId::new_random();

        let (first, _) = service
            .create_link(owner, "http://example.com")
            .await
            .unwrap();
        let (again, status) = service
            .create_link(owner, "http://example.com")
            .await
            .unwrap();
        assert_eq!(status, LinkCreationStatus::AlreadyExists);
        assert_eq!(again.code, first.code);

        let (for_other, status) = service
            .create_link(other, "http://example.com")
            .await
            .unwrap();
        assert_eq!(status, LinkCreationStatus::NewlyCreated);
        assert_ne!(for_other.code, first.code);
        assert_eq!(service.list_links().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_link_empty_url() {
        let service = LinkServiceImpl {
            link_repo: Arc::new(MockLinkRepository::new()),
        };
        let err = service
            .create_link(UserId::new_random(), " ")
            .await
            .unwrap_err();
        assert!(matches!(err, CreateLinkError::InvalidUrl(LongUrlError::Empty)));
    }

    #[tokio::test]
    async fn test_create_link_retries_taken_codes() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_find_code_for_url()
            .once()
            .return_once(|_, _| Ok(None));

        let mut attempts = 0;
        mock_repo.expect_insert_link().times(2).returning(move |link| {
            attempts += 1;
            if attempts == 1 {
                Err(SaveLinkError::CodeTaken(link))
            } else {
                Ok(link)
            }
        });

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
        };
        let (_, status) = service
            .create_link(UserId::new_random(), "http://example.com")
            .await
            .unwrap();
        assert_eq!(status, LinkCreationStatus::NewlyCreated);
    }

    #[tokio::test]
    async fn test_create_link_gives_up_after_repeated_collisions() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_find_code_for_url()
            .once()
            .return_once(|_, _| Ok(None));
        mock_repo
            .expect_insert_link()
            .times(3)
            .returning(|link| Err(SaveLinkError::CodeTaken(link)));

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
        };
        let err = service
            .create_link(UserId::new_random(), "http://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, CreateLinkError::Internal(_)));
    }

    #[tokio::test]
    async fn test_update_link() {
        let service = in_memory_service();
        let (link, _) = service
            .create_link(UserId::new_random(), "http://old.example")
            .await
            .unwrap();

        let updated = service
            .update_link(link.code.as_str(), "new.example")
            .await
            .unwrap();
        assert_eq!(updated.target_url, "http://new.example");
        assert_eq!(updated.owner, link.owner);

        let err = service.update_link("ffffff0", "x.example").await.unwrap_err();
        assert!(matches!(err, UpdateLinkError::NotFound));
        let err = service.update_link(link.code.as_str(), "").await.unwrap_err();
        assert!(matches!(err, UpdateLinkError::InvalidUrl(LongUrlError::Empty)));
    }

    #[tokio::test]
    async fn test_delete_link_then_lookup_fails() {
        let service = in_memory_service();
        let (link, _) = service
            .create_link(UserId::new_random(), "http://example.com")
            .await
            .unwrap();

        service.delete_link(link.code.as_str()).await.unwrap();

        assert!(matches!(
            service.get_link(link.code.as_str()).await,
            Err(GetLinkError::NotFound)
        ));
        assert!(matches!(
            service.delete_link(link.code.as_str()).await,
            Err(DeleteLinkError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_link_db_error() {
        let mut mock_repo = MockLinkRepository::new();
        mock_repo
            .expect_delete_link()
            .with(eq(code("abc123")))
            .once()
            .return_once(|_| Err(anyhow!("test failure")));

        let service = LinkServiceImpl {
            link_repo: Arc::new(mock_repo),
        };
        let err = service.delete_link("abc123").await.unwrap_err();
        assert!(matches!(err, DeleteLinkError::Internal(_)));
    }
}

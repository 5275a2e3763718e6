//! Cookie-backed sessions.
//!
//! The session cookie holds `<user id>.<mac>`, where the MAC is a keyed BLAKE3
//! hash of the user id. Nothing is stored server side, so logging out only
//! clears the cookie.

use std::fmt;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rearch::Container;
use tracing::{instrument, warn};

use crate::{
    config::session_key_capsule,
    user_repo::{User, UserId, user_repository_capsule},
    web::HttpError,
};

pub const SESSION_COOKIE: &str = "session";

const KEY_DERIVATION_CONTEXT: &str = "tinyapp 2026-10-16 session cookie signing key";

#[derive(Clone)]
pub struct SessionKey([u8; blake3::KEY_LEN]);

impl SessionKey {
    #[must_use]
    pub const fn new(key: [u8; blake3::KEY_LEN]) -> Self {
        Self(key)
    }

    /// Derives a key from an operator-supplied secret of any length.
    #[must_use]
    pub fn from_secret(secret: &str) -> Self {
        Self(blake3::derive_key(KEY_DERIVATION_CONTEXT, secret.as_bytes()))
    }

    #[must_use]
    pub fn sign(&self, user_id: UserId) -> String {
        let user_id = user_id.to_string();
        let mac = blake3::keyed_hash(&self.0, user_id.as_bytes());
        format!("{user_id}.{}", mac.to_hex())
    }

    /// Returns the user id carried by a cookie value produced by [`Self::sign`].
    #[must_use]
    pub fn verify(&self, value: &str) -> Option<UserId> {
        let (user_id, mac) = value.split_once('.')?;
        let mac = blake3::Hash::from_hex(mac).ok()?;
        // NOTE: Hash equality is constant time
        if blake3::keyed_hash(&self.0, user_id.as_bytes()) != mac {
            return None;
        }
        user_id.parse().ok()
    }

    #[must_use]
    pub fn session_cookie(&self, user_id: UserId) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, self.sign(user_id)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Adds a freshly signed session cookie for `user_id` to the jar.
#[must_use]
pub fn start_session(container: &Container, jar: CookieJar, user_id: UserId) -> CookieJar {
    jar.add(container.read(session_key_capsule).session_cookie(user_id))
}

#[must_use]
pub fn end_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

/// The user named by a valid session cookie, if any.
#[derive(Debug)]
pub struct MaybeUser(pub Option<User>);

/// Like [`MaybeUser`], but rejects anonymous requests with `401`.
#[derive(Debug)]
pub struct RequireUser(pub User);

impl FromRequestParts<Container> for MaybeUser {
    type Rejection = HttpError;

    #[instrument(name = "Extracting session user", skip_all)]
    async fn from_request_parts(
        parts: &mut Parts,
        container: &Container,
    ) -> Result<Self, Self::Rejection> {
        let user_id = CookieJar::from_headers(&parts.headers)
            .get(SESSION_COOKIE)
            .and_then(|cookie| container.read(session_key_capsule).verify(cookie.value()));
        let Some(user_id) = user_id else {
            return Ok(Self(None));
        };

        let user = container
            .read(user_repository_capsule)
            .find_by_id(user_id)
            .await
            .map_err(|err| HttpError::internal(&err))?;
        if user.is_none() {
            warn!(%user_id, "Session cookie names an unknown user");
        }
        Ok(Self(user))
    }
}

impl FromRequestParts<Container> for RequireUser {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        container: &Container,
    ) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, container).await? {
            MaybeUser(Some(user)) => Ok(Self(user)),
            MaybeUser(None) => Err(HttpError::unauthorized()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_value_verifies_under_same_key() {
        let key = SessionKey::from_secret("hunter2");
        let user_id = UserId::new_random();
        assert_eq!(key.verify(&key.sign(user_id)), Some(user_id));
    }

    #[test]
    fn test_signed_value_is_rejected_under_other_key() {
        let user_id = UserId::new_random();
        let signed = SessionKey::from_secret("one").sign(user_id);
        assert_eq!(SessionKey::from_secret("two").verify(&signed), None);
    }

    #[test]
    fn test_tampered_values_are_rejected() {
        let key = SessionKey::new([7; blake3::KEY_LEN]);
        let signed = key.sign(UserId::new_random());
        let (_, mac) = signed.split_once('.').unwrap();

        let forged = format!("{}.{mac}", UserId::new_random());
        assert_eq!(key.verify(&forged), None);
        assert_eq!(key.verify("plain-user-id"), None);
        assert_eq!(key.verify(""), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let key = SessionKey::new([1; blake3::KEY_LEN]);
        let cookie = key.session_cookie(UserId::new_random());
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}

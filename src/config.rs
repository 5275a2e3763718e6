use std::{
    env::{self, VarError},
    str::FromStr,
};

use rand::Rng;
use rearch::{CapsuleHandle, Container};
use tracing::{info, instrument, warn};

use crate::session::SessionKey;

/// What `GET /u/{id}` does for a code that is not in the link store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnknownCodeBehavior {
    /// Respond with `404 Not Found`.
    NotFound,
    /// Redirect back to the link listing.
    RedirectToList,
}

impl FromStr for UnknownCodeBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "not-found" | "404" => Ok(Self::NotFound),
            "list" | "redirect" => Ok(Self::RedirectToList),
            other => Err(format!(
                "{other} is not supported; use either `not-found` or `list`"
            )),
        }
    }
}

/// Builds the container and eagerly reads every environment-backed capsule
/// so that misconfiguration fails at startup rather than on first request.
///
/// # Panics
/// Panics when any of the environment variables is invalid.
#[must_use]
#[instrument]
pub fn init_container() -> Container {
    info!("Initializing container");
    let container = Container::new();

    let (addr, unknown_code, seed_links) =
        container.read((addr_capsule, unknown_code_capsule, seed_links_capsule));
    container.read(session_key_capsule);

    info!(addr, ?unknown_code, seed_links, "Container initialized");
    container
}

/// Reads `name`, returning `None` (and logging the default) when it is unset.
///
/// # Panics
/// Panics when the variable is not valid unicode.
fn read_env_var(name: &str, default: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            info!(value, "{name} environment variable set");
            Some(value)
        }
        Err(VarError::NotPresent) => {
            warn!(default, "{name} environment variable not set; defaulting to {default}");
            None
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is invalid: {}", actual.display());
        }
    }
}

fn parse_env_var<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = read_env_var(name, default).unwrap_or_else(|| default.to_owned());
    raw.parse()
        .unwrap_or_else(|err| panic!("{name} environment variable is invalid: {err}"))
}

/// # Panics
/// Panics when the `PORT` environment variable is not a valid port.
#[must_use]
pub fn port_capsule(_: CapsuleHandle) -> u16 {
    parse_env_var("PORT", "8080")
}

/// # Panics
/// Panics when the `PORT` environment variable is not a valid port.
pub fn addr_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> String {
    let port = *get.as_ref(port_capsule);
    format!("0.0.0.0:{port}")
}

/// # Panics
/// Panics when the `UNKNOWN_CODE` environment variable is invalid.
#[must_use]
pub fn unknown_code_capsule(_: CapsuleHandle) -> UnknownCodeBehavior {
    parse_env_var("UNKNOWN_CODE", "not-found")
}

/// # Panics
/// Panics when the `SEED_LINKS` environment variable is not a boolean.
#[must_use]
pub fn seed_links_capsule(_: CapsuleHandle) -> bool {
    parse_env_var("SEED_LINKS", "true")
}

/// Key used to sign session cookies.
///
/// Derived from `SESSION_SECRET` when set; otherwise random, so that every
/// session is invalidated when the process restarts (as is all other state).
pub fn session_key_capsule(_: CapsuleHandle) -> SessionKey {
    const ENV_VAR_NAME: &str = "SESSION_SECRET";
    match env::var(ENV_VAR_NAME) {
        Ok(secret) if !secret.is_empty() => {
            info!("{ENV_VAR_NAME} environment variable set");
            SessionKey::from_secret(&secret)
        }
        _ => {
            warn!("{ENV_VAR_NAME} environment variable not set; using a random session key");
            let mut key = [0; blake3::KEY_LEN];
            rand::rng().fill_bytes(&mut key);
            SessionKey::new(key)
        }
    }
}

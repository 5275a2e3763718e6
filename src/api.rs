use std::fmt;

use serde::Deserialize;

/// Missing fields deserialize as empty so that the services, not the
/// extractor, decide how to reject them.
#[derive(Deserialize)]
pub struct CredentialsForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for CredentialsForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsForm")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkForm {
    #[serde(default, rename = "longURL")]
    pub long_url: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLinkForm {
    #[serde(default, rename = "newURL", alias = "longURL")]
    pub new_url: String,
}


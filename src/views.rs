use askama::Template;

use crate::{link_repo::ShortLink, user_repo::UserId};

/// One row of the link listing.
pub struct LinkRow {
    pub code: String,
    pub target_url: String,
    /// Whether the viewer owns this link.
    pub owned: bool,
}

impl LinkRow {
    #[must_use]
    pub fn new(link: ShortLink, viewer: Option<UserId>) -> Self {
        Self {
            owned: viewer.is_some() && link.owner == viewer,
            code: link.code.into_inner(),
            target_url: link.target_url,
        }
    }
}

#[derive(Template)]
#[template(path = "urls_index.html")]
pub struct UrlsIndexTemplate {
    pub user_email: Option<String>,
    pub links: Vec<LinkRow>,
}

#[derive(Template)]
#[template(path = "urls_new.html")]
pub struct UrlsNewTemplate {
    pub user_email: Option<String>,
}

#[derive(Template)]
#[template(path = "urls_show.html")]
pub struct UrlsShowTemplate {
    pub user_email: Option<String>,
    pub code: String,
    pub target_url: String,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub user_email: Option<String>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub user_email: Option<String>,
}

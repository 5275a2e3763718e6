use askama::Template;
use axum::{
    Form, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing,
};
use axum_extra::extract::CookieJar;
use rearch::Container;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    api::{CreateLinkForm, CredentialsForm, UpdateLinkForm},
    auth_service::{LoginError, RegisterError, auth_service_capsule},
    config::{UnknownCodeBehavior, unknown_code_capsule},
    link_service::{
        CreateLinkError, DeleteLinkError, GetLinkError, LinkCreationStatus, UpdateLinkError,
        link_service_capsule,
    },
    session::{MaybeUser, RequireUser, end_session, start_session},
    views::{
        LinkRow, LoginTemplate, RegisterTemplate, UrlsIndexTemplate, UrlsNewTemplate,
        UrlsShowTemplate,
    },
};

pub fn router(container: Container) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/urls", routing::get(list_urls).post(create_url))
        .route("/urls/new", routing::get(new_url_form))
        .route("/urls/{id}", routing::get(show_url).post(update_url))
        .route("/urls/{id}/delete", routing::post(delete_url))
        .route("/u/{id}", routing::get(follow_short_url))
        .route("/register", routing::get(register_form).post(register))
        .route("/login", routing::get(login_form).post(login))
        .route("/logout", routing::post(logout))
        .with_state(container)
}

/// A status code with a plain-text body.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "login required")
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "short URL not found")
    }

    /// Logs `err` under a fresh error id and hides it from the client.
    #[must_use]
    pub fn internal(err: &anyhow::Error) -> Self {
        let error_id = Uuid::new_v4();
        error!(%error_id, ?err, "Encountered an error during a request");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error (error id: {error_id})"),
        )
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

fn render(template: &impl Template) -> Result<Html<String>, HttpError> {
    template
        .render()
        .map(Html)
        .map_err(|err| HttpError::internal(&err.into()))
}

/// `302 Found`, which [`Redirect`] does not offer.
fn found(location: &str) -> Result<Response, HttpError> {
    let location = HeaderValue::from_str(location)
        .map_err(|err| HttpError::internal(&anyhow::Error::new(err).context(location.to_owned())))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

async fn root() -> Redirect {
    Redirect::to("/urls")
}

#[instrument(skip(container))]
async fn list_urls(
    State(container): State<Container>,
    MaybeUser(user): MaybeUser,
) -> Result<Html<String>, HttpError> {
    let links = container
        .read(link_service_capsule)
        .list_links()
        .await
        .map_err(|err| HttpError::internal(&err))?;

    let viewer = user.as_ref().map(|user| user.id);
    render(&UrlsIndexTemplate {
        user_email: user.map(|user| user.email),
        links: links
            .into_iter()
            .map(|link| LinkRow::new(link, viewer))
            .collect(),
    })
}

#[instrument]
async fn new_url_form(RequireUser(user): RequireUser) -> Result<Html<String>, HttpError> {
    render(&UrlsNewTemplate {
        user_email: Some(user.email),
    })
}

#[instrument(skip(container))]
async fn show_url(
    State(container): State<Container>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> Result<Html<String>, HttpError> {
    let link = container
        .read(link_service_capsule)
        .get_link(&id)
        .await
        .map_err(|error| match error {
            GetLinkError::NotFound => HttpError::not_found(),
            GetLinkError::Internal(err) => HttpError::internal(&err),
        })?;

    render(&UrlsShowTemplate {
        user_email: user.map(|user| user.email),
        code: link.code.into_inner(),
        target_url: link.target_url,
    })
}

#[instrument(skip(container))]
async fn create_url(
    State(container): State<Container>,
    RequireUser(user): RequireUser,
    Form(CreateLinkForm { long_url }): Form<CreateLinkForm>,
) -> Result<Redirect, HttpError> {
    let (link, status) = container
        .read(link_service_capsule)
        .create_link(user.id, &long_url)
        .await
        .map_err(|error| match error {
            CreateLinkError::InvalidUrl(_) => {
                HttpError::new(StatusCode::BAD_REQUEST, error.to_string())
            }
            CreateLinkError::Internal(err) => HttpError::internal(&err),
        })?;

    if status == LinkCreationStatus::AlreadyExists {
        info!(code = %link.code, "Redirecting to existing short URL");
    }
    Ok(Redirect::to(&format!("/urls/{}", link.code)))
}

#[instrument(skip(container))]
async fn update_url(
    State(container): State<Container>,
    RequireUser(_): RequireUser,
    Path(id): Path<String>,
    Form(UpdateLinkForm { new_url }): Form<UpdateLinkForm>,
) -> Result<Redirect, HttpError> {
    container
        .read(link_service_capsule)
        .update_link(&id, &new_url)
        .await
        .map_err(|error| match error {
            UpdateLinkError::InvalidUrl(_) => {
                HttpError::new(StatusCode::BAD_REQUEST, error.to_string())
            }
            UpdateLinkError::NotFound => HttpError::not_found(),
            UpdateLinkError::Internal(err) => HttpError::internal(&err),
        })?;

    Ok(Redirect::to("/urls"))
}

#[instrument(skip(container))]
async fn delete_url(
    State(container): State<Container>,
    RequireUser(_): RequireUser,
    Path(id): Path<String>,
) -> Result<Redirect, HttpError> {
    container
        .read(link_service_capsule)
        .delete_link(&id)
        .await
        .map_err(|error| match error {
            DeleteLinkError::NotFound => HttpError::not_found(),
            DeleteLinkError::Internal(err) => HttpError::internal(&err),
        })?;

    Ok(Redirect::to("/urls"))
}

#[instrument(skip(container))]
async fn follow_short_url(
    State(container): State<Container>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    match container.read(link_service_capsule).get_link(&id).await {
        Ok(link) => found(&link.target_url),
        Err(GetLinkError::NotFound) => {
            warn!(short_code = %id, "Short URL not found");
            unknown_code_response(container.read(unknown_code_capsule))
        }
        Err(GetLinkError::Internal(err)) => Err(HttpError::internal(&err)),
    }
}

fn unknown_code_response(behavior: UnknownCodeBehavior) -> Result<Response, HttpError> {
    match behavior {
        UnknownCodeBehavior::NotFound => Err(HttpError::not_found()),
        UnknownCodeBehavior::RedirectToList => Ok(Redirect::to("/urls").into_response()),
    }
}

#[instrument]
async fn register_form(MaybeUser(user): MaybeUser) -> Result<Response, HttpError> {
    if user.is_some() {
        return Ok(Redirect::to("/urls").into_response());
    }
    render(&RegisterTemplate { user_email: None }).map(IntoResponse::into_response)
}

#[instrument]
async fn login_form(MaybeUser(user): MaybeUser) -> Result<Response, HttpError> {
    if user.is_some() {
        return Ok(Redirect::to("/urls").into_response());
    }
    render(&LoginTemplate { user_email: None }).map(IntoResponse::into_response)
}

#[instrument(skip(container, jar))]
async fn register(
    State(container): State<Container>,
    jar: CookieJar,
    Form(form): Form<CredentialsForm>,
) -> Result<(CookieJar, Redirect), HttpError> {
    let user = container
        .read(auth_service_capsule)
        .register(&form.email, &form.password)
        .await
        .map_err(|error| match error {
            RegisterError::EmptyEmail
            | RegisterError::EmptyPassword
            | RegisterError::DuplicateEmail => {
                info!(?error, "User submitted a bad registration");
                HttpError::new(StatusCode::BAD_REQUEST, error.to_string())
            }
            RegisterError::Internal(err) => HttpError::internal(&err),
        })?;

    Ok((
        start_session(&container, jar, user.id),
        Redirect::to("/urls"),
    ))
}

#[instrument(skip(container, jar))]
async fn login(
    State(container): State<Container>,
    jar: CookieJar,
    Form(form): Form<CredentialsForm>,
) -> Result<(CookieJar, Redirect), HttpError> {
    let user = container
        .read(auth_service_capsule)
        .login(&form.email, &form.password)
        .await
        .map_err(|error| match error {
            LoginError::WrongCredentials => {
                HttpError::new(StatusCode::FORBIDDEN, error.to_string())
            }
            LoginError::Internal(err) => HttpError::internal(&err),
        })?;

    Ok((
        start_session(&container, jar, user.id),
        Redirect::to("/urls"),
    ))
}

#[instrument(skip(jar))]
async fn logout(jar: CookieJar) -> (CookieJar, Redirect) {
    (end_session(jar), Redirect::to("/urls"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_code_not_found() {
        let response = unknown_code_response(UnknownCodeBehavior::NotFound)
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[test]
    fn test_unknown_code_redirects_to_list() {
        let response = unknown_code_response(UnknownCodeBehavior::RedirectToList).unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/urls");
    }
}

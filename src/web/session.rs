//! Session cookie handling and the authenticated-user extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Redirect;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;

use super::server::AppServer;
use crate::auth::{self, AuthUser, SESSION_COOKIE};
use crate::config::AuthConfig;
use crate::error::ActionError;

/// Cookie carrying a freshly issued session token.
pub fn session_cookie(token: String, config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.secure_cookie)
        .path("/")
        .build()
}

/// Cookie that clears the session on the client.
pub(crate) fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

pub(crate) fn session_token(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve(parts: &Parts, state: &AppServer) -> Result<AuthUser, ActionError> {
    let jar = CookieJar::from_headers(&parts.headers);
    let token = session_token(&jar).ok_or_else(ActionError::unauthenticated)?;
    auth::authenticate(state.db(), &state.config().auth, &token).map_err(|e| {
        debug!(error = %e, "Rejected session cookie");
        ActionError::from(e)
    })
}

/// JSON routes: a missing or stale session answers 401 with the error envelope.
impl FromRequestParts<AppServer> for AuthUser {
    type Rejection = ActionError;

    async fn from_request_parts(parts: &mut Parts, state: &AppServer) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
    }
}

/// Page routes: a missing or stale session redirects to the login page.
pub struct PageUser(pub AuthUser);

impl FromRequestParts<AppServer> for PageUser {
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, state: &AppServer) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .map(PageUser)
            .map_err(|_| Redirect::to("/login"))
    }
}

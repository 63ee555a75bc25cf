use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Key;

use super::cookies;
use super::error::BridgeError;
use super::state::BridgeState;
use crate::claims::UserInfo;
use crate::interceptor::{Flow, RequestContext};
use crate::types::SessionId;

/// Signed-in user behind the session cookie.
///
/// Use as an Axum extractor in route handlers. Returns `401 Unauthorized`
/// if the cookie is missing or nobody is signed in on it.
///
/// ```rust,ignore
/// async fn whoami(session: BridgedSession) -> impl IntoResponse {
///     format!("Hello, {}", session.user.username)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BridgedSession {
    pub session_id: SessionId,
    pub user: UserInfo,
}

impl FromRequestParts<BridgeState> for BridgedSession {
    type Rejection = BridgeError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &BridgeState,
    ) -> Result<Self, Self::Rejection> {
        let jar: PrivateCookieJar<Key> = PrivateCookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| BridgeError::Unauthenticated)?;

        let session_id = cookies::session_id(&jar, &state.settings.session_cookie_name)
            .ok_or(BridgeError::Unauthenticated)?;

        let user = state
            .bridge
            .identity()
            .current_user(&session_id)
            .await?
            .ok_or(BridgeError::Unauthenticated)?;

        Ok(Self { session_id, user })
    }
}

/// Runs the interceptor chain before the handler.
///
/// A session that expired during synchronization is signed out; the session
/// cookie is cleared and the client is redirected to the login path.
pub(super) async fn synchronize_session(
    State(state): State<BridgeState>,
    jar: PrivateCookieJar,
    request: Request,
    next: Next,
) -> Response {
    let session = cookies::session_id(&jar, &state.settings.session_cookie_name);
    let ctx = RequestContext::new(request.uri().path(), session);

    match state.interceptors.run(&ctx).await {
        Ok(Flow::Continue) => next.run(request).await,
        Ok(Flow::Redirect(to)) => {
            let clear = cookies::clear_session_cookie(&state.settings.session_cookie_name);
            (jar.remove(clear), Redirect::to(&to)).into_response()
        }
        Err(e) => BridgeError::from(e).into_response(),
    }
}

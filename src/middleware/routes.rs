use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::config::BridgeConfig;
use super::cookies;
use super::error::{BridgeError, envelope_response};
use super::extractor::{BridgedSession, synchronize_session};
use super::state::BridgeState;
use crate::interceptor::{InterceptorChain, SessionSyncInterceptor};
use crate::types::{Envelope, SessionId};

/// Create the session bridge router.
///
/// Every request first passes the session synchronization layer; the login
/// and logout routes are on its allow-list.
pub fn bridge_routes(config: BridgeConfig) -> Router {
    let BridgeConfig { bridge, settings } = config;
    let auth_path = settings.auth_path.clone();

    let interceptors = InterceptorChain::new().with(
        SessionSyncInterceptor::new(bridge.synchronizer().clone())
            .allow(format!("{auth_path}/login"))
            .allow(format!("{auth_path}/logout")),
    );

    let state = BridgeState {
        bridge: Arc::new(bridge),
        interceptors,
        settings,
    };

    Router::new()
        .route(&format!("{auth_path}/login"), post(login))
        .route(&format!("{auth_path}/logout"), get(logout).post(logout))
        .route(&format!("{auth_path}/session"), get(session_info))
        .route("/terminal/sessions", post(open_terminal))
        .route("/terminal/sessions/{id}", axum::routing::delete(close_terminal))
        .route("/terminal/sessions/{id}/execute", post(execute))
        .route("/terminal/sessions/{id}/autocomplete", post(autocomplete))
        .route("/terminal/sessions/{id}/interrupt", post(interrupt))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            synchronize_session,
        ))
        .with_state(state)
}

// ── Login ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(
    State(state): State<BridgeState>,
    jar: PrivateCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, BridgeError> {
    // Always a fresh id, so a pre-login cookie cannot be fixated.
    let session_id = SessionId::generate();
    let result = state
        .bridge
        .identity()
        .authenticate(&session_id, &form.username, &form.password)
        .await?;

    if !result.success {
        return Ok((StatusCode::UNAUTHORIZED, Json(result)).into_response());
    }

    if let Some(previous) = cookies::session_id(&jar, &state.settings.session_cookie_name) {
        if let Err(e) = state.bridge.identity().sign_out(&previous).await {
            tracing::warn!(session_id = %previous, error = %e, "Previous session cleanup failed");
        }
    }

    let session_cookie = cookies::session_cookie(
        &state.settings.session_cookie_name,
        &session_id,
        state.settings.session_ttl_hours,
        state.settings.secure_cookies,
    );

    tracing::info!(session_id = %session_id, "Login successful");

    Ok((jar.add(session_cookie), Json(result)).into_response())
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(
    State(state): State<BridgeState>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    if let Some(session_id) = cookies::session_id(&jar, &state.settings.session_cookie_name) {
        if let Err(e) = state.bridge.identity().sign_out(&session_id).await {
            tracing::warn!(error = %e, "Sign-out failed during logout");
        }
    }

    let clear_cookie = cookies::clear_session_cookie(&state.settings.session_cookie_name);
    (jar.remove(clear_cookie), Redirect::to(&state.settings.logout_redirect))
}

// ── Session ────────────────────────────────────────────────────────

async fn session_info(
    State(state): State<BridgeState>,
    session: BridgedSession,
) -> Result<Response, BridgeError> {
    let info = state
        .bridge
        .synchronizer()
        .get_session_info(&session.session_id)
        .await?
        .ok_or(BridgeError::Unauthenticated)?;
    Ok(envelope_response(Envelope::ok(info)))
}

// ── Terminal ───────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct OpenTerminal {
    node: Option<JsonValue>,
    env: Option<BTreeMap<String, String>>,
}

async fn open_terminal(
    State(state): State<BridgeState>,
    session: BridgedSession,
    body: Bytes,
) -> Result<Response, BridgeError> {
    let body: OpenTerminal = if body.is_empty() {
        OpenTerminal::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| BridgeError::BadRequest(e.to_string()))?
    };
    let envelope = state
        .bridge
        .terminal()
        .init_session(&session.session_id, body.node.as_ref(), body.env.as_ref())
        .await;
    Ok(envelope_response(envelope))
}

#[derive(Deserialize)]
struct ExecuteCommand {
    command: String,
}

async fn execute(
    State(state): State<BridgeState>,
    session: BridgedSession,
    Path(terminal_id): Path<String>,
    Json(body): Json<ExecuteCommand>,
) -> Response {
    let cancel = CancellationToken::new();
    let envelope = state
        .bridge
        .terminal()
        .execute(&session.session_id, &terminal_id, &body.command, &cancel)
        .await;
    envelope_response(envelope)
}

#[derive(Deserialize)]
struct Autocomplete {
    command: String,
    #[serde(default)]
    cursor: Option<u32>,
    #[serde(default)]
    force: bool,
}

async fn autocomplete(
    State(state): State<BridgeState>,
    session: BridgedSession,
    Path(terminal_id): Path<String>,
    Json(body): Json<Autocomplete>,
) -> Response {
    let cursor = body
        .cursor
        .unwrap_or_else(|| u32::try_from(body.command.chars().count()).unwrap_or(u32::MAX));
    let envelope = state
        .bridge
        .terminal()
        .autocomplete(&session.session_id, &terminal_id, &body.command, cursor, body.force)
        .await;
    envelope_response(envelope)
}

async fn interrupt(
    State(state): State<BridgeState>,
    session: BridgedSession,
    Path(terminal_id): Path<String>,
) -> Response {
    let envelope = state
        .bridge
        .terminal()
        .interrupt(&session.session_id, &terminal_id)
        .await;
    envelope_response(envelope)
}

async fn close_terminal(
    State(state): State<BridgeState>,
    session: BridgedSession,
    Path(terminal_id): Path<String>,
) -> Response {
    let envelope = state
        .bridge
        .terminal()
        .close_session(&session.session_id, &terminal_id)
        .await;
    envelope_response(envelope)
}

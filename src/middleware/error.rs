use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{Error, ErrorKind, TaggedError};
use crate::types::Envelope;

/// Errors of the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No session cookie, or no signed-in user behind it.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Request body could not be parsed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A bridge operation failed.
    #[error(transparent)]
    Bridge(#[from] Error),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Response status for a failure of the given kind.
pub(super) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Transport => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ProtocolFormat | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::RemoteCommand => StatusCode::OK,
    }
}

/// JSON envelope with a status matching its error kind.
pub(super) fn envelope_response<T: Serialize>(envelope: Envelope<T>) -> Response {
    let status = envelope
        .error
        .as_ref()
        .map_or(StatusCode::OK, |e| status_for(e.kind));
    (status, Json(envelope)).into_response()
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let tagged = match &self {
            Self::Unauthenticated => TaggedError::new(ErrorKind::Authentication, self.to_string()),
            Self::BadRequest(_) => {
                let envelope = Envelope::<()>::fail(TaggedError::new(ErrorKind::Internal, self.to_string()));
                return (StatusCode::BAD_REQUEST, Json(envelope)).into_response();
            }
            Self::Bridge(e) => {
                match e.kind() {
                    ErrorKind::ProtocolFormat => {
                        tracing::error!(error = %e, alert = true, "Legacy protocol mismatch");
                    }
                    ErrorKind::Internal => tracing::error!(error = %e, "Bridge internal error"),
                    _ => {}
                }
                TaggedError::from(e)
            }
            Self::Config(_) => {
                tracing::error!(error = %self, "Bridge configuration error");
                TaggedError::new(ErrorKind::Internal, "Internal error")
            }
        };
        envelope_response(Envelope::<()>::fail(tagged))
    }
}

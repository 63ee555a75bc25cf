use serde::{Deserialize, Serialize};

/// Coarse failure class used for retry decisions and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network failure, timeout or non-2xx status. Retryable for idempotent legacy calls.
    Transport,
    /// Malformed wire response. Fatal; usually a client/server version mismatch.
    ProtocolFormat,
    /// Invalid credentials, unrefreshable token or missing legacy session.
    Authentication,
    /// The legacy server ran the call and reported a logical failure.
    RemoteCommand,
    /// Store, configuration or other local failure.
    Internal,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {detail}")]
    Transport {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("OAuth2 {operation} failed{}: {detail}", status_suffix(.status))]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[error("Malformed legacy response: {0}")]
    ProtocolFormat(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Remote call failed: {message}")]
    RemoteCommand {
        message: String,
        cause: Option<String>,
    },

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid session state transition {from} -> {to}")]
    InvalidTransition {
        from: crate::sync::SyncState,
        to: crate::sync::SyncState,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Transport { .. } => ErrorKind::Transport,
            Self::OAuth { .. } | Self::Authentication(_) | Self::AuthenticationRequired => {
                ErrorKind::Authentication
            }
            Self::ProtocolFormat(_) => ErrorKind::ProtocolFormat,
            Self::RemoteCommand { .. } => ErrorKind::RemoteCommand,
            Self::Store(_)
            | Self::Config(_)
            | Self::Cancelled
            | Self::InvalidTransition { .. } => ErrorKind::Internal,
        }
    }

    /// Whether a retry of an idempotent legacy call may succeed.
    ///
    /// Only connection failures, timeouts and 5xx responses qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::Transport { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn store(e: impl std::fmt::Display) -> Self {
        Self::Store(e.to_string())
    }
}

/// Serializable form of an [`Error`] for crossing process or API boundaries.
///
/// `causes` holds the `source()` chain as strings, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl TaggedError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            causes: Vec::new(),
        }
    }
}

impl From<&Error> for TaggedError {
    fn from(e: &Error) -> Self {
        let mut causes = Vec::new();
        if let Error::RemoteCommand {
            cause: Some(cause), ..
        } = e
        {
            causes.push(cause.clone());
        }
        let mut source = std::error::Error::source(e);
        while let Some(inner) = source {
            causes.push(inner.to_string());
            source = inner.source();
        }
        let message = match e {
            // The remote text is surfaced verbatim.
            Error::RemoteCommand { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: e.kind(),
            message,
            causes,
        }
    }
}

impl From<Error> for TaggedError {
    fn from(e: Error) -> Self {
        Self::from(&e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Error::AuthenticationRequired.kind(), ErrorKind::Authentication);
        assert_eq!(
            Error::ProtocolFormat("bad".into()).kind(),
            ErrorKind::ProtocolFormat
        );
        assert_eq!(
            Error::Transport {
                operation: "terminal.execute",
                status: 502,
                detail: String::new(),
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(Error::store("down").kind(), ErrorKind::Internal);
    }

    #[test]
    fn only_server_errors_are_retryable() {
        let server = Error::Transport {
            operation: "x",
            status: 503,
            detail: String::new(),
        };
        let client = Error::Transport {
            operation: "x",
            status: 404,
            detail: String::new(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(!Error::ProtocolFormat("x".into()).is_retryable());
        assert!(
            !Error::RemoteCommand {
                message: "denied".into(),
                cause: None
            }
            .is_retryable()
        );
    }

    #[test]
    fn tagged_error_keeps_remote_message_verbatim() {
        let err = Error::RemoteCommand {
            message: "permission denied".into(),
            cause: Some("//EX[\"permission denied\"]".into()),
        };
        let tagged = TaggedError::from(&err);
        assert_eq!(tagged.kind, ErrorKind::RemoteCommand);
        assert_eq!(tagged.message, "permission denied");
        assert_eq!(tagged.causes, vec!["//EX[\"permission denied\"]".to_string()]);
    }

    #[test]
    fn tagged_error_serializes_with_snake_case_kind() {
        let tagged = TaggedError::new(ErrorKind::ProtocolFormat, "unexpected prefix");
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["kind"], "protocol_format");
        assert!(json.get("causes").is_none());
    }
}

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use derive_more::{Display, From, Into};
use rand::Rng;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, TaggedError};

/// Local web session identifier (opaque string carried in the session cookie).
///
/// Every per-session record in the [`SessionStore`](crate::store::SessionStore)
/// is keyed under this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generates a fresh random session id (32 random bytes, base64url).
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque handle of the correlated session on the legacy report server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct LegacySessionId(pub String);

impl LegacySessionId {
    /// Mints a new opaque handle. Carries no information about the user or token.
    #[must_use]
    pub fn mint() -> Self {
        Self(format!("RS_{}", Ulid::new()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LegacySessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Uniform result envelope returned to consumers of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaggedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            is_success: true,
            message: String::new(),
            error: None,
            data: Some(data),
        }
    }

    #[must_use]
    pub fn fail(error: TaggedError) -> Self {
        Self {
            is_success: false,
            message: error.message.clone(),
            error: Some(error),
            data: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl<T> From<Result<T, Error>> for Envelope<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(TaggedError::from(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn generated_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
    }

    #[test]
    fn minted_legacy_ids_are_opaque() {
        let id = LegacySessionId::mint();
        assert!(id.as_str().starts_with("RS_"));
        assert_ne!(id, LegacySessionId::mint());
    }

    #[test]
    fn session_id_serde_is_transparent() {
        let id = SessionId::from("sess-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess-abc\"");
    }

    #[test]
    fn envelope_from_error_carries_tag() {
        let envelope: Envelope<()> = Err(Error::AuthenticationRequired).into();
        assert!(!envelope.is_success);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.error.unwrap().kind, ErrorKind::Authentication);
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let envelope = Envelope::ok(7u32);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["isSuccess"], true);
        assert_eq!(json["data"], 7);
        assert!(json.get("error").is_none());
    }
}

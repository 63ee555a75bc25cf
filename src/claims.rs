use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Claims read from an OIDC access token.
///
/// The token signature is NOT verified here: tokens reach the bridge straight
/// from the identity provider's token endpoint over TLS, and any signature
/// check happens upstream. Missing or malformed claims fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub preferred_username: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    pub email_verified: bool,
    pub roles: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub auth_time: Option<i64>,
}

impl Claims {
    /// Reads the payload segment of a compact JWT. Never fails; an unreadable
    /// token yields [`Claims::default`].
    #[must_use]
    pub fn from_access_token(token: &str) -> Self {
        decode_payload(token)
            .map(|payload| Self::from_json(&payload))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn from_json(payload: &JsonValue) -> Self {
        let mut roles = string_set(payload.get("roles"));
        // Keycloak nests realm roles: {"realm_access": {"roles": [...]}}
        roles.extend(string_set(
            payload.get("realm_access").and_then(|v| v.get("roles")),
        ));

        Self {
            subject: string_claim(payload, "sub"),
            preferred_username: string_claim(payload, "preferred_username"),
            name: string_claim(payload, "name"),
            given_name: string_claim(payload, "given_name"),
            family_name: string_claim(payload, "family_name"),
            email: string_claim(payload, "email"),
            email_verified: bool_claim(payload, "email_verified"),
            roles,
            groups: string_set(payload.get("groups")),
            auth_time: payload.get("auth_time").and_then(JsonValue::as_i64),
        }
    }

    /// `preferred_username`, falling back to `sub`. `None` when both are empty.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        [&self.preferred_username, &self.subject]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
    }
}

/// Identity of the signed-in user, derived from token claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UserInfo {
    pub subject: String,
    pub username: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    pub email_verified: bool,
    pub roles: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

impl UserInfo {
    /// Create a `UserInfo` with only the subject set.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

impl From<Claims> for UserInfo {
    fn from(c: Claims) -> Self {
        let username = c.username().unwrap_or_default().to_owned();
        Self {
            subject: c.subject,
            username,
            name: c.name,
            given_name: c.given_name,
            family_name: c.family_name,
            email: c.email,
            email_verified: c.email_verified,
            roles: c.roles,
            groups: c.groups,
        }
    }
}

fn decode_payload(token: &str) -> Option<JsonValue> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    // Signature segment must exist even if empty (unsecured JWTs end with '.').
    parts.next()?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn string_claim(payload: &JsonValue, key: &str) -> String {
    payload
        .get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn bool_claim(payload: &JsonValue, key: &str) -> bool {
    match payload.get(key) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn string_set(value: Option<&JsonValue>) -> BTreeSet<String> {
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(str::to_owned)
            .collect(),
        Some(JsonValue::String(s)) if !s.is_empty() => BTreeSet::from([s.clone()]),
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
pub(crate) fn unsigned_jwt(payload: &JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_keycloak_claims() {
        let token = unsigned_jwt(&json!({
            "sub": "f3a1",
            "preferred_username": "alice",
            "email": "alice@example.com",
            "email_verified": true,
            "given_name": "Alice",
            "realm_access": {"roles": ["rs-user", "offline_access"]},
            "groups": ["/reporting"],
            "auth_time": 1_700_000_000
        }));
        let claims = Claims::from_access_token(&token);

        assert_eq!(claims.subject, "f3a1");
        assert_eq!(claims.username(), Some("alice"));
        assert!(claims.email_verified);
        assert!(claims.roles.contains("rs-user"));
        assert!(claims.groups.contains("/reporting"));
        assert_eq!(claims.auth_time, Some(1_700_000_000));
    }

    #[test]
    fn username_falls_back_to_subject() {
        let token = unsigned_jwt(&json!({"sub": "only-sub"}));
        assert_eq!(Claims::from_access_token(&token).username(), Some("only-sub"));
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        for token in ["", "not-a-jwt", "a.%%%.c", "a.b"] {
            let claims = Claims::from_access_token(token);
            assert_eq!(claims, Claims::default());
            assert_eq!(claims.username(), None);
        }
    }

    #[test]
    fn wrong_claim_types_become_defaults() {
        let token = unsigned_jwt(&json!({
            "sub": 42,
            "email_verified": "TRUE",
            "roles": "admin",
            "groups": {"not": "a list"}
        }));
        let claims = Claims::from_access_token(&token);
        assert_eq!(claims.subject, "");
        assert!(claims.email_verified);
        assert_eq!(claims.roles, BTreeSet::from(["admin".to_string()]));
        assert!(claims.groups.is_empty());
    }

    #[test]
    fn user_info_from_claims() {
        let token = unsigned_jwt(&json!({"sub": "s1", "preferred_username": "bob", "roles": ["x"]}));
        let user = UserInfo::from(Claims::from_access_token(&token));
        assert_eq!(user.username, "bob");
        assert!(user.has_role("x"));
    }
}

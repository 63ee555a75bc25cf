use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::config::BridgeOptions;
use crate::error::Error;
use crate::oauth::{IdentityClient, TokenResponse};
use crate::store::SessionRecords;
use crate::types::SessionId;

const TOKENS_SLOT: &str = "auth:tokens";

/// Short, non-reversible token identifier for log correlation.
pub(crate) fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// OIDC tokens held for one web session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    pub token_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub refresh_expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub session_state: Option<String>,
}

impl StoredToken {
    /// Builds the stored form of a token response received at `now`.
    ///
    /// A `refresh_expires_in` of zero means the refresh token does not expire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if a lifetime does not fit in a timestamp.
    pub fn from_response(resp: &TokenResponse, now: OffsetDateTime) -> Result<Self, Error> {
        let refresh_expires_at = if resp.refresh_expires_in > 0 {
            Some(lifetime_end(now, "refresh_expires_in", resp.refresh_expires_in)?)
        } else {
            None
        };
        Ok(Self {
            access_token: resp.access_token.clone(),
            refresh_token: resp.refresh_token.clone().filter(|t| !t.is_empty()),
            id_token: resp.id_token.clone().filter(|t| !t.is_empty()),
            token_type: resp.token_type.clone(),
            expires_at: lifetime_end(now, "expires_in", resp.expires_in)?,
            refresh_expires_at,
            scope: resp.scope.clone(),
            session_state: resp.session_state.clone(),
        })
    }

    /// `now + threshold >= expires_at`.
    #[must_use]
    pub fn needs_refresh(&self, now: OffsetDateTime, threshold: Duration) -> bool {
        now.checked_add(threshold)
            .is_none_or(|deadline| deadline >= self.expires_at)
    }

    /// A refresh token is present and not yet expired.
    #[must_use]
    pub fn can_refresh(&self, now: OffsetDateTime) -> bool {
        self.refresh_token.is_some() && self.refresh_expires_at.is_none_or(|at| now < at)
    }

    /// Latest instant at which the session can still be kept alive.
    #[must_use]
    pub fn horizon(&self) -> OffsetDateTime {
        self.refresh_expires_at
            .map_or(self.expires_at, |at| at.max(self.expires_at))
    }
}

fn lifetime_end(now: OffsetDateTime, field: &str, secs: i64) -> Result<OffsetDateTime, Error> {
    now.checked_add(Duration::seconds(secs))
        .ok_or_else(|| Error::Authentication(format!("token {field} out of range: {secs}")))
}

/// Persists and lazily refreshes OIDC tokens, one entry per web session.
pub struct TokenStore {
    records: SessionRecords,
    identity: Arc<IdentityClient>,
    clock: Arc<dyn Clock>,
    refresh_threshold: Duration,
    min_record_ttl: Duration,
}

impl TokenStore {
    #[must_use]
    pub fn new(
        records: SessionRecords,
        identity: Arc<IdentityClient>,
        clock: Arc<dyn Clock>,
        options: &BridgeOptions,
    ) -> Self {
        Self {
            records,
            identity,
            clock,
            refresh_threshold: options.token_refresh_threshold,
            min_record_ttl: options.session_timeout,
        }
    }

    /// Persists token fields and the computed expiry.
    ///
    /// Refresh and id tokens absent from `resp` keep their previous values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails, or
    /// [`Error::Authentication`] if the response carries an unusable lifetime.
    pub async fn store_tokens(
        &self,
        session: &SessionId,
        resp: &TokenResponse,
    ) -> Result<StoredToken, Error> {
        let now = self.clock.now();
        let mut token = StoredToken::from_response(resp, now)?;

        if token.refresh_token.is_none() || token.id_token.is_none() {
            if let Some(previous) = self.load(session).await? {
                if token.refresh_token.is_none() {
                    token.refresh_token = previous.refresh_token;
                    token.refresh_expires_at = previous.refresh_expires_at;
                }
                if token.id_token.is_none() {
                    token.id_token = previous.id_token;
                }
            }
        }

        let ttl = (token.horizon() - now).max(self.min_record_ttl);

        self.records.save(session, TOKENS_SLOT, &token, ttl).await?;

        tracing::info!(
            session_id = %session,
            token = %fingerprint(&token.access_token),
            expires_at = %token.expires_at,
            "Tokens stored"
        );
        Ok(token)
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn load(&self, session: &SessionId) -> Result<Option<StoredToken>, Error> {
        self.records.load(session, TOKENS_SLOT).await
    }

    /// True when no token is stored or the access token expires within the threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn needs_refresh(&self, session: &SessionId) -> Result<bool, Error> {
        let now = self.clock.now();
        Ok(self
            .load(session)
            .await?
            .is_none_or(|t| t.needs_refresh(now, self.refresh_threshold)))
    }

    /// Returns a usable access token, refreshing first when it is about to expire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the token cannot be refreshed,
    /// [`Error::Http`] on network failure, or [`Error::Store`].
    pub async fn get_access_token(&self, session: &SessionId) -> Result<String, Error> {
        let now = self.clock.now();
        match self.load(session).await? {
            Some(token) if !token.needs_refresh(now, self.refresh_threshold) => {
                Ok(token.access_token)
            }
            _ => {
                let refreshed = self.refresh_tokens(session).await?;
                Ok(refreshed.access_token)
            }
        }
    }

    /// Runs a `refresh_token` grant and overwrites the stored tokens on success.
    ///
    /// Concurrent refreshes for one session are not serialized; the last
    /// writer wins and both token generations stay valid at the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if no usable refresh token is stored or
    /// the provider rejects it, [`Error::Http`] on network failure.
    pub async fn refresh_tokens(&self, session: &SessionId) -> Result<StoredToken, Error> {
        let now = self.clock.now();
        let refresh_token = self
            .load(session)
            .await?
            .filter(|t| t.can_refresh(now))
            .and_then(|t| t.refresh_token)
            .ok_or_else(|| Error::Authentication("no refresh token available".into()))?;

        tracing::info!(session_id = %session, "Refreshing access token");

        let response = match self.identity.refresh_grant(&refresh_token).await {
            Ok(response) => response,
            Err(Error::OAuth { status, detail, .. }) => {
                tracing::warn!(session_id = %session, ?status, detail = %detail, "Token refresh rejected");
                return Err(Error::Authentication("token refresh failed".into()));
            }
            Err(e) => {
                tracing::warn!(session_id = %session, error = %e, "Token refresh request failed");
                return Err(e);
            }
        };

        self.store_tokens(session, &response).await
    }

    /// Stored refresh token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn refresh_token(&self, session: &SessionId) -> Result<Option<String>, Error> {
        Ok(self.load(session).await?.and_then(|t| t.refresh_token))
    }

    /// Removes every stored token. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn clear_tokens(&self, session: &SessionId) -> Result<(), Error> {
        self.records.remove(session, TOKENS_SLOT).await?;
        tracing::info!(session_id = %session, "Tokens cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::clock::ManualClock;
    use crate::oauth::OidcConfig;
    use crate::store::MemorySessionStore;

    struct Fixture {
        clock: ManualClock,
        tokens: TokenStore,
        session: SessionId,
    }

    fn fixture(server_uri: &str) -> Fixture {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH + Duration::days(20_000));
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let records = SessionRecords::new(MemorySessionStore::with_clock(clock_arc.clone()));
        let config = OidcConfig::new(
            format!("{server_uri}/realms/rs").parse().unwrap(),
            "rs-bridge",
            "secret",
        )
        .unwrap();
        let tokens = TokenStore::new(
            records,
            Arc::new(IdentityClient::new(config)),
            clock_arc,
            &BridgeOptions::default(),
        );
        Fixture {
            clock,
            tokens,
            session: SessionId::from("web-1"),
        }
    }

    #[test]
    fn needs_refresh_boundary_is_inclusive() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let token = StoredToken::from_response(&TokenResponse::new("A", 600), now).unwrap();
        let threshold = Duration::minutes(5);

        assert!(!token.needs_refresh(now + Duration::seconds(299), threshold));
        assert!(token.needs_refresh(now + Duration::seconds(300), threshold));
        assert!(token.needs_refresh(now + Duration::seconds(301), threshold));
    }

    #[test]
    fn zero_refresh_lifetime_never_expires() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let token =
            StoredToken::from_response(&TokenResponse::new("A", 60).with_refresh_token("R", 0), now)
                .unwrap();
        assert_eq!(token.refresh_expires_at, None);
        assert!(token.can_refresh(now + Duration::days(365)));
    }

    #[test]
    fn unrepresentable_lifetimes_are_rejected() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let err = StoredToken::from_response(&TokenResponse::new("A", i64::MAX), now).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));

        let err = StoredToken::from_response(
            &TokenResponse::new("A", 60).with_refresh_token("R", i64::MAX),
            now,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn huge_provider_lifetime_is_rejected_without_storing() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri());

        let err = f
            .tokens
            .store_tokens(&f.session, &TokenResponse::new("A", i64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(f.tokens.load(&f.session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_access_token_before_expiry_returns_stored_token() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri());
        f.tokens
            .store_tokens(
                &f.session,
                &TokenResponse::new("A", 3600).with_refresh_token("R", 7200),
            )
            .await
            .unwrap();

        assert_eq!(f.tokens.get_access_token(&f.session).await.unwrap(), "A");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn needs_refresh_scenario() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri());
        f.tokens
            .store_tokens(
                &f.session,
                &TokenResponse::new("A", 3600).with_refresh_token("R", 7200),
            )
            .await
            .unwrap();

        assert!(!f.tokens.needs_refresh(&f.session).await.unwrap());
        f.clock.advance(Duration::seconds(3600 - 60));
        assert!(f.tokens.needs_refresh(&f.session).await.unwrap());
    }

    #[tokio::test]
    async fn get_access_token_refreshes_near_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=R"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(&server.uri());
        f.tokens
            .store_tokens(
                &f.session,
                &TokenResponse::new("A", 3600)
                    .with_refresh_token("R", 7200)
                    .with_id_token("I"),
            )
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(58));

        assert_eq!(f.tokens.get_access_token(&f.session).await.unwrap(), "A2");
        let stored = f.tokens.load(&f.session).await.unwrap().unwrap();
        // The refresh response carried no refresh/id token; the previous ones are kept.
        assert_eq!(stored.refresh_token.as_deref(), Some("R"));
        assert_eq!(stored.id_token.as_deref(), Some("I"));
    }

    #[tokio::test]
    async fn rejected_refresh_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let f = fixture(&server.uri());
        f.tokens
            .store_tokens(&f.session, &TokenResponse::new("A", 60).with_refresh_token("R", 600))
            .await
            .unwrap();

        let err = f.tokens.refresh_tokens(&f.session).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        // Stored tokens stay untouched on failure.
        assert_eq!(f.tokens.load(&f.session).await.unwrap().unwrap().access_token, "A");
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails_without_network() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri());
        f.tokens
            .store_tokens(&f.session, &TokenResponse::new("A", 60))
            .await
            .unwrap();

        let err = f.tokens.refresh_tokens(&f.session).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_tokens_is_idempotent() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri());
        f.tokens
            .store_tokens(&f.session, &TokenResponse::new("A", 60))
            .await
            .unwrap();

        f.tokens.clear_tokens(&f.session).await.unwrap();
        f.tokens.clear_tokens(&f.session).await.unwrap();
        assert!(f.tokens.load(&f.session).await.unwrap().is_none());
        assert!(f.tokens.needs_refresh(&f.session).await.unwrap());
    }
}

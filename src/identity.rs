use std::sync::Arc;

use serde::Serialize;

use crate::claims::{Claims, UserInfo};
use crate::clock::Clock;
use crate::config::BridgeOptions;
use crate::correlator::SessionCorrelator;
use crate::error::Error;
use crate::oauth::IdentityClient;
use crate::store::SessionRecords;
use crate::token_store::{StoredToken, TokenStore};
use crate::types::{LegacySessionId, SessionId};

const PRINCIPAL_SLOT: &str = "auth:principal";
const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Outcome of a password login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    pub success: bool,
    pub message: String,
    pub user: Option<UserInfo>,
    pub expires_in: Option<i64>,
    pub report_server_session_id: Option<LegacySessionId>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub session_state: Option<String>,
}

impl AuthenticationResult {
    fn rejected() -> Self {
        Self {
            success: false,
            message: INVALID_CREDENTIALS.into(),
            user: None,
            expires_in: None,
            report_server_session_id: None,
            token_type: None,
            scope: None,
            session_state: None,
        }
    }
}

/// Password and refresh flows against the identity provider, plus the local
/// principal derived from the current access token.
pub struct IdentityBridge {
    identity: Arc<IdentityClient>,
    tokens: Arc<TokenStore>,
    correlator: Arc<SessionCorrelator>,
    records: SessionRecords,
    clock: Arc<dyn Clock>,
    options: BridgeOptions,
}

impl IdentityBridge {
    #[must_use]
    pub fn new(
        identity: Arc<IdentityClient>,
        tokens: Arc<TokenStore>,
        correlator: Arc<SessionCorrelator>,
        records: SessionRecords,
        clock: Arc<dyn Clock>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            identity,
            tokens,
            correlator,
            records,
            clock,
            options,
        }
    }

    /// Signs `session` in with a password grant and bridges it to the legacy server.
    ///
    /// Rejected credentials yield an unsuccessful result with a generic
    /// message; the provider's detail is only logged. A failed bridge does not
    /// fail the login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the provider is unreachable, or [`Error::Store`].
    pub async fn authenticate(
        &self,
        session: &SessionId,
        username: &str,
        password: &str,
    ) -> Result<AuthenticationResult, Error> {
        let response = match self.identity.password_grant(username, password).await {
            Ok(response) => response,
            Err(Error::OAuth { status, detail, .. }) => {
                tracing::warn!(
                    session_id = %session,
                    username = %username,
                    ?status,
                    detail = %detail,
                    "Password grant rejected"
                );
                return Ok(AuthenticationResult::rejected());
            }
            Err(e) => {
                tracing::error!(session_id = %session, error = %e, "Password grant failed");
                return Err(e);
            }
        };

        let token = self.tokens.store_tokens(session, &response).await?;
        let user = self.save_principal(session, &token).await?;

        let mut message = "Signed in".to_owned();
        let mut report_server_session_id = None;
        if self.options.enable_session_bridge {
            let bridge = self
                .correlator
                .bridge_with_token(session, &token.access_token)
                .await?;
            if bridge.success {
                report_server_session_id = bridge.report_server_session_id;
            } else {
                tracing::warn!(session_id = %session, reason = %bridge.message, "Signed in without report server session");
                message = format!("Signed in; {}", bridge.message);
            }
        }

        tracing::info!(session_id = %session, username = %user.username, "User signed in");
        Ok(AuthenticationResult {
            success: true,
            message,
            user: Some(user),
            expires_in: Some(response.expires_in),
            report_server_session_id,
            token_type: Some(token.token_type),
            scope: token.scope,
            session_state: token.session_state,
        })
    }

    /// Re-derives the principal from the stored access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn refresh_principal(&self, session: &SessionId) -> Result<Option<UserInfo>, Error> {
        match self.tokens.load(session).await? {
            Some(token) => self.save_principal(session, &token).await.map(Some),
            None => Ok(None),
        }
    }

    /// A principal and tokens are both stored for `session`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn is_authenticated(&self, session: &SessionId) -> Result<bool, Error> {
        Ok(self.current_user(session).await?.is_some() && self.tokens.load(session).await?.is_some())
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn current_user(&self, session: &SessionId) -> Result<Option<UserInfo>, Error> {
        self.records.load(session, PRINCIPAL_SLOT).await
    }

    /// Clears the principal, tokens and legacy session.
    ///
    /// The provider-side session is ended best effort; failures are logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn sign_out(&self, session: &SessionId) -> Result<(), Error> {
        if let Some(refresh_token) = self.tokens.refresh_token(session).await? {
            if let Err(e) = self.identity.end_session(&refresh_token).await {
                tracing::warn!(session_id = %session, error = %e, "Provider logout failed");
            }
        }
        self.records.remove(session, PRINCIPAL_SLOT).await?;
        self.tokens.clear_tokens(session).await?;
        self.correlator.clear_session(session).await?;
        tracing::info!(session_id = %session, "User signed out");
        Ok(())
    }

    async fn save_principal(
        &self,
        session: &SessionId,
        token: &StoredToken,
    ) -> Result<UserInfo, Error> {
        let claims = Claims::from_access_token(&token.access_token);
        let user = if claims.username().is_some() {
            UserInfo::from(claims)
        } else {
            // Opaque access token: ask the provider instead.
            match self.identity.user_info(&token.access_token).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!(session_id = %session, error = %e, "Userinfo lookup failed");
                    UserInfo::default()
                }
            }
        };

        let now = self.clock.now();
        let ttl = (token.horizon() - now).max(self.options.session_timeout);
        self.records.save(session, PRINCIPAL_SLOT, &user, ttl).await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::claims::unsigned_jwt;
    use crate::clock::ManualClock;
    use crate::oauth::OidcConfig;
    use crate::store::MemorySessionStore;

    const TOKEN_PATH: &str = "/realms/rs/protocol/openid-connect/token";

    struct Fixture {
        bridge: IdentityBridge,
        correlator: Arc<SessionCorrelator>,
        tokens: Arc<TokenStore>,
        session: SessionId,
    }

    fn fixture(server_uri: &str, options: BridgeOptions) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let records = SessionRecords::new(MemorySessionStore::with_clock(clock.clone()));
        let config =
            OidcConfig::new(format!("{server_uri}/realms/rs").parse().unwrap(), "rs-bridge", "secret")
                .unwrap();
        let identity = Arc::new(IdentityClient::new(config));
        let tokens = Arc::new(TokenStore::new(records.clone(), identity.clone(), clock.clone(), &options));
        let correlator = Arc::new(SessionCorrelator::new(
            records.clone(),
            "rs.example.com",
            clock.clone(),
            &options,
        ));
        let bridge = IdentityBridge::new(identity, tokens.clone(), correlator.clone(), records, clock, options);
        Fixture {
            bridge,
            correlator,
            tokens,
            session: SessionId::from("web-1"),
        }
    }

    fn access_token() -> String {
        unsigned_jwt(&json!({
            "sub": "u-1",
            "preferred_username": "alice",
            "email": "alice@example.com",
            "realm_access": { "roles": ["rs-admin"] }
        }))
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token(),
                "refresh_token": "R1",
                "expires_in": 300,
                "refresh_expires_in": 1800,
                "token_type": "Bearer",
                "scope": "openid profile email",
                "session_state": "ss-1"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn authenticate_stores_tokens_principal_and_bridge() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let f = fixture(&server.uri(), BridgeOptions::default());

        let result = f.bridge.authenticate(&f.session, "alice", "pw").await.unwrap();
        assert!(result.success);
        assert_eq!(result.expires_in, Some(300));
        assert_eq!(result.session_state.as_deref(), Some("ss-1"));
        let user = result.user.unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.has_role("rs-admin"));

        let legacy = result.report_server_session_id.unwrap();
        assert!(f.correlator.validate_session(&f.session, &legacy).await.unwrap());
        assert!(f.bridge.is_authenticated(&f.session).await.unwrap());
        assert_eq!(f.tokens.refresh_token(&f.session).await.unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn rejected_credentials_get_generic_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Account disabled"
            })))
            .mount(&server)
            .await;
        let f = fixture(&server.uri(), BridgeOptions::default());

        let result = f.bridge.authenticate(&f.session, "alice", "bad").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Invalid username or password");
        assert!(!f.bridge.is_authenticated(&f.session).await.unwrap());
        assert!(f.tokens.load(&f.session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_bridge_skips_correlation() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let f = fixture(&server.uri(), BridgeOptions::default().with_session_bridge(false));

        let result = f.bridge.authenticate(&f.session, "alice", "pw").await.unwrap();
        assert!(result.success);
        assert!(result.report_server_session_id.is_none());
        assert!(f.correlator.current_session(&f.session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_everything_even_if_provider_fails() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/realms/rs/protocol/openid-connect/logout"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let f = fixture(&server.uri(), BridgeOptions::default());
        f.bridge.authenticate(&f.session, "alice", "pw").await.unwrap();

        f.bridge.sign_out(&f.session).await.unwrap();
        assert!(!f.bridge.is_authenticated(&f.session).await.unwrap());
        assert!(f.bridge.current_user(&f.session).await.unwrap().is_none());
        assert!(f.tokens.load(&f.session).await.unwrap().is_none());
        assert!(f.correlator.current_session(&f.session).await.unwrap().is_none());
        assert!(f.correlator.cookie_jar(&f.session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn opaque_tokens_fall_back_to_userinfo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "opaque-access",
                "expires_in": 300
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/realms/rs/protocol/openid-connect/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "u-2",
                "preferred_username": "bob"
            })))
            .mount(&server)
            .await;
        let f = fixture(&server.uri(), BridgeOptions::default());

        let result = f.bridge.authenticate(&f.session, "bob", "pw").await.unwrap();
        assert!(result.success);
        assert_eq!(result.user.unwrap().username, "bob");
        // No username claim in the token, so nothing to bridge.
        assert!(result.report_server_session_id.is_none());
    }
}

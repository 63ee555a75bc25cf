use std::collections::BTreeMap;
use std::sync::Arc;

use derive_more::Display;
use serde::Serialize;
use time::OffsetDateTime;

use crate::claims::UserInfo;
use crate::clock::Clock;
use crate::config::BridgeOptions;
use crate::correlator::SessionCorrelator;
use crate::error::{Error, ErrorKind};
use crate::identity::IdentityBridge;
use crate::token_store::TokenStore;
use crate::types::{LegacySessionId, SessionId};

/// Lifecycle of one web session as seen by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unauthenticated,
    Authenticated,
    NeedsRefresh,
    Bridging,
    Bridged,
    Expired,
}

impl SyncState {
    #[must_use]
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (_, Expired)
                | (Unauthenticated, Authenticated)
                | (Authenticated, NeedsRefresh | Bridging | Bridged)
                | (NeedsRefresh, Authenticated | Bridging)
                | (Bridging, Bridged)
                | (Expired, Unauthenticated)
        )
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for an edge the lifecycle does not allow.
    pub fn transition(self, next: SyncState) -> Result<SyncState, Error> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Result of one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub state: SyncState,
    pub synchronized: bool,
}

impl SyncOutcome {
    fn finished(state: SyncState) -> Self {
        Self {
            state,
            synchronized: matches!(state, SyncState::Authenticated | SyncState::Bridged),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state == SyncState::Expired
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryOutcome {
    pub state: SyncState,
    /// Where the caller should send the user, if it can still redirect.
    pub redirect_to: Option<String>,
}

/// Snapshot of a bridged session for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub report_server_session_id: Option<LegacySessionId>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,
    pub is_valid: bool,
    pub user: UserInfo,
    pub properties: BTreeMap<String, String>,
}

/// Keeps the OIDC and legacy sides of a web session alive, one request at a time.
pub struct SessionSynchronizer {
    identity: Arc<IdentityBridge>,
    tokens: Arc<TokenStore>,
    correlator: Arc<SessionCorrelator>,
    clock: Arc<dyn Clock>,
    options: BridgeOptions,
}

impl SessionSynchronizer {
    #[must_use]
    pub fn new(
        identity: Arc<IdentityBridge>,
        tokens: Arc<TokenStore>,
        correlator: Arc<SessionCorrelator>,
        clock: Arc<dyn Clock>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            identity,
            tokens,
            correlator,
            clock,
            options,
        }
    }

    /// `true` when the session is signed in and, if bridging is on, bridged.
    ///
    /// # Errors
    ///
    /// See [`synchronize`](Self::synchronize).
    pub async fn synchronize_sessions(&self, session: &SessionId) -> Result<bool, Error> {
        Ok(self.synchronize(session).await?.synchronized)
    }

    /// Refreshes the token when it nears expiry, then re-bridges or slides the
    /// legacy session. Unauthenticated sessions return immediately without
    /// touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails. Provider and
    /// bridge failures end in [`SyncState::Expired`] instead.
    pub async fn synchronize(&self, session: &SessionId) -> Result<SyncOutcome, Error> {
        let mut state = SyncState::Unauthenticated;
        if !self.identity.is_authenticated(session).await? {
            return Ok(SyncOutcome::finished(state));
        }
        state = state.transition(SyncState::Authenticated)?;

        let mut rebridged = false;
        if self.tokens.needs_refresh(session).await? {
            state = state.transition(SyncState::NeedsRefresh)?;
            let token = match self.tokens.refresh_tokens(session).await {
                Ok(token) => token,
                Err(e) if e.kind() == ErrorKind::Internal => return Err(e),
                Err(e) => {
                    tracing::warn!(session_id = %session, error = %e, "Session expired: token refresh failed");
                    return Ok(SyncOutcome::finished(state.transition(SyncState::Expired)?));
                }
            };
            state = state.transition(SyncState::Authenticated)?;
            self.identity.refresh_principal(session).await?;

            if self.options.enable_session_bridge
                && self.correlator.current_session_id(session).await?.is_some()
            {
                state = self.bridge(session, state, &token.access_token).await?;
                rebridged = true;
            }
        }

        if self.options.enable_session_bridge && !rebridged && state == SyncState::Authenticated {
            if self.correlator.has_valid_session(session).await? {
                self.correlator.refresh_session(session).await?;
                state = state.transition(SyncState::Bridged)?;
            } else {
                let access_token = self.tokens.get_access_token(session).await;
                state = match access_token {
                    Ok(token) => self.bridge(session, state, &token).await?,
                    Err(e) if e.kind() == ErrorKind::Internal => return Err(e),
                    Err(e) => {
                        tracing::warn!(session_id = %session, error = %e, "Session expired: no usable access token");
                        state.transition(SyncState::Expired)?
                    }
                };
            }
        }

        tracing::debug!(session_id = %session, state = %state, "Session synchronized");
        Ok(SyncOutcome::finished(state))
    }

    async fn bridge(
        &self,
        session: &SessionId,
        state: SyncState,
        access_token: &str,
    ) -> Result<SyncState, Error> {
        let state = state.transition(SyncState::Bridging)?;
        let result = self.correlator.bridge_with_token(session, access_token).await?;
        if result.success {
            state.transition(SyncState::Bridged)
        } else {
            tracing::warn!(session_id = %session, reason = %result.message, "Session expired: re-bridge failed");
            state.transition(SyncState::Expired)
        }
    }

    /// Signs the session out everywhere and tells the caller where to go next.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn handle_session_expiry(&self, session: &SessionId) -> Result<ExpiryOutcome, Error> {
        let state = SyncState::Expired;
        self.identity.sign_out(session).await?;
        let state = state.transition(SyncState::Unauthenticated)?;
        tracing::info!(session_id = %session, "Expired session signed out");
        Ok(ExpiryOutcome {
            state,
            redirect_to: Some(self.options.login_path.clone()),
        })
    }

    /// `None` when nobody is signed in on `session`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn get_session_info(&self, session: &SessionId) -> Result<Option<SessionInfo>, Error> {
        let Some(user) = self.identity.current_user(session).await? else {
            return Ok(None);
        };
        let legacy = self.correlator.current_session(session).await?;
        let token = self.tokens.load(session).await?;
        let now = self.clock.now();

        let mut properties = BTreeMap::new();
        if let Some(token) = &token {
            properties.insert("tokenType".to_owned(), token.token_type.clone());
            properties.insert("tokenExpiresAt".to_owned(), token.expires_at.to_string());
            if let Some(scope) = &token.scope {
                properties.insert("scope".to_owned(), scope.clone());
            }
            if let Some(state) = &token.session_state {
                properties.insert("sessionState".to_owned(), state.clone());
            }
        }

        Ok(Some(SessionInfo {
            session_id: session.clone(),
            is_valid: legacy.as_ref().is_some_and(|r| r.is_valid(now)),
            report_server_session_id: legacy.as_ref().map(|r| r.session_id.clone()),
            created_at: legacy.as_ref().map(|r| r.created_at),
            expires_at: legacy.as_ref().map(|r| r.expires_at),
            last_activity: legacy.as_ref().map(|r| r.last_activity),
            user,
            properties,
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::claims::unsigned_jwt;
    use crate::clock::ManualClock;
    use crate::oauth::{IdentityClient, OidcConfig};
    use crate::store::{MemorySessionStore, SessionRecords};

    const TOKEN_PATH: &str = "/realms/rs/protocol/openid-connect/token";

    struct Fixture {
        clock: ManualClock,
        identity: Arc<IdentityBridge>,
        correlator: Arc<SessionCorrelator>,
        sync: SessionSynchronizer,
        session: SessionId,
    }

    fn fixture(server_uri: &str, options: BridgeOptions) -> Fixture {
        let clock = ManualClock::starting_now();
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let records = SessionRecords::new(MemorySessionStore::with_clock(clock_arc.clone()));
        let config =
            OidcConfig::new(format!("{server_uri}/realms/rs").parse().unwrap(), "rs-bridge", "secret")
                .unwrap();
        let client = Arc::new(IdentityClient::new(config));
        let tokens = Arc::new(TokenStore::new(records.clone(), client.clone(), clock_arc.clone(), &options));
        let correlator = Arc::new(SessionCorrelator::new(
            records.clone(),
            "rs.example.com",
            clock_arc.clone(),
            &options,
        ));
        let identity = Arc::new(IdentityBridge::new(
            client,
            tokens.clone(),
            correlator.clone(),
            records,
            clock_arc.clone(),
            options.clone(),
        ));
        let sync = SessionSynchronizer::new(identity.clone(), tokens, correlator.clone(), clock_arc, options);
        Fixture {
            clock,
            identity,
            correlator,
            sync,
            session: SessionId::from("web-1"),
        }
    }

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        json!({
            "access_token": unsigned_jwt(&json!({ "sub": "u-1", "preferred_username": "alice", "jti": access })),
            "refresh_token": refresh,
            "expires_in": 600,
            "refresh_expires_in": 7200
        })
    }

    async fn sign_in(server: &MockServer, f: &Fixture) -> LegacySessionId {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "R1")))
            .mount(server)
            .await;
        let result = f.identity.authenticate(&f.session, "alice", "pw").await.unwrap();
        result.report_server_session_id.unwrap_or_else(|| LegacySessionId::from(""))
    }

    #[test]
    fn transitions_follow_lifecycle() {
        use SyncState::*;
        assert!(Unauthenticated.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(NeedsRefresh));
        assert!(NeedsRefresh.can_transition_to(Authenticated));
        assert!(Bridging.can_transition_to(Bridged));
        assert!(Bridged.can_transition_to(Expired));
        assert!(Expired.can_transition_to(Unauthenticated));

        assert!(!Unauthenticated.can_transition_to(Bridged));
        assert!(!Expired.can_transition_to(Authenticated));
        assert!(matches!(
            Bridged.transition(Bridging),
            Err(Error::InvalidTransition { from: Bridged, to: Bridging })
        ));
    }

    #[tokio::test]
    async fn unauthenticated_sync_makes_no_network_calls() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let f = fixture(&server.uri(), BridgeOptions::default());

        let outcome = f.sync.synchronize(&f.session).await.unwrap();
        assert_eq!(outcome.state, SyncState::Unauthenticated);
        assert!(!outcome.synchronized);
        assert!(!f.sync.synchronize_sessions(&f.session).await.unwrap());
        assert!(f.sync.get_session_info(&f.session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fresh_session_slides_legacy_expiry() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri(), BridgeOptions::default());
        let legacy = sign_in(&server, &f).await;

        f.clock.advance(Duration::minutes(2));
        let outcome = f.sync.synchronize(&f.session).await.unwrap();
        assert_eq!(outcome.state, SyncState::Bridged);
        assert!(outcome.synchronized);

        let record = f.correlator.current_session(&f.session).await.unwrap().unwrap();
        assert_eq!(record.session_id, legacy);
        assert_eq!(record.last_activity, f.clock.now());
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_rebridged() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri(), BridgeOptions::default());
        let first = sign_in(&server, &f).await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "R2")))
            .expect(1)
            .mount(&server)
            .await;

        f.clock.advance(Duration::minutes(6));
        let outcome = f.sync.synchronize(&f.session).await.unwrap();
        assert_eq!(outcome.state, SyncState::Bridged);

        let second = f.correlator.current_session_id(&f.session).await.unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn failed_refresh_expires_session() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri(), BridgeOptions::default());
        sign_in(&server, &f).await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        f.clock.advance(Duration::minutes(6));
        let outcome = f.sync.synchronize(&f.session).await.unwrap();
        assert!(outcome.is_expired());
        assert!(!outcome.synchronized);
    }

    #[tokio::test]
    async fn expired_legacy_session_is_rebridged() {
        let server = MockServer::start().await;
        let options = BridgeOptions::default().with_session_timeout(Duration::minutes(1));
        let f = fixture(&server.uri(), options);
        let first = sign_in(&server, &f).await;

        f.clock.advance(Duration::minutes(2));
        let outcome = f.sync.synchronize(&f.session).await.unwrap();
        assert_eq!(outcome.state, SyncState::Bridged);
        let second = f.correlator.current_session_id(&f.session).await.unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn disabled_bridge_stays_authenticated() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri(), BridgeOptions::default().with_session_bridge(false));
        sign_in(&server, &f).await;

        let outcome = f.sync.synchronize(&f.session).await.unwrap();
        assert_eq!(outcome.state, SyncState::Authenticated);
        assert!(outcome.synchronized);
    }

    #[tokio::test]
    async fn expiry_cascades_sign_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/rs/protocol/openid-connect/logout"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let f = fixture(&server.uri(), BridgeOptions::default());
        sign_in(&server, &f).await;

        let outcome = f.sync.handle_session_expiry(&f.session).await.unwrap();
        assert_eq!(outcome.state, SyncState::Unauthenticated);
        assert_eq!(outcome.redirect_to.as_deref(), Some("/auth/login"));
        assert!(f.sync.get_session_info(&f.session).await.unwrap().is_none());
        assert!(!f.sync.synchronize_sessions(&f.session).await.unwrap());
    }

    #[tokio::test]
    async fn session_info_reports_legacy_lifetime() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri(), BridgeOptions::default());
        let legacy = sign_in(&server, &f).await;

        let info = f.sync.get_session_info(&f.session).await.unwrap().unwrap();
        assert_eq!(info.session_id, f.session);
        assert_eq!(info.report_server_session_id, Some(legacy));
        assert!(info.is_valid);
        assert_eq!(info.user.username, "alice");
        assert_eq!(info.properties.get("tokenType").map(String::as_str), Some("Bearer"));
        assert_eq!(info.expires_at, Some(f.clock.now() + Duration::hours(1)));
    }
}

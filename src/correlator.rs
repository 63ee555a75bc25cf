use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::claims::Claims;
use crate::clock::Clock;
use crate::config::BridgeOptions;
use crate::error::Error;
use crate::rpc::LegacyCookieJar;
use crate::store::SessionRecords;
use crate::token_store::fingerprint;
use crate::types::{LegacySessionId, SessionId};

const LEGACY_SESSION_SLOT: &str = "rs:session";
const COOKIE_SLOT: &str = "rs:cookies";
/// Cookie through which the legacy server receives the bearer token.
pub const AUTH_TOKEN_COOKIE: &str = "AUTH_TOKEN";

/// Produces legacy session handles for bridged users.
///
/// The default [`OpaqueIssuer`] mints a random handle locally. Deployments
/// whose legacy server hands out its own ids plug in another issuer.
pub trait LegacySessionIssuer: Send + Sync + 'static {
    fn issue<'a>(
        &'a self,
        username: &'a str,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<LegacySessionId, Error>>;
}

/// Mints `RS_<ulid>` handles. Never contacts the legacy server.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueIssuer;

impl LegacySessionIssuer for OpaqueIssuer {
    fn issue<'a>(
        &'a self,
        _username: &'a str,
        _access_token: &'a str,
    ) -> BoxFuture<'a, Result<LegacySessionId, Error>> {
        Box::pin(async { Ok(LegacySessionId::mint()) })
    }
}

/// Persisted correlation between a web session and its legacy session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySessionRecord {
    pub session_id: LegacySessionId,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
}

impl LegacySessionRecord {
    #[must_use]
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBridgeResult {
    pub success: bool,
    pub message: String,
    pub report_server_session_id: Option<LegacySessionId>,
    /// Cookies placed in the session's legacy jar, by name.
    pub cookies: BTreeMap<String, String>,
}

impl SessionBridgeResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            report_server_session_id: None,
            cookies: BTreeMap::new(),
        }
    }
}

/// Maps web sessions to legacy session handles and their sliding lifetime.
pub struct SessionCorrelator {
    records: SessionRecords,
    cookie_host: String,
    issuer: Arc<dyn LegacySessionIssuer>,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
}

impl SessionCorrelator {
    #[must_use]
    pub fn new(
        records: SessionRecords,
        cookie_host: impl Into<String>,
        clock: Arc<dyn Clock>,
        options: &BridgeOptions,
    ) -> Self {
        Self {
            records,
            cookie_host: cookie_host.into(),
            issuer: Arc::new(OpaqueIssuer),
            clock,
            session_timeout: options.session_timeout,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: Arc<dyn LegacySessionIssuer>) -> Self {
        self.issuer = issuer;
        self
    }

    /// Correlates `session` with a fresh legacy session for the token's user.
    ///
    /// Tokens without a usable username and issuer failures produce an
    /// unsuccessful result; nothing is persisted in that case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn bridge_with_token(
        &self,
        session: &SessionId,
        access_token: &str,
    ) -> Result<SessionBridgeResult, Error> {
        let claims = Claims::from_access_token(access_token);
        let Some(username) = claims.username() else {
            tracing::warn!(
                session_id = %session,
                token = %fingerprint(access_token),
                "Cannot bridge: token carries no username"
            );
            return Ok(SessionBridgeResult::failed("No username in access token"));
        };

        let legacy_id = match self.issuer.issue(username, access_token).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(session_id = %session, error = %e, "Legacy session issue failed");
                return Ok(SessionBridgeResult::failed(format!(
                    "Could not establish report server session: {e}"
                )));
            }
        };

        let jar = self.cookie_jar(session).await?;
        jar.add(&self.cookie_host, AUTH_TOKEN_COOKIE, access_token);
        self.save_cookie_jar(session, &jar).await?;

        let now = self.clock.now();
        let record = LegacySessionRecord {
            session_id: legacy_id.clone(),
            username: username.to_owned(),
            created_at: now,
            expires_at: now + self.session_timeout,
            last_activity: now,
        };
        self.records
            .save(session, LEGACY_SESSION_SLOT, &record, self.session_timeout)
            .await?;

        tracing::info!(
            session_id = %session,
            legacy_session = %legacy_id,
            username = %username,
            "Bridged session to report server"
        );

        let mut cookies = BTreeMap::new();
        cookies.insert(AUTH_TOKEN_COOKIE.to_owned(), access_token.to_owned());
        Ok(SessionBridgeResult {
            success: true,
            message: "Session bridged".into(),
            report_server_session_id: Some(legacy_id),
            cookies,
        })
    }

    /// True iff `legacy_id` is the stored handle and it has not expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn validate_session(
        &self,
        session: &SessionId,
        legacy_id: &LegacySessionId,
    ) -> Result<bool, Error> {
        let now = self.clock.now();
        Ok(self
            .current_session(session)
            .await?
            .is_some_and(|r| r.session_id == *legacy_id && r.is_valid(now)))
    }

    /// True when a stored legacy session exists and has not expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn has_valid_session(&self, session: &SessionId) -> Result<bool, Error> {
        let now = self.clock.now();
        Ok(self
            .current_session(session)
            .await?
            .is_some_and(|r| r.is_valid(now)))
    }

    /// Slides the expiry to now + session timeout. Local only.
    ///
    /// Returns `false` when no legacy session is stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn refresh_session(&self, session: &SessionId) -> Result<bool, Error> {
        let Some(mut record) = self.current_session(session).await? else {
            return Ok(false);
        };
        let now = self.clock.now();
        record.last_activity = now;
        record.expires_at = now + self.session_timeout;
        self.records
            .save(session, LEGACY_SESSION_SLOT, &record, self.session_timeout)
            .await?;
        if let Some(jar) = self.records.load::<LegacyCookieJar>(session, COOKIE_SLOT).await? {
            self.save_cookie_jar(session, &jar).await?;
        }
        tracing::debug!(session_id = %session, expires_at = %record.expires_at, "Legacy session extended");
        Ok(true)
    }

    /// Drops the stored handle and this session's legacy cookies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn clear_session(&self, session: &SessionId) -> Result<(), Error> {
        self.records.remove(session, LEGACY_SESSION_SLOT).await?;
        self.records.remove(session, COOKIE_SLOT).await?;
        tracing::info!(session_id = %session, "Legacy session cleared");
        Ok(())
    }

    /// Legacy cookies of `session`; empty when none are stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn cookie_jar(&self, session: &SessionId) -> Result<LegacyCookieJar, Error> {
        Ok(self
            .records
            .load(session, COOKIE_SLOT)
            .await?
            .unwrap_or_default())
    }

    /// Persists `jar` for `session` with the legacy session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn save_cookie_jar(
        &self,
        session: &SessionId,
        jar: &LegacyCookieJar,
    ) -> Result<(), Error> {
        self.records
            .save(session, COOKIE_SLOT, jar, self.session_timeout)
            .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn current_session_id(
        &self,
        session: &SessionId,
    ) -> Result<Option<LegacySessionId>, Error> {
        Ok(self.current_session(session).await?.map(|r| r.session_id))
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] if the session store fails.
    pub async fn current_session(
        &self,
        session: &SessionId,
    ) -> Result<Option<LegacySessionRecord>, Error> {
        self.records.load(session, LEGACY_SESSION_SLOT).await
    }
}

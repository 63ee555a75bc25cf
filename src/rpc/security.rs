use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::codec::RpcOutcome;
use super::cookies::LegacyCookieJar;
use super::transport::{Idempotency, RpcTransport};
use crate::error::Error;

pub const SECURITY_SERVICE: &str = "net.datenwerke.security.client.security.rpc.SecurityRpcService";
const SECURITY_PATH: &str = "security";
const SESSION_COOKIE: &str = "JSESSIONID";

/// User as returned by a direct legacy login.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUser {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
}

impl LegacyUser {
    /// Reads the flattened `[username, email, id, ...]` payload.
    fn from_payload(payload: &JsonValue) -> Option<Self> {
        let items = payload.as_array()?;
        let username = items.first()?.as_str()?.to_owned();
        let email = items
            .get(1)
            .and_then(JsonValue::as_str)
            .filter(|e| !e.is_empty())
            .map(str::to_owned);
        let id = items.get(2).and_then(JsonValue::as_i64).unwrap_or_default();
        Some(Self { id, username, email })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAuthentication {
    pub success: bool,
    /// Container session id (`JSESSIONID`) captured from the client's jar.
    pub session_id: Option<String>,
    pub user: Option<LegacyUser>,
    pub error_message: Option<String>,
}

/// Username/password login against the legacy security service.
///
/// On success the server's session cookie lands in the client's jar; terminal
/// calls made with the same jar then run as this user.
#[derive(Clone)]
pub struct LegacySecurityClient {
    transport: Arc<RpcTransport>,
    jar: Arc<LegacyCookieJar>,
}

impl LegacySecurityClient {
    /// A client with an empty cookie jar.
    #[must_use]
    pub fn new(transport: Arc<RpcTransport>) -> Self {
        Self {
            transport,
            jar: Arc::new(LegacyCookieJar::new()),
        }
    }

    #[must_use]
    pub fn with_jar(mut self, jar: Arc<LegacyCookieJar>) -> Self {
        self.jar = jar;
        self
    }

    #[must_use]
    pub fn jar(&self) -> &Arc<LegacyCookieJar> {
        &self.jar
    }

    /// # Errors
    ///
    /// Transport failures, or [`Error::ProtocolFormat`] for a reply that is
    /// neither `//OK` nor `//EX`. Rejected credentials come back as an
    /// unsuccessful [`LegacyAuthentication`].
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LegacyAuthentication, Error> {
        let result = self
            .transport
            .call::<JsonValue>(
                &self.jar,
                SECURITY_PATH,
                SECURITY_SERVICE,
                "authenticate",
                &[username.into(), password.into()],
                Idempotency::NonIdempotent,
            )
            .await?;

        let auth = match result.into_outcome() {
            RpcOutcome::Success(payload) => {
                let host = self.transport.config().cookie_host();
                LegacyAuthentication {
                    success: true,
                    session_id: self.jar.get(host, SESSION_COOKIE),
                    user: LegacyUser::from_payload(&payload),
                    error_message: None,
                }
            }
            RpcOutcome::Remote { message, .. } => LegacyAuthentication {
                success: false,
                session_id: None,
                user: None,
                error_message: Some(message),
            },
            RpcOutcome::Malformed(reason) => return Err(Error::ProtocolFormat(reason)),
        };

        if auth.success {
            tracing::info!(username = %username, "Legacy login succeeded");
        } else {
            tracing::warn!(
                username = %username,
                reason = auth.error_message.as_deref().unwrap_or_default(),
                "Legacy login rejected"
            );
        }
        Ok(auth)
    }
}

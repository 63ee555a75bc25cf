use axum_extra::extract::cookie::Key;

use super::error::BridgeError;
use crate::bridge::SessionBridge;
use crate::config::BridgeOptions;
use crate::oauth::OidcConfig;
use crate::rpc::LegacyConfig;
use crate::store::SessionStore;

/// HTTP-layer settings shared by config and runtime state.
#[derive(Clone)]
pub(crate) struct HttpSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) session_ttl_hours: i64,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) logout_redirect: String,
}

impl HttpSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "__rs_bridge_session".into(),
            session_ttl_hours: 12,
            secure_cookies: true,
            auth_path: "/auth".into(),
            logout_redirect: "/auth/login".into(),
        }
    }
}

/// Session bridge HTTP configuration.
///
/// The wired [`SessionBridge`] is a constructor parameter; cookie and route
/// settings have defaults overridable with `with_*` methods.
///
/// Use [`from_env()`](BridgeConfig::from_env) for convention-based setup.
pub struct BridgeConfig {
    pub(super) bridge: SessionBridge,
    pub(super) settings: HttpSettings,
}

impl BridgeConfig {
    #[must_use]
    pub fn new(bridge: SessionBridge) -> Self {
        Self {
            bridge,
            settings: HttpSettings::defaults(),
        }
    }

    /// Create config from environment variables, persisting sessions in `store`.
    ///
    /// # Required env vars
    /// - `OIDC_AUTHORITY`, `OIDC_CLIENT_ID`, `OIDC_CLIENT_SECRET`
    /// - `REPORTSERVER_URL`
    ///
    /// # Optional env vars
    /// - `OIDC_SCOPES`, `OIDC_REFRESH_THRESHOLD_SECS`
    /// - `REPORTSERVER_SESSION_TIMEOUT_SECS`, `REPORTSERVER_ENABLE_BRIDGE`
    /// - `DEV_AUTH`: Set to `"1"` or `"true"` to disable secure cookies
    /// - `COOKIE_KEY`: Cookie encryption key bytes
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if required env vars are missing or invalid.
    pub fn from_env<S: SessionStore>(store: S) -> Result<Self, BridgeError> {
        let oidc = OidcConfig::from_env()?;
        let legacy = LegacyConfig::from_env()?;
        let options = BridgeOptions::from_env()?;
        let bridge = SessionBridge::builder(oidc, legacy, store)
            .options(options)
            .build()?;

        let dev_auth = matches!(
            std::env::var("DEV_AUTH").as_deref(),
            Ok("1") | Ok("true"),
        );

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                BridgeError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => Key::generate(),
        };

        Ok(Self::new(bridge)
            .with_cookie_key(cookie_key)
            .with_secure_cookies(!dev_auth))
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_session_ttl_hours(mut self, hours: i64) -> Self {
        self.settings.session_ttl_hours = hours;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }
}

use time::Duration;

use crate::error::Error;

/// Lifetime and refresh policy shared by the bridge components.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BridgeOptions {
    pub(crate) token_refresh_threshold: Duration,
    pub(crate) session_timeout: Duration,
    pub(crate) enable_session_bridge: bool,
    pub(crate) login_path: String,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            token_refresh_threshold: Duration::minutes(5),
            session_timeout: Duration::hours(1),
            enable_session_bridge: true,
            login_path: "/auth/login".into(),
        }
    }
}

impl BridgeOptions {
    /// Read overrides from the environment.
    ///
    /// # Optional env vars
    /// - `OIDC_REFRESH_THRESHOLD_SECS`: refresh the access token this long before expiry
    /// - `REPORTSERVER_SESSION_TIMEOUT_SECS`: sliding lifetime of the legacy session
    /// - `REPORTSERVER_ENABLE_BRIDGE`: `"0"` or `"false"` disables legacy bridging
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let mut options = Self::default();
        if let Some(secs) = env_secs("OIDC_REFRESH_THRESHOLD_SECS")? {
            options = options.with_token_refresh_threshold(secs);
        }
        if let Some(secs) = env_secs("REPORTSERVER_SESSION_TIMEOUT_SECS")? {
            options = options.with_session_timeout(secs);
        }
        if let Ok(flag) = std::env::var("REPORTSERVER_ENABLE_BRIDGE") {
            options = options.with_session_bridge(!matches!(flag.as_str(), "0" | "false"));
        }
        Ok(options)
    }

    #[must_use]
    pub fn with_token_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.token_refresh_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_bridge(mut self, enabled: bool) -> Self {
        self.enable_session_bridge = enabled;
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn token_refresh_threshold(&self) -> Duration {
        self.token_refresh_threshold
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    #[must_use]
    pub fn session_bridge_enabled(&self) -> bool {
        self.enable_session_bridge
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>, Error> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(|s| Some(Duration::seconds(s)))
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_conventions() {
        let options = BridgeOptions::default();
        assert_eq!(options.token_refresh_threshold(), Duration::minutes(5));
        assert_eq!(options.session_timeout(), Duration::hours(1));
        assert!(options.session_bridge_enabled());
        assert_eq!(options.login_path(), "/auth/login");
    }

    #[test]
    fn builder_overrides() {
        let options = BridgeOptions::default()
            .with_session_timeout(Duration::minutes(20))
            .with_session_bridge(false);
        assert_eq!(options.session_timeout(), Duration::minutes(20));
        assert!(!options.session_bridge_enabled());
    }
}

use serde::{Deserialize, Serialize};
use url::Url;

use crate::claims::{Claims, UserInfo};
use crate::error::Error;

/// OIDC provider configuration (Keycloak realm layout).
///
/// Required fields are constructor parameters; endpoints are derived from the
/// authority and can be overridden individually.
///
/// ```rust,ignore
/// let config = OidcConfig::new(
///     "https://sso.example.com/realms/reporting".parse()?,
///     "rs-bridge",
///     "secret",
/// )
/// .with_scopes(vec!["openid".into()]);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OidcConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) token_url: Url,
    pub(crate) userinfo_url: Url,
    pub(crate) logout_url: Url,
    pub(crate) scopes: Vec<String>,
}

impl OidcConfig {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authority cannot be joined with the
    /// standard `protocol/openid-connect/*` paths.
    pub fn new(
        authority: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, Error> {
        let endpoint = |name: &str| {
            let base = authority.as_str().trim_end_matches('/');
            format!("{base}/protocol/openid-connect/{name}")
                .parse::<Url>()
                .map_err(|e| Error::Config(format!("OIDC {name} endpoint: {e}")))
        };
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: endpoint("token")?,
            userinfo_url: endpoint("userinfo")?,
            logout_url: endpoint("logout")?,
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
        })
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `OIDC_AUTHORITY`: realm URL, e.g. `https://sso.example.com/realms/reporting`
    /// - `OIDC_CLIENT_ID`: confidential client ID
    /// - `OIDC_CLIENT_SECRET`: client secret
    ///
    /// # Optional env vars
    /// - `OIDC_SCOPES`: Space- or comma-separated scopes
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or the authority is invalid.
    pub fn from_env() -> Result<Self, Error> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{name} is required")))
        };
        let authority: Url = required("OIDC_AUTHORITY")?
            .parse()
            .map_err(|e| Error::Config(format!("OIDC_AUTHORITY: {e}")))?;
        let mut config = Self::new(
            authority,
            required("OIDC_CLIENT_ID")?,
            required("OIDC_CLIENT_SECRET")?,
        )?;
        if let Ok(scopes) = std::env::var("OIDC_SCOPES") {
            config = config.with_scopes(
                scopes
                    .split([',', ' '])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }
        Ok(config)
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the userinfo endpoint.
    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = url;
        self
    }

    /// Override the end-session endpoint.
    #[must_use]
    pub fn with_logout_url(mut self, url: Url) -> Self {
        self.logout_url = url;
        self
    }

    /// Override the requested scopes (default: `["openid", "profile", "email"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn userinfo_url(&self) -> &Url {
        &self.userinfo_url
    }

    #[must_use]
    pub fn logout_url(&self) -> &Url {
        &self.logout_url
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Token response from the provider's token endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub session_state: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl TokenResponse {
    /// Minimal response carrying only an access token and its lifetime.
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>, expires_in: i64) -> Self {
        self.refresh_token = Some(token.into());
        self.refresh_expires_in = expires_in;
        self
    }

    #[must_use]
    pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
        self.id_token = Some(token.into());
        self
    }
}

/// Raw client for the provider's token, userinfo and end-session endpoints.
pub struct IdentityClient {
    config: OidcConfig,
    http: reqwest::Client,
}

impl IdentityClient {
    #[must_use]
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Resource-owner password grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::OAuth`] if the token endpoint rejects the credentials.
    pub async fn password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, Error> {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", scope.as_str()),
        ];
        self.token_request(&params, "password grant").await
    }

    /// Refresh-token grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::OAuth`] if the token endpoint rejects the refresh token.
    pub async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params, "refresh grant").await
    }

    /// Fetch user info using an access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::OAuth`] if the userinfo endpoint returns an error.
    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo, Error> {
        let response = self
            .http
            .get(self.config.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::ensure_success(response, "userinfo request").await?;
        let claims = response.json::<serde_json::Value>().await?;
        Ok(Claims::from_json(&claims).into())
    }

    /// Ends the provider-side session for a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::OAuth`] if the logout endpoint returns an error.
    pub async fn end_session(&self, refresh_token: &str) -> Result<(), Error> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .http
            .post(self.config.logout_url.clone())
            .form(&params)
            .send()
            .await?;
        Self::ensure_success(response, "end session").await?;
        Ok(())
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, Error> {
        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(params)
            .send()
            .await?;

        let response = Self::ensure_success(response, operation).await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::OAuth {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config(server: &MockServer) -> OidcConfig {
        OidcConfig::new(
            format!("{}/realms/rs", server.uri()).parse().unwrap(),
            "rs-bridge",
            "s3cret",
        )
        .unwrap()
    }

    #[test]
    fn config_derives_keycloak_endpoints() {
        let config = OidcConfig::new(
            "https://sso.example.com/realms/rs/".parse().unwrap(),
            "app",
            "secret",
        )
        .unwrap();

        assert_eq!(
            config.token_url().as_str(),
            "https://sso.example.com/realms/rs/protocol/openid-connect/token"
        );
        assert_eq!(
            config.logout_url().as_str(),
            "https://sso.example.com/realms/rs/protocol/openid-connect/logout"
        );
        assert_eq!(config.scopes(), &["openid", "profile", "email"]);
    }

    #[test]
    fn token_response_defaults() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"A","expires_in":300}"#).unwrap();
        assert_eq!(parsed.token_type, "Bearer");
        assert_eq!(parsed.refresh_token, None);
        assert_eq!(parsed.expires_in, 300);
    }

    #[tokio::test]
    async fn password_grant_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/rs/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("scope=openid+profile+email"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A",
                "refresh_token": "R",
                "expires_in": 3600,
                "refresh_expires_in": 7200,
                "token_type": "Bearer",
                "session_state": "ss-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = IdentityClient::new(test_config(&server));
        let tokens = client.password_grant("alice", "pw").await.unwrap();
        assert_eq!(tokens.access_token, "A");
        assert_eq!(tokens.refresh_token.as_deref(), Some("R"));
        assert_eq!(tokens.session_state.as_deref(), Some("ss-1"));
    }

    #[tokio::test]
    async fn rejected_refresh_is_oauth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let client = IdentityClient::new(test_config(&server));
        let err = client.refresh_grant("stale").await.unwrap_err();
        assert!(matches!(err, Error::OAuth { status: Some(400), .. }));
    }

    #[tokio::test]
    async fn user_info_uses_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realms/rs/protocol/openid-connect/userinfo"))
            .and(header("authorization", "Bearer A"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "u-1",
                "preferred_username": "alice",
                "groups": ["/ops"]
            })))
            .mount(&server)
            .await;

        let client = IdentityClient::new(test_config(&server));
        let user = client.user_info("A").await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.groups.contains("/ops"));
    }
}

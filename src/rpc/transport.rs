use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use url::Url;

use super::codec::{DEFAULT_PERMUTATION, RpcCodec, RpcParam, RpcResult, decode_response};
use super::cookies::LegacyCookieJar;
use crate::error::Error;

const GWT_CONTENT_TYPE: &str = "text/x-gwt-rpc; charset=utf-8";
const MODULE_BASE_HEADER: &str = "X-GWT-Module-Base";
const PERMUTATION_HEADER: &str = "X-GWT-Permutation";

/// Bounded exponential backoff for idempotent legacy calls.
///
/// Delays are `base_delay * 2^(retry - 1)`: 1 s, 2 s, 4 s with the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Whether a call may be repeated without changing the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
}

/// Legacy report server connection settings.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LegacyConfig {
    pub(crate) base_url: Url,
    pub(crate) module_base_url: String,
    pub(crate) permutation: String,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeout: Duration,
}

impl LegacyConfig {
    /// `base_url` is the server root; the GWT module lives under `reportserver/`.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let module_base_url = format!("{base_url}reportserver/");
        Self {
            base_url,
            module_base_url,
            permutation: DEFAULT_PERMUTATION.into(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `REPORTSERVER_URL`: legacy server root URL
    ///
    /// # Optional env vars
    /// - `REPORTSERVER_PERMUTATION`: GWT permutation strong name
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `REPORTSERVER_URL` is missing or invalid.
    pub fn from_env() -> Result<Self, Error> {
        let raw = std::env::var("REPORTSERVER_URL")
            .map_err(|_| Error::Config("REPORTSERVER_URL is required".into()))?;
        let url: Url = raw
            .parse()
            .map_err(|e| Error::Config(format!("REPORTSERVER_URL: {e}")))?;
        let mut config = Self::new(url);
        if let Ok(permutation) = std::env::var("REPORTSERVER_PERMUTATION") {
            config = config.with_permutation(permutation);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_permutation(mut self, permutation: impl Into<String>) -> Self {
        self.permutation = permutation.into();
        self
    }

    #[must_use]
    pub fn with_module_base_url(mut self, url: impl Into<String>) -> Self {
        self.module_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Host the legacy session cookies are scoped to.
    #[must_use]
    pub fn cookie_host(&self) -> &str {
        self.base_url.host_str().unwrap_or("localhost")
    }
}

/// HTTP leg to the legacy server: one client and one codec, shared by every
/// web session. Cookies travel in the caller's [`LegacyCookieJar`].
pub struct RpcTransport {
    http: reqwest::Client,
    codec: RpcCodec,
    config: LegacyConfig,
}

impl RpcTransport {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the GWT headers are not valid header values,
    /// or [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: LegacyConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(GWT_CONTENT_TYPE));
        headers.insert(MODULE_BASE_HEADER, header_value(&config.module_base_url)?);
        headers.insert(PERMUTATION_HEADER, header_value(&config.permutation)?);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        let codec = RpcCodec::new(config.module_base_url.clone(), config.permutation.clone());
        Ok(Self {
            http,
            codec,
            config,
        })
    }

    #[must_use]
    pub fn codec(&self) -> &RpcCodec {
        &self.codec
    }

    #[must_use]
    pub fn config(&self) -> &LegacyConfig {
        &self.config
    }

    /// Endpoint of a GWT service, e.g. `terminal` → `<base>/reportserver/terminal`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the path cannot be joined onto the base URL.
    pub fn service_url(&self, service_path: &str) -> Result<Url, Error> {
        self.config
            .base_url
            .join(&format!("reportserver/{service_path}"))
            .map_err(|e| Error::Config(format!("service path {service_path}: {e}")))
    }

    /// Encodes, posts and decodes one call, sending and updating `jar`.
    ///
    /// `//EX` and malformed responses come back inside the [`RpcResult`];
    /// only transport failures are returned as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] or [`Error::Transport`] once retries are exhausted.
    pub async fn call<T: DeserializeOwned>(
        &self,
        jar: &LegacyCookieJar,
        service_path: &str,
        service_interface: &str,
        method_name: &str,
        params: &[RpcParam],
        idempotency: Idempotency,
    ) -> Result<RpcResult<T>, Error> {
        let payload = self
            .codec
            .encode_request(service_interface, method_name, params);
        let raw = self.post(jar, service_path, payload, idempotency).await?;
        let result = decode_response::<T>(&raw);
        if let Some(reason) = result.is_protocol_error().then(|| result.error_message()).flatten() {
            tracing::error!(
                service = %service_interface,
                method = %method_name,
                reason = %reason,
                "Malformed legacy response; client and server protocol versions may differ"
            );
        }
        Ok(result)
    }

    /// Posts a pre-encoded payload, retrying transport failures of idempotent calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] or [`Error::Transport`] once retries are exhausted.
    pub async fn post(
        &self,
        jar: &LegacyCookieJar,
        service_path: &str,
        payload: String,
        idempotency: Idempotency,
    ) -> Result<String, Error> {
        let url = self.service_url(service_path)?;
        let max_retries = match idempotency {
            Idempotency::Idempotent => self.config.retry.max_retries,
            Idempotency::NonIdempotent => 0,
        };

        let mut retry = 0;
        loop {
            match self.post_once(jar, &url, payload.clone()).await {
                Ok(body) => return Ok(body),
                Err(e) if retry < max_retries && e.is_retryable() => {
                    retry += 1;
                    let delay = self.config.retry.delay(retry);
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "Legacy call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Legacy call failed");
                    return Err(e);
                }
            }
        }
    }

    async fn post_once(&self, jar: &LegacyCookieJar, url: &Url, payload: String) -> Result<String, Error> {
        let mut request = self.http.post(url.clone()).body(payload);
        if let Some(cookies) = jar.header_for(url) {
            request = request.header(COOKIE, cookies);
        }
        let response = request.send().await?;
        jar.store_response_cookies(response.headers(), url);
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Transport {
                operation: "legacy rpc",
                status: status.as_u16(),
                detail,
            });
        }
        Ok(response.text().await?)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|e| Error::Config(format!("invalid header value {value:?}: {e}")))
}

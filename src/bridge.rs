use std::sync::Arc;

use crate::clock::{self, Clock};
use crate::config::BridgeOptions;
use crate::correlator::{LegacySessionIssuer, SessionCorrelator};
use crate::error::Error;
use crate::identity::IdentityBridge;
use crate::interceptor::{InterceptorChain, SessionSyncInterceptor};
use crate::oauth::{IdentityClient, OidcConfig};
use crate::rpc::{LegacyConfig, LegacySecurityClient, RpcTransport};
use crate::store::{SessionRecords, SessionStore};
use crate::sync::SessionSynchronizer;
use crate::terminal::BridgedTerminal;
use crate::token_store::TokenStore;

/// Every bridge component, wired against one session store and one legacy transport.
///
/// ```rust,ignore
/// let bridge = SessionBridge::builder(oidc, legacy, MemorySessionStore::new())
///     .options(BridgeOptions::from_env()?)
///     .build()?;
/// let ok = bridge.synchronizer().synchronize_sessions(&session_id).await?;
/// ```
#[derive(Clone)]
pub struct SessionBridge {
    options: BridgeOptions,
    transport: Arc<RpcTransport>,
    tokens: Arc<TokenStore>,
    correlator: Arc<SessionCorrelator>,
    identity: Arc<IdentityBridge>,
    synchronizer: Arc<SessionSynchronizer>,
    terminal: BridgedTerminal,
}

impl SessionBridge {
    #[must_use]
    pub fn builder<S: SessionStore>(
        oidc: OidcConfig,
        legacy: LegacyConfig,
        store: S,
    ) -> SessionBridgeBuilder {
        SessionBridgeBuilder {
            oidc,
            legacy,
            records: SessionRecords::new(store),
            options: BridgeOptions::default(),
            clock: clock::system(),
            issuer: None,
            http: None,
        }
    }

    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<RpcTransport> {
        &self.transport
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    #[must_use]
    pub fn correlator(&self) -> &Arc<SessionCorrelator> {
        &self.correlator
    }

    #[must_use]
    pub fn identity(&self) -> &Arc<IdentityBridge> {
        &self.identity
    }

    #[must_use]
    pub fn synchronizer(&self) -> &Arc<SessionSynchronizer> {
        &self.synchronizer
    }

    #[must_use]
    pub fn terminal(&self) -> &BridgedTerminal {
        &self.terminal
    }

    /// Security service client with an empty cookie jar of its own.
    #[must_use]
    pub fn security(&self) -> LegacySecurityClient {
        LegacySecurityClient::new(self.transport.clone())
    }

    /// Default request pipeline: session synchronization with the standard allow-list.
    #[must_use]
    pub fn interceptors(&self) -> InterceptorChain {
        InterceptorChain::new().with(SessionSyncInterceptor::new(self.synchronizer.clone()))
    }
}

pub struct SessionBridgeBuilder {
    oidc: OidcConfig,
    legacy: LegacyConfig,
    records: SessionRecords,
    options: BridgeOptions,
    clock: Arc<dyn Clock>,
    issuer: Option<Arc<dyn LegacySessionIssuer>>,
    http: Option<reqwest::Client>,
}

impl SessionBridgeBuilder {
    #[must_use]
    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn issuer(mut self, issuer: Arc<dyn LegacySessionIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// HTTP client for identity provider calls.
    #[must_use]
    pub fn identity_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Http`] if the legacy transport
    /// cannot be created.
    pub fn build(self) -> Result<SessionBridge, Error> {
        let Self {
            oidc,
            legacy,
            records,
            options,
            clock,
            issuer,
            http,
        } = self;

        let transport = Arc::new(RpcTransport::new(legacy)?);
        let mut client = IdentityClient::new(oidc);
        if let Some(http) = http {
            client = client.with_http_client(http);
        }
        let client = Arc::new(client);

        let tokens = Arc::new(TokenStore::new(
            records.clone(),
            client.clone(),
            clock.clone(),
            &options,
        ));

        let mut correlator = SessionCorrelator::new(
            records.clone(),
            transport.config().cookie_host().to_owned(),
            clock.clone(),
            &options,
        );
        if let Some(issuer) = issuer {
            correlator = correlator.with_issuer(issuer);
        }
        let correlator = Arc::new(correlator);

        let identity = Arc::new(IdentityBridge::new(
            client,
            tokens.clone(),
            correlator.clone(),
            records,
            clock.clone(),
            options.clone(),
        ));
        let synchronizer = Arc::new(SessionSynchronizer::new(
            identity.clone(),
            tokens.clone(),
            correlator.clone(),
            clock,
            options.clone(),
        ));
        let terminal = BridgedTerminal::new(transport.clone(), correlator.clone());

        Ok(SessionBridge {
            options,
            transport,
            tokens,
            correlator,
            identity,
            synchronizer,
            terminal,
        })
    }
}

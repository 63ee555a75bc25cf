//! Pre-handler hooks run for every inbound request.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Error;
use crate::sync::SessionSynchronizer;
use crate::types::SessionId;

/// Paths that never trigger session synchronization (prefix match).
pub const DEFAULT_ALLOW_LIST: &[&str] = &[
    "/auth/login",
    "/auth/logout",
    "/auth/challenge",
    "/auth/error",
    "/health",
    "/alive",
    "/_framework",
    "/css",
    "/js",
    "/images",
    "/favicon.ico",
];

/// What an interceptor saw: the request path and the web session, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub path: String,
    pub session: Option<SessionId>,
}

impl RequestContext {
    #[must_use]
    pub fn new(path: impl Into<String>, session: Option<SessionId>) -> Self {
        Self {
            path: path.into(),
            session,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop the chain; the session is gone and the user should sign in again at this path.
    Redirect(String),
}

pub trait Interceptor: Send + Sync + 'static {
    fn before<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, Result<Flow, Error>>;
}

/// Ordered interceptors; the first non-[`Flow::Continue`] outcome wins.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// # Errors
    ///
    /// The first interceptor error aborts the chain.
    pub async fn run(&self, ctx: &RequestContext) -> Result<Flow, Error> {
        for interceptor in &self.interceptors {
            match interceptor.before(ctx).await? {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Continue)
    }
}

/// Synchronizes the web session before the handler runs and signs out
/// sessions that can no longer be kept alive.
pub struct SessionSyncInterceptor {
    synchronizer: Arc<SessionSynchronizer>,
    allow_list: Vec<String>,
}

impl SessionSyncInterceptor {
    #[must_use]
    pub fn new(synchronizer: Arc<SessionSynchronizer>) -> Self {
        Self {
            synchronizer,
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    #[must_use]
    pub fn with_allow_list(mut self, paths: Vec<String>) -> Self {
        self.allow_list = paths;
        self
    }

    #[must_use]
    pub fn allow(mut self, path: impl Into<String>) -> Self {
        self.allow_list.push(path.into());
        self
    }

    #[must_use]
    pub fn is_allowed(&self, path: &str) -> bool {
        self.allow_list.iter().any(|p| path.starts_with(p.as_str()))
    }

    async fn check(&self, ctx: &RequestContext) -> Result<Flow, Error> {
        let Some(session) = ctx.session.as_ref() else {
            return Ok(Flow::Continue);
        };
        if self.is_allowed(&ctx.path) {
            return Ok(Flow::Continue);
        }

        let outcome = self.synchronizer.synchronize(session).await?;
        if !outcome.is_expired() {
            return Ok(Flow::Continue);
        }

        tracing::info!(session_id = %session, path = %ctx.path, "Session expired during request");
        let expiry = self.synchronizer.handle_session_expiry(session).await?;
        Ok(expiry.redirect_to.map_or(Flow::Continue, Flow::Redirect))
    }
}

impl Interceptor for SessionSyncInterceptor {
    fn before<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, Result<Flow, Error>> {
        Box::pin(self.check(ctx))
    }
}

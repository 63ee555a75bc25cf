use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::HttpSettings;
use crate::bridge::SessionBridge;
use crate::interceptor::InterceptorChain;

/// Shared state for bridge route handlers and the synchronization layer.
#[derive(Clone)]
pub(super) struct BridgeState {
    pub(super) bridge: Arc<SessionBridge>,
    pub(super) interceptors: InterceptorChain,
    pub(super) settings: HttpSettings,
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<BridgeState> for Key {
    fn from_ref(state: &BridgeState) -> Self {
        state.settings.cookie_key.clone()
    }
}

#![doc = include_str!("../README.md")]

pub mod bridge;
pub mod claims;
pub mod clock;
pub mod config;
pub mod correlator;
pub mod error;
pub mod identity;
pub mod interceptor;
pub mod middleware;
pub mod oauth;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod terminal;
pub mod token_store;
pub mod types;

// Re-exports for convenient access
pub use bridge::{SessionBridge, SessionBridgeBuilder};
pub use claims::{Claims, UserInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BridgeOptions;
pub use correlator::{
    LegacySessionIssuer, LegacySessionRecord, OpaqueIssuer, SessionBridgeResult, SessionCorrelator,
};
pub use error::{Error, ErrorKind, TaggedError};
pub use identity::{AuthenticationResult, IdentityBridge};
pub use interceptor::{Flow, Interceptor, InterceptorChain, RequestContext, SessionSyncInterceptor};
pub use oauth::{IdentityClient, OidcConfig, TokenResponse};
pub use rpc::{
    AutocompleteResult, CommandResult, CommandResultType, LegacyConfig, LegacySecurityClient,
    RpcTransport, TerminalClient, TerminalSessionInfo,
};
pub use store::{MemorySessionStore, SessionRecords, SessionStore, StoreError};
pub use sync::{ExpiryOutcome, SessionInfo, SessionSynchronizer, SyncOutcome, SyncState};
pub use terminal::BridgedTerminal;
pub use token_store::{StoredToken, TokenStore};
pub use types::{Envelope, LegacySessionId, SessionId};

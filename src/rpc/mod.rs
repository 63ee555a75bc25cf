//! Client side of the legacy report server's GWT-RPC protocol.

pub mod codec;
pub mod cookies;
pub mod security;
pub mod terminal;
pub mod transport;

pub use codec::{RpcCodec, RpcOutcome, RpcParam, RpcResult, decode_response};
pub use cookies::LegacyCookieJar;
pub use security::{LegacyAuthentication, LegacySecurityClient, LegacyUser};
pub use terminal::{
    AutocompleteResult, CommandResult, CommandResultType, TerminalClient, TerminalSessionInfo,
};
pub use transport::{Idempotency, LegacyConfig, RetryPolicy, RpcTransport};

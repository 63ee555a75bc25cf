use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::correlator::SessionCorrelator;
use crate::error::{Error, ErrorKind, TaggedError};
use crate::rpc::{
    AutocompleteResult, CommandResult, RpcTransport, TerminalClient, TerminalSessionInfo,
};
use crate::types::{Envelope, SessionId};

/// Terminal access for signed-in web sessions.
///
/// Every call first checks that the web session holds a live legacy session;
/// when it does not, the call fails with [`Error::AuthenticationRequired`]
/// before anything is sent to the legacy server. Calls run with the web
/// session's own cookie jar, and cookies the server sets are kept for that
/// session only.
#[derive(Clone)]
pub struct BridgedTerminal {
    transport: Arc<RpcTransport>,
    correlator: Arc<SessionCorrelator>,
}

impl BridgedTerminal {
    #[must_use]
    pub fn new(transport: Arc<RpcTransport>, correlator: Arc<SessionCorrelator>) -> Self {
        Self {
            transport,
            correlator,
        }
    }

    pub async fn init_session(
        &self,
        session: &SessionId,
        node: Option<&JsonValue>,
        env_mapping: Option<&BTreeMap<String, String>>,
    ) -> Envelope<TerminalSessionInfo> {
        self.gated(session, "initSession", |client| async move {
            client.init_session(node, env_mapping).await
        })
        .await
    }

    /// Failed commands come back with `is_success == false` and the result attached.
    pub async fn execute(
        &self,
        session: &SessionId,
        terminal_id: &str,
        command: &str,
        cancel: &CancellationToken,
    ) -> Envelope<CommandResult> {
        let envelope = self
            .gated(session, "execute", |client| async move {
                client.execute(terminal_id, command, cancel).await
            })
            .await;
        command_envelope(envelope)
    }

    pub async fn autocomplete(
        &self,
        session: &SessionId,
        terminal_id: &str,
        command: &str,
        cursor: u32,
        force: bool,
    ) -> Envelope<AutocompleteResult> {
        self.gated(session, "autocomplete", |client| async move {
            client.autocomplete(terminal_id, command, cursor, force).await
        })
        .await
    }

    pub async fn interrupt(&self, session: &SessionId, terminal_id: &str) -> Envelope<CommandResult> {
        let envelope = self
            .gated(session, "interrupt", |client| async move {
                client.interrupt(terminal_id).await
            })
            .await;
        command_envelope(envelope)
    }

    pub async fn close_session(&self, session: &SessionId, terminal_id: &str) -> Envelope<()> {
        self.gated(session, "closeSession", |client| async move {
            client.close_session(terminal_id).await
        })
        .await
    }

    async fn gated<T, F, Fut>(&self, session: &SessionId, operation: &'static str, call: F) -> Envelope<T>
    where
        F: FnOnce(TerminalClient) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let result = match self.correlator.has_valid_session(session).await {
            Ok(true) => self.with_session_cookies(session, call).await,
            Ok(false) => Err(Error::AuthenticationRequired),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            match e.kind() {
                ErrorKind::ProtocolFormat | ErrorKind::Internal => {
                    tracing::error!(session_id = %session, operation, error = %e, "Terminal call failed");
                }
                _ => tracing::warn!(session_id = %session, operation, error = %e, "Terminal call failed"),
            }
        }
        result.into()
    }

    async fn with_session_cookies<T, F, Fut>(&self, session: &SessionId, call: F) -> Result<T, Error>
    where
        F: FnOnce(TerminalClient) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let jar = Arc::new(self.correlator.cookie_jar(session).await?);
        let client = TerminalClient::new(self.transport.clone()).with_jar(jar.clone());
        let result = call(client).await;
        let saved = self.correlator.save_cookie_jar(session, &jar).await;
        // The call's own failure wins over a failed save.
        let value = result?;
        saved.map(|()| value)
    }
}

fn command_envelope(envelope: Envelope<CommandResult>) -> Envelope<CommandResult> {
    match envelope.data {
        Some(result) if result.is_error() => {
            let message = result.error.clone().unwrap_or_default();
            Envelope {
                is_success: false,
                message: message.clone(),
                error: Some(TaggedError::new(ErrorKind::RemoteCommand, message)),
                data: Some(result),
            }
        }
        data => Envelope { data, ..envelope },
    }
}

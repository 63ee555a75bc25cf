use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::codec::{RpcOutcome, RpcParam};
use super::cookies::LegacyCookieJar;
use super::transport::{Idempotency, RpcTransport};
use crate::error::Error;

pub const TERMINAL_SERVICE: &str = "net.datenwerke.rs.terminal.client.terminal.rpc.TerminalRpcService";
const TERMINAL_PATH: &str = "terminal";

const DEFAULT_PROMPT: &str = "rs> ";
const DEFAULT_WORKING_DIRECTORY: &str = "/";

/// A stateful remote terminal opened on the legacy server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSessionInfo {
    pub session_id: String,
    pub prompt: String,
    pub working_directory: String,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResultType {
    #[default]
    Success,
    Error,
    Info,
    Warning,
    Prompt,
}

impl CommandResultType {
    /// Wire code. Unknown codes are treated as informational output.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Error,
            2 => Self::Info,
            3 => Self::Warning,
            4 => Self::Prompt,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub result: String,
    #[serde(rename = "type")]
    pub result_type: CommandResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_prompt: Option<String>,
    #[serde(default)]
    pub session_closed: bool,
}

impl CommandResult {
    /// A command the server rejected, carrying its message verbatim.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result_type: CommandResultType::Error,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.result_type == CommandResultType::Error
    }
}

/// Command results arrive either positionally or as a named object.
#[derive(Deserialize)]
#[serde(untagged)]
enum CommandResultWire {
    Positional(
        JsonValue,
        i64,
        Option<String>,
        Option<String>,
        Option<String>,
        bool,
    ),
    Named(NamedCommandResult),
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct NamedCommandResult {
    result: Option<String>,
    #[serde(rename = "type")]
    type_code: Option<i64>,
    error: Option<String>,
    data: Option<JsonValue>,
    new_prompt: Option<String>,
    session_closed: Option<bool>,
}

impl From<CommandResultWire> for CommandResult {
    fn from(wire: CommandResultWire) -> Self {
        match wire {
            CommandResultWire::Positional(data, code, error, new_prompt, result, session_closed) => {
                Self {
                    result: result.unwrap_or_default(),
                    result_type: CommandResultType::from_code(code),
                    error: error.filter(|e| !e.is_empty()),
                    data: Some(data).filter(|d| !d.is_null()),
                    new_prompt,
                    session_closed,
                }
            }
            CommandResultWire::Named(named) => Self {
                result: named.result.unwrap_or_default(),
                result_type: CommandResultType::from_code(named.type_code.unwrap_or(0)),
                error: named.error.filter(|e| !e.is_empty()),
                data: named.data.filter(|d| !d.is_null()),
                new_prompt: named.new_prompt,
                session_closed: named.session_closed.unwrap_or(false),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutocompleteResult {
    pub suggestions: Vec<String>,
    pub completed_command: Option<String>,
    pub replacement_start: i64,
    pub replacement_end: i64,
    #[serde(rename = "hasMoreSuggestions")]
    pub has_more: bool,
}

/// Client for the legacy terminal service.
///
/// Terminal sessions are server-side state owned by the legacy server; this
/// client only holds their ids and the cookies of the web session it acts for.
#[derive(Clone)]
pub struct TerminalClient {
    transport: Arc<RpcTransport>,
    jar: Arc<LegacyCookieJar>,
}

impl TerminalClient {
    /// A client with an empty cookie jar.
    #[must_use]
    pub fn new(transport: Arc<RpcTransport>) -> Self {
        Self {
            transport,
            jar: Arc::new(LegacyCookieJar::new()),
        }
    }

    /// Sends and updates `jar` on every call.
    #[must_use]
    pub fn with_jar(mut self, jar: Arc<LegacyCookieJar>) -> Self {
        self.jar = jar;
        self
    }

    #[must_use]
    pub fn jar(&self) -> &Arc<LegacyCookieJar> {
        &self.jar
    }

    /// Opens a terminal, optionally rooted at `node` with an environment mapping.
    ///
    /// # Errors
    ///
    /// Transport failures, [`Error::RemoteCommand`] on `//EX`, or
    /// [`Error::ProtocolFormat`] when the response lacks a session id.
    pub async fn init_session(
        &self,
        node: Option<&JsonValue>,
        env_mapping: Option<&BTreeMap<String, String>>,
    ) -> Result<TerminalSessionInfo, Error> {
        let params = [
            node.map_or(RpcParam::Null, |n| RpcParam::Json(n.clone())),
            env_mapping.map_or(Ok(RpcParam::Null), RpcParam::json)?,
        ];
        let map: BTreeMap<String, JsonValue> = self
            .transport
            .call(
                &self.jar,
                TERMINAL_PATH,
                TERMINAL_SERVICE,
                "initSession",
                &params,
                Idempotency::NonIdempotent,
            )
            .await?
            .into_result()?;

        let environment: BTreeMap<String, String> = map
            .into_iter()
            .map(|(k, v)| match v {
                JsonValue::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        let session_id = environment
            .get("sessionId")
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or_else(|| Error::ProtocolFormat("initSession response has no sessionId".into()))?;

        let info = TerminalSessionInfo {
            prompt: environment
                .get("prompt")
                .cloned()
                .unwrap_or_else(|| DEFAULT_PROMPT.into()),
            working_directory: environment
                .get("workingDirectory")
                .cloned()
                .unwrap_or_else(|| DEFAULT_WORKING_DIRECTORY.into()),
            session_id,
            environment,
        };
        tracing::info!(terminal_session = %info.session_id, "Terminal session initialized");
        Ok(info)
    }

    /// Runs one command. A server-side exception is a failed command, not an `Err`.
    ///
    /// Cancelling `cancel` abandons the wait; the remote command keeps running.
    ///
    /// # Errors
    ///
    /// Transport failures, [`Error::ProtocolFormat`], or [`Error::Cancelled`].
    pub async fn execute(
        &self,
        session_id: &str,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, Error> {
        tracing::debug!(terminal_session = %session_id, command = %command, "Executing terminal command");
        let params: [RpcParam; 2] = [session_id.into(), command.into()];
        let call = self.command_call("execute", &params);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(terminal_session = %session_id, "Terminal command cancelled");
                return Err(Error::Cancelled);
            }
            result = call => result?,
        };
        if result.is_error() {
            tracing::debug!(
                terminal_session = %session_id,
                error = result.error.as_deref().unwrap_or_default(),
                "Terminal command failed"
            );
        }
        Ok(result)
    }

    /// # Errors
    ///
    /// Transport failures, [`Error::RemoteCommand`] or [`Error::ProtocolFormat`].
    pub async fn autocomplete(
        &self,
        session_id: &str,
        command: &str,
        cursor: u32,
        force: bool,
    ) -> Result<AutocompleteResult, Error> {
        self.transport
            .call(
                &self.jar,
                TERMINAL_PATH,
                TERMINAL_SERVICE,
                "autocomplete",
                &[session_id.into(), command.into(), cursor.into(), force.into()],
                Idempotency::Idempotent,
            )
            .await?
            .into_result()
    }

    /// Sends Ctrl+C to the running command. Best effort.
    ///
    /// # Errors
    ///
    /// Transport failures or [`Error::ProtocolFormat`].
    pub async fn interrupt(&self, session_id: &str) -> Result<CommandResult, Error> {
        tracing::info!(terminal_session = %session_id, "Interrupting terminal command");
        self.command_call("ctrlCPressed", &[session_id.into()]).await
    }

    /// Closes a terminal. Closing an unknown or already closed session succeeds.
    ///
    /// # Errors
    ///
    /// Transport failures once retries are exhausted, or [`Error::ProtocolFormat`].
    pub async fn close_session(&self, session_id: &str) -> Result<(), Error> {
        let result = self
            .transport
            .call::<JsonValue>(
                &self.jar,
                TERMINAL_PATH,
                TERMINAL_SERVICE,
                "closeSession",
                &[session_id.into()],
                Idempotency::Idempotent,
            )
            .await?;
        match result.into_outcome() {
            RpcOutcome::Success(_) => {
                tracing::info!(terminal_session = %session_id, "Terminal session closed");
                Ok(())
            }
            RpcOutcome::Remote { message, .. } => {
                tracing::debug!(terminal_session = %session_id, reason = %message, "Terminal session already gone");
                Ok(())
            }
            RpcOutcome::Malformed(reason) => Err(Error::ProtocolFormat(reason)),
        }
    }

    async fn command_call(&self, method: &str, params: &[RpcParam]) -> Result<CommandResult, Error> {
        let result = self
            .transport
            .call::<CommandResultWire>(
                &self.jar,
                TERMINAL_PATH,
                TERMINAL_SERVICE,
                method,
                params,
                Idempotency::NonIdempotent,
            )
            .await?;
        match result.into_outcome() {
            RpcOutcome::Success(wire) => Ok(wire.into()),
            RpcOutcome::Remote { message, .. } => Ok(CommandResult::failed(message)),
            RpcOutcome::Malformed(reason) => Err(Error::ProtocolFormat(reason)),
        }
    }
}

//! GWT-RPC wire format.
//!
//! Requests are pipe-delimited:
//!
//! ```text
//! 7|0|<params+4>|<module base>|<permutation>|<service interface>|<method>|<param>...
//! ```
//!
//! Responses start with `//OK` followed by a JSON array payload, or `//EX`
//! followed by a serialized exception whose first quoted string is the message.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::Error;

pub const PROTOCOL_VERSION: &str = "7";
pub const FLAGS: &str = "0";
/// Permutation marker sent when the module's strong name is unknown.
pub const DEFAULT_PERMUTATION: &str = "strongName";

const OK_PREFIX: &str = "//OK";
const EX_PREFIX: &str = "//EX";

/// One request parameter, serialized by type.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcParam {
    Null,
    Str(String),
    Int(i64),
    Bool(bool),
    Json(JsonValue),
}

impl RpcParam {
    /// Serializes a structured value as a JSON parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolFormat`] if the value cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| Error::ProtocolFormat(format!("unencodable parameter: {e}")))
    }

    fn wire(&self) -> Cow<'_, str> {
        match self {
            Self::Null | Self::Json(JsonValue::Null) => Cow::Borrowed("null"),
            Self::Str(s) => Cow::Borrowed(s),
            Self::Int(i) => Cow::Owned(i.to_string()),
            Self::Bool(true) => Cow::Borrowed("1"),
            Self::Bool(false) => Cow::Borrowed("0"),
            Self::Json(v) => Cow::Owned(v.to_string()),
        }
    }
}

impl From<&str> for RpcParam {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for RpcParam {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for RpcParam {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for RpcParam {
    fn from(i: i32) -> Self {
        Self::Int(i.into())
    }
}

impl From<u32> for RpcParam {
    fn from(i: u32) -> Self {
        Self::Int(i.into())
    }
}

impl From<bool> for RpcParam {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<RpcParam>> From<Option<T>> for RpcParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Request encoder bound to one GWT module.
#[derive(Debug, Clone)]
pub struct RpcCodec {
    module_base_url: String,
    permutation: String,
}

impl RpcCodec {
    #[must_use]
    pub fn new(module_base_url: impl Into<String>, permutation: impl Into<String>) -> Self {
        Self {
            module_base_url: module_base_url.into(),
            permutation: permutation.into(),
        }
    }

    #[must_use]
    pub fn module_base_url(&self) -> &str {
        &self.module_base_url
    }

    #[must_use]
    pub fn permutation(&self) -> &str {
        &self.permutation
    }

    /// Builds the pipe-delimited request body.
    #[must_use]
    pub fn encode_request(
        &self,
        service_interface: &str,
        method_name: &str,
        params: &[RpcParam],
    ) -> String {
        let string_table_size = (params.len() + 4).to_string();
        let mut lines: Vec<Cow<'_, str>> = Vec::with_capacity(params.len() + 7);
        lines.extend([
            Cow::Borrowed(PROTOCOL_VERSION),
            Cow::Borrowed(FLAGS),
            Cow::Owned(string_table_size),
            Cow::Borrowed(self.module_base_url.as_str()),
            Cow::Borrowed(self.permutation.as_str()),
            Cow::Borrowed(service_interface),
            Cow::Borrowed(method_name),
        ]);
        lines.extend(params.iter().map(RpcParam::wire));
        lines.join("|")
    }
}

/// Decoded legacy response.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome<T> {
    /// `//OK` with a payload that deserialized into `T`.
    Success(T),
    /// `//EX`: the server ran the call and raised an exception.
    Remote { message: String, cause: String },
    /// Anything else. Not retryable; points at a client/server version mismatch.
    Malformed(String),
}

/// Decoded response plus the raw wire text for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResult<T> {
    raw: String,
    outcome: RpcOutcome<T>,
}

impl<T> RpcResult<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RpcOutcome::Success(_))
    }

    #[must_use]
    pub fn payload(&self) -> Option<&T> {
        match &self.outcome {
            RpcOutcome::Success(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            RpcOutcome::Success(_) => None,
            RpcOutcome::Remote { message, .. } | RpcOutcome::Malformed(message) => Some(message),
        }
    }

    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self.outcome, RpcOutcome::Malformed(_))
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn outcome(&self) -> &RpcOutcome<T> {
        &self.outcome
    }

    #[must_use]
    pub fn into_outcome(self) -> RpcOutcome<T> {
        self.outcome
    }

    /// # Errors
    ///
    /// `//EX` becomes [`Error::RemoteCommand`]; malformed input becomes
    /// [`Error::ProtocolFormat`].
    pub fn into_result(self) -> Result<T, Error> {
        match self.outcome {
            RpcOutcome::Success(v) => Ok(v),
            RpcOutcome::Remote { message, cause } => Err(Error::RemoteCommand {
                message,
                cause: Some(cause),
            }),
            RpcOutcome::Malformed(reason) => Err(Error::ProtocolFormat(reason)),
        }
    }
}

/// Decodes a raw legacy response. Never panics; malformed input yields
/// [`RpcOutcome::Malformed`].
///
/// When `T` does not accept the whole payload array, its first element is
/// tried, so single-value responses such as `//OK["x"]` decode into `String`.
#[must_use]
pub fn decode_response<T: DeserializeOwned>(raw: &str) -> RpcResult<T> {
    let outcome = if let Some(rest) = raw.strip_prefix(EX_PREFIX) {
        RpcOutcome::Remote {
            message: first_quoted(rest).unwrap_or_else(|| "server raised an exception".into()),
            cause: rest.to_owned(),
        }
    } else if raw.starts_with(OK_PREFIX) {
        decode_ok(raw)
    } else if raw.trim().is_empty() {
        RpcOutcome::Malformed("empty response".into())
    } else {
        let head: String = raw.chars().take(16).collect();
        RpcOutcome::Malformed(format!("unexpected response prefix {head:?}"))
    };

    RpcResult {
        raw: raw.to_owned(),
        outcome,
    }
}

fn decode_ok<T: DeserializeOwned>(raw: &str) -> RpcOutcome<T> {
    let Some(start) = raw[OK_PREFIX.len()..].find('[') else {
        return RpcOutcome::Malformed("missing payload array".into());
    };
    let payload = &raw[OK_PREFIX.len() + start..];

    let value: JsonValue = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return RpcOutcome::Malformed(format!("payload is not JSON: {e}")),
    };

    match T::deserialize(&value) {
        Ok(v) => RpcOutcome::Success(v),
        Err(whole) => match value.as_array().and_then(|items| items.first()) {
            Some(head) => T::deserialize(head).map_or_else(
                |_| RpcOutcome::Malformed(format!("unexpected payload shape: {whole}")),
                RpcOutcome::Success,
            ),
            None => RpcOutcome::Malformed(format!("unexpected payload shape: {whole}")),
        },
    }
}

/// First double-quoted string in `s`, JSON-unescaped.
fn first_quoted(s: &str) -> Option<String> {
    let start = s.find('"')?;
    let mut escaped = false;
    for (offset, ch) in s[start + 1..].char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => {
                let end = start + 1 + offset;
                let literal = &s[start..=end];
                return Some(
                    serde_json::from_str::<String>(literal)
                        .unwrap_or_else(|_| s[start + 1..end].to_owned()),
                );
            }
            _ => escaped = false,
        }
    }
    None
}
